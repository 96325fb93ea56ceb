//! Phoenix Channels 传输实现（V2 JSON 序列化）
//!
//! 帧格式：`[join_ref, ref, topic, event, payload]`
//! - 加入 `phx_join`，离开 `phx_leave`
//! - 回复 `phx_reply`，载荷 `{status, response}`
//! - 心跳：话题 `phoenix`，事件 `heartbeat`
//!
//! 只负责单次连接；断线后订阅端会被关闭，重连由上层决定。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ChannelError, ChannelHandle, ChannelTransport, ParamsFn};

const PHX_JOIN: &str = "phx_join";
const PHX_LEAVE: &str = "phx_leave";
const PHX_REPLY: &str = "phx_reply";
const PHX_ERROR: &str = "phx_error";
const PHX_CLOSE: &str = "phx_close";
const HEARTBEAT_TOPIC: &str = "phoenix";
const HEARTBEAT_EVENT: &str = "heartbeat";

/// V2 序列化帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame(
    pub Option<String>,
    pub Option<String>,
    pub String,
    pub String,
    pub Value,
);

impl PhoenixFrame {
    pub fn join_ref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn msg_ref(&self) -> Option<&str> {
        self.1.as_deref()
    }

    pub fn topic(&self) -> &str {
        &self.2
    }

    pub fn event(&self) -> &str {
        &self.3
    }

    pub fn payload(&self) -> &Value {
        &self.4
    }
}

/// Phoenix 连接配置
#[derive(Debug, Clone)]
pub struct PhoenixOptions {
    /// 单次请求（join/push/leave）超时
    pub timeout: Duration,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 连接参数（拼接到 URL query）
    pub params: Vec<(String, String)>,
}

impl Default for PhoenixOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            params: Vec::new(),
        }
    }
}

type Subscribers = HashMap<String, HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>;

/// 连接内部状态（读写任务与频道句柄共享）
#[derive(Default)]
struct SocketInner {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    subscribers: Mutex<Subscribers>,
    /// topic -> 当前有效的 join_ref
    join_refs: Mutex<HashMap<String, String>>,
    ref_counter: AtomicU64,
    connected: AtomicBool,
}

impl SocketInner {
    fn next_ref(&self) -> String {
        (self.ref_counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn send_frame(&self, frame: &PhoenixFrame) -> Result<(), ChannelError> {
        let text = serde_json::to_string(frame)
            .map_err(|e| ChannelError::Transport(format!("encode frame: {}", e)))?;
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(ChannelError::Closed)?;
        sender
            .send(Message::text(text))
            .map_err(|_| ChannelError::Closed)
    }

    /// 发送请求并等待 phx_reply
    async fn request(&self, frame: PhoenixFrame, timeout: Duration) -> Result<Value, ChannelError> {
        let msg_ref = frame
            .msg_ref()
            .ok_or_else(|| ChannelError::Transport("request frame without ref".to_string()))?
            .to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(msg_ref.clone(), tx);

        if let Err(e) = self.send_frame(&frame) {
            self.pending.lock().remove(&msg_ref);
            return Err(e);
        }

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(ChannelError::Closed),
            Err(_) => {
                self.pending.lock().remove(&msg_ref);
                warn!("⏱️ 请求超时: topic={}, event={}", frame.topic(), frame.event());
                return Err(ChannelError::Timeout);
            }
        };

        let response = reply.get("response").cloned().unwrap_or(Value::Null);
        match reply.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(response),
            Some("error") => Err(ChannelError::Rejected(response)),
            other => Err(ChannelError::Transport(format!("unexpected reply status: {:?}", other))),
        }
    }

    /// 分发一条入站帧
    fn dispatch(&self, frame: PhoenixFrame) {
        if frame.event() == PHX_REPLY {
            if let Some(msg_ref) = frame.1.clone() {
                let waiter = self.pending.lock().remove(&msg_ref);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame.4);
                    }
                    None => debug!("收到未知 ref 的回复: ref={}", msg_ref),
                }
            }
            return;
        }

        if self.is_outdated(&frame) {
            debug!(
                "丢弃过期消息: topic={}, event={}, join_ref={:?}",
                frame.topic(),
                frame.event(),
                frame.join_ref()
            );
            return;
        }

        if frame.event() == PHX_ERROR || frame.event() == PHX_CLOSE {
            warn!("频道已关闭: topic={}, event={}", frame.topic(), frame.event());
            self.subscribers.lock().remove(frame.topic());
            self.join_refs.lock().remove(frame.topic());
            return;
        }

        let mut subscribers = self.subscribers.lock();
        if let Some(senders) = subscribers
            .get_mut(frame.topic())
            .and_then(|events| events.get_mut(frame.event()))
        {
            senders.retain(|tx| tx.send(frame.4.clone()).is_ok());
        } else {
            debug!("无订阅者的广播: topic={}, event={}", frame.topic(), frame.event());
        }
    }

    /// 帧携带的 join_ref 与话题当前的 join_ref 不一致（属于已被取代的加入）
    fn is_outdated(&self, frame: &PhoenixFrame) -> bool {
        match (frame.join_ref(), self.join_refs.lock().get(frame.topic())) {
            (Some(frame_ref), Some(current)) => frame_ref != current,
            _ => false,
        }
    }

    fn subscribe(&self, topic: &str, event: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .entry(event.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// 连接断开：失败所有等待中的请求并关闭订阅
    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.outbound.lock().take();
        self.pending.lock().clear();
        self.subscribers.lock().clear();
        self.join_refs.lock().clear();
    }
}

/// Phoenix Socket
pub struct PhoenixSocket {
    endpoint: String,
    options: PhoenixOptions,
    inner: Arc<SocketInner>,
    connect_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PhoenixSocket {
    /// `endpoint` 为 socket 挂载地址，例如 `ws://localhost:4000/socket`
    pub fn new(endpoint: impl Into<String>, options: PhoenixOptions) -> Self {
        Self {
            endpoint: endpoint.into(),
            options,
            inner: Arc::new(SocketInner::default()),
            connect_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 实际连接的 URL：`{endpoint}/websocket?vsn=2.0.0&...`
    pub fn websocket_url(&self) -> String {
        let mut url = format!("{}/websocket?vsn=2.0.0", self.endpoint.trim_end_matches('/'));
        for (key, value) in &self.options.params {
            url.push('&');
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    /// 主动断开
    pub fn disconnect(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.mark_closed();
        info!("Phoenix socket 已断开");
    }
}

#[async_trait]
impl ChannelTransport for PhoenixSocket {
    async fn connect(&self) -> Result<(), ChannelError> {
        let _guard = self.connect_lock.lock().await;
        if self.inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let url = self.websocket_url();
        info!("正在连接 Phoenix socket: {}", self.endpoint);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        *self.inner.outbound.lock() = Some(out_tx);
        self.inner.connected.store(true, Ordering::SeqCst);

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = ws_sink.send(message).await {
                    warn!("WebSocket 写入失败: {}", e);
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        let inner = self.inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<PhoenixFrame>(text.as_str()) {
                        Ok(frame) => inner.dispatch(frame),
                        Err(e) => warn!("无法解析的帧: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("服务端关闭连接");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket 读取错误: {}", e);
                        break;
                    }
                }
            }
            inner.mark_closed();
        });

        let inner = self.inner.clone();
        let heartbeat_interval = self.options.heartbeat_interval;
        let timeout = self.options.timeout;
        let heartbeat = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + heartbeat_interval;
            let mut interval = tokio::time::interval_at(start, heartbeat_interval);
            loop {
                interval.tick().await;
                if !inner.connected.load(Ordering::SeqCst) {
                    break;
                }
                let frame = PhoenixFrame(
                    None,
                    Some(inner.next_ref()),
                    HEARTBEAT_TOPIC.to_string(),
                    HEARTBEAT_EVENT.to_string(),
                    json!({}),
                );
                if let Err(e) = inner.request(frame, timeout).await {
                    warn!("💔 心跳失败，关闭连接: {}", e);
                    inner.mark_closed();
                    break;
                }
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.extend([writer, reader, heartbeat]);

        info!("✅ Phoenix socket 已连接");
        Ok(())
    }

    fn channel(&self, topic: &str, params: ParamsFn) -> Arc<dyn ChannelHandle> {
        Arc::new(PhoenixChannel {
            inner: self.inner.clone(),
            topic: topic.to_string(),
            params,
            join_ref: Mutex::new(None),
            timeout: self.options.timeout,
        })
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

impl Drop for PhoenixSocket {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Phoenix 频道句柄
pub struct PhoenixChannel {
    inner: Arc<SocketInner>,
    topic: String,
    params: ParamsFn,
    join_ref: Mutex<Option<String>>,
    timeout: Duration,
}

impl PhoenixChannel {
    fn frame(&self, event: &str, payload: Value) -> PhoenixFrame {
        PhoenixFrame(
            self.join_ref.lock().clone(),
            Some(self.inner.next_ref()),
            self.topic.clone(),
            event.to_string(),
            payload,
        )
    }
}

#[async_trait]
impl ChannelHandle for PhoenixChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn join(&self) -> Result<Value, ChannelError> {
        let join_ref = self.inner.next_ref();
        *self.join_ref.lock() = Some(join_ref.clone());
        self.inner
            .join_refs
            .lock()
            .insert(self.topic.clone(), join_ref.clone());

        let frame = PhoenixFrame(
            Some(join_ref.clone()),
            Some(join_ref),
            self.topic.clone(),
            PHX_JOIN.to_string(),
            (self.params)(),
        );
        debug!("加入话题: {}", self.topic);
        self.inner.request(frame, self.timeout).await
    }

    async fn push(&self, event: &str, payload: Value) -> Result<Value, ChannelError> {
        let frame = self.frame(event, payload);
        self.inner.request(frame, self.timeout).await
    }

    fn on(&self, event: &str) -> mpsc::UnboundedReceiver<Value> {
        self.inner.subscribe(&self.topic, event)
    }

    async fn leave(&self) -> Result<(), ChannelError> {
        let frame = self.frame(PHX_LEAVE, json!({}));
        let result = self.inner.request(frame, self.timeout).await;
        self.inner.subscribers.lock().remove(&self.topic);
        self.inner.join_refs.lock().remove(&self.topic);
        *self.join_ref.lock() = None;
        result.map(|_| ())
    }
}
