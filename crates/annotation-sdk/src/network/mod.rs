//! 频道传输层抽象
//!
//! 引擎只依赖 `ChannelTransport` / `ChannelHandle` 两个 trait：
//! - 生产实现：`PhoenixSocket`（Phoenix Channels V2 over WebSocket）
//! - 测试实现：`test_helpers::FakeTransport`

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod phoenix;

pub use phoenix::PhoenixSocket;

/// 加入参数生成器（每次加入时调用，携带最新游标）
pub type ParamsFn = Box<dyn Fn() -> Value + Send + Sync>;

/// 频道请求错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// 服务端回复 `error`，携带原因
    #[error("rejected: {0}")]
    Rejected(Value),

    #[error("request timed out")]
    Timeout,

    /// 连接或频道已关闭
    #[error("channel closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    /// 提取服务端给出的原因（`{"reason": ...}` 或原样）
    pub fn reason(&self) -> String {
        match self {
            ChannelError::Rejected(value) => value
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            other => other.to_string(),
        }
    }
}

/// 频道传输（由外部实现连接与重连）
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// 建立传输层连接（幂等）
    async fn connect(&self) -> Result<(), ChannelError>;

    /// 获取命名话题的频道句柄
    fn channel(&self, topic: &str, params: ParamsFn) -> Arc<dyn ChannelHandle>;

    fn is_connected(&self) -> bool;
}

/// 单个话题的频道句柄
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    fn topic(&self) -> &str;

    /// 加入话题，成功时返回快照载荷
    async fn join(&self) -> Result<Value, ChannelError>;

    /// 推送事件，返回服务端回复
    async fn push(&self, event: &str, payload: Value) -> Result<Value, ChannelError>;

    /// 订阅服务端广播；接收端关闭表示频道/连接已断开
    fn on(&self, event: &str) -> mpsc::UnboundedReceiver<Value>;

    /// 离开话题，释放订阅
    async fn leave(&self) -> Result<(), ChannelError>;
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    struct FakeChannelState {
        join_replies: VecDeque<Result<Value, ChannelError>>,
        join_params: Vec<Value>,
        push_replies: VecDeque<Result<Value, ChannelError>>,
        pushes: Vec<(String, Value)>,
        subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
        left: bool,
    }

    /// 测试用频道：脚本化加入/推送回复，记录推送，手动注入广播
    pub struct FakeChannel {
        topic: String,
        params: ParamsFn,
        state: Mutex<FakeChannelState>,
    }

    impl FakeChannel {
        /// 模拟服务端广播
        pub fn broadcast(&self, event: &str, payload: Value) {
            let mut state = self.state.lock();
            if let Some(senders) = state.subscribers.get_mut(event) {
                senders.retain(|tx| tx.send(payload.clone()).is_ok());
            }
        }

        /// 模拟连接断开：关闭所有订阅
        pub fn disconnect(&self) {
            self.state.lock().subscribers.clear();
        }

        pub fn pushes(&self) -> Vec<(String, Value)> {
            self.state.lock().pushes.clone()
        }

        pub fn join_params(&self) -> Vec<Value> {
            self.state.lock().join_params.clone()
        }

        pub fn has_left(&self) -> bool {
            self.state.lock().left
        }
    }

    #[async_trait]
    impl ChannelHandle for FakeChannel {
        fn topic(&self) -> &str {
            &self.topic
        }

        async fn join(&self) -> Result<Value, ChannelError> {
            let params = (self.params)();
            let mut state = self.state.lock();
            state.join_params.push(params);
            state
                .join_replies
                .pop_front()
                .unwrap_or_else(|| Ok(serde_json::json!({"annotations": []})))
        }

        async fn push(&self, event: &str, payload: Value) -> Result<Value, ChannelError> {
            let mut state = self.state.lock();
            state.pushes.push((event.to_string(), payload));
            state
                .push_replies
                .pop_front()
                .unwrap_or_else(|| Ok(serde_json::json!({})))
        }

        fn on(&self, event: &str) -> mpsc::UnboundedReceiver<Value> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.state
                .lock()
                .subscribers
                .entry(event.to_string())
                .or_default()
                .push(tx);
            rx
        }

        async fn leave(&self) -> Result<(), ChannelError> {
            let mut state = self.state.lock();
            state.left = true;
            state.subscribers.clear();
            Ok(())
        }
    }

    /// 测试用传输
    #[derive(Default)]
    pub struct FakeTransport {
        connects: Mutex<usize>,
        join_replies: Mutex<VecDeque<Result<Value, ChannelError>>>,
        push_replies: Mutex<VecDeque<Result<Value, ChannelError>>>,
        channels: Mutex<Vec<Arc<FakeChannel>>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// 预置下一次加入的回复
        pub fn reply_join(&self, reply: Result<Value, ChannelError>) {
            self.join_replies.lock().push_back(reply);
        }

        /// 预置下一次推送的回复
        pub fn reply_push(&self, reply: Result<Value, ChannelError>) {
            self.push_replies.lock().push_back(reply);
        }

        pub fn connect_count(&self) -> usize {
            *self.connects.lock()
        }

        /// 最近创建的频道
        pub fn last_channel(&self) -> Option<Arc<FakeChannel>> {
            self.channels.lock().last().cloned()
        }
    }

    #[async_trait]
    impl ChannelTransport for FakeTransport {
        async fn connect(&self) -> Result<(), ChannelError> {
            *self.connects.lock() += 1;
            Ok(())
        }

        fn channel(&self, topic: &str, params: ParamsFn) -> Arc<dyn ChannelHandle> {
            let channel = Arc::new(FakeChannel {
                topic: topic.to_string(),
                params,
                state: Mutex::new(FakeChannelState {
                    join_replies: std::mem::take(&mut *self.join_replies.lock()),
                    push_replies: std::mem::take(&mut *self.push_replies.lock()),
                    ..Default::default()
                }),
            });
            self.channels.lock().push(channel.clone());
            channel
        }

        fn is_connected(&self) -> bool {
            *self.connects.lock() > 0
        }
    }
}

#[cfg(test)]
pub use test_helpers::{FakeChannel, FakeTransport};
