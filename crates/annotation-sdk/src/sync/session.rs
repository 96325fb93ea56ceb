//! 批注同步会话
//!
//! 职责：
//! - 加入 `{prefix}:{id}` 话题，携带 `last_seen_id` 游标
//! - 加入成功后用快照初始化存储、启动展示调度
//! - 广播 `new_annotation` 去重后入库，由调度器在到期时展示
//! - 提交批注（只推送，不直接入库，等待服务端广播回显）
//! - 离开话题并停止调度
//!
//! 状态机：`Disconnected -> Joining -> Joined -> Left`，加入失败回到 `Disconnected`。

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::annotation::{Annotation, AnnotationDraft, JoinParams, JoinReply, NEW_ANNOTATION_EVENT};
use crate::clock::PlaybackClock;
use crate::config::AnnotationConfig;
use crate::error::{AnnotationError, Result};
use crate::events::{event_builders, EventManager, SessionEvent};
use crate::network::{ChannelHandle, ChannelTransport, PhoenixSocket};
use crate::render::RevealSink;
use crate::store::{AnnotationStore, SharedStore};
use crate::sync::scheduler::{RevealHandle, RevealScheduler};
use crate::sync::SessionState;
use crate::version::version_string;

/// 展示回调包装：先交给 UI，再发布展示事件
struct SessionRevealSink {
    topic: String,
    inner: Arc<dyn RevealSink>,
    events: Arc<EventManager>,
}

impl RevealSink for SessionRevealSink {
    fn reveal(&self, annotation: &Annotation) {
        self.inner.reveal(annotation);
        self.events
            .emit(event_builders::annotation_revealed(&self.topic, annotation.id, annotation.at));
    }
}

/// 加入过程守卫
///
/// connect 未走到 `Joined`（出错返回或 future 被丢弃）时把 `Joining` 回滚为 `Disconnected`。
struct JoiningGuard<'a> {
    session: &'a AnnotationSession,
    armed: bool,
}

impl JoiningGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for JoiningGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.session.state() == SessionState::Joining {
            warn!("加入被中断，回到 Disconnected: {}", self.session.topic);
            self.session.transition(SessionState::Disconnected);
        }
    }
}

/// 批注同步会话
pub struct AnnotationSession {
    config: AnnotationConfig,
    topic: String,
    transport: Arc<dyn ChannelTransport>,
    clock: Arc<dyn PlaybackClock>,
    store: SharedStore,
    scheduler: RevealScheduler,
    sink: Arc<dyn RevealSink>,
    event_manager: Arc<EventManager>,
    state: RwLock<SessionState>,
    channel: Mutex<Option<Arc<dyn ChannelHandle>>>,
    reveal_handle: Mutex<Option<RevealHandle>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// 串行化 connect / resync / leave
    lifecycle: tokio::sync::Mutex<()>,
}

impl AnnotationSession {
    /// 创建会话（未加入）
    ///
    /// `subject_id` 为被批注对象的 id，话题名为 `{topic_prefix}:{subject_id}`。
    pub fn new(
        config: AnnotationConfig,
        subject_id: &str,
        transport: Arc<dyn ChannelTransport>,
        clock: Arc<dyn PlaybackClock>,
        sink: Arc<dyn RevealSink>,
    ) -> Result<Self> {
        config.validate()?;
        if subject_id.trim().is_empty() {
            return Err(AnnotationError::InvalidInput("subject_id 不能为空".to_string()));
        }

        let topic = config.topic_for(subject_id);
        let store = AnnotationStore::shared();
        let scheduler = RevealScheduler::new(store.clone(), clock.clone(), config.poll_interval());
        let event_manager = Arc::new(EventManager::new(config.event_buffer_size));

        debug!("创建批注会话: topic={}", topic);

        Ok(Self {
            config,
            topic,
            transport,
            clock,
            store,
            scheduler,
            sink,
            event_manager,
            state: RwLock::new(SessionState::Disconnected),
            channel: Mutex::new(None),
            reveal_handle: Mutex::new(None),
            pump: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// 使用 Phoenix WebSocket 传输创建会话
    pub fn with_phoenix(
        config: AnnotationConfig,
        subject_id: &str,
        clock: Arc<dyn PlaybackClock>,
        sink: Arc<dyn RevealSink>,
    ) -> Result<Self> {
        let socket = PhoenixSocket::new(config.server.url(), config.phoenix_options());
        Self::new(config, subject_id, Arc::new(socket), clock, sink)
    }

    // ========== 生命周期 ==========

    /// 加入话题
    ///
    /// 成功后存储由快照初始化、展示调度开始运行。
    /// 加入被拒绝时会话回到 `Disconnected`，不自动重试。
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let current = self.state();
        if current != SessionState::Disconnected {
            return Err(AnnotationError::InvalidState { from: current, op: "connect" });
        }

        info!("正在加入话题: {}", self.topic);
        self.transition(SessionState::Joining);
        let mut joining = JoiningGuard {
            session: self,
            armed: true,
        };

        match tokio::time::timeout(self.join_timeout(), self.transport.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let reason = e.to_string();
                return Err(self.fail_join(&reason, AnnotationError::from(e)));
            }
            Err(_) => {
                return Err(self.fail_join(
                    "timeout",
                    AnnotationError::Timeout(format!("连接超时: {}", self.topic)),
                ));
            }
        }

        let store = self.store.clone();
        let channel = self.transport.channel(
            &self.topic,
            Box::new(move || {
                JoinParams {
                    last_seen_id: store.lock().last_seen_id(),
                }
                .to_payload()
            }),
        );

        // 先订阅再加入：快照与广播之间的消息缓存在接收端，不会丢失
        let broadcasts = channel.on(NEW_ANNOTATION_EVENT);

        let payload = match tokio::time::timeout(self.join_timeout(), channel.join()).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                let reason = e.reason();
                return Err(self.fail_join(&reason, AnnotationError::JoinFailure(reason.clone())));
            }
            Err(_) => {
                return Err(self.fail_join(
                    "timeout",
                    AnnotationError::Timeout(format!("加入话题超时: {}", self.topic)),
                ));
            }
        };

        let reply: JoinReply = match serde_json::from_value(payload) {
            Ok(reply) => reply,
            Err(e) => {
                let reason = format!("无法解析加入回复: {}", e);
                return Err(self.fail_join(&reason, AnnotationError::from(e)));
            }
        };

        let snapshot_len = reply.annotations.len();
        let (pending, last_seen_id) = {
            let mut store = self.store.lock();
            store.seed(reply.annotations);
            (store.pending_len(), store.last_seen_id())
        };

        let handle = self.scheduler.start(Arc::new(SessionRevealSink {
            topic: self.topic.clone(),
            inner: self.sink.clone(),
            events: self.event_manager.clone(),
        }));
        *self.reveal_handle.lock() = Some(handle);

        self.replace_pump(broadcasts);
        *self.channel.lock() = Some(channel);

        self.transition(SessionState::Joined);
        joining.disarm();
        info!(
            "✅ 已加入话题: {} (snapshot={}, pending={}, last_seen_id={}, sdk={})",
            self.topic,
            snapshot_len,
            pending,
            last_seen_id,
            version_string()
        );
        Ok(())
    }

    /// 重新加入以补齐遗漏的批注
    ///
    /// 回复中的批注按广播方式合并（去重，不清空待展示队列），返回新入库数量。
    /// 广播订阅随之重建，传输断开后调用可以恢复接收。
    pub async fn resync(&self) -> Result<usize> {
        let _guard = self.lifecycle.lock().await;
        let channel = self.joined_channel()?;

        info!("🔄 重新同步话题: {}", self.topic);
        let broadcasts = channel.on(NEW_ANNOTATION_EVENT);
        let payload = match tokio::time::timeout(self.join_timeout(), channel.join()).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!("⚠️ 重新同步失败: {}", e);
                return Err(AnnotationError::JoinFailure(e.reason()));
            }
            Err(_) => {
                warn!("⚠️ 重新同步超时: {}", self.topic);
                return Err(AnnotationError::Timeout(format!("重新同步超时: {}", self.topic)));
            }
        };

        self.replace_pump(broadcasts);

        let reply: JoinReply = serde_json::from_value(payload)?;
        let received = ingest_batch(&self.store, &self.event_manager, &self.topic, reply.annotations);
        info!("✅ 重新同步完成: {} 条新批注", received);
        Ok(received)
    }

    /// 离开话题（幂等）
    ///
    /// 停止展示调度、取消广播订阅；之后会话不可再加入。
    pub async fn leave(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        match self.state() {
            SessionState::Left => return Ok(()),
            SessionState::Joining => {
                return Err(AnnotationError::InvalidState {
                    from: SessionState::Joining,
                    op: "leave",
                })
            }
            SessionState::Disconnected | SessionState::Joined => {}
        }

        info!("正在离开话题: {}", self.topic);
        self.stop_tasks();
        let channel = self.channel.lock().take();
        self.transition(SessionState::Left);

        if let Some(channel) = channel {
            if let Err(e) = channel.leave().await {
                warn!("离开话题失败（可忽略）: {}", e);
            }
        }

        info!("👋 已离开话题: {}", self.topic);
        Ok(())
    }

    // ========== 提交 ==========

    /// 提交批注（发出即返回）
    ///
    /// 时间取提交时刻的播放位置；提交结果只通过 `PushFailed` 事件报告。
    /// 本地不会立即展示，等待服务端广播回显后按正常流程入库。
    pub fn submit(&self, body: &str) -> Result<()> {
        let (channel, draft) = self.prepare_draft(body)?;
        let timeout = self.push_timeout();
        let events = self.event_manager.clone();
        let topic = self.topic.clone();

        tokio::spawn(async move {
            let _ = push_draft(channel, draft, timeout, events, topic).await;
        });
        Ok(())
    }

    /// 提交批注并等待服务端回复
    pub async fn submit_and_wait(&self, body: &str) -> Result<()> {
        let (channel, draft) = self.prepare_draft(body)?;
        push_draft(
            channel,
            draft,
            self.push_timeout(),
            self.event_manager.clone(),
            self.topic.clone(),
        )
        .await
    }

    /// 跳转播放位置（点击批注时间标签）
    pub fn seek_to(&self, at: u64) {
        debug!("⏩ 跳转到批注位置: {}", at);
        self.clock.seek_to(at);
    }

    // ========== 查询 ==========

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_joined(&self) -> bool {
        self.state() == SessionState::Joined
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn last_seen_id(&self) -> u64 {
        self.store.lock().last_seen_id()
    }

    /// 待展示批注数量
    pub fn pending_count(&self) -> usize {
        self.store.lock().pending_len()
    }

    /// 展示调度是否在运行
    pub fn is_revealing(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn config(&self) -> &AnnotationConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_manager.subscribe()
    }

    // ========== 内部 ==========

    fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.config.join_timeout_secs)
    }

    fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.config.push_timeout_secs)
    }

    fn transition(&self, new_state: SessionState) {
        let old_state = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state)
        };
        if old_state != new_state {
            debug!("会话状态: {} -> {}", old_state, new_state);
            self.event_manager
                .emit(event_builders::state_changed(&self.topic, old_state, new_state));
        }
    }

    fn fail_join(&self, reason: &str, error: AnnotationError) -> AnnotationError {
        error!("❌ 加入话题失败: {} ({})", self.topic, reason);
        self.transition(SessionState::Disconnected);
        self.event_manager
            .emit(event_builders::join_failed(&self.topic, reason.to_string()));
        error
    }

    fn joined_channel(&self) -> Result<Arc<dyn ChannelHandle>> {
        if self.state() != SessionState::Joined {
            return Err(AnnotationError::NotJoined);
        }
        self.channel.lock().clone().ok_or(AnnotationError::NotJoined)
    }

    fn prepare_draft(&self, body: &str) -> Result<(Arc<dyn ChannelHandle>, AnnotationDraft)> {
        if body.trim().is_empty() {
            return Err(AnnotationError::InvalidInput("批注内容不能为空".to_string()));
        }
        let channel = self.joined_channel()?;
        let draft = AnnotationDraft {
            body: body.to_string(),
            at: self.clock.current_time(),
        };
        Ok((channel, draft))
    }

    /// 用新的订阅替换广播泵（旧泵直接中止，不报告断开）
    fn replace_pump(&self, broadcasts: mpsc::UnboundedReceiver<Value>) {
        let pump = tokio::spawn(pump_broadcasts(
            broadcasts,
            self.store.clone(),
            self.event_manager.clone(),
            self.topic.clone(),
        ));
        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }
    }

    fn stop_tasks(&self) {
        if let Some(handle) = self.reveal_handle.lock().take() {
            self.scheduler.stop(&handle);
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

impl Drop for AnnotationSession {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

/// 推送一条批注，失败时发布 `PushFailed`
async fn push_draft(
    channel: Arc<dyn ChannelHandle>,
    draft: AnnotationDraft,
    timeout: Duration,
    events: Arc<EventManager>,
    topic: String,
) -> Result<()> {
    let payload = serde_json::to_value(&draft)?;

    let reason = match tokio::time::timeout(timeout, channel.push(NEW_ANNOTATION_EVENT, payload)).await {
        Ok(Ok(_)) => {
            debug!("📤 批注已提交: at={}", draft.at);
            return Ok(());
        }
        Ok(Err(e)) => e.reason(),
        Err(_) => "timeout".to_string(),
    };

    warn!("⚠️ 批注提交失败: {} ({})", topic, reason);
    events.emit(event_builders::push_failed(&topic, draft.body, draft.at, reason.clone()));
    Err(AnnotationError::PushFailure(reason))
}

/// 批量入库，返回新入库数量
///
/// 事件在释放存储锁后发布，监听器内可以查询会话。
fn ingest_batch(
    store: &SharedStore,
    events: &EventManager,
    topic: &str,
    annotations: impl IntoIterator<Item = Annotation>,
) -> usize {
    let received: Vec<(u64, u64)> = {
        let mut store = store.lock();
        annotations
            .into_iter()
            .filter_map(|annotation| {
                let key = (annotation.id, annotation.at);
                if store.ingest(annotation) {
                    Some(key)
                } else {
                    debug!("忽略重复批注: id={}", key.0);
                    None
                }
            })
            .collect()
    };

    for (id, at) in &received {
        events.emit(event_builders::annotation_received(topic, *id, *at));
    }
    received.len()
}

/// 广播泵：解析 `new_annotation` 并入库，订阅关闭时报告断开
async fn pump_broadcasts(
    mut broadcasts: mpsc::UnboundedReceiver<Value>,
    store: SharedStore,
    events: Arc<EventManager>,
    topic: String,
) {
    while let Some(payload) = broadcasts.recv().await {
        match Annotation::from_payload(payload) {
            Ok(annotation) => {
                debug!("📥 收到批注广播: id={}, at={}", annotation.id, annotation.at);
                ingest_batch(&store, &events, &topic, std::iter::once(annotation));
            }
            Err(e) => warn!("⚠️ 忽略无法解析的广播: {}", e),
        }
    }

    warn!("🔌 频道订阅已关闭，继续展示已有批注: {}", topic);
    events.emit(event_builders::transport_disconnected(&topic));
}
