//! 事件系统模块 - 会话生命周期与批注流转事件
//!
//! 功能包括：
//! - 会话状态变更事件
//! - 批注接收 / 展示事件
//! - 加入失败、提交失败、传输断开通知
//! - 事件广播和监听器回调

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::sync::SessionState;
use crate::utils::now_millis;

/// 会话事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// 会话状态变更
    StateChanged {
        topic: String,
        old_state: SessionState,
        new_state: SessionState,
        timestamp: u64,
    },
    /// 新批注入库（快照或广播，去重后）
    AnnotationReceived {
        topic: String,
        annotation_id: u64,
        at: u64,
        timestamp: u64,
    },
    /// 批注已展示
    AnnotationRevealed {
        topic: String,
        annotation_id: u64,
        at: u64,
        timestamp: u64,
    },
    /// 加入频道失败
    JoinFailed {
        topic: String,
        reason: String,
        timestamp: u64,
    },
    /// 提交失败（非致命，用户可重新提交）
    PushFailed {
        topic: String,
        body: String,
        at: u64,
        reason: String,
        timestamp: u64,
    },
    /// 传输层断开，调度器继续基于现有存储运行
    TransportDisconnected { topic: String, timestamp: u64 },
}

impl SessionEvent {
    /// 事件类型名（监听器按此注册）
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged { .. } => "state_changed",
            SessionEvent::AnnotationReceived { .. } => "annotation_received",
            SessionEvent::AnnotationRevealed { .. } => "annotation_revealed",
            SessionEvent::JoinFailed { .. } => "join_failed",
            SessionEvent::PushFailed { .. } => "push_failed",
            SessionEvent::TransportDisconnected { .. } => "transport_disconnected",
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            SessionEvent::StateChanged { timestamp, .. }
            | SessionEvent::AnnotationReceived { timestamp, .. }
            | SessionEvent::AnnotationRevealed { timestamp, .. }
            | SessionEvent::JoinFailed { timestamp, .. }
            | SessionEvent::PushFailed { timestamp, .. }
            | SessionEvent::TransportDisconnected { timestamp, .. } => *timestamp,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            SessionEvent::StateChanged { topic, .. }
            | SessionEvent::AnnotationReceived { topic, .. }
            | SessionEvent::AnnotationRevealed { topic, .. }
            | SessionEvent::JoinFailed { topic, .. }
            | SessionEvent::PushFailed { topic, .. }
            | SessionEvent::TransportDisconnected { topic, .. } => topic,
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    pub fn state_changed(topic: &str, old_state: SessionState, new_state: SessionState) -> SessionEvent {
        SessionEvent::StateChanged {
            topic: topic.to_string(),
            old_state,
            new_state,
            timestamp: now_millis(),
        }
    }

    pub fn annotation_received(topic: &str, annotation_id: u64, at: u64) -> SessionEvent {
        SessionEvent::AnnotationReceived {
            topic: topic.to_string(),
            annotation_id,
            at,
            timestamp: now_millis(),
        }
    }

    pub fn annotation_revealed(topic: &str, annotation_id: u64, at: u64) -> SessionEvent {
        SessionEvent::AnnotationRevealed {
            topic: topic.to_string(),
            annotation_id,
            at,
            timestamp: now_millis(),
        }
    }

    pub fn join_failed(topic: &str, reason: String) -> SessionEvent {
        SessionEvent::JoinFailed {
            topic: topic.to_string(),
            reason,
            timestamp: now_millis(),
        }
    }

    pub fn push_failed(topic: &str, body: String, at: u64, reason: String) -> SessionEvent {
        SessionEvent::PushFailed {
            topic: topic.to_string(),
            body,
            at,
            reason,
            timestamp: now_millis(),
        }
    }

    pub fn transport_disconnected(topic: &str) -> SessionEvent {
        SessionEvent::TransportDisconnected {
            topic: topic.to_string(),
            timestamp: now_millis(),
        }
    }
}

/// 事件监听器类型
pub type EventListener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<u64>,
}

/// 事件管理器
///
/// 监听器在发布线程上同步调用，不得在回调内阻塞。
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SessionEvent>,
    /// 事件监听器映射（"*" 为通用监听器）
    listeners: Arc<parking_lot::RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<parking_lot::RwLock<EventStats>>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            stats: Arc::new(parking_lot::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: SessionEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        // 先取出监听器再释放锁，回调内可以增删监听器
        let matched: Vec<EventListener> = {
            let listeners = self.listeners.read();
            [event.event_type(), "*"]
                .iter()
                .filter_map(|key| listeners.get(*key))
                .flatten()
                .cloned()
                .collect()
        };
        for listener in matched {
            listener(&event);
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::new(listener));

        self.stats.write().listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.write().listener_count = 0;
        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_event_manager_basic_functionality() {
        let manager = EventManager::new(100);
        let mut receiver = manager.subscribe();

        manager.emit(event_builders::annotation_revealed("videos:1", 3, 9000));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "annotation_revealed");
        assert_eq!(received.topic(), "videos:1");

        let stats = manager.get_stats();
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.events_by_type.get("annotation_revealed"), Some(&1));
    }

    #[test]
    fn test_event_listeners() {
        let manager = EventManager::new(100);
        let typed = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let typed_clone = typed.clone();
        manager.add_listener("push_failed", move |_event| {
            typed_clone.fetch_add(1, Ordering::SeqCst);
        });
        let all_clone = all.clone();
        manager.add_listener("*", move |_event| {
            all_clone.fetch_add(1, Ordering::SeqCst);
        });

        manager.emit(event_builders::push_failed("videos:1", "hi".into(), 100, "closed".into()));
        manager.emit(event_builders::transport_disconnected("videos:1"));

        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get_stats().listener_count, 2);

        manager.clear_listeners();
        manager.emit(event_builders::transport_disconnected("videos:1"));
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_properties() {
        let event = event_builders::state_changed("videos:9", SessionState::Joining, SessionState::Joined);
        assert_eq!(event.event_type(), "state_changed");
        assert_eq!(event.topic(), "videos:9");
        assert!(event.timestamp() > 0);
    }

    #[test]
    fn test_listener_can_modify_listeners() {
        let manager = Arc::new(EventManager::new(16));
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_manager = manager.clone();
        let inner_calls = calls.clone();
        manager.add_listener("join_failed", move |_event| {
            let calls = inner_calls.clone();
            inner_manager.add_listener("join_failed", move |_event| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        });

        manager.emit(event_builders::join_failed("videos:1", "unauthorized".into()));
        assert_eq!(manager.get_stats().listener_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        manager.emit(event_builders::join_failed("videos:1", "unauthorized".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let clearing = manager.clone();
        manager.add_listener("*", move |_event| clearing.clear_listeners());
        manager.emit(event_builders::transport_disconnected("videos:1"));
        assert_eq!(manager.get_stats().listener_count, 0);
    }
}
