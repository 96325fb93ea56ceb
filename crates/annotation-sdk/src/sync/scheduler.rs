//! 展示调度器
//!
//! 职责：
//! - 按固定间隔采样播放时钟
//! - 出队所有到期批注并按 (at, id) 顺序同步回调
//! - 单飞：一批回调完成后才会等待下一次 tick
//!
//! 只向前展示：向后跳转不会撤销已展示的批注，
//! 大幅向前跳转时到期批注在下一次 tick 中一次性展示。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::PlaybackClock;
use crate::render::RevealSink;
use crate::store::{RevealLease, SharedStore};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// 调度句柄（可克隆，可在展示回调内调用 `stop`）
#[derive(Debug, Clone)]
pub struct RevealHandle {
    id: u64,
    token: CancellationToken,
}

impl RevealHandle {
    fn new() -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        }
    }

    /// 停止后续 tick（幂等）
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl PartialEq for RevealHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RevealHandle {}

struct RunningReveal {
    handle: RevealHandle,
    task: JoinHandle<()>,
}

/// 展示调度器
pub struct RevealScheduler {
    store: SharedStore,
    clock: Arc<dyn PlaybackClock>,
    interval: Duration,
    running: Mutex<Option<RunningReveal>>,
}

impl RevealScheduler {
    /// `interval` 为 0 时按 1ms 处理
    pub fn new(store: SharedStore, clock: Arc<dyn PlaybackClock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval: interval.max(Duration::from_millis(1)),
            running: Mutex::new(None),
        }
    }

    /// 启动轮询，返回取消句柄
    ///
    /// 已在运行时先停止旧的轮询；同一存储上其他调度器的租约也会失效。
    /// 第一次采样在一个完整间隔之后。
    pub fn start(&self, sink: Arc<dyn RevealSink>) -> RevealHandle {
        if let Some(previous) = self.running.lock().take() {
            debug!("停止上一轮展示调度");
            previous.handle.stop();
        }

        let lease = self.store.lock().acquire_reveal_lease();
        let handle = RevealHandle::new();
        let token = handle.token.clone();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if reveal_due(&store, clock.as_ref(), &lease, sink.as_ref()).is_none() {
                    debug!("展示租约已被取代，退出调度");
                    break;
                }

                if token.is_cancelled() {
                    break;
                }
            }

            store.lock().release_reveal_lease(&lease);
            debug!("展示调度已退出");
        });

        info!("▶️ 展示调度已启动: interval={}ms", self.interval.as_millis());
        *self.running.lock() = Some(RunningReveal {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// 停止轮询（幂等，可在展示回调内调用）
    ///
    /// 已出队的当前批次会完成回调，不会回滚。
    pub fn stop(&self, handle: &RevealHandle) {
        handle.stop();

        let mut running = self.running.lock();
        if running.as_ref().map(|r| &r.handle == handle).unwrap_or(false) {
            running.take();
            info!("⏹️ 展示调度已停止");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|r| !r.handle.is_stopped() && !r.task.is_finished())
            .unwrap_or(false)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for RevealScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.handle.stop();
        }
    }
}

/// 执行一次 tick；租约失效时返回 None
///
/// 出队在锁内完成，回调在锁外执行，回调内可以安全地访问存储。
fn reveal_due(
    store: &SharedStore,
    clock: &dyn PlaybackClock,
    lease: &RevealLease,
    sink: &dyn RevealSink,
) -> Option<usize> {
    let now = clock.current_time();
    let due = store.lock().drain_due_by_leased(lease, now)?;

    if !due.is_empty() {
        debug!("⏰ tick: position={}, due={}", now, due.len());
    }
    for annotation in &due {
        sink.reveal(annotation);
    }
    Some(due.len())
}
