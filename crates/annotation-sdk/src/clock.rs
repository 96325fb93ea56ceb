//! 播放时钟适配
//!
//! 由播放器层实现（视频位置），引擎只依赖 `PlaybackClock` trait。

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// 播放时钟（毫秒）
pub trait PlaybackClock: Send + Sync {
    /// 当前播放位置
    fn current_time(&self) -> u64;

    /// 跳转到指定位置
    fn seek_to(&self, at: u64);
}

#[derive(Debug)]
struct MediaClockState {
    /// 最近一次锚定时的位置
    anchor_position: u64,
    /// 最近一次锚定的时刻（播放中才有）
    anchor_instant: Option<Instant>,
    /// 媒体总时长，位置不会超过它
    duration: Option<u64>,
}

/// 基于 tokio 时间的播放时钟
///
/// 播放时位置随单调时钟推进，暂停时冻结；跳转会重新锚定。
#[derive(Debug)]
pub struct MediaClock {
    state: Mutex<MediaClockState>,
}

impl MediaClock {
    /// 创建暂停在 0 的时钟
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MediaClockState {
                anchor_position: 0,
                anchor_instant: None,
                duration: None,
            }),
        }
    }

    /// 设置媒体总时长（毫秒）
    pub fn with_duration(self, duration_ms: u64) -> Self {
        self.state.lock().duration = Some(duration_ms);
        self
    }

    pub fn play(&self) {
        let mut state = self.state.lock();
        if state.anchor_instant.is_none() {
            state.anchor_instant = Some(Instant::now());
            debug!("▶️ 开始播放: position={}", state.anchor_position);
        }
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        let position = Self::position_of(&state);
        state.anchor_position = position;
        state.anchor_instant = None;
        debug!("⏸️ 暂停: position={}", position);
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().anchor_instant.is_some()
    }

    fn position_of(state: &MediaClockState) -> u64 {
        let elapsed = state
            .anchor_instant
            .map(|started| Instant::now().saturating_duration_since(started))
            .unwrap_or(Duration::ZERO);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let position = state.anchor_position.saturating_add(elapsed_ms);
        match state.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for MediaClock {
    fn current_time(&self) -> u64 {
        Self::position_of(&self.state.lock())
    }

    fn seek_to(&self, at: u64) {
        let mut state = self.state.lock();
        let target = match state.duration {
            Some(duration) => at.min(duration),
            None => at,
        };
        state.anchor_position = target;
        if state.anchor_instant.is_some() {
            state.anchor_instant = Some(Instant::now());
        }
        debug!("⏩ 跳转: position={}", target);
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// 测试用：手动推进的时钟
    #[derive(Debug, Default)]
    pub struct ManualClock {
        position: AtomicU64,
        seeks: Mutex<Vec<u64>>,
    }

    impl ManualClock {
        pub fn at(position: u64) -> Self {
            Self {
                position: AtomicU64::new(position),
                seeks: Mutex::new(Vec::new()),
            }
        }

        pub fn set(&self, position: u64) {
            self.position.store(position, Ordering::SeqCst);
        }

        pub fn advance(&self, delta: u64) {
            self.position.fetch_add(delta, Ordering::SeqCst);
        }

        /// 记录到的跳转请求
        pub fn seeks(&self) -> Vec<u64> {
            self.seeks.lock().clone()
        }
    }

    impl PlaybackClock for ManualClock {
        fn current_time(&self) -> u64 {
            self.position.load(Ordering::SeqCst)
        }

        fn seek_to(&self, at: u64) {
            self.seeks.lock().push(at);
            self.set(at);
        }
    }
}

#[cfg(test)]
pub use test_helpers::ManualClock;
