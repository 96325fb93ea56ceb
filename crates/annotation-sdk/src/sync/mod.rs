//! 批注同步模块
//!
//! 职责：
//! - 展示调度：按播放时钟把到期批注交给 UI（`RevealScheduler`）
//! - 会话编排：加入频道、载入快照、接收广播、提交批注（`AnnotationSession`）

pub mod scheduler;
pub mod session;

pub use scheduler::{RevealHandle, RevealScheduler};
pub use session::AnnotationSession;

use serde::{Deserialize, Serialize};

/// 会话状态
///
/// `Disconnected -> Joining -> Joined -> Left`，加入失败回到 `Disconnected`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// 未加入
    Disconnected,
    /// 加入中
    Joining,
    /// 已加入
    Joined,
    /// 已离开（终态）
    Left,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Joining => write!(f, "joining"),
            SessionState::Joined => write!(f, "joined"),
            SessionState::Left => write!(f, "left"),
        }
    }
}
