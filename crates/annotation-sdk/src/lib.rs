//! Annotation SDK - 视频时间轴批注实时同步引擎
//!
//! 本 SDK 提供：
//! - 📡 通过 Phoenix Channels 加入批注话题，接收实时广播
//! - 🗂️ 按播放偏移排序、按 id 去重的待展示队列
//! - ⏰ 按播放时钟把到期批注按顺序交给 UI，每条恰好一次
//! - 📤 提交批注（等待服务端广播回显后再展示）
//! - ⚙️ 事件系统：状态变更、加入/提交失败、传输断开通知
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use annotation_sdk::{Annotation, AnnotationConfig, AnnotationLine, AnnotationSession, MediaClock};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AnnotationConfig::builder()
//!         .server_url("ws://localhost:4000/socket")
//!         .connect_param("token", "user-token")
//!         .build()?;
//!
//!     let clock = Arc::new(MediaClock::new());
//!     let session = AnnotationSession::with_phoenix(
//!         config,
//!         "42",
//!         clock.clone(),
//!         Arc::new(|annotation: &Annotation| {
//!             println!("{}", AnnotationLine::from(annotation));
//!         }),
//!     )?;
//!
//!     session.connect().await?;
//!     clock.play();
//!
//!     session.submit("nice cut")?;
//!
//!     session.leave().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod version;
pub mod config;
pub mod annotation;
pub mod store;
pub mod clock;
pub mod network;
pub mod events;
pub mod render;
pub mod sync;
pub mod utils;

// 重新导出核心类型，方便使用
pub use error::{AnnotationError, Result};
pub use config::{AnnotationConfig, AnnotationConfigBuilder, ServerEndpoint, DEFAULT_TOPIC_PREFIX};
pub use annotation::{Annotation, AnnotationDraft, Author, JoinParams, JoinReply, NEW_ANNOTATION_EVENT};
pub use store::{AnnotationStore, RevealLease, SharedStore};
pub use clock::{MediaClock, PlaybackClock};
pub use network::{ChannelError, ChannelHandle, ChannelTransport, ParamsFn, PhoenixSocket};
pub use network::phoenix::PhoenixOptions;
pub use events::{EventManager, EventStats, SessionEvent};
pub use render::{AnnotationLine, RevealSink};
pub use sync::{AnnotationSession, RevealHandle, RevealScheduler, SessionState};
pub use utils::{format_offset, PlaybackOffset};
