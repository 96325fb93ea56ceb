//! 工具模块

pub mod time;

pub use time::{format_offset, now_millis, PlaybackOffset};
