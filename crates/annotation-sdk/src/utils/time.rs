//! 时间处理工具模块
//!
//! - 事件时间戳：UTC 毫秒（`Utc::now().timestamp_millis()`）
//! - 播放偏移：自播放起点的毫秒数，显示为 `mm:ss`

use chrono::{NaiveTime, Utc};
use std::fmt;

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// 播放偏移（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaybackOffset(pub u64);

impl PlaybackOffset {
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// 整秒数（向下取整）
    pub fn whole_seconds(&self) -> u64 {
        self.0 / 1000
    }
}

impl fmt::Display for PlaybackOffset {
    /// 只显示分:秒，整小时部分会被折叠（01:02:03 显示为 02:03）
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds_of_day = (self.whole_seconds() % 86_400) as u32;
        match NaiveTime::from_num_seconds_from_midnight_opt(seconds_of_day, 0) {
            Some(time) => write!(f, "{}", time.format("%M:%S")),
            None => write!(f, "--:--"),
        }
    }
}

/// 格式化播放偏移为 `mm:ss`
pub fn format_offset(at_ms: u64) -> String {
    PlaybackOffset(at_ms).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(0), "00:00");
        assert_eq!(format_offset(999), "00:00");
        assert_eq!(format_offset(5000), "00:05");
        assert_eq!(format_offset(61_500), "01:01");
        assert_eq!(format_offset(59 * 60_000 + 59_000), "59:59");
    }

    #[test]
    fn test_format_offset_wraps_hours() {
        assert_eq!(format_offset(3_600_000), "00:00");
        assert_eq!(format_offset(3_723_000), "02:03");
    }

    #[test]
    fn test_now_millis() {
        assert!(now_millis() > 1_600_000_000_000);
    }
}
