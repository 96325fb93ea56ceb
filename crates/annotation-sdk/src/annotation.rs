//! 批注数据模型与线上载荷
//!
//! 线上格式（与服务端逐字节保持一致）：
//! - 加入成功：`{ annotations: [ {id, at, body, user:{username, ...}}, ... ] }`
//! - 广播 `new_annotation`：`{id, at, body, user:{username, ...}}`
//! - 提交 `new_annotation`：`{body, at}`（无 id，由服务端分配）

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// 广播与提交共用的事件名
pub const NEW_ANNOTATION_EVENT: &str = "new_annotation";

/// 批注作者
///
/// 除 `username` 外的用户字段原样保留在 `extra` 中，保证透传不丢字段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub username: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Author {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// 批注（创建后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// 服务端分配，整个话题生命周期内单调递增
    pub id: u64,
    /// 播放偏移（毫秒）
    pub at: u64,
    pub body: String,
    #[serde(rename = "user")]
    pub author: Author,
}

impl Annotation {
    pub fn new(id: u64, at: u64, body: impl Into<String>, author: Author) -> Self {
        Self {
            id,
            at,
            body: body.into(),
            author,
        }
    }

    /// 排序键：先按 at 升序，再按 id 升序
    pub fn order_key(&self) -> (u64, u64) {
        (self.at, self.id)
    }

    /// 从广播载荷解析
    pub fn from_payload(payload: serde_json::Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(payload)?)
    }
}

impl Eq for Annotation {}

impl PartialOrd for Annotation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Annotation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// 提交载荷（`new_annotation` push）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationDraft {
    pub body: String,
    pub at: u64,
}

/// 加入成功时的快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinReply {
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// 加入参数：携带本地游标，服务端可据此只下发游标之后的批注
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinParams {
    pub last_seen_id: u64,
}

impl JoinParams {
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "last_seen_id": self.last_seen_id })
    }
}
