use crate::network::ChannelError;

/// SDK 错误类型
///
/// 所有错误都是非致命的：出错后会话保持在明确的、可继续的状态。
#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    /// 频道拒绝加入（会话回到 Disconnected，不自动重试）
    #[error("Join failed: {0}")]
    JoinFailure(String),

    /// 批注提交被拒绝（输入框已清空，用户可手动重发）
    #[error("Push failed: {0}")]
    PushFailure(String),

    /// 传输层断开（由外部传输层负责重连）
    #[error("Transport disconnected")]
    TransportDisconnect,

    /// 会话尚未加入频道
    #[error("Not joined")]
    NotJoined,

    /// 当前状态不允许该操作
    #[error("Invalid state: cannot {op} while {from}")]
    InvalidState {
        from: crate::sync::SessionState,
        op: &'static str,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// 传输层错误（连接建立失败等）
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AnnotationError {
    fn from(error: serde_json::Error) -> Self {
        AnnotationError::Serialization(error.to_string())
    }
}

impl From<ChannelError> for AnnotationError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Timeout => AnnotationError::Timeout("channel request timed out".to_string()),
            ChannelError::Closed => AnnotationError::TransportDisconnect,
            other => AnnotationError::Transport(other.to_string()),
        }
    }
}

impl AnnotationError {
    /// 是否是频道层面的拒绝（加入或提交）
    pub fn is_rejection(&self) -> bool {
        matches!(self, AnnotationError::JoinFailure(_) | AnnotationError::PushFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, AnnotationError>;
