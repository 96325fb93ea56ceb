//! SDK 配置与构建器

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AnnotationError, Result};
use crate::network::phoenix::PhoenixOptions;

/// 默认话题前缀（话题为 `videos:{id}`）
pub const DEFAULT_TOPIC_PREFIX: &str = "videos";

/// 服务器端点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// 服务器地址（可以是域名或IP）
    pub host: String,
    /// 端口号
    pub port: u16,
    /// socket 挂载路径，例如 `/socket`
    pub path: String,
    /// 是否使用TLS（wss）
    pub use_tls: bool,
}

impl ServerEndpoint {
    /// 解析 `ws://host:port/path` 或 `wss://host:port/path`
    pub fn parse(url: &str) -> Option<Self> {
        let (use_tls, remainder) = if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else {
            return None;
        };

        let (host_port, path) = match remainder.find('/') {
            Some(slash_pos) => (&remainder[..slash_pos], remainder[slash_pos..].to_string()),
            None => (remainder, "/socket".to_string()),
        };

        let (host, port) = match host_port.rfind(':') {
            Some(colon_pos) => {
                let port = host_port[colon_pos + 1..].parse::<u16>().ok()?;
                (&host_port[..colon_pos], port)
            }
            // 没有端口时使用协议默认端口
            None => (host_port, if use_tls { 443 } else { 80 }),
        };

        if host.is_empty() {
            return None;
        }

        Some(Self {
            host: host.to_string(),
            port,
            path,
            use_tls,
        })
    }

    /// 还原为 socket 地址
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

impl Default for ServerEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4000,
            path: "/socket".to_string(),
            use_tls: false,
        }
    }
}

/// 批注同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    /// 服务器端点
    pub server: ServerEndpoint,
    /// 连接参数（如 token）
    pub connect_params: Vec<(String, String)>,
    /// 话题前缀
    pub topic_prefix: String,
    /// 展示调度轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 加入超时（秒）
    pub join_timeout_secs: u64,
    /// 提交超时（秒）
    pub push_timeout_secs: u64,
    /// 心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
    /// 事件缓冲区大小
    pub event_buffer_size: usize,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            server: ServerEndpoint::default(),
            connect_params: Vec::new(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            poll_interval_ms: 1000,
            join_timeout_secs: 10,
            push_timeout_secs: 10,
            heartbeat_interval_secs: 30,
            event_buffer_size: 256,
            debug_mode: false,
        }
    }
}

impl AnnotationConfig {
    pub fn builder() -> AnnotationConfigBuilder {
        AnnotationConfigBuilder::new()
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.topic_prefix.trim().is_empty() {
            return Err(AnnotationError::Config("topic_prefix 不能为空".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(AnnotationError::Config("poll_interval_ms 必须大于 0".to_string()));
        }
        if self.join_timeout_secs == 0 || self.push_timeout_secs == 0 {
            return Err(AnnotationError::Config("超时时间必须大于 0".to_string()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(AnnotationError::Config("heartbeat_interval_secs 必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 被批注对象的话题名
    pub fn topic_for(&self, subject_id: &str) -> String {
        format!("{}:{}", self.topic_prefix, subject_id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 日志级别：调试模式下输出每条批注的入库与展示
    pub fn log_level(&self) -> tracing::Level {
        if self.debug_mode {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Phoenix 传输参数（请求超时取加入/提交超时中较大者）
    pub fn phoenix_options(&self) -> PhoenixOptions {
        PhoenixOptions {
            timeout: Duration::from_secs(self.join_timeout_secs.max(self.push_timeout_secs)),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            params: self.connect_params.clone(),
        }
    }
}

/// 配置构建器
pub struct AnnotationConfigBuilder {
    config: AnnotationConfig,
    invalid_server_url: Option<String>,
}

impl AnnotationConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AnnotationConfig::default(),
            invalid_server_url: None,
        }
    }

    /// 设置服务器地址（ws:// 或 wss://）
    pub fn server_url<S: Into<String>>(mut self, url: S) -> Self {
        let url = url.into();
        match ServerEndpoint::parse(&url) {
            Some(endpoint) => {
                self.config.server = endpoint;
                self.invalid_server_url = None;
            }
            None => self.invalid_server_url = Some(url),
        }
        self
    }

    /// 添加连接参数
    pub fn connect_param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.connect_params.push((key.into(), value.into()));
        self
    }

    pub fn topic_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.topic_prefix = prefix.into();
        self
    }

    pub fn poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.poll_interval_ms = interval_ms;
        self
    }

    pub fn join_timeout_secs(mut self, timeout: u64) -> Self {
        self.config.join_timeout_secs = timeout;
        self
    }

    pub fn push_timeout_secs(mut self, timeout: u64) -> Self {
        self.config.push_timeout_secs = timeout;
        self
    }

    pub fn heartbeat_interval_secs(mut self, interval: u64) -> Self {
        self.config.heartbeat_interval_secs = interval;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    /// 构建并校验配置
    pub fn build(self) -> Result<AnnotationConfig> {
        if let Some(url) = self.invalid_server_url {
            return Err(AnnotationError::Config(format!(
                "不支持的服务器地址: {}（请使用 ws:// 或 wss://）",
                url
            )));
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for AnnotationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_url() {
        let endpoint = ServerEndpoint::parse("wss://annotate.example.com/socket").unwrap();
        assert_eq!(endpoint.host, "annotate.example.com");
        assert_eq!(endpoint.port, 443);
        assert!(endpoint.use_tls);
        assert_eq!(endpoint.url(), "wss://annotate.example.com:443/socket");

        let endpoint = ServerEndpoint::parse("ws://127.0.0.1:4000").unwrap();
        assert_eq!(endpoint.port, 4000);
        assert_eq!(endpoint.path, "/socket");

        assert!(ServerEndpoint::parse("http://example.com").is_none());
        assert!(ServerEndpoint::parse("ws://host:notaport/socket").is_none());
        assert!(ServerEndpoint::parse("ws://:4000/socket").is_none());
    }

    #[test]
    fn test_builder_defaults() {
        let config = AnnotationConfig::builder().build().unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.topic_for("42"), "videos:42");
        assert_eq!(config.server.url(), "ws://localhost:4000/socket");
        assert_eq!(config.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_builder_overrides() {
        let config = AnnotationConfig::builder()
            .server_url("wss://annotate.example.com:8443/live")
            .connect_param("token", "abc")
            .topic_prefix("clips")
            .poll_interval_ms(250)
            .join_timeout_secs(5)
            .push_timeout_secs(15)
            .heartbeat_interval_secs(20)
            .debug_mode(true)
            .build()
            .unwrap();

        assert_eq!(config.topic_for("7"), "clips:7");
        assert_eq!(config.log_level(), tracing::Level::DEBUG);
        let options = config.phoenix_options();
        assert_eq!(options.timeout, Duration::from_secs(15));
        assert_eq!(options.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(options.params, vec![("token".to_string(), "abc".to_string())]);
    }

    #[test]
    fn test_builder_rejects_invalid() {
        assert!(matches!(
            AnnotationConfig::builder().server_url("tcp://x:1").build(),
            Err(AnnotationError::Config(_))
        ));
        assert!(AnnotationConfig::builder().poll_interval_ms(0).build().is_err());
        assert!(AnnotationConfig::builder().topic_prefix("  ").build().is_err());
        assert!(AnnotationConfig::builder().heartbeat_interval_secs(0).build().is_err());
    }
}
