//! SDK 版本与构建元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Build Metadata** → build.rs 中由 vergen 生成

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（由 vergen 在 build.rs 中生成）
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// 日志中使用的版本描述：`0.1.0 (abc1234, 2026-01-01T00:00:00Z)`
pub fn version_string() -> String {
    format!("{} ({}, {})", SDK_VERSION, GIT_SHA, BUILD_TIME)
}
