//! Global configuration types for Courier.
//!
//! `GlobalConfig` represents the top-level `config.toml`: the default step
//! execution policy and settings for the HTTP request capability.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the engine.
///
/// Loaded from `~/.courier/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default retry/timeout policy for steps that do not set their own.
    #[serde(default)]
    pub execution: ExecutionPolicy,

    /// Settings for the outbound HTTP request capability.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Process-wide default step policy.
///
/// Node configuration (`retryCount`, `retryDelayMs`, `timeoutMs`) overrides
/// each field individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Additional attempts after the first failure.
    #[serde(default)]
    pub retry_count: u32,
    /// Base backoff delay; attempt `n` waits `retry_delay_ms * 2^n`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Per-attempt timeout. `0` disables the timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            retry_count: 0,
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "courier-workflow/0.1".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}
