//! # Bridge Configuration
//!
//! Constructor/environment configuration for the orchestration bridge. There is no
//! CLI surface; hosts either build a [`BridgeConfig`] in code or load one with
//! [`ConfigLoader`], which layers compiled defaults, an optional TOML file and
//! `TASKER_BRIDGE_*` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_agent_bridge::config::BridgeConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::load()?;
//! println!("Task Service: {}", config.base_url);
//! println!("Retry budget: {} attempts", config.retry.max_attempts);
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{BridgeError, BridgeResult};

pub use loader::ConfigLoader;

/// Upper bound on the jitter fraction added to retry delays
pub const MAX_JITTER_FACTOR: f64 = 0.1;

/// Top-level bridge configuration
///
/// # Examples
///
/// ```rust
/// use tasker_agent_bridge::config::BridgeConfig;
///
/// let config = BridgeConfig::default();
/// assert_eq!(config.base_url, "http://localhost:8080");
/// assert_eq!(config.retry.max_attempts, 3);
/// assert!(config.circuit_breaker.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the Task Service HTTP API
    pub base_url: String,
    /// Base URL of the progress streaming endpoint, derived from `base_url` when unset
    pub stream_url: Option<String>,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// User agent sent with every request
    pub user_agent: Option<String>,
    /// Retry budget for submissions, cancellations and health checks
    pub retry: RetrySettings,
    /// Shorter retry budget for status polling
    pub status_retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub streaming: StreamingSettings,
    /// Capacity of the bridge notification channel
    pub event_channel_capacity: usize,
    /// Finished tasks kept in local tracking before the oldest are dropped;
    /// `0` drops them as soon as they finish
    pub finished_task_retention: usize,
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Random fraction of the current delay added as jitter (at most 0.1)
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Attach a progress subscription to every submitted task
    pub auto_subscribe: bool,
    /// Close a stream that delivered no frame for this long (0 disables)
    pub idle_timeout_ms: u64,
    pub reconnect: ReconnectSettings,
}

/// Bridge-level reconnection policy for dropped progress streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            stream_url: None,
            request_timeout_ms: 30000,
            user_agent: None,
            retry: RetrySettings::default(),
            status_retry: RetrySettings::for_polling(),
            circuit_breaker: CircuitBreakerSettings::default(),
            streaming: StreamingSettings::default(),
            event_channel_capacity: 1000,
            finished_task_retention: 1000,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: MAX_JITTER_FACTOR,
        }
    }
}

impl RetrySettings {
    /// Fail-fast budget used for status polling
    pub fn for_polling() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter_factor: MAX_JITTER_FACTOR,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Validate retry parameters
    pub fn validate(&self, section: &str) -> BridgeResult<()> {
        if self.max_attempts == 0 {
            return Err(BridgeError::configuration(format!(
                "{section}.max_attempts must be at least 1"
            )));
        }

        if self.backoff_multiplier <= 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(BridgeError::configuration(format!(
                "{section}.backoff_multiplier must be greater than 1.0"
            )));
        }

        if !(0.0..=MAX_JITTER_FACTOR).contains(&self.jitter_factor) {
            return Err(BridgeError::configuration(format!(
                "{section}.jitter_factor must be between 0.0 and {MAX_JITTER_FACTOR}"
            )));
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(BridgeError::configuration(format!(
                "{section}.initial_delay_ms must not exceed max_delay_ms"
            )));
        }

        Ok(())
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30000,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
            idle_timeout_ms: 60000,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl StreamingSettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10000,
        }
    }
}

impl ReconnectSettings {
    /// Delay before reconnect attempt `attempt` (1-based), doubling up to `max_delay_ms`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.initial_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

impl BridgeConfig {
    /// Load configuration from the environment and the first config file found
    ///
    /// Precedence (highest to lowest):
    /// 1. `TASKER_BRIDGE_*` environment variables
    /// 2. Config file (`TASKER_BRIDGE_CONFIG` or `./tasker-bridge.toml`)
    /// 3. Default values
    pub fn load() -> BridgeResult<Self> {
        ConfigLoader::discover().load()
    }

    /// Load configuration from a specific TOML file, still honouring the environment
    pub fn load_from_file(path: &Path) -> BridgeResult<Self> {
        ConfigLoader::new().with_file(path).load()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parsed Task Service base URL
    pub fn base_url(&self) -> BridgeResult<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| BridgeError::configuration(format!("Invalid base URL: {e}")))
    }

    /// Streaming base URL, derived from `base_url` (`http` → `ws`) when not configured
    pub fn resolved_stream_url(&self) -> BridgeResult<Url> {
        let raw = match &self.stream_url {
            Some(url) => url.clone(),
            None => self
                .base_url
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1),
        };

        let url = Url::parse(&raw)
            .map_err(|e| BridgeError::configuration(format!("Invalid stream URL: {e}")))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(BridgeError::configuration(format!(
                "Stream URL must use ws or wss, got {other}"
            ))),
        }
    }

    /// Validate the full configuration
    pub fn validate(&self) -> BridgeResult<()> {
        self.base_url()?;
        self.resolved_stream_url()?;

        if self.request_timeout_ms == 0 {
            return Err(BridgeError::configuration(
                "request_timeout_ms must be greater than 0",
            ));
        }

        self.retry.validate("retry")?;
        self.status_retry.validate("status_retry")?;

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return Err(BridgeError::configuration(
                "circuit_breaker.failure_threshold must be greater than 0",
            ));
        }
        if breaker.success_threshold == 0 {
            return Err(BridgeError::configuration(
                "circuit_breaker.success_threshold must be greater than 0",
            ));
        }
        if breaker.reset_timeout_ms == 0 {
            return Err(BridgeError::configuration(
                "circuit_breaker.reset_timeout_ms must be greater than 0",
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err(BridgeError::configuration(
                "event_channel_capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}
