//! # Resilience Module
//!
//! Fault tolerance for calls to the Task Service: bounded retries with
//! exponential backoff, and a circuit breaker shared by every task submitted
//! through one bridge.
//!
//! ## Architecture
//!
//! - **Retry Executor**: re-runs transient failures, wraps the last error when exhausted
//! - **Circuit Breaker**: fails fast while the dependency is down, probes for recovery
//! - **Configuration**: thresholds derived from [`crate::config::BridgeConfig`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_agent_bridge::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     reset_timeout: Duration::from_secs(30),
//!     success_threshold: 2,
//! };
//!
//! let circuit_breaker = CircuitBreaker::new("task_service", config);
//!
//! let result = circuit_breaker.call(|| async {
//!     Ok::<&str, std::io::Error>("success")
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus, CircuitState};
pub use config::CircuitBreakerConfig;
pub use retry::{jittered_delay, RetryError, RetryExecutor, RetryPolicy};

use crate::error::BridgeError;

impl From<CircuitBreakerError<BridgeError>> for BridgeError {
    fn from(error: CircuitBreakerError<BridgeError>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen {
                component,
                retry_after,
            } => BridgeError::CircuitOpen {
                name: component,
                retry_after,
            },
            CircuitBreakerError::OperationFailed(error) => error,
        }
    }
}
