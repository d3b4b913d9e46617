//! # Retry Executor
//!
//! Bounded retries with exponential backoff and jitter around an async operation.
//! The retryability decision belongs to the caller through [`RetryPolicy`]; the
//! default policy for bridge calls retries only transient transport failures.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{RetrySettings, MAX_JITTER_FACTOR};
use crate::error::BridgeError;

type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;

/// Backoff parameters plus the retryability predicate
pub struct RetryPolicy<E> {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor applied to the delay after each retry (greater than 1.0)
    pub backoff_multiplier: f64,
    /// Fraction of the current delay added as random jitter (clamped to 0.1)
    pub jitter_factor: f64,
    should_retry: RetryPredicate<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
            should_retry: Arc::clone(&self.should_retry),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    /// Policy from settings with an explicit predicate `(error, attempt) -> retry?`
    pub fn new<P>(settings: &RetrySettings, should_retry: P) -> Self
    where
        P: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.initial_delay(),
            max_delay: settings.max_delay(),
            backoff_multiplier: settings.backoff_multiplier,
            jitter_factor: settings.jitter_factor,
            should_retry: Arc::new(should_retry),
        }
    }

    /// Replace the retryability predicate
    #[must_use]
    pub fn with_retry_if<P>(mut self, should_retry: P) -> Self
    where
        P: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(should_retry);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Never sleep between attempts; jitter is disabled too
    #[must_use]
    pub fn without_delay(mut self) -> Self {
        self.initial_delay = Duration::ZERO;
        self.max_delay = Duration::ZERO;
        self.jitter_factor = 0.0;
        self
    }

    pub fn should_retry(&self, error: &E, attempt: u32) -> bool {
        (self.should_retry)(error, attempt)
    }

    /// Sleep before the next attempt, given the current (un-jittered) delay
    pub fn sleep_duration(&self, current_delay: Duration) -> Duration {
        jittered_delay(
            current_delay,
            self.jitter_factor,
            self.max_delay,
            fastrand::f64(),
        )
    }

    /// Base delay for the round after `current_delay`
    pub fn grow_delay(&self, current_delay: Duration) -> Duration {
        current_delay
            .mul_f64(self.backoff_multiplier.max(1.0))
            .min(self.max_delay)
    }
}

impl RetryPolicy<BridgeError> {
    /// Default bridge policy: retry transient transport failures only
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings, |error: &BridgeError, _attempt| error.is_transient())
    }
}

/// `min(delay + jitter, max_delay)` where jitter is `delay * factor * unit`
///
/// `unit` is a random sample from `[0, 1)`; the factor is clamped to 0.1.
pub fn jittered_delay(delay: Duration, jitter_factor: f64, max_delay: Duration, unit: f64) -> Duration {
    let factor = jitter_factor.clamp(0.0, MAX_JITTER_FACTOR);
    let jitter = delay.mul_f64(factor * unit.clamp(0.0, 1.0));
    (delay + jitter).min(max_delay)
}

/// Outcome of a failed retry run
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The predicate declined to retry; this is the original error
    #[error("{0}")]
    NotRetryable(E),

    /// Every attempt failed with a retryable error
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    /// The underlying operation error
    pub fn into_inner(self) -> E {
        match self {
            Self::NotRetryable(error) => error,
            Self::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::NotRetryable(_) => None,
            Self::Exhausted { attempts, .. } => Some(*attempts),
        }
    }
}

impl From<RetryError<BridgeError>> for BridgeError {
    fn from(error: RetryError<BridgeError>) -> Self {
        match error {
            RetryError::NotRetryable(error) => error,
            RetryError::Exhausted {
                attempts,
                last_error,
            } => BridgeError::RetriesExhausted {
                attempts,
                last_error: Box::new(last_error),
            },
        }
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor<E> {
    name: String,
    policy: RetryPolicy<E>,
}

impl<E: fmt::Display> RetryExecutor<E> {
    pub fn new(name: impl Into<String>, policy: RetryPolicy<E>) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy<E> {
        &self.policy
    }

    /// Run `operation` until it succeeds, the predicate declines, or attempts run out
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delay = self.policy.initial_delay.min(self.policy.max_delay);
        let mut attempt: u32 = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = %self.name,
                            attempt = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.policy.should_retry(&error, attempt) {
                        debug!(
                            operation = %self.name,
                            attempt = attempt,
                            error = %error,
                            "Error is not retryable"
                        );
                        return Err(RetryError::NotRetryable(error));
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!(
                            operation = %self.name,
                            attempts = attempt,
                            error = %error,
                            "Retry attempts exhausted"
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last_error: error,
                        });
                    }

                    let sleep_for = self.policy.sleep_duration(delay);
                    warn!(
                        operation = %self.name,
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = sleep_for.as_millis() as u64,
                        error = %error,
                        "Retrying after failure"
                    );

                    if !sleep_for.is_zero() {
                        tokio::time::sleep(sleep_for).await;
                    }

                    delay = self.policy.grow_delay(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_settings(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    fn refused() -> BridgeError {
        BridgeError::transport(TransportErrorKind::ConnectionRefused, "refused")
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let executor = RetryExecutor::new("submit", RetryPolicy::from_settings(&fast_settings(3)));
        let calls = AtomicU32::new(0);

        let result = executor
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(refused())
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_wraps_last_error() {
        let executor = RetryExecutor::new("submit", RetryPolicy::from_settings(&fast_settings(3)));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BridgeError::http(503, "unavailable"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let error = BridgeError::from(result.unwrap_err());
        match error {
            BridgeError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.status_code(), Some(503));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let executor = RetryExecutor::new("submit", RetryPolicy::from_settings(&fast_settings(5)));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BridgeError::http(400, "bad request"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let error = BridgeError::from(result.unwrap_err());
        assert_eq!(error.status_code(), Some(400));
        assert!(matches!(error, BridgeError::Http { .. }));
    }

    #[tokio::test]
    async fn test_predicate_receives_attempt_number() {
        let policy = RetryPolicy::<String>::new(&fast_settings(10), |_error, attempt| attempt < 2);
        let executor = RetryExecutor::new("custom", policy);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(result, Err(RetryError::NotRetryable(_))));
    }

    #[test]
    fn test_jittered_delay_bounds() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_secs(30);

        assert_eq!(jittered_delay(base, 0.1, max, 0.0), base);
        assert_eq!(
            jittered_delay(base, 0.1, max, 0.999),
            base + base.mul_f64(0.0999)
        );
        // Factor clamps to 10%
        assert!(jittered_delay(base, 0.9, max, 0.999) <= base.mul_f64(1.1));
        // Never exceeds the cap
        assert_eq!(
            jittered_delay(base, 0.1, Duration::from_millis(1050), 0.999),
            Duration::from_millis(1050)
        );
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 300,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        });

        let second = policy.grow_delay(Duration::from_millis(100));
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(policy.grow_delay(second), Duration::from_millis(300));
    }
}
