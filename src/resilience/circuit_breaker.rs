//! # Circuit Breaker Implementation
//!
//! Provides fault isolation for the Task Service dependency. Classic three-state
//! breaker: Closed (normal operation), Open (failing fast) and Half-Open (a single
//! probe call at a time tests recovery).
//!
//! All state fields live behind one mutex, so transitions are serialized even when
//! many tasks share the breaker. The lock is never held across an await.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::{BridgeEvent, EventPublisher};
use crate::resilience::CircuitBreakerConfig;

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - one probe call at a time is allowed through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was never invoked
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen {
        component: String,
        retry_after: Duration,
    },

    /// Operation ran and failed
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Point-in-time view of a breaker for health endpoints and dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    /// Consecutive failures
    pub failures: u32,
    /// Consecutive probe successes (meaningful only in half-open)
    pub successes: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// When an open breaker admits its next probe
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    probe_in_flight: bool,
    next_attempt_at: Option<Instant>,
    next_attempt_wall: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            probe_in_flight: false,
            next_attempt_at: None,
            next_attempt_wall: None,
            last_failure_at: None,
            last_success_at: None,
            total_calls: 0,
            total_failures: 0,
            rejected_calls: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Admission ticket for one call; releases an abandoned probe slot on drop
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    completed: bool,
}

impl Permit<'_> {
    fn complete(mut self, success: bool, duration: Duration) {
        self.completed = true;
        self.breaker.record_outcome(self.admission, success, duration);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.completed && self.admission == Admission::Probe {
            let mut state = self.breaker.state.lock();
            if state.state == CircuitState::HalfOpen {
                state.probe_in_flight = false;
            }
            debug!(component = %self.breaker.name, "Probe call abandoned before completion");
        }
    }
}

/// Core circuit breaker implementation with serialized state transitions
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and events
    name: String,

    config: CircuitBreakerConfig,

    state: Mutex<BreakerState>,

    /// Receives a `CircuitStateChanged` notification on every transition
    events: Option<EventPublisher>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            config,
            state: Mutex::new(BreakerState::new()),
            events: None,
        }
    }

    /// Publish state transitions on the given channel
    #[must_use]
    pub fn with_event_publisher(mut self, publisher: EventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection, counting every error
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(operation, |_| true).await
    }

    /// Execute an operation, counting only errors for which `is_failure` returns true
    ///
    /// Errors that prove the dependency answered (e.g. a 404) are recorded as
    /// successes of the dependency but still returned to the caller unchanged.
    pub async fn call_classified<F, T, E, Fut, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let permit = self
            .acquire()
            .map_err(|retry_after| CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                retry_after,
            })?;

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        let success = match &result {
            Ok(_) => true,
            Err(e) => !is_failure(e),
        };
        permit.complete(success, duration);

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Check whether a call would currently be admitted, without changing state
    pub fn can_request(&self) -> bool {
        let state = self.state.lock();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => state
                .next_attempt_at
                .map_or(true, |at| Instant::now() >= at),
            CircuitState::HalfOpen => !state.probe_in_flight,
        }
    }

    /// Snapshot of state and counters
    pub fn status(&self) -> CircuitBreakerStatus {
        let state = self.state.lock();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: state.state,
            failures: state.consecutive_failures,
            successes: state.consecutive_successes,
            last_failure_at: state.last_failure_at,
            last_success_at: state.last_success_at,
            next_attempt_at: state.next_attempt_wall,
            total_calls: state.total_calls,
            total_failures: state.total_failures,
            rejected_calls: state.rejected_calls,
        }
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        let state = self.state.lock();
        if state.state != CircuitState::Closed {
            return false;
        }

        if state.total_calls < 10 {
            // Too few calls to determine health
            return true;
        }

        let failure_rate = state.total_failures as f64 / state.total_calls as f64;
        failure_rate < 0.1
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut state = self.state.lock();
        self.transition(&mut state, CircuitState::Open);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut state = self.state.lock();
        self.transition(&mut state, CircuitState::Closed);
    }

    /// Admit or reject a call; `Err` carries the time until the next probe
    fn acquire(&self) -> Result<Permit<'_>, Duration> {
        let mut state = self.state.lock();

        let admission = match state.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let now = Instant::now();
                match state.next_attempt_at {
                    Some(at) if now < at => {
                        state.rejected_calls += 1;
                        debug!(
                            component = %self.name,
                            retry_after_ms = (at - now).as_millis() as u64,
                            "Circuit open, rejecting call"
                        );
                        return Err(at - now);
                    }
                    _ => {
                        self.transition(&mut state, CircuitState::HalfOpen);
                        state.probe_in_flight = true;
                        Admission::Probe
                    }
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    state.rejected_calls += 1;
                    debug!(component = %self.name, "Probe in flight, rejecting call");
                    return Err(Duration::ZERO);
                }
                state.probe_in_flight = true;
                Admission::Probe
            }
        };

        Ok(Permit {
            breaker: self,
            admission,
            completed: false,
        })
    }

    fn record_outcome(&self, admission: Admission, success: bool, duration: Duration) {
        let mut state = self.state.lock();
        state.total_calls += 1;
        let now = Utc::now();

        if success {
            state.last_success_at = Some(now);
            debug!(
                component = %self.name,
                duration_ms = duration.as_millis() as u64,
                "🟢 Operation succeeded"
            );

            match (state.state, admission) {
                (CircuitState::Closed, _) => {
                    state.consecutive_failures = 0;
                }
                (CircuitState::HalfOpen, Admission::Probe) => {
                    state.probe_in_flight = false;
                    state.consecutive_successes += 1;
                    if state.consecutive_successes >= self.config.success_threshold {
                        self.transition(&mut state, CircuitState::Closed);
                    }
                }
                // Call admitted before the breaker tripped; says nothing about recovery
                _ => {}
            }
        } else {
            state.total_failures += 1;
            state.last_failure_at = Some(now);
            warn!(
                component = %self.name,
                duration_ms = duration.as_millis() as u64,
                "🔴 Operation failed"
            );

            match (state.state, admission) {
                (CircuitState::Closed, _) => {
                    state.consecutive_failures += 1;
                    if state.consecutive_failures >= self.config.failure_threshold {
                        self.transition(&mut state, CircuitState::Open);
                    }
                }
                (CircuitState::HalfOpen, Admission::Probe) => {
                    // Any probe failure immediately reopens the circuit
                    state.consecutive_failures += 1;
                    self.transition(&mut state, CircuitState::Open);
                }
                _ => {}
            }
        }
    }

    /// Apply a state change and its counter resets; caller holds the lock
    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;
        state.probe_in_flight = false;

        match to {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                state.next_attempt_at = None;
                state.next_attempt_wall = None;
                info!(
                    component = %self.name,
                    total_calls = state.total_calls,
                    "🟢 Circuit breaker closed (recovered)"
                );
            }
            CircuitState::Open => {
                state.consecutive_successes = 0;
                state.next_attempt_at = Some(Instant::now() + self.config.reset_timeout);
                state.next_attempt_wall = chrono::Duration::from_std(self.config.reset_timeout)
                    .ok()
                    .map(|timeout| Utc::now() + timeout);
                error!(
                    component = %self.name,
                    consecutive_failures = state.consecutive_failures,
                    failure_threshold = self.config.failure_threshold,
                    reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                    "🔴 Circuit breaker opened (failing fast)"
                );
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes = 0;
                info!(
                    component = %self.name,
                    success_threshold = self.config.success_threshold,
                    "🟡 Circuit breaker half-open (testing recovery)"
                );
            }
        }

        if from != to {
            if let Some(events) = &self.events {
                events.publish(BridgeEvent::CircuitStateChanged {
                    name: self.name.clone(),
                    from,
                    to,
                });
            }
        }
    }
}
