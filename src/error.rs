//! # Bridge Error Types
//!
//! Unified error handling for the task transport, the resilience layer and the
//! orchestration facade. Every failure that reaches the public API is either the
//! original typed error or an explicit wrapper that keeps the original as its cause.

use std::time::Duration;
use thiserror::Error;

use crate::constants::TRANSIENT_HTTP_STATUS_CODES;

/// Bridge operation result type
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Low-level transport failure classes used by the default retry predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    ConnectionRefused,
    ConnectionReset,
    Timeout,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::Timeout => write!(f, "timeout"),
            Self::Other => write!(f, "transport failure"),
        }
    }
}

/// Comprehensive error types for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Circuit breaker '{name}' is open, retry after {}ms", retry_after.as_millis())]
    CircuitOpen { name: String, retry_after: Duration },

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: Box<BridgeError>,
    },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid response: {field} - {reason}")]
    InvalidResponse { field: String, reason: String },

    #[error("JSON serialization/deserialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bridge has been closed")]
    Closed,
}

impl BridgeError {
    /// Create a transport error of the given kind
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Create an HTTP error from a non-2xx response
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an invalid response error for protocol violations
    pub fn invalid_response(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a stream error
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }

    /// Classify a reqwest failure into a transport error
    ///
    /// The source chain is inspected for an `io::Error` so that refused and reset
    /// connections can be told apart; reqwest only exposes `is_connect`.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else {
            match io_error_kind(error) {
                Some(std::io::ErrorKind::ConnectionRefused) => TransportErrorKind::ConnectionRefused,
                Some(
                    std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof,
                ) => TransportErrorKind::ConnectionReset,
                Some(std::io::ErrorKind::TimedOut) => TransportErrorKind::Timeout,
                _ if error.is_connect() => TransportErrorKind::ConnectionRefused,
                _ => TransportErrorKind::Other,
            }
        };

        Self::transport(kind, error.to_string())
    }

    /// HTTP status code carried by this error, if any
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RetriesExhausted { last_error, .. } => last_error.status_code(),
            _ => None,
        }
    }

    /// Check if error belongs to the transient class (worth retrying)
    ///
    /// Connection refused/reset/timeout and HTTP 408/429/502/503/504.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => !matches!(kind, TransportErrorKind::Other),
            Self::Http { status, .. } => TRANSIENT_HTTP_STATUS_CODES.contains(status),
            _ => false,
        }
    }

    /// Check if error indicates the remote dependency itself is unhealthy
    ///
    /// Permanent client errors (4xx other than 408/429) prove the service answered,
    /// so they are not counted against the circuit breaker.
    #[must_use]
    pub fn is_dependency_failure(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => {
                *status >= 500 || TRANSIENT_HTTP_STATUS_CODES.contains(status)
            }
            Self::RetriesExhausted { .. } => true,
            Self::InvalidResponse { .. } | Self::Serialization(_) => true,
            Self::CircuitOpen { .. }
            | Self::Stream(_)
            | Self::Configuration(_)
            | Self::InvalidInput(_)
            | Self::Closed => false,
        }
    }

    /// Check if this is a breaker-open rejection
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

fn io_error_kind(error: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Some(io_err.kind());
        }
        source = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BridgeError::transport(TransportErrorKind::ConnectionRefused, "x").is_transient());
        assert!(BridgeError::transport(TransportErrorKind::ConnectionReset, "x").is_transient());
        assert!(BridgeError::transport(TransportErrorKind::Timeout, "x").is_transient());
        assert!(!BridgeError::transport(TransportErrorKind::Other, "x").is_transient());

        for status in [408, 429, 502, 503, 504] {
            assert!(BridgeError::http(status, "x").is_transient(), "{status}");
        }
        for status in [400, 401, 403, 404, 409, 422, 500, 501] {
            assert!(!BridgeError::http(status, "x").is_transient(), "{status}");
        }
    }

    #[test]
    fn test_dependency_failure_classification() {
        assert!(BridgeError::http(500, "boom").is_dependency_failure());
        assert!(BridgeError::http(429, "slow down").is_dependency_failure());
        assert!(!BridgeError::http(404, "missing").is_dependency_failure());
        assert!(!BridgeError::http(422, "bad input").is_dependency_failure());
        assert!(!BridgeError::Closed.is_dependency_failure());
    }

    #[test]
    fn test_retries_exhausted_preserves_cause() {
        let err = BridgeError::RetriesExhausted {
            attempts: 3,
            last_error: Box::new(BridgeError::http(503, "unavailable")),
        };

        assert_eq!(err.status_code(), Some(503));
        assert!(!err.is_transient());
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("HTTP 503: unavailable"));
    }

    #[test]
    fn test_circuit_open_message() {
        let err = BridgeError::CircuitOpen {
            name: "task_service".to_string(),
            retry_after: Duration::from_millis(1500),
        };
        assert!(err.is_circuit_open());
        assert_eq!(
            err.to_string(),
            "Circuit breaker 'task_service' is open, retry after 1500ms"
        );
    }
}
