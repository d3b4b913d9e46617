//! # Task Transport Abstraction
//!
//! Request/response mapping to the Task Service with no resilience logic.
//! Retries and circuit breaking are layered on top by the orchestration bridge,
//! so implementations stay stateless and can be shared freely.

use async_trait::async_trait;

use crate::error::BridgeResult;
use crate::models::{
    CancelTaskResponse, HealthResponse, SubmitTaskRequest, SubmitTaskResponse, TaskStatusSnapshot,
};

/// Common interface for Task Service clients regardless of transport.
///
/// Non-2xx answers surface as [`crate::error::BridgeError::Http`] carrying the
/// status code so the retry predicate can classify them.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// Get the transport name for debugging/logging.
    fn transport_name(&self) -> &'static str;

    /// Get the endpoint URL.
    fn endpoint(&self) -> &str;

    /// Submit a new task.
    async fn submit(&self, request: &SubmitTaskRequest) -> BridgeResult<SubmitTaskResponse>;

    /// Fetch the current status snapshot of a task.
    async fn get_status(&self, task_id: &str) -> BridgeResult<TaskStatusSnapshot>;

    /// Request cancellation of a task.
    async fn cancel(&self, task_id: &str) -> BridgeResult<CancelTaskResponse>;

    /// Liveness probe.
    async fn health(&self) -> BridgeResult<HealthResponse>;
}
