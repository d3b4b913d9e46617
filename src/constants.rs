//! # System Constants
//!
//! Wire-level names and fixed classification tables shared by the transport,
//! streaming and resilience layers.

use crate::models::TaskStatus;

/// HTTP status codes treated as transient by the default retry predicate
pub const TRANSIENT_HTTP_STATUS_CODES: &[u16] = &[408, 429, 502, 503, 504];

/// HTTP status the Task Service answers when cancelling a task that already finished
pub const CANCEL_CONFLICT_STATUS: u16 = 409;

/// Stream frame `type` discriminators
pub mod frame_types {
    pub const PROGRESS: &str = "progress";
    pub const LOG: &str = "log";
    pub const CHECKPOINT: &str = "checkpoint";
    pub const ERROR: &str = "error";
    pub const COMPLETED: &str = "completed";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}

/// Error codes attached to locally generated stream events
pub mod error_codes {
    /// Malformed frame, failed connect or idle timeout observed by this client
    pub const STREAM_ERROR: &str = "stream_error";
}

/// Task Service HTTP surface
pub mod endpoints {
    pub const TASKS: &str = "tasks";
    pub const CANCEL: &str = "cancel";
    pub const PROGRESS: &str = "progress";
    pub const HEALTH: &str = "health";
}

/// Status groupings for lifecycle decisions
pub mod status_groups {
    use super::TaskStatus;

    /// Task statuses after which the Task Service emits no further events
    pub const TASK_FINAL_STATES: &[TaskStatus] = &[
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];
}
