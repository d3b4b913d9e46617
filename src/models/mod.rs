//! # Task Models
//!
//! Data layer for remote agent tasks as observed by this client.
//!
//! - [`task`] - locally tracked `Task` and its status, progress and error types
//! - [`api`] - request/response bodies exchanged with the Task Service

pub mod api;
pub mod task;

pub use api::{
    CancelTaskResponse, HealthResponse, SubmitTaskRequest, SubmitTaskResponse, TaskOptions,
    TaskStatusSnapshot,
};
pub use task::{AgentType, Task, TaskError, TaskPriority, TaskProgress, TaskStatus};
