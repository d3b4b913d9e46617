//! # Orchestration
//!
//! The [`OrchestrationBridge`] facade: task lifecycle API, local task tracking,
//! progress stream reconnection policy and the bridge event channel.

pub mod bridge;
pub mod global;

pub use bridge::{HealthReport, OrchestrationBridge, TASK_SERVICE_BREAKER};
pub use global::{global, init_global, init_global_with, shutdown_global};
