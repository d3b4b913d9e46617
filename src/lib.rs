#![allow(clippy::doc_markdown)] // Allow technical terms like WebSocket, HalfOpen in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Agent Bridge
//!
//! Fault-tolerant client for orchestrating long-running remote agent tasks.
//!
//! ## Overview
//!
//! Callers submit a task to a remote Task Service, receive an identifier, then
//! poll for status or subscribe to a progress stream, and can cancel. The bridge
//! survives transient network failures and backend outages without losing the
//! task state visible to the caller, and stops hammering a failing backend.
//!
//! ## Architecture
//!
//! ```text
//! Caller → OrchestrationBridge::run_task
//!        → CircuitBreaker(RetryExecutor(TaskTransport::submit)) → task id
//!        → ProgressStreamManager::subscribe (one connection per task)
//! Task Service stream → ProgressStreamManager → callbacks + bridge event channel
//! ```
//!
//! ## Module Organization
//!
//! - [`orchestration`] - The bridge facade and its task lifecycle API
//! - [`resilience`] - Retry executor and circuit breaker
//! - [`client`] - Task Service transport (HTTP)
//! - [`streaming`] - Progress streams and subscriber fan-out (WebSocket)
//! - [`models`] - Task model and wire types
//! - [`events`] - Bridge notification channel
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging bootstrap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::Map;
//! use tasker_agent_bridge::{BridgeConfig, OrchestrationBridge, TaskOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! tasker_agent_bridge::logging::init_structured_logging();
//!
//! let bridge = OrchestrationBridge::new(BridgeConfig::load()?)?;
//! let submitted = bridge
//!     .run_task("research_analyzer", Map::new(), TaskOptions::default())
//!     .await?;
//!
//! let subscription = bridge.subscribe(&submitted.task_id, |event| {
//!     println!("{}: {:?}", event.kind(), event);
//! })?;
//!
//! let status = bridge.get_status(&submitted.task_id).await?;
//! println!("status: {}", status.status);
//!
//! subscription.unsubscribe();
//! bridge.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests (mock HTTP and WebSocket servers)
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod streaming;

pub use client::{HttpTaskTransport, TaskTransport};
pub use config::{BridgeConfig, ConfigLoader};
pub use error::{BridgeError, BridgeResult, TransportErrorKind};
pub use events::{BridgeEvent, EventPublisher, PublishedEvent};
pub use models::{
    AgentType, Task, TaskError, TaskOptions, TaskPriority, TaskProgress, TaskStatus,
    TaskStatusSnapshot,
};
pub use orchestration::{HealthReport, OrchestrationBridge};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState, RetryExecutor,
    RetryPolicy,
};
pub use streaming::{ProgressEvent, ProgressStreamManager, Subscription};
