//! # Bridge Notifications
//!
//! Broadcast channel for cross-cutting observers: task lifecycle changes,
//! republished progress events and circuit breaker transitions.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishedEvent};
pub use types::{event_names, BridgeEvent};
