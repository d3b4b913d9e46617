//! # Progress Streaming
//!
//! Per-task progress streams from the Task Service, demultiplexed to any number
//! of local callbacks.
//!
//! - [`ProgressEvent`] and frame parsing live in [`event`]
//! - [`StreamConnector`] is the seam to the wire; [`WebSocketConnector`] is the
//!   production implementation
//! - [`ProgressStreamManager`] owns connections and callback fan-out

pub mod connector;
pub mod event;
pub mod manager;
pub mod websocket;

pub use connector::{EventStream, StreamConnector};
pub use event::{parse_frame, pong_frame, InboundFrame, ProgressEvent};
pub use manager::{
    ConnectionStatus, ProgressCallback, ProgressStreamManager, Subscription, WeakStreamManager,
};
pub use websocket::WebSocketConnector;
