//! # Task Service Client
//!
//! Transport layer for the Task Service. [`TaskTransport`] is the seam the
//! orchestration bridge depends on; [`HttpTaskTransport`] is the production
//! implementation over reqwest.

pub mod http;
pub mod transport;

pub use http::HttpTaskTransport;
pub use transport::TaskTransport;
