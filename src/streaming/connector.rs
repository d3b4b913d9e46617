//! Connection seam between the stream manager and a concrete streaming transport.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BridgeResult;
use crate::streaming::ProgressEvent;

/// Stream of decoded events for one task.
///
/// `Err` items are non-fatal frame problems; the connection is over when the
/// stream ends.
pub type EventStream = BoxStream<'static, BridgeResult<ProgressEvent>>;

/// Opens the progress stream for a task
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, task_id: &str) -> BridgeResult<EventStream>;
}
