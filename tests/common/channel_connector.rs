//! Stream connector fed by the test through unbounded channels

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tasker_agent_bridge::error::{BridgeError, BridgeResult};
use tasker_agent_bridge::streaming::{EventStream, ProgressEvent, StreamConnector};

type Sender = mpsc::UnboundedSender<BridgeResult<ProgressEvent>>;

#[derive(Default)]
pub struct ChannelConnector {
    senders: Mutex<HashMap<String, Sender>>,
    connects: Mutex<HashMap<String, u32>>,
    total_connects: AtomicU32,
    refuse: AtomicBool,
    refuse_remaining: AtomicU32,
}

impl ChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an event onto the live stream for `task_id`; false if none is open
    pub fn send(&self, task_id: &str, event: ProgressEvent) -> bool {
        self.senders
            .lock()
            .get(task_id)
            .is_some_and(|sender| sender.unbounded_send(Ok(event)).is_ok())
    }

    pub fn send_error(&self, task_id: &str, message: &str) -> bool {
        self.senders
            .lock()
            .get(task_id)
            .is_some_and(|sender| sender.unbounded_send(Err(BridgeError::stream(message))).is_ok())
    }

    /// End the stream as if the remote side vanished
    pub fn drop_connection(&self, task_id: &str) {
        self.senders.lock().remove(task_id);
    }

    /// Make subsequent connects fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Fail only the next `count` connects
    pub fn refuse_next(&self, count: u32) {
        self.refuse_remaining.store(count, Ordering::SeqCst);
    }

    pub fn is_open(&self, task_id: &str) -> bool {
        self.senders
            .lock()
            .get(task_id)
            .is_some_and(|sender| !sender.is_closed())
    }

    pub fn connects(&self, task_id: &str) -> u32 {
        self.connects.lock().get(task_id).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> u32 {
        self.total_connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for ChannelConnector {
    async fn connect(&self, task_id: &str) -> BridgeResult<EventStream> {
        self.total_connects.fetch_add(1, Ordering::SeqCst);
        *self.connects.lock().entry(task_id.to_string()).or_insert(0) += 1;

        let refuse_once = self
            .refuse_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse_once || self.refuse.load(Ordering::SeqCst) {
            return Err(BridgeError::stream("connection refused"));
        }

        let (tx, rx) = mpsc::unbounded();
        self.senders.lock().insert(task_id.to_string(), tx);
        Ok(rx.boxed())
    }
}
