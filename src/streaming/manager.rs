//! # Progress Stream Manager
//!
//! Owns at most one streaming connection per task id and fans every inbound
//! event out to the callbacks registered for that task, in registration order.
//!
//! ## Lifecycle
//!
//! - The first subscriber for a task starts a reader; later subscribers share it.
//! - Removing the last callback aborts the reader and forgets the task.
//! - A `completed` event is delivered, then the manager closes the task itself.
//! - An unexpected drop delivers `Disconnected` and keeps the callbacks. Nothing
//!   reconnects here; callers decide via [`ProgressStreamManager::reconnect`].
//!
//! Each reader carries a generation number. A reader whose generation no longer
//! matches the task entry has been replaced or torn down and stops touching state.

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::streaming::{ProgressEvent, StreamConnector};

/// Subscriber callback, invoked synchronously on the reader task
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Connection state of a task's progress stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Dropped without a `completed` frame; callbacks are still registered
    Disconnected,
}

struct Connection {
    generation: u64,
    handle: JoinHandle<()>,
}

struct TaskEntry {
    callbacks: Vec<(u64, ProgressCallback)>,
    connection: Option<Connection>,
    status: ConnectionStatus,
}

impl TaskEntry {
    fn new() -> Self {
        Self {
            callbacks: Vec::new(),
            connection: None,
            status: ConnectionStatus::Connecting,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.generation == generation)
    }

    fn snapshot(&self) -> Vec<ProgressCallback> {
        self.callbacks
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    fn abort_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.handle.abort();
        }
    }
}

struct ManagerInner {
    connector: Arc<dyn StreamConnector>,
    tasks: DashMap<String, TaskEntry>,
    next_callback_id: AtomicU64,
    next_generation: AtomicU64,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        for mut entry in self.tasks.iter_mut() {
            entry.abort_connection();
        }
    }
}

/// Demultiplexes per-task progress streams to local callbacks
#[derive(Clone)]
pub struct ProgressStreamManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for ProgressStreamManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressStreamManager")
            .field("tasks", &self.inner.tasks.len())
            .finish()
    }
}

impl ProgressStreamManager {
    pub fn new(connector: Arc<dyn StreamConnector>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connector,
                tasks: DashMap::new(),
                next_callback_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Non-owning handle for callbacks that need to reach back into the manager
    pub fn downgrade(&self) -> WeakStreamManager {
        WeakStreamManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register `callback` for `task_id`, opening the stream if none is open
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, task_id: impl Into<String>, callback: F) -> BridgeResult<Subscription>
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let task_id = task_id.into();
        let runtime = Handle::try_current()
            .map_err(|_| BridgeError::stream("subscribe requires a Tokio runtime"))?;
        let callback_id = self.inner.next_callback_id.fetch_add(1, Ordering::Relaxed);

        let mut entry = self
            .inner
            .tasks
            .entry(task_id.clone())
            .or_insert_with(TaskEntry::new);
        entry.callbacks.push((callback_id, Arc::new(callback)));
        let subscribers = entry.callbacks.len();

        if entry.connection.is_none() {
            entry.connection = Some(self.spawn_reader(&runtime, &task_id));
            entry.status = ConnectionStatus::Connecting;
        }
        drop(entry);

        debug!(task_id = %task_id, subscribers = subscribers, "Progress subscriber added");

        Ok(Subscription {
            manager: Arc::downgrade(&self.inner),
            task_id,
            callback_id,
            active: AtomicBool::new(true),
            on_release: Mutex::new(None),
        })
    }

    /// Re-open the stream for a task whose connection dropped
    ///
    /// Returns `Ok(false)` when the task has no subscribers or is already connected.
    pub fn reconnect(&self, task_id: &str) -> BridgeResult<bool> {
        let runtime = Handle::try_current()
            .map_err(|_| BridgeError::stream("reconnect requires a Tokio runtime"))?;

        let Some(mut entry) = self.inner.tasks.get_mut(task_id) else {
            return Ok(false);
        };
        if entry.connection.is_some() || entry.callbacks.is_empty() {
            return Ok(false);
        }

        entry.connection = Some(self.spawn_reader(&runtime, task_id));
        entry.status = ConnectionStatus::Connecting;
        info!(task_id = %task_id, "🔄 Reconnecting progress stream");
        Ok(true)
    }

    /// Close the stream for one task and drop all of its callbacks
    pub fn close_task(&self, task_id: &str) -> bool {
        match self.inner.tasks.remove(task_id) {
            Some((_, mut entry)) => {
                entry.abort_connection();
                debug!(task_id = %task_id, "Progress stream closed");
                true
            }
            None => false,
        }
    }

    /// Close every stream and drop every callback
    pub fn close_all(&self) {
        let mut closed = 0usize;
        self.inner.tasks.retain(|_, entry| {
            entry.abort_connection();
            closed += 1;
            false
        });
        if closed > 0 {
            info!(closed = closed, "All progress streams closed");
        }
    }

    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.inner
            .tasks
            .get(task_id)
            .map_or(0, |entry| entry.callbacks.len())
    }

    pub fn connection_status(&self, task_id: &str) -> Option<ConnectionStatus> {
        self.inner.tasks.get(task_id).map(|entry| entry.status)
    }

    pub fn has_connection(&self, task_id: &str) -> bool {
        self.inner
            .tasks
            .get(task_id)
            .is_some_and(|entry| entry.connection.is_some())
    }

    pub fn active_task_ids(&self) -> Vec<String> {
        self.inner
            .tasks
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn spawn_reader(&self, runtime: &Handle, task_id: &str) -> Connection {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let connector = Arc::clone(&self.inner.connector);
        let manager = Arc::downgrade(&self.inner);
        let task_id = task_id.to_string();

        let handle = runtime.spawn(run_reader(manager, connector, task_id, generation));
        Connection { generation, handle }
    }
}

/// Weak counterpart of [`ProgressStreamManager`]; does not keep streams alive
#[derive(Clone)]
pub struct WeakStreamManager {
    inner: Weak<ManagerInner>,
}

impl WeakStreamManager {
    pub fn upgrade(&self) -> Option<ProgressStreamManager> {
        self.inner
            .upgrade()
            .map(|inner| ProgressStreamManager { inner })
    }
}

impl fmt::Debug for WeakStreamManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStreamManager")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

async fn run_reader(
    manager: Weak<ManagerInner>,
    connector: Arc<dyn StreamConnector>,
    task_id: String,
    generation: u64,
) {
    let mut stream = match connector.connect(&task_id).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Progress stream connect failed");
            if let Some(inner) = manager.upgrade() {
                inner.deliver(
                    &task_id,
                    generation,
                    &ProgressEvent::stream_error(e.to_string()),
                );
                inner.connection_lost(&task_id, generation, e.to_string());
            }
            return;
        }
    };

    match manager.upgrade() {
        Some(inner) => {
            if !inner.mark_connected(&task_id, generation) {
                return;
            }
        }
        None => return,
    }
    debug!(task_id = %task_id, generation = generation, "Progress stream connected");

    while let Some(item) = stream.next().await {
        let Some(inner) = manager.upgrade() else {
            return;
        };

        let event = match item {
            Ok(event) => event,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Progress stream error");
                ProgressEvent::stream_error(e.to_string())
            }
        };

        if !inner.deliver(&task_id, generation, &event) {
            return;
        }

        if event.is_terminal() {
            inner.finish(&task_id, generation);
            return;
        }
    }

    if let Some(inner) = manager.upgrade() {
        inner.connection_lost(&task_id, generation, "stream closed by remote".to_string());
    }
}

impl ManagerInner {
    fn mark_connected(&self, task_id: &str, generation: u64) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(mut entry) if entry.is_current(generation) => {
                entry.status = ConnectionStatus::Connected;
                true
            }
            _ => false,
        }
    }

    /// Fan `event` out to a snapshot of the callbacks; false if this reader is stale
    fn deliver(&self, task_id: &str, generation: u64, event: &ProgressEvent) -> bool {
        let callbacks = match self.tasks.get(task_id) {
            Some(entry) if entry.is_current(generation) => entry.snapshot(),
            _ => return false,
        };

        fan_out(task_id, &callbacks, event);
        true
    }

    /// Terminal event delivered: forget the task
    fn finish(&self, task_id: &str, generation: u64) {
        if self
            .tasks
            .remove_if(task_id, |_, entry| entry.is_current(generation))
            .is_some()
        {
            info!(task_id = %task_id, "✅ Task completed, progress stream closed");
        }
    }

    /// Unexpected drop: clear the connection, keep callbacks, tell subscribers
    fn connection_lost(&self, task_id: &str, generation: u64, reason: String) {
        let callbacks = match self.tasks.get_mut(task_id) {
            Some(mut entry) if entry.is_current(generation) => {
                entry.connection = None;
                entry.status = ConnectionStatus::Disconnected;
                entry.snapshot()
            }
            _ => return,
        };

        warn!(task_id = %task_id, reason = %reason, "⚠️ Progress stream disconnected");
        fan_out(task_id, &callbacks, &ProgressEvent::Disconnected { reason });
    }

    fn remove_callback(&self, task_id: &str, callback_id: u64) -> bool {
        let remaining = match self.tasks.get_mut(task_id) {
            Some(mut entry) => {
                let before = entry.callbacks.len();
                entry.callbacks.retain(|(id, _)| *id != callback_id);
                if entry.callbacks.len() == before {
                    return false;
                }
                entry.callbacks.len()
            }
            None => return false,
        };

        if remaining == 0 {
            if let Some((_, mut entry)) = self
                .tasks
                .remove_if(task_id, |_, entry| entry.callbacks.is_empty())
            {
                entry.abort_connection();
                debug!(task_id = %task_id, "Last subscriber left, progress stream closed");
            }
        }
        true
    }
}

fn fan_out(task_id: &str, callbacks: &[ProgressCallback], event: &ProgressEvent) {
    for (index, callback) in callbacks.iter().enumerate() {
        if let Err(panic_error) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
            let panic_msg = if let Some(s) = panic_error.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_error.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            error!(
                task_id = %task_id,
                callback_index = index,
                event = event.kind(),
                panic = %panic_msg,
                "Progress callback panicked"
            );
        }
    }
}

/// Handle for one registered callback
///
/// Dropping the handle leaves the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "the callback stays registered until unsubscribe() is called"]
pub struct Subscription {
    manager: Weak<ManagerInner>,
    task_id: String,
    callback_id: u64,
    active: AtomicBool,
    on_release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Run `hook` once, on the first call to [`Subscription::unsubscribe`]
    ///
    /// The hook runs even when the stream already ended on its own.
    pub fn on_release<F>(self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        *self.on_release.lock() = Some(Box::new(hook));
        self
    }

    /// Remove exactly this callback; closes the stream if it was the last one
    ///
    /// Idempotent. Returns true only for the call that removed the callback.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }

        let removed = self
            .manager
            .upgrade()
            .is_some_and(|inner| inner.remove_callback(&self.task_id, self.callback_id));

        let hook = self.on_release.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        removed
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("task_id", &self.task_id)
            .field("callback_id", &self.callback_id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskError, TaskProgress};
    use crate::streaming::EventStream;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Connector whose streams are fed by the test through channels
    #[derive(Default)]
    struct ChannelConnector {
        senders: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<BridgeResult<ProgressEvent>>>>>,
        connects: AtomicU64,
    }

    impl ChannelConnector {
        fn send(&self, task_id: &str, event: ProgressEvent) {
            if let Some(senders) = self.senders.lock().get(task_id) {
                if let Some(sender) = senders.last() {
                    let _ = sender.unbounded_send(Ok(event));
                }
            }
        }

        fn drop_connection(&self, task_id: &str) {
            self.senders.lock().remove(task_id);
        }

        fn connects(&self) -> u64 {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamConnector for ChannelConnector {
        async fn connect(&self, task_id: &str) -> BridgeResult<EventStream> {
            let (tx, rx) = mpsc::unbounded();
            self.senders
                .lock()
                .entry(task_id.to_string())
                .or_default()
                .push(tx);
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(rx.boxed())
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<ProgressEvent>>>, impl Fn(&ProgressEvent) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &ProgressEvent| sink.lock().push(event.clone()))
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn progress(current: u64) -> ProgressEvent {
        ProgressEvent::Progress(TaskProgress::new(current, 10))
    }

    #[tokio::test]
    async fn test_two_subscribers_share_one_connection() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = ProgressStreamManager::new(connector.clone());

        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        let sub_a = manager.subscribe("t-1", first).unwrap();
        let sub_b = manager.subscribe("t-1", second).unwrap();

        wait_for(|| manager.connection_status("t-1") == Some(ConnectionStatus::Connected)).await;
        assert_eq!(connector.connects(), 1);
        assert_eq!(manager.subscriber_count("t-1"), 2);

        connector.send("t-1", progress(1));
        wait_for(|| second_seen.lock().len() == 1).await;
        assert_eq!(first_seen.lock().as_slice(), &[progress(1)]);

        assert!(sub_a.unsubscribe());
        assert!(!sub_a.unsubscribe());
        assert!(manager.has_connection("t-1"));
        assert_eq!(manager.subscriber_count("t-1"), 1);

        assert!(sub_b.unsubscribe());
        assert!(!manager.has_connection("t-1"));
        assert!(manager.active_task_ids().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_block_others() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = ProgressStreamManager::new(connector.clone());

        let _bad = manager
            .subscribe("t-1", |_event: &ProgressEvent| panic!("listener bug"))
            .unwrap();
        let (seen, good) = recorder();
        let _good = manager.subscribe("t-1", good).unwrap();

        wait_for(|| manager.connection_status("t-1") == Some(ConnectionStatus::Connected)).await;
        connector.send("t-1", progress(1));
        connector.send("t-1", progress(2));

        wait_for(|| seen.lock().len() == 2).await;
        assert_eq!(seen.lock().as_slice(), &[progress(1), progress(2)]);
    }

    #[tokio::test]
    async fn test_completed_closes_stream() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = ProgressStreamManager::new(connector.clone());

        let (seen, callback) = recorder();
        let subscription = manager.subscribe("t-1", callback).unwrap();
        wait_for(|| manager.connection_status("t-1") == Some(ConnectionStatus::Connected)).await;

        connector.send("t-1", progress(5));
        connector.send("t-1", ProgressEvent::Completed { result: None });

        wait_for(|| manager.active_task_ids().is_empty()).await;
        assert_eq!(seen.lock().len(), 2);
        assert!(seen.lock()[1].is_terminal());
        // Nothing left to remove
        assert!(!subscription.unsubscribe());
    }

    #[tokio::test]
    async fn test_release_hook_runs_once_on_unsubscribe() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = ProgressStreamManager::new(connector.clone());
        let released = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&released);
        let subscription = manager
            .subscribe("t-1", |_event: &ProgressEvent| {})
            .unwrap()
            .on_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        wait_for(|| manager.connection_status("t-1") == Some(ConnectionStatus::Connected)).await;

        // The stream ending on its own is not a release
        connector.send("t-1", ProgressEvent::Completed { result: None });
        wait_for(|| manager.active_task_ids().is_empty()).await;
        assert_eq!(released.load(Ordering::SeqCst), 0);

        assert!(!subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unexpected_drop_notifies_and_can_reconnect() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = ProgressStreamManager::new(connector.clone());

        let (seen, callback) = recorder();
        let _subscription = manager.subscribe("t-1", callback).unwrap();
        wait_for(|| manager.connection_status("t-1") == Some(ConnectionStatus::Connected)).await;

        connector.drop_connection("t-1");
        wait_for(|| manager.connection_status("t-1") == Some(ConnectionStatus::Disconnected)).await;

        assert!(matches!(
            seen.lock().last(),
            Some(ProgressEvent::Disconnected { .. })
        ));
        assert!(!manager.has_connection("t-1"));
        assert_eq!(manager.subscriber_count("t-1"), 1);
        assert_eq!(connector.connects(), 1);

        assert!(manager.reconnect("t-1").unwrap());
        assert!(!manager.reconnect("t-1").unwrap());
        wait_for(|| manager.connection_status("t-1") == Some(ConnectionStatus::Connected)).await;
        assert_eq!(connector.connects(), 2);

        connector.send("t-1", progress(7));
        wait_for(|| seen.lock().last() == Some(&progress(7))).await;
    }

    #[tokio::test]
    async fn test_stream_errors_are_delivered_as_events() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = ProgressStreamManager::new(connector.clone());

        let (seen, callback) = recorder();
        let _subscription = manager.subscribe("t-1", callback).unwrap();
        wait_for(|| manager.connection_status("t-1") == Some(ConnectionStatus::Connected)).await;

        if let Some(senders) = connector.senders.lock().get("t-1") {
            let _ = senders[0].unbounded_send(Err(BridgeError::stream("Malformed frame")));
        }
        connector.send("t-1", progress(1));

        wait_for(|| seen.lock().len() == 2).await;
        let events = seen.lock().clone();
        match &events[0] {
            ProgressEvent::Error(error) => assert!(error.is_stream_error()),
            other => panic!("expected stream error, got {other:?}"),
        }
        assert_eq!(events[1], progress(1));
        // Remote task errors are not mistaken for stream errors
        assert!(ProgressEvent::Error(TaskError::new("boom", None)).is_remote());
    }

    #[tokio::test]
    async fn test_close_all_drops_everything() {
        let connector = Arc::new(ChannelConnector::default());
        let manager = ProgressStreamManager::new(connector.clone());

        let (_seen_a, a) = recorder();
        let (_seen_b, b) = recorder();
        let _sub_a = manager.subscribe("t-1", a).unwrap();
        let _sub_b = manager.subscribe("t-2", b).unwrap();

        let mut ids = manager.active_task_ids();
        ids.sort();
        assert_eq!(ids, vec!["t-1".to_string(), "t-2".to_string()]);

        manager.close_all();
        assert!(manager.active_task_ids().is_empty());
        assert!(!manager.close_task("t-1"));
    }

    #[test]
    fn test_subscribe_outside_runtime_fails() {
        let manager = ProgressStreamManager::new(Arc::new(ChannelConnector::default()));
        let result = manager.subscribe("t-1", |_event: &ProgressEvent| {});
        assert!(matches!(result, Err(BridgeError::Stream(_))));
    }
}
