//! # Orchestration Bridge
//!
//! Public task lifecycle API. Every Task Service call runs through
//! `CircuitBreaker(RetryExecutor(TaskTransport))`; progress streams are managed by
//! the [`ProgressStreamManager`] and republished on the bridge event channel.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use serde_json::{json, Map};
//! use tasker_agent_bridge::config::BridgeConfig;
//! use tasker_agent_bridge::models::TaskOptions;
//! use tasker_agent_bridge::orchestration::OrchestrationBridge;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bridge = OrchestrationBridge::new(BridgeConfig::load()?)?;
//! let mut events = bridge.subscribe_events();
//!
//! let mut input = Map::new();
//! input.insert("manuscript_id".to_string(), json!("m-42"));
//! let submitted = bridge
//!     .run_task("research_analyzer", input, TaskOptions::default())
//!     .await?;
//!
//! while let Ok(published) = events.recv().await {
//!     println!("{}: {:?}", published.event.name(), published.event.task_id());
//! }
//!
//! bridge.cancel(&submitted.task_id).await?;
//! bridge.close();
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{HttpTaskTransport, TaskTransport};
use crate::config::{BridgeConfig, ReconnectSettings, RetrySettings};
use crate::constants::CANCEL_CONFLICT_STATUS;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventPublisher, PublishedEvent};
use crate::logging::{log_error, log_task_operation};
use crate::models::{
    AgentType, CancelTaskResponse, SubmitTaskRequest, SubmitTaskResponse, Task, TaskOptions,
    TaskStatus, TaskStatusSnapshot,
};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, RetryExecutor, RetryPolicy,
};
use crate::streaming::{
    ProgressEvent, ProgressStreamManager, StreamConnector, Subscription, WeakStreamManager,
    WebSocketConnector,
};

/// Name of the breaker guarding the Task Service
pub const TASK_SERVICE_BREAKER: &str = "task_service";

/// Result of [`OrchestrationBridge::health_check`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub latency_ms: u64,
    /// `None` when the breaker is disabled
    pub circuit_breaker: Option<CircuitBreakerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State reachable from the bridge-owned progress listeners
struct BridgeShared {
    tasks: DashMap<String, Task>,
    /// Progress subscriptions the bridge attached itself, one per task;
    /// `None` while the subscription is being opened
    owned: DashMap<String, Option<Subscription>>,
    /// Live caller subscriptions per tracked task
    caller_subscriptions: DashMap<String, usize>,
    reconnect_attempts: DashMap<String, u32>,
    finished_task_retention: usize,
    reconnect: ReconnectSettings,
    events: EventPublisher,
    closed: AtomicBool,
}

/// Fault-tolerant facade over the Task Service
pub struct OrchestrationBridge {
    bridge_id: Uuid,
    config: BridgeConfig,
    transport: Arc<dyn TaskTransport>,
    breaker: Option<CircuitBreaker>,
    retry_policy: RetryPolicy<BridgeError>,
    status_policy: RetryPolicy<BridgeError>,
    streams: ProgressStreamManager,
    shared: Arc<BridgeShared>,
}

impl std::fmt::Debug for OrchestrationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationBridge")
            .field("bridge_id", &self.bridge_id)
            .field("transport", &self.transport.transport_name())
            .field("endpoint", &self.transport.endpoint())
            .field("tracked_tasks", &self.shared.tasks.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl OrchestrationBridge {
    /// Bridge over HTTP and WebSocket transports built from `config`
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTaskTransport::new(&config)?);
        let connector = Arc::new(WebSocketConnector::new(&config)?);
        Self::with_components(config, transport, connector)
    }

    /// Bridge over caller-supplied transports
    pub fn with_components(
        config: BridgeConfig,
        transport: Arc<dyn TaskTransport>,
        connector: Arc<dyn StreamConnector>,
    ) -> BridgeResult<Self> {
        config.validate()?;

        let bridge_id = Uuid::new_v4();
        let events = EventPublisher::new(config.event_channel_capacity);
        let breaker = config.circuit_breaker.enabled.then(|| {
            CircuitBreaker::new(
                TASK_SERVICE_BREAKER,
                CircuitBreakerConfig::from(&config.circuit_breaker),
            )
            .with_event_publisher(events.clone())
        });

        let shared = Arc::new(BridgeShared {
            tasks: DashMap::new(),
            owned: DashMap::new(),
            caller_subscriptions: DashMap::new(),
            reconnect_attempts: DashMap::new(),
            finished_task_retention: config.finished_task_retention,
            reconnect: config.streaming.reconnect.clone(),
            events,
            closed: AtomicBool::new(false),
        });

        info!(
            bridge_id = %bridge_id,
            transport = transport.transport_name(),
            endpoint = transport.endpoint(),
            circuit_breaker = breaker.is_some(),
            auto_subscribe = config.streaming.auto_subscribe,
            "🚀 Orchestration bridge initialized"
        );

        Ok(Self {
            bridge_id,
            retry_policy: RetryPolicy::from_settings(&config.retry),
            status_policy: RetryPolicy::from_settings(&config.status_retry),
            config,
            transport,
            breaker,
            streams: ProgressStreamManager::new(connector),
            shared,
        })
    }

    pub fn bridge_id(&self) -> Uuid {
        self.bridge_id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn stream_manager(&self) -> &ProgressStreamManager {
        &self.streams
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Submit a task and, unless disabled, attach a progress subscription to it
    pub async fn run_task(
        &self,
        agent_type: impl Into<AgentType>,
        input: Map<String, Value>,
        options: TaskOptions,
    ) -> BridgeResult<SubmitTaskResponse> {
        self.ensure_open()?;

        let agent_type = agent_type.into();
        if agent_type.is_empty() {
            return Err(BridgeError::InvalidInput(
                "agent_type must not be empty".to_string(),
            ));
        }

        let request = SubmitTaskRequest::new(agent_type.clone(), input.clone(), &options);
        let response = self
            .protected("submit_task", &self.retry_policy, || {
                self.transport.submit(&request)
            })
            .await
            .map_err(|e| {
                log_error(
                    "orchestration_bridge",
                    "submit_task",
                    &e.to_string(),
                    Some(agent_type.as_str()),
                );
                e
            })?;

        let task = Task::new(
            response.task_id.clone(),
            agent_type.clone(),
            input,
            response.status,
            response.timestamp.unwrap_or_else(Utc::now),
            options.metadata.clone(),
        );
        self.shared.tasks.insert(response.task_id.clone(), task);
        if response.status.is_terminal() {
            evict_finished_tasks(&self.shared);
        }

        self.shared.events.publish(BridgeEvent::TaskSubmitted {
            task_id: response.task_id.clone(),
            agent_type: agent_type.clone(),
            status: response.status,
        });
        log_task_operation(
            "submit_task",
            Some(&response.task_id),
            Some(agent_type.as_str()),
            &response.status.to_string(),
            None,
        );

        let auto_subscribe = options
            .auto_subscribe
            .unwrap_or(self.config.streaming.auto_subscribe);
        if auto_subscribe && !response.status.is_terminal() {
            // The submission already succeeded; a stream failure must not hide the task id
            if let Err(e) = self.attach_progress_listener(&response.task_id) {
                warn!(
                    task_id = %response.task_id,
                    error = %e,
                    "Failed to attach progress subscription"
                );
            }
        }

        Ok(response)
    }

    /// Current status from the Task Service, using the polling retry budget
    pub async fn get_status(&self, task_id: &str) -> BridgeResult<TaskStatusSnapshot> {
        self.fetch_status(task_id, &self.status_policy).await
    }

    /// Current status with a per-call retry budget
    pub async fn get_status_with(
        &self,
        task_id: &str,
        retry: &RetrySettings,
    ) -> BridgeResult<TaskStatusSnapshot> {
        retry.validate("status_retry")?;
        self.fetch_status(task_id, &RetryPolicy::from_settings(retry))
            .await
    }

    /// Request cancellation; cancelling a finished task returns its terminal status
    pub async fn cancel(&self, task_id: &str) -> BridgeResult<CancelTaskResponse> {
        self.ensure_open()?;

        if let Some(status) = self.tracked_terminal_status(task_id) {
            debug!(task_id = %task_id, status = %status, "Task already finished, nothing to cancel");
            return Ok(CancelTaskResponse {
                task_id: task_id.to_string(),
                status,
            });
        }

        let result = self
            .protected("cancel_task", &self.retry_policy, || {
                self.transport.cancel(task_id)
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(error) if error.status_code() == Some(CANCEL_CONFLICT_STATUS) => {
                match self.fetch_status(task_id, &self.status_policy).await {
                    Ok(snapshot) if snapshot.status.is_terminal() => {
                        debug!(
                            task_id = %task_id,
                            status = %snapshot.status,
                            "Task finished before cancellation"
                        );
                        CancelTaskResponse {
                            task_id: snapshot.task_id,
                            status: snapshot.status,
                        }
                    }
                    _ => return Err(error),
                }
            }
            Err(error) => {
                log_error(
                    "orchestration_bridge",
                    "cancel_task",
                    &error.to_string(),
                    Some(task_id),
                );
                return Err(error);
            }
        };

        self.record_snapshot(&TaskStatusSnapshot {
            task_id: task_id.to_string(),
            status: response.status,
            progress: None,
            result: None,
            error: None,
            execution_time_ms: None,
        });
        self.release_progress_listener(task_id);

        self.shared.events.publish(BridgeEvent::TaskCancelled {
            task_id: task_id.to_string(),
            status: response.status,
        });
        log_task_operation(
            "cancel_task",
            Some(task_id),
            None,
            &response.status.to_string(),
            None,
        );

        Ok(response)
    }

    /// Raw progress events for `task_id`
    ///
    /// Unsubscribing the last caller subscription of a tracked task stops tracking it.
    pub fn subscribe<F>(&self, task_id: &str, callback: F) -> BridgeResult<Subscription>
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let subscription = self.streams.subscribe(task_id, callback)?;
        if !self.shared.tasks.contains_key(task_id) {
            return Ok(subscription);
        }

        *self
            .shared
            .caller_subscriptions
            .entry(task_id.to_string())
            .or_insert(0) += 1;

        let shared = Arc::downgrade(&self.shared);
        let released_task_id = task_id.to_string();
        Ok(subscription.on_release(move || {
            if let Some(shared) = shared.upgrade() {
                release_caller_subscription(&shared, &released_task_id);
            }
        }))
    }

    /// Bridge notification channel
    pub fn subscribe_events(&self) -> broadcast::Receiver<PublishedEvent> {
        self.shared.events.subscribe()
    }

    /// One protected liveness call without retries; never fails
    pub async fn health_check(&self) -> HealthReport {
        let start = Instant::now();

        let result = if self.is_closed() {
            Err(BridgeError::Closed)
        } else {
            let single_attempt = self.retry_policy.clone().with_max_attempts(1);
            self.protected("health_check", &single_attempt, || self.transport.health())
                .await
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        let (healthy, error) = match result {
            Ok(health) if health.is_ok() => (true, None),
            Ok(health) => (
                false,
                Some(format!("Task Service reported status '{}'", health.status)),
            ),
            Err(e) => (false, Some(e.to_string())),
        };

        if !healthy {
            warn!(
                bridge_id = %self.bridge_id,
                latency_ms = latency_ms,
                error = error.as_deref().unwrap_or_default(),
                "Task Service health check failed"
            );
        }

        HealthReport {
            healthy,
            latency_ms,
            circuit_breaker: self.circuit_breaker_status(),
            error,
        }
    }

    pub fn circuit_breaker_status(&self) -> Option<CircuitBreakerStatus> {
        self.breaker.as_ref().map(CircuitBreaker::status)
    }

    /// Locally tracked view of a task submitted through this bridge
    pub fn tracked_task(&self, task_id: &str) -> Option<Task> {
        self.shared.tasks.get(task_id).map(|task| task.clone())
    }

    pub fn tracked_tasks(&self) -> Vec<Task> {
        self.shared
            .tasks
            .iter()
            .map(|task| task.value().clone())
            .collect()
    }

    /// Stop tracking a task and drop the bridge-owned subscription for it
    pub fn release_task(&self, task_id: &str) -> Option<Task> {
        forget_task(&self.shared, task_id)
    }

    /// Close all streams and drop all subscriptions; idempotent
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let open_streams = self.streams.active_task_ids().len();
        self.shared.owned.clear();
        self.streams.close_all();
        self.shared.caller_subscriptions.clear();
        self.shared.reconnect_attempts.clear();
        self.shared.tasks.clear();
        self.shared.events.publish(BridgeEvent::BridgeClosed);

        info!(
            bridge_id = %self.bridge_id,
            open_streams = open_streams,
            "🛑 Orchestration bridge closed"
        );
    }

    fn ensure_open(&self) -> BridgeResult<()> {
        if self.is_closed() {
            Err(BridgeError::Closed)
        } else {
            Ok(())
        }
    }

    /// `CircuitBreaker(RetryExecutor(call))`
    async fn protected<T, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy<BridgeError>,
        call: F,
    ) -> BridgeResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let executor = &RetryExecutor::new(operation, policy.clone());
        let call = &call;
        let attempt = move || async move { executor.run(call).await.map_err(BridgeError::from) };

        match &self.breaker {
            Some(breaker) => breaker
                .call_classified(attempt, BridgeError::is_dependency_failure)
                .await
                .map_err(BridgeError::from),
            None => attempt().await,
        }
    }

    async fn fetch_status(
        &self,
        task_id: &str,
        policy: &RetryPolicy<BridgeError>,
    ) -> BridgeResult<TaskStatusSnapshot> {
        self.ensure_open()?;

        let snapshot = self
            .protected("get_task_status", policy, || {
                self.transport.get_status(task_id)
            })
            .await?;

        self.record_snapshot(&snapshot);
        Ok(snapshot)
    }

    fn record_snapshot(&self, snapshot: &TaskStatusSnapshot) {
        let changed = self
            .shared
            .tasks
            .get_mut(&snapshot.task_id)
            .is_some_and(|mut task| task.apply_snapshot(snapshot));

        if changed {
            self.shared.events.publish(BridgeEvent::TaskStatusUpdated {
                task_id: snapshot.task_id.clone(),
                status: snapshot.status,
            });
            if snapshot.status.is_terminal() {
                evict_finished_tasks(&self.shared);
            }
        }
    }

    fn tracked_terminal_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.shared
            .tasks
            .get(task_id)
            .map(|task| task.status)
            .filter(TaskStatus::is_terminal)
    }

    fn attach_progress_listener(&self, task_id: &str) -> BridgeResult<()> {
        let shared = Arc::clone(&self.shared);
        let streams = self.streams.downgrade();
        let listener_task_id = task_id.to_string();

        // Reserve the slot first: the reader may deliver events before subscribe returns
        if let Some(Some(previous)) = self.shared.owned.insert(task_id.to_string(), None) {
            previous.unsubscribe();
        }

        let subscription = match self.streams.subscribe(task_id, move |event| {
            on_progress_event(&shared, &streams, &listener_task_id, event);
        }) {
            Ok(subscription) => subscription,
            Err(e) => {
                self.shared.owned.remove_if(task_id, |_, slot| slot.is_none());
                return Err(e);
            }
        };

        let stale = match self.shared.owned.get_mut(task_id) {
            Some(mut slot) if slot.is_none() => {
                *slot = Some(subscription);
                None
            }
            // Completed or released while the subscription was opening
            _ => Some(subscription),
        };
        if let Some(stale) = stale {
            stale.unsubscribe();
            debug!(task_id = %task_id, "Progress listener no longer needed");
            return Ok(());
        }

        debug!(task_id = %task_id, "Attached bridge progress listener");
        Ok(())
    }

    fn release_progress_listener(&self, task_id: &str) {
        release_owned_listener(&self.shared, task_id);
    }
}

impl Drop for OrchestrationBridge {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bridge-owned listener: track, republish, and drive the reconnection policy
fn on_progress_event(
    shared: &Arc<BridgeShared>,
    streams: &WeakStreamManager,
    task_id: &str,
    event: &ProgressEvent,
) {
    if shared.closed.load(Ordering::Acquire) {
        return;
    }

    let status_change = shared.tasks.get_mut(task_id).and_then(|mut task| {
        let changed = task.apply_event(event);
        changed.then_some(task.status)
    });

    shared.events.publish(BridgeEvent::TaskProgress {
        task_id: task_id.to_string(),
        progress: event.clone(),
    });
    if let Some(status) = status_change {
        shared.events.publish(BridgeEvent::TaskStatusUpdated {
            task_id: task_id.to_string(),
            status,
        });
        if status.is_terminal() {
            evict_finished_tasks(shared);
        }
    }

    match event {
        ProgressEvent::Completed { .. } => {
            // The manager has already closed the stream
            shared.owned.remove(task_id);
            shared.reconnect_attempts.remove(task_id);
        }
        ProgressEvent::Disconnected { reason } => {
            shared.events.publish(BridgeEvent::ConnectionLost {
                task_id: task_id.to_string(),
                reason: reason.clone(),
            });
            schedule_reconnect(shared, streams, task_id);
        }
        event if event.is_remote() => {
            shared.reconnect_attempts.remove(task_id);
        }
        _ => {}
    }
}

fn release_owned_listener(shared: &BridgeShared, task_id: &str) {
    shared.reconnect_attempts.remove(task_id);
    if let Some((_, Some(subscription))) = shared.owned.remove(task_id) {
        subscription.unsubscribe();
    }
}

/// Drop every trace of a task: listener, reconnect state and tracked entry
fn forget_task(shared: &BridgeShared, task_id: &str) -> Option<Task> {
    release_owned_listener(shared, task_id);
    shared.caller_subscriptions.remove(task_id);
    shared.tasks.remove(task_id).map(|(_, task)| task)
}

fn release_caller_subscription(shared: &BridgeShared, task_id: &str) {
    let remaining = match shared.caller_subscriptions.get_mut(task_id) {
        Some(mut count) => {
            *count = count.saturating_sub(1);
            *count
        }
        None => return,
    };

    if remaining == 0 && !shared.closed.load(Ordering::Acquire) {
        forget_task(shared, task_id);
        debug!(task_id = %task_id, "Last caller subscription released, task no longer tracked");
    }
}

/// Keep at most `finished_task_retention` terminal tasks, dropping the oldest first
fn evict_finished_tasks(shared: &BridgeShared) {
    let mut finished: Vec<(DateTime<Utc>, String)> = shared
        .tasks
        .iter()
        .filter(|task| task.status.is_terminal())
        .map(|task| (task.ended_at.unwrap_or(task.created_at), task.id.clone()))
        .collect();

    if finished.len() <= shared.finished_task_retention {
        return;
    }

    finished.sort();
    let excess = finished.len() - shared.finished_task_retention;
    for (_, task_id) in finished.into_iter().take(excess) {
        forget_task(shared, &task_id);
    }
    debug!(
        evicted = excess,
        retained = shared.finished_task_retention,
        "Evicted finished tasks from local tracking"
    );
}

fn schedule_reconnect(shared: &Arc<BridgeShared>, streams: &WeakStreamManager, task_id: &str) {
    let finished = shared
        .tasks
        .get(task_id)
        .is_some_and(|task| task.status.is_terminal());
    if finished {
        debug!(task_id = %task_id, "Stream ended after task finished, not reconnecting");
        release_owned_listener(shared, task_id);
        return;
    }

    let settings = &shared.reconnect;
    if !settings.enabled || !shared.owned.contains_key(task_id) {
        return;
    }

    let attempt = {
        let mut attempts = shared
            .reconnect_attempts
            .entry(task_id.to_string())
            .or_insert(0);
        *attempts += 1;
        *attempts
    };

    if attempt > settings.max_attempts {
        warn!(
            task_id = %task_id,
            max_attempts = settings.max_attempts,
            "Giving up on progress stream reconnection"
        );
        return;
    }

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };

    let delay = settings.delay_for_attempt(attempt);
    let shared = Arc::clone(shared);
    let streams = streams.clone();
    let task_id = task_id.to_string();

    debug!(
        task_id = %task_id,
        attempt = attempt,
        delay_ms = delay.as_millis() as u64,
        "Scheduling progress stream reconnection"
    );

    runtime.spawn(async move {
        tokio::time::sleep(delay).await;

        if shared.closed.load(Ordering::Acquire) || !shared.owned.contains_key(&task_id) {
            return;
        }

        if let Some(manager) = streams.upgrade() {
            if let Err(e) = manager.reconnect(&task_id) {
                warn!(task_id = %task_id, error = %e, "Progress stream reconnection failed");
            }
        }
    });
}
