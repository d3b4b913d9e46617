//! Scripted Task Service transport
//!
//! Each operation pops the next queued result; an empty queue falls back to a
//! plausible default so tests only script what they care about.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use tasker_agent_bridge::client::TaskTransport;
use tasker_agent_bridge::error::{BridgeError, BridgeResult, TransportErrorKind};
use tasker_agent_bridge::models::{
    CancelTaskResponse, HealthResponse, SubmitTaskRequest, SubmitTaskResponse, TaskStatus,
    TaskStatusSnapshot,
};

#[derive(Default)]
pub struct MockTransport {
    submit_results: Mutex<VecDeque<BridgeResult<SubmitTaskResponse>>>,
    status_results: Mutex<VecDeque<BridgeResult<TaskStatusSnapshot>>>,
    cancel_results: Mutex<VecDeque<BridgeResult<CancelTaskResponse>>>,
    health_results: Mutex<VecDeque<BridgeResult<HealthResponse>>>,
    submitted: Mutex<Vec<SubmitTaskRequest>>,
    submit_calls: AtomicU32,
    status_calls: AtomicU32,
    cancel_calls: AtomicU32,
    health_calls: AtomicU32,
}

pub fn refused() -> BridgeError {
    BridgeError::transport(TransportErrorKind::ConnectionRefused, "connection refused")
}

pub fn snapshot(task_id: &str, status: TaskStatus) -> TaskStatusSnapshot {
    TaskStatusSnapshot {
        task_id: task_id.to_string(),
        status,
        progress: None,
        result: None,
        error: None,
        execution_time_ms: None,
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_submit(&self, result: BridgeResult<SubmitTaskResponse>) {
        self.submit_results.lock().push_back(result);
    }

    pub fn push_submit_ok(&self, task_id: &str) {
        self.push_submit(Ok(SubmitTaskResponse {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending,
            timestamp: Some(Utc::now()),
        }));
    }

    pub fn push_status(&self, result: BridgeResult<TaskStatusSnapshot>) {
        self.status_results.lock().push_back(result);
    }

    pub fn push_cancel(&self, result: BridgeResult<CancelTaskResponse>) {
        self.cancel_results.lock().push_back(result);
    }

    pub fn push_health(&self, result: BridgeResult<HealthResponse>) {
        self.health_results.lock().push_back(result);
    }

    pub fn submitted(&self) -> Vec<SubmitTaskRequest> {
        self.submitted.lock().clone()
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> u32 {
        self.health_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskTransport for MockTransport {
    fn transport_name(&self) -> &'static str {
        "mock"
    }

    fn endpoint(&self) -> &str {
        "mock://task-service"
    }

    async fn submit(&self, request: &SubmitTaskRequest) -> BridgeResult<SubmitTaskResponse> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted.lock().push(request.clone());
        self.submit_results.lock().pop_front().unwrap_or_else(|| {
            Ok(SubmitTaskResponse {
                task_id: format!("task-{call}"),
                status: TaskStatus::Pending,
                timestamp: Some(Utc::now()),
            })
        })
    }

    async fn get_status(&self, task_id: &str) -> BridgeResult<TaskStatusSnapshot> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(snapshot(task_id, TaskStatus::Running)))
    }

    async fn cancel(&self, task_id: &str) -> BridgeResult<CancelTaskResponse> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel_results.lock().pop_front().unwrap_or_else(|| {
            Ok(CancelTaskResponse {
                task_id: task_id.to_string(),
                status: TaskStatus::Cancelled,
            })
        })
    }

    async fn health(&self) -> BridgeResult<HealthResponse> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.health_results.lock().pop_front().unwrap_or_else(|| {
            Ok(HealthResponse {
                status: "ok".to_string(),
            })
        })
    }
}
