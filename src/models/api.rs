//! Request and response bodies for the Task Service HTTP surface.
//!
//! The Task Service speaks camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::task::{AgentType, TaskError, TaskPriority, TaskProgress, TaskStatus};

/// Caller-supplied submission options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOptions {
    pub priority: Option<TaskPriority>,
    /// Free-form correlation tags forwarded to the Task Service
    pub metadata: HashMap<String, String>,
    /// Overrides `streaming.auto_subscribe` for this submission
    pub auto_subscribe: Option<bool>,
}

impl TaskOptions {
    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn without_progress_subscription(mut self) -> Self {
        self.auto_subscribe = Some(false);
        self
    }
}

/// POST /tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    pub agent_type: AgentType,
    pub input: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl SubmitTaskRequest {
    pub fn new(agent_type: AgentType, input: Map<String, Value>, options: &TaskOptions) -> Self {
        Self {
            agent_type,
            input,
            priority: options.priority,
            metadata: options.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// GET /tasks/{taskId}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<TaskProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

/// POST /tasks/{taskId}/cancel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

/// GET /health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}
