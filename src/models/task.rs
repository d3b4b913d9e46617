//! # Task Model
//!
//! Local view of a remote agent task. The Task Service owns durable task history;
//! this client only mirrors what it learns from status responses and stream events.
//!
//! `Task::apply_event` and `Task::apply_snapshot` are the only mutators used by the
//! bridge. Both keep `result` present only when `Completed` and `error` present only
//! when `Failed`. The locally observed `connection_lost` flag never overwrites the
//! last known remote status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::constants::{error_codes, status_groups};
use crate::models::api::TaskStatusSnapshot;
use crate::streaming::ProgressEvent;

/// Agent type identifier
///
/// Open-ended: the Task Service decides which agent types exist, so any
/// non-empty string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentType(String);

impl AgentType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Remote task status as reported by the Task Service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted but not yet picked up by an agent
    Pending,
    /// An agent is working on the task
    Running,
    /// Execution suspended by the Task Service
    Paused,
    /// Finished successfully, `result` is available
    Completed,
    /// Finished with an error, `error` is available
    Failed,
    /// Cancelled on request
    Cancelled,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further events will arrive)
    pub fn is_terminal(&self) -> bool {
        status_groups::TASK_FINAL_STATES.contains(self)
    }

    /// Check if this is an active state (task is being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// Submission priority hint forwarded to the Task Service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Progress counters for a running task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TaskProgressRepr")]
pub struct TaskProgress {
    pub current: u64,
    pub total: u64,
    pub percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskProgress {
    pub fn new(current: u64, total: u64) -> Self {
        Self {
            current,
            total,
            percentage: Self::compute_percentage(current, total),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn compute_percentage(current: u64, total: u64) -> f64 {
        if total == 0 {
            0.0
        } else {
            (current as f64 / total as f64 * 100.0).min(100.0)
        }
    }
}

#[derive(Deserialize)]
struct TaskProgressRepr {
    #[serde(default)]
    current: u64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    percentage: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

impl From<TaskProgressRepr> for TaskProgress {
    fn from(repr: TaskProgressRepr) -> Self {
        Self {
            current: repr.current,
            total: repr.total,
            percentage: repr
                .percentage
                .unwrap_or_else(|| Self::compute_percentage(repr.current, repr.total)),
            message: repr.message,
        }
    }
}

/// Error reported for a failed task (or a local stream failure)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TaskErrorRepr")]
pub struct TaskError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl TaskError {
    pub fn new(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// Error observed locally on the progress stream, not reported by the Task Service
    pub fn stream(message: impl Into<String>) -> Self {
        Self::new(message, Some(error_codes::STREAM_ERROR.to_string()))
    }

    pub fn is_stream_error(&self) -> bool {
        self.code.as_deref() == Some(error_codes::STREAM_ERROR)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// The Task Service reports errors either as `{message, code}` or as a bare string
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskErrorRepr {
    Detailed {
        message: String,
        #[serde(default)]
        code: Option<Value>,
    },
    Message(String),
}

impl From<TaskErrorRepr> for TaskError {
    fn from(repr: TaskErrorRepr) -> Self {
        match repr {
            TaskErrorRepr::Detailed { message, code } => Self {
                message,
                code: code.and_then(|c| match c {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                }),
            },
            TaskErrorRepr::Message(message) => Self {
                message,
                code: None,
            },
        }
    }
}

/// Locally tracked remote task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    pub agent_type: AgentType,
    pub input: Map<String, Value>,
    pub status: TaskStatus,
    pub progress: Option<TaskProgress>,
    pub result: Option<Map<String, Value>>,
    /// Failure reported by a status snapshot; only set while `Failed`
    pub error: Option<TaskError>,
    /// Most recent `error` frame from the stream; informational, the task may still recover
    pub last_error: Option<TaskError>,
    pub last_checkpoint: Option<Map<String, Value>>,
    pub execution_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
    /// Progress stream dropped unexpectedly; `status` still holds the last remote value
    pub connection_lost: bool,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        agent_type: AgentType,
        input: Map<String, Value>,
        status: TaskStatus,
        created_at: DateTime<Utc>,
        metadata: HashMap<String, String>,
    ) -> Self {
        let mut task = Self {
            id: id.into(),
            agent_type,
            input,
            status: TaskStatus::Pending,
            progress: None,
            result: None,
            error: None,
            last_error: None,
            last_checkpoint: None,
            execution_time_ms: None,
            created_at,
            started_at: None,
            ended_at: None,
            metadata,
            connection_lost: false,
        };
        task.set_status(status);
        task
    }

    /// Apply an inbound stream event, returning true if `status` changed
    pub fn apply_event(&mut self, event: &ProgressEvent) -> bool {
        let previous = self.status;

        match event {
            ProgressEvent::Disconnected { .. } => {
                self.connection_lost = true;
                return false;
            }
            ProgressEvent::Error(error) if error.is_stream_error() => {
                return false;
            }
            _ => self.connection_lost = false,
        }

        // Terminal states are final; late frames only refresh auxiliary data
        let terminal = self.status.is_terminal();

        match event {
            ProgressEvent::Progress(progress) => {
                self.progress = Some(progress.clone());
                if !terminal && self.status == TaskStatus::Pending {
                    self.set_status(TaskStatus::Running);
                }
            }
            ProgressEvent::Log { .. } => {}
            ProgressEvent::Checkpoint(checkpoint) => {
                self.last_checkpoint = Some(checkpoint.clone());
            }
            ProgressEvent::Error(error) => {
                // Failure is only declared by a snapshot
                self.last_error = Some(error.clone());
            }
            ProgressEvent::Completed { result } => {
                if !terminal {
                    self.set_status(TaskStatus::Completed);
                    self.result = result.clone();
                }
            }
            ProgressEvent::Disconnected { .. } => {}
        }

        previous != self.status
    }

    /// Apply an authoritative status response, returning true if `status` changed
    pub fn apply_snapshot(&mut self, snapshot: &TaskStatusSnapshot) -> bool {
        let previous = self.status;

        self.set_status(snapshot.status);
        if let Some(progress) = &snapshot.progress {
            self.progress = Some(progress.clone());
        }
        if snapshot.status == TaskStatus::Completed {
            self.result = snapshot.result.clone();
        }
        if snapshot.status == TaskStatus::Failed {
            self.error = snapshot.error.clone();
        }
        if snapshot.execution_time_ms.is_some() {
            self.execution_time_ms = snapshot.execution_time_ms;
        }

        previous != self.status
    }

    fn set_status(&mut self, status: TaskStatus) {
        let now = Utc::now();

        if status != TaskStatus::Pending && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            if self.ended_at.is_none() {
                self.ended_at = Some(now);
            }
        } else {
            self.ended_at = None;
        }
        if status != TaskStatus::Completed {
            self.result = None;
        }
        if status != TaskStatus::Failed {
            self.error = None;
        }

        self.status = status;
    }
}
