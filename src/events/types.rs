use serde::Serialize;

use crate::models::{AgentType, TaskStatus};
use crate::resilience::CircuitState;
use crate::streaming::ProgressEvent;

/// Dotted event names for log correlation and external routing
pub mod event_names {
    pub const TASK_SUBMITTED: &str = "task.submitted";
    pub const TASK_PROGRESS: &str = "task.progress";
    pub const TASK_STATUS_UPDATED: &str = "task.status_updated";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    pub const TASK_CONNECTION_LOST: &str = "task.connection_lost";
    pub const CIRCUIT_STATE_CHANGED: &str = "circuit.state_changed";
    pub const BRIDGE_CLOSED: &str = "bridge.closed";
}

/// Notification published on the bridge event channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    TaskSubmitted {
        task_id: String,
        agent_type: AgentType,
        status: TaskStatus,
    },
    /// Stream event republished from the bridge-owned progress subscription
    TaskProgress {
        task_id: String,
        progress: ProgressEvent,
    },
    TaskStatusUpdated {
        task_id: String,
        status: TaskStatus,
    },
    TaskCancelled {
        task_id: String,
        status: TaskStatus,
    },
    ConnectionLost {
        task_id: String,
        reason: String,
    },
    CircuitStateChanged {
        name: String,
        from: CircuitState,
        to: CircuitState,
    },
    BridgeClosed,
}

impl BridgeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => event_names::TASK_SUBMITTED,
            Self::TaskProgress { .. } => event_names::TASK_PROGRESS,
            Self::TaskStatusUpdated { .. } => event_names::TASK_STATUS_UPDATED,
            Self::TaskCancelled { .. } => event_names::TASK_CANCELLED,
            Self::ConnectionLost { .. } => event_names::TASK_CONNECTION_LOST,
            Self::CircuitStateChanged { .. } => event_names::CIRCUIT_STATE_CHANGED,
            Self::BridgeClosed => event_names::BRIDGE_CLOSED,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskSubmitted { task_id, .. }
            | Self::TaskProgress { task_id, .. }
            | Self::TaskStatusUpdated { task_id, .. }
            | Self::TaskCancelled { task_id, .. }
            | Self::ConnectionLost { task_id, .. } => Some(task_id),
            Self::CircuitStateChanged { .. } | Self::BridgeClosed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization_shape() {
        let event = BridgeEvent::CircuitStateChanged {
            name: "task_service".to_string(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
        };

        assert_eq!(event.name(), "circuit.state_changed");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "circuit_state_changed",
                "name": "task_service",
                "from": "closed",
                "to": "open"
            })
        );
    }

    #[test]
    fn test_progress_event_nests_under_progress_field() {
        let event = BridgeEvent::TaskProgress {
            task_id: "t-1".to_string(),
            progress: ProgressEvent::Log {
                message: "fetching sources".to_string(),
                level: None,
            },
        };

        assert_eq!(event.task_id(), Some("t-1"));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "task_progress",
                "task_id": "t-1",
                "progress": {
                    "type": "log",
                    "data": { "message": "fetching sources" }
                }
            })
        );
    }
}
