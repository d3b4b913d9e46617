//! Progress event taxonomy and wire frame parsing.
//!
//! Frames are JSON objects `{"type": ..., "data": ...}`. Unknown frame types are
//! skipped so the Task Service can add new kinds without breaking older clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::constants::frame_types;
use crate::error::{BridgeError, BridgeResult};
use crate::models::{TaskError, TaskProgress};

/// Event delivered to progress subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress(TaskProgress),
    Log {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        level: Option<String>,
    },
    /// Opaque resumable state published by the agent
    Checkpoint(Map<String, Value>),
    /// Remote task failure, or a local stream failure (code `stream_error`)
    Error(TaskError),
    /// Terminal; the manager closes the connection after delivering it
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Map<String, Value>>,
    },
    /// Local only: the connection dropped without a `completed` frame
    Disconnected { reason: String },
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress(_) => frame_types::PROGRESS,
            Self::Log { .. } => frame_types::LOG,
            Self::Checkpoint(_) => frame_types::CHECKPOINT,
            Self::Error(_) => frame_types::ERROR,
            Self::Completed { .. } => frame_types::COMPLETED,
            Self::Disconnected { .. } => "disconnected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// True for events that originated at the Task Service
    pub fn is_remote(&self) -> bool {
        match self {
            Self::Disconnected { .. } => false,
            Self::Error(error) => !error.is_stream_error(),
            _ => true,
        }
    }

    pub(crate) fn stream_error(message: impl Into<String>) -> Self {
        Self::Error(TaskError::stream(message))
    }
}

/// Parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Event(ProgressEvent),
    /// Keepalive that must be answered with [`pong_frame`]
    Ping,
    /// Frame type this client does not act on
    Ignored(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct LogData {
    message: String,
    #[serde(default)]
    level: Option<String>,
}

/// Parse one text frame from the progress stream
pub fn parse_frame(text: &str) -> BridgeResult<InboundFrame> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| BridgeError::stream(format!("Malformed frame: {e}")))?;

    let malformed =
        |e: serde_json::Error| BridgeError::stream(format!("Malformed {} frame: {e}", raw.frame_type));

    let event = match raw.frame_type.as_str() {
        frame_types::PROGRESS => {
            ProgressEvent::Progress(serde_json::from_value(raw.data.clone()).map_err(malformed)?)
        }
        frame_types::LOG => match &raw.data {
            Value::String(message) => ProgressEvent::Log {
                message: message.clone(),
                level: None,
            },
            data => {
                let log: LogData = serde_json::from_value(data.clone()).map_err(malformed)?;
                ProgressEvent::Log {
                    message: log.message,
                    level: log.level,
                }
            }
        },
        frame_types::CHECKPOINT => match &raw.data {
            Value::Object(state) => ProgressEvent::Checkpoint(state.clone()),
            Value::Null => ProgressEvent::Checkpoint(Map::new()),
            _ => {
                return Err(BridgeError::stream(
                    "Malformed checkpoint frame: data must be an object",
                ))
            }
        },
        frame_types::ERROR => {
            ProgressEvent::Error(serde_json::from_value(raw.data.clone()).map_err(malformed)?)
        }
        frame_types::COMPLETED => ProgressEvent::Completed {
            result: completed_result(&raw.data)?,
        },
        frame_types::PING => return Ok(InboundFrame::Ping),
        other => {
            debug!(frame_type = %other, "Skipping unhandled frame type");
            return Ok(InboundFrame::Ignored(other.to_string()));
        }
    };

    Ok(InboundFrame::Event(event))
}

/// `completed` carries either `{"result": {...}}` or the result object itself
fn completed_result(data: &Value) -> BridgeResult<Option<Map<String, Value>>> {
    match data {
        Value::Null => Ok(None),
        Value::Object(object) => match object.get("result") {
            Some(Value::Object(result)) => Ok(Some(result.clone())),
            Some(Value::Null) => Ok(None),
            _ => Ok(Some(object.clone())),
        },
        _ => Err(BridgeError::stream(
            "Malformed completed frame: data must be an object",
        )),
    }
}

/// Reply to a JSON `ping` frame
pub fn pong_frame() -> String {
    format!(r#"{{"type":"{}"}}"#, frame_types::PONG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(text: &str) -> ProgressEvent {
        match parse_frame(text).unwrap() {
            InboundFrame::Event(event) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_progress_frame() {
        let parsed = event(r#"{"type":"progress","data":{"current":3,"total":4,"message":"reading"}}"#);
        match parsed {
            ProgressEvent::Progress(progress) => {
                assert_eq!(progress.current, 3);
                assert_eq!(progress.percentage, 75.0);
                assert_eq!(progress.message.as_deref(), Some("reading"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_log_variants() {
        assert_eq!(
            event(r#"{"type":"log","data":"hello"}"#),
            ProgressEvent::Log {
                message: "hello".to_string(),
                level: None
            }
        );
        assert_eq!(
            event(r#"{"type":"log","data":{"message":"hi","level":"warn"}}"#),
            ProgressEvent::Log {
                message: "hi".to_string(),
                level: Some("warn".to_string())
            }
        );
    }

    #[test]
    fn test_parse_error_and_completed() {
        let error = event(r#"{"type":"error","data":{"message":"model crashed","code":500}}"#);
        assert_eq!(
            error,
            ProgressEvent::Error(TaskError::new("model crashed", Some("500".to_string())))
        );
        assert!(error.is_remote());

        let wrapped = event(r#"{"type":"completed","data":{"result":{"score":0.9}}}"#);
        let bare = event(r#"{"type":"completed","data":{"score":0.9}}"#);
        assert_eq!(wrapped, bare);
        assert!(wrapped.is_terminal());

        assert_eq!(
            event(r#"{"type":"completed"}"#),
            ProgressEvent::Completed { result: None }
        );
    }

    #[test]
    fn test_ping_and_unknown_frames() {
        assert_eq!(parse_frame(r#"{"type":"ping"}"#).unwrap(), InboundFrame::Ping);
        assert_eq!(
            parse_frame(r#"{"type":"heartbeat","data":1}"#).unwrap(),
            InboundFrame::Ignored("heartbeat".to_string())
        );
        assert_eq!(pong_frame(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_malformed_frames_are_stream_errors() {
        for text in [
            "not json",
            r#"{"data":{}}"#,
            r#"{"type":"progress","data":"half"}"#,
            r#"{"type":"checkpoint","data":[1,2]}"#,
        ] {
            assert!(
                matches!(parse_frame(text), Err(BridgeError::Stream(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = ProgressEvent::Checkpoint(
            json!({"page": 4}).as_object().cloned().unwrap_or_default(),
        );
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "checkpoint", "data": {"page": 4}})
        );
        assert!(!ProgressEvent::stream_error("bad").is_remote());
    }
}
