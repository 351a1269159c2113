//! IPC protocol definitions and message types
//!
//! Every message is a flat JSON object discriminated by `kind`:
//!
//! ```text
//! worker -> coordinator   { "kind": "ready" | "data" | "error", "workerId": <pid>, "payload"?: <any> }
//! coordinator -> worker   { "kind": "data", "payload": <any> }
//! ```
//!
//! One message carries exactly one job attempt; there is no batching.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Discriminant shared by both message directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Ready,
    Data,
    Error,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Ready => write!(f, "ready"),
            MessageKind::Data => write!(f, "data"),
            MessageKind::Error => write!(f, "error"),
        }
    }
}

/// Messages sent from the coordinator to worker processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Input payload for one job attempt
    Data {
        #[serde(default)]
        payload: JsonValue,
    },
}

impl WorkerMessage {
    pub fn data(payload: JsonValue) -> Self {
        WorkerMessage::Data { payload }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            WorkerMessage::Data { .. } => MessageKind::Data,
        }
    }
}

/// Messages sent from worker processes to the coordinator
///
/// `worker_id` is the sender's OS process id. The coordinator only uses it to
/// cross-check the origin of a message in diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    /// Worker is initialized and can receive work
    Ready {
        #[serde(rename = "workerId")]
        worker_id: u32,
    },

    /// Successful processing result for the outstanding job
    Data {
        #[serde(rename = "workerId")]
        worker_id: u32,
        #[serde(default)]
        payload: JsonValue,
    },

    /// Application-level failure for the outstanding job
    Error {
        #[serde(rename = "workerId")]
        worker_id: u32,
        #[serde(default)]
        payload: JsonValue,
    },
}

impl CoordinatorMessage {
    pub fn ready(worker_id: u32) -> Self {
        CoordinatorMessage::Ready { worker_id }
    }

    pub fn data(worker_id: u32, payload: JsonValue) -> Self {
        CoordinatorMessage::Data { worker_id, payload }
    }

    pub fn error(worker_id: u32, payload: JsonValue) -> Self {
        CoordinatorMessage::Error { worker_id, payload }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            CoordinatorMessage::Ready { .. } => MessageKind::Ready,
            CoordinatorMessage::Data { .. } => MessageKind::Data,
            CoordinatorMessage::Error { .. } => MessageKind::Error,
        }
    }

    /// OS process id the sender claims to be
    pub fn worker_id(&self) -> u32 {
        match self {
            CoordinatorMessage::Ready { worker_id }
            | CoordinatorMessage::Data { worker_id, .. }
            | CoordinatorMessage::Error { worker_id, .. } => *worker_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_wire_format() {
        let message = CoordinatorMessage::ready(4242);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"kind": "ready", "workerId": 4242}));
    }

    #[test]
    fn test_result_wire_format() {
        let message = CoordinatorMessage::data(7, json!({"echoOf": {"x": 1}}));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"kind": "data", "workerId": 7, "payload": {"echoOf": {"x": 1}}})
        );

        let message = CoordinatorMessage::error(7, json!("boom"));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"kind": "error", "workerId": 7, "payload": "boom"}));
    }

    #[test]
    fn test_job_wire_format() {
        let message = WorkerMessage::data(json!([1, 2, 3]));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"kind": "data", "payload": [1, 2, 3]}));
        assert_eq!(message.kind(), MessageKind::Data);
    }

    #[test]
    fn test_parse_message_from_foreign_worker() {
        // Field order and a missing payload must both be tolerated
        let raw = r#"{"workerId": 99, "kind": "error"}"#;
        let message: CoordinatorMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message, CoordinatorMessage::error(99, JsonValue::Null));
        assert_eq!(message.worker_id(), 99);
        assert_eq!(message.kind(), MessageKind::Error);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw = r#"{"kind": "started", "workerId": 1}"#;
        assert!(serde_json::from_str::<CoordinatorMessage>(raw).is_err());
    }

    #[test]
    fn test_message_kind_display() {
        assert_eq!(MessageKind::Ready.to_string(), "ready");
        assert_eq!(MessageKind::Error.to_string(), "error");
    }
}
