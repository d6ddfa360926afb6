//! Wire message schema for remote worker connections.
//!
//! Every frame is exactly one member of this tagged union; an unknown or
//! multi-member payload fails to decode and is treated as a protocol
//! violation by the session engine.

use serde::{Deserialize, Serialize};

use crate::queue::record::TaskId;
use crate::tasks::{TaskRequest, TaskResponse};

/// Version string carried by the handshake. Bumped on any schema change.
pub const PROTOCOL_VERSION: &str = "1";

/// A queued task as advertised to a remote peer. The request flattens so
/// the frame carries `name` and `request` as sibling keys next to `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisedTask {
    pub id: TaskId,
    #[serde(flatten)]
    pub request: TaskRequest,
}

/// The tagged union of every message kind on a remote connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// First message in both directions; nothing else is valid before it.
    Handshake { version: String },
    /// Queued descriptors the sender could hand out.
    AvailableTasks { tasks: Vec<AdvertisedTask> },
    /// Peer claims one advertised task.
    AcceptTask { task_id: TaskId },
    /// Run this task and report back. Flattening puts `name` and `request`
    /// at the top level of the frame, beside `task_id`.
    Execute {
        task_id: TaskId,
        #[serde(flatten)]
        request: TaskRequest,
    },
    /// Terminal success for an executed task.
    TaskResult { task_id: TaskId, result: TaskResponse },
    /// Terminal failure for an executed task.
    TaskError { task_id: TaskId, error: String },
    /// Non-terminal progress for a still-executing task.
    IncrementalUpdate {
        task_id: TaskId,
        message: String,
        partial_result: Option<serde_json::Value>,
    },
    /// Ask the peer for a file asset by id.
    FileRequest { file_id: String },
    /// File payload, base64-encoded. Simple over efficient; the framing can
    /// be swapped for raw binary without touching the session state machine.
    FileSend { file_id: String, content: String },
    /// Acknowledges a registered `FileSend`.
    FileReceive { file_id: String },
    /// Ask the peer to advertise its queued tasks.
    RequestAvailableTasks,
    /// Suppress further claims.
    Pause,
    /// Re-enable claims.
    Resume,
}

impl WireMessage {
    /// Message kind name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::AvailableTasks { .. } => "available_tasks",
            Self::AcceptTask { .. } => "accept_task",
            Self::Execute { .. } => "execute",
            Self::TaskResult { .. } => "task_result",
            Self::TaskError { .. } => "task_error",
            Self::IncrementalUpdate { .. } => "incremental_update",
            Self::FileRequest { .. } => "file_request",
            Self::FileSend { .. } => "file_send",
            Self::FileReceive { .. } => "file_receive",
            Self::RequestAvailableTasks => "request_available_tasks",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::protocol::{decode, encode};

    #[test]
    fn every_member_round_trips() {
        let task_id = Uuid::new_v4();
        let request = TaskRequest::Capitalize {
            text: "hi".to_string(),
        };
        let messages = vec![
            WireMessage::Handshake {
                version: PROTOCOL_VERSION.to_string(),
            },
            WireMessage::AvailableTasks {
                tasks: vec![AdvertisedTask {
                    id: task_id,
                    request: request.clone(),
                }],
            },
            WireMessage::AcceptTask { task_id },
            WireMessage::Execute { task_id, request },
            WireMessage::TaskResult {
                task_id,
                result: TaskResponse::Capitalize {
                    result: "HI".to_string(),
                },
            },
            WireMessage::TaskError {
                task_id,
                error: "boom".to_string(),
            },
            WireMessage::IncrementalUpdate {
                task_id,
                message: "halfway".to_string(),
                partial_result: Some(serde_json::json!({ "pct": 50 })),
            },
            WireMessage::FileRequest {
                file_id: "asset-1".to_string(),
            },
            WireMessage::FileSend {
                file_id: "asset-1".to_string(),
                content: "aGVsbG8=".to_string(),
            },
            WireMessage::FileReceive {
                file_id: "asset-1".to_string(),
            },
            WireMessage::RequestAvailableTasks,
            WireMessage::Pause,
            WireMessage::Resume,
        ];

        for message in messages {
            let bytes = encode(&message).unwrap();
            let decoded = decode(&bytes).unwrap();
            assert_eq!(decoded, message, "round-trip changed {}", message.kind());
        }
    }

    #[test]
    fn frames_are_tagged_by_type() {
        let bytes = encode(&WireMessage::Pause).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "pause");
    }

    #[test]
    fn execute_frame_carries_name_beside_the_payload() {
        let task_id = Uuid::new_v4();
        let bytes = encode(&WireMessage::Execute {
            task_id,
            request: TaskRequest::Capitalize {
                text: "hi".to_string(),
            },
        })
        .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["type"], "execute");
        assert_eq!(json["task_id"], task_id.to_string());
        assert_eq!(json["name"], "capitalize");
        assert_eq!(json["request"]["text"], "hi");
    }

    #[test]
    fn advertised_tasks_carry_name_beside_id() {
        let task_id = Uuid::new_v4();
        let bytes = encode(&WireMessage::AvailableTasks {
            tasks: vec![AdvertisedTask {
                id: task_id,
                request: TaskRequest::Reverse {
                    text: "ab".to_string(),
                },
            }],
        })
        .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let task = &json["tasks"][0];
        assert_eq!(task["id"], task_id.to_string());
        assert_eq!(task["name"], "reverse");
        assert_eq!(task["request"]["text"], "ab");
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(decode(b"\x00\x01\x02").is_err());
        assert!(decode(br#"{"type":"warp_drive"}"#).is_err());
    }
}
