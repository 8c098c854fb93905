//! JSON wire protocol for the real-time transport.
//!
//! Every frame is one [`WireEvent`], serialized as a JSON object with a
//! `type` tag. Operations travel embedded in `document_change` frames
//! exactly as the sender produced them; the server relays them without
//! inspecting or reordering.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use scribe_doc::Operation;

use crate::error::CollabError;

/// Opaque, store-minted document identifier.
pub type DocumentId = String;

/// Wall-clock milliseconds since the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A member of a document room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub connection_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    /// Epoch milliseconds at join time.
    pub joined_at: u64,
}

/// A persisted, server-stamped chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    /// Epoch milliseconds assigned by the server before broadcast.
    pub server_timestamp: u64,
}

/// Error codes carried on `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Forbidden,
    PersistenceFailure,
    Protocol,
}

impl From<&CollabError> for ErrorCode {
    fn from(err: &CollabError) -> Self {
        match err {
            CollabError::Unauthorized => ErrorCode::Unauthorized,
            CollabError::NotFound => ErrorCode::NotFound,
            CollabError::Forbidden => ErrorCode::Forbidden,
            CollabError::PersistenceFailure(_) => ErrorCode::PersistenceFailure,
            CollabError::Protocol(_) | CollabError::ConnectionClosed => ErrorCode::Protocol,
        }
    }
}

/// One frame on the websocket, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// First frame on every connection; the token is presented once and
    /// never repeated per-message.
    Authenticate { token: String },
    /// Server acknowledgement of a verified token, carrying the
    /// identity every later frame is attributed to. A rejected token
    /// gets an `error` frame and a close instead.
    Authenticated {
        user_id: String,
        display_name: String,
    },
    JoinDocument {
        document_id: DocumentId,
    },
    LeaveDocument {
        document_id: DocumentId,
    },
    /// One or more operations produced by a single local edit. The
    /// timestamp is the sender's clock and is informational only.
    DocumentChange {
        document_id: DocumentId,
        changes: Vec<Operation>,
        timestamp: u64,
    },
    /// Client to server: `id`/`server_timestamp` absent. Server echo to
    /// the room: both filled. The server trusts the connection's
    /// verified identity over the user fields in the frame.
    ChatMessage {
        document_id: DocumentId,
        user_id: String,
        user_name: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_timestamp: Option<u64>,
    },
    /// Full membership of a room, sent to every member on any change.
    Presence {
        document_id: DocumentId,
        participants: Vec<Participant>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl WireEvent {
    /// The server echo for a persisted chat message.
    pub fn chat_echo(msg: &ChatMessage) -> Self {
        WireEvent::ChatMessage {
            document_id: msg.document_id.clone(),
            user_id: msg.user_id.clone(),
            user_name: msg.user_name.clone(),
            message: msg.text.clone(),
            id: Some(msg.id),
            server_timestamp: Some(msg.server_timestamp),
        }
    }

    pub fn presence(document_id: DocumentId, participants: Vec<Participant>) -> Self {
        WireEvent::Presence {
            document_id,
            participants,
        }
    }

    pub fn error(err: &CollabError) -> Self {
        WireEvent::Error {
            code: ErrorCode::from(err),
            message: err.to_string(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, CollabError> {
        serde_json::to_string(self).map_err(|e| CollabError::Protocol(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(frame: &str) -> Result<Self, CollabError> {
        serde_json::from_str(frame).map_err(|e| CollabError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_type_tagged() {
        let frame = WireEvent::JoinDocument {
            document_id: "doc-1".into(),
        }
        .encode()
        .unwrap();
        assert!(frame.contains("\"type\":\"join_document\""));
        assert!(frame.contains("\"document_id\":\"doc-1\""));
    }

    #[test]
    fn authenticated_ack_carries_the_identity() {
        let event = WireEvent::Authenticated {
            user_id: "u1".into(),
            display_name: "Alice".into(),
        };
        let frame = event.encode().unwrap();
        assert!(frame.contains("\"type\":\"authenticated\""));
        assert_eq!(WireEvent::decode(&frame).unwrap(), event);
    }

    #[test]
    fn document_change_round_trip() {
        let event = WireEvent::DocumentChange {
            document_id: "doc-1".into(),
            changes: vec![Operation::InsertText {
                path: vec![0, 0],
                offset: 0,
                text: "hi".into(),
            }],
            timestamp: 123,
        };
        let frame = event.encode().unwrap();
        assert_eq!(WireEvent::decode(&frame).unwrap(), event);
    }

    #[test]
    fn chat_frame_omits_absent_server_fields() {
        let event = WireEvent::ChatMessage {
            document_id: "doc-1".into(),
            user_id: "u1".into(),
            user_name: "Alice".into(),
            message: "hello".into(),
            id: None,
            server_timestamp: None,
        };
        let frame = event.encode().unwrap();
        assert!(!frame.contains("server_timestamp"));
        assert!(!frame.contains("\"id\""));
        assert_eq!(WireEvent::decode(&frame).unwrap(), event);
    }

    #[test]
    fn chat_echo_fills_server_fields() {
        let msg = ChatMessage {
            id: Uuid::new_v4(),
            document_id: "doc-1".into(),
            user_id: "u1".into(),
            user_name: "Alice".into(),
            text: "hello".into(),
            server_timestamp: 42,
        };
        match WireEvent::chat_echo(&msg) {
            WireEvent::ChatMessage {
                id,
                server_timestamp,
                message,
                ..
            } => {
                assert_eq!(id, Some(msg.id));
                assert_eq!(server_timestamp, Some(42));
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_frames_map_codes() {
        let frame = WireEvent::error(&CollabError::Unauthorized).encode().unwrap();
        assert!(frame.contains("\"code\":\"unauthorized\""));
        let frame = WireEvent::error(&CollabError::PersistenceFailure("db down".into()))
            .encode()
            .unwrap();
        assert!(frame.contains("\"code\":\"persistence_failure\""));
        assert!(frame.contains("db down"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(WireEvent::decode("not json").is_err());
        assert!(WireEvent::decode(r#"{"type":"warp_core_breach"}"#).is_err());
    }
}
