//! Presence relay wire protocol: ephemeral typing signals.
//!
//! Frames are JSON text messages of the shape `{"event": …, "data": …}`.
//! Typing signals are purely transient: never stored, never deduplicated,
//! relayed verbatim to every peer except the sender. Expiry of a typing
//! indicator is each receiver's local concern.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CodecError;

/// A user started typing on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStart {
    /// Task being typed on.
    pub task_id: Uuid,
    /// User who is typing.
    pub user_id: Uuid,
    /// Display name shown to peers.
    pub user_name: String,
}

/// A user stopped typing on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStop {
    /// Task the user was typing on.
    pub task_id: Uuid,
    /// User who stopped.
    pub user_id: Uuid,
}

/// Relayed typing state change, delivered to every peer but the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    /// Task the signal is scoped to.
    pub task_id: Uuid,
    /// User whose typing state changed.
    pub user_id: Uuid,
    /// Display name; absent on stop signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Whether the user is now typing.
    pub is_typing: bool,
}

/// Frames a presence client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    /// Announce typing started.
    #[serde(rename = "typing:start")]
    TypingStart(TypingStart),

    /// Announce typing stopped.
    #[serde(rename = "typing:stop")]
    TypingStop(TypingStop),

    /// Liveness probe; the relay answers with [`ServerFrame::Pong`].
    #[serde(rename = "ping")]
    Ping,
}

/// Frames the relay sends to presence clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    /// A peer's typing state changed.
    #[serde(rename = "typing:update")]
    TypingUpdate(TypingUpdate),

    /// Liveness reply to a ping.
    #[serde(rename = "pong", rename_all = "camelCase")]
    Pong {
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
    },

    /// Structured error, sent only to the offending connection.
    #[serde(rename = "exception", rename_all = "camelCase")]
    Exception {
        /// Always `"error"`.
        status: String,
        /// Human-readable description.
        message: String,
    },

    /// A new peer connected to the relay.
    #[serde(rename = "connection", rename_all = "camelCase")]
    Connected {
        /// Connection id of the new peer.
        client_id: Uuid,
        /// Human-readable notice.
        message: String,
    },

    /// A peer disconnected from the relay.
    #[serde(rename = "disconnected", rename_all = "camelCase")]
    Disconnected {
        /// Connection id of the departed peer.
        client_id: Uuid,
        /// Human-readable notice.
        message: String,
    },
}

impl ServerFrame {
    /// Builds an error frame for the offending connection.
    #[must_use]
    pub fn exception(message: impl Into<String>) -> Self {
        Self::Exception {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

/// Encodes a client frame as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_client(frame: &ClientFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a client frame from a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if deserialization fails.
pub fn decode_client(json: &str) -> Result<ClientFrame, CodecError> {
    serde_json::from_str(json).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encodes a server frame as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_server(frame: &ServerFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a server frame from a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if deserialization fails.
pub fn decode_server(json: &str) -> Result<ServerFrame, CodecError> {
    serde_json::from_str(json).map_err(|e| CodecError::Decode(e.to_string()))
}
