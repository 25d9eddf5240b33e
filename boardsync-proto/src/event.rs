//! Stream event types delivered over the server-push transport.
//!
//! Each item on the push stream is an [`Envelope`] whose `data` is either a
//! periodic [`HeartbeatEvent`] or a [`DomainEvent`] carrying a full entity
//! snapshot. Events are JSON-encoded; the `domain` field discriminates task
//! from comment events and `type` carries the mutation kind.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CodecError;
use crate::entity::{Comment, Task};

/// Kind of mutation a domain event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Entity was created.
    Created,
    /// Entity fields changed.
    Updated,
    /// Entity was tombstoned.
    Deleted,
    /// Task assignment changed (tasks only; targeted delivery).
    Assigned,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Assigned => write!(f, "assigned"),
        }
    }
}

/// A typed notification that an entity mutation committed.
///
/// The payload is always the complete current snapshot of the entity,
/// never a partial patch, so applying an event is a full overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "lowercase")]
pub enum DomainEvent {
    /// A task mutation.
    Task {
        /// Which mutation happened.
        #[serde(rename = "type")]
        kind: EventKind,
        /// Full task snapshot after the mutation.
        payload: Task,
    },
    /// A comment mutation.
    Comment {
        /// Which mutation happened.
        #[serde(rename = "type")]
        kind: EventKind,
        /// Full comment snapshot after the mutation.
        payload: Comment,
    },
}

impl DomainEvent {
    /// Builds a task event.
    #[must_use]
    pub const fn task(kind: EventKind, payload: Task) -> Self {
        Self::Task { kind, payload }
    }

    /// Builds a comment event.
    #[must_use]
    pub const fn comment(kind: EventKind, payload: Comment) -> Self {
        Self::Comment { kind, payload }
    }

    /// The mutation kind, regardless of domain.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Task { kind, .. } | Self::Comment { kind, .. } => *kind,
        }
    }
}

/// Marker for the heartbeat `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum HeartbeatTag {
    Heartbeat,
}

/// Periodic liveness event emitted for the lifetime of the hub.
///
/// Serializes as `{"type":"heartbeat","timestamp":<epoch millis>}`.
/// Heartbeats have no identity beyond liveness; consumers ignore their
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    #[serde(rename = "type")]
    tag: HeartbeatTag,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl HeartbeatEvent {
    /// Builds a heartbeat with an explicit timestamp (milliseconds).
    #[must_use]
    pub const fn at(timestamp: i64) -> Self {
        Self {
            tag: HeartbeatTag::Heartbeat,
            timestamp,
        }
    }

    /// Builds a heartbeat stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now().timestamp_millis())
    }
}

/// One item on a subscriber's combined stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// A domain mutation notification.
    Domain(DomainEvent),
    /// A liveness heartbeat.
    Heartbeat(HeartbeatEvent),
}

impl StreamEvent {
    /// Whether this event is a heartbeat.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat(_))
    }
}

impl From<DomainEvent> for StreamEvent {
    fn from(event: DomainEvent) -> Self {
        Self::Domain(event)
    }
}

impl From<HeartbeatEvent> for StreamEvent {
    fn from(event: HeartbeatEvent) -> Self {
        Self::Heartbeat(event)
    }
}

/// A push-transport item: unique delivery id plus the event itself.
///
/// The `id` maps to the SSE `id:` field and `data` to the `data:` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique id for this delivery.
    pub id: Uuid,
    /// The event being delivered.
    pub data: StreamEvent,
}

impl Envelope {
    /// Wraps an event in a freshly-identified envelope.
    #[must_use]
    pub fn new(data: StreamEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
        }
    }
}

/// Encodes a [`StreamEvent`] as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode(event: &StreamEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a [`StreamEvent`] from a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if deserialization fails.
pub fn decode(json: &str) -> Result<StreamEvent, CodecError> {
    serde_json::from_str(json).map_err(|e| CodecError::Decode(e.to_string()))
}
