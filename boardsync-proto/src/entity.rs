//! Task board entity types shared between server and client.
//!
//! Entities are soft-deletable: deletion sets `deleted_at` instead of
//! removing the record, so that sync channels that missed the live delete
//! event can still discover it through a "changed since" query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entities addressable by a stable unique id.
pub trait Keyed {
    /// Returns the entity's unique identifier.
    fn id(&self) -> Uuid;
}

/// Entities that support tombstone-based soft deletion.
pub trait SoftDeletable {
    /// When the entity was last mutated.
    fn updated_at(&self) -> DateTime<Utc>;

    /// When the entity was tombstoned, if it has been.
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    /// The latest change to the entity: `max(updated_at, deleted_at)`.
    fn latest_change(&self) -> DateTime<Utc> {
        self.deleted_at()
            .filter(|deleted| *deleted > self.updated_at())
            .unwrap_or_else(|| self.updated_at())
    }

    /// Whether the entity is a tombstone.
    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}

/// Status of a task on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Task has not been started.
    ToDo,
    /// Task is actively being worked on.
    InProgress,
    /// Task is waiting on something external.
    Blocked,
    /// Task is done.
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToDo => write!(f, "to-do"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Blocked => write!(f, "blocked"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A task on the shared board.
///
/// Event payloads always carry the complete current snapshot of a task,
/// never a partial patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: Uuid,
    /// User currently assigned to the task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Uuid>,
    /// Display name of the assignee, resolved at mutation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
    /// Current board column.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last mutated (refreshed on every change,
    /// including tombstoning).
    pub updated_at: DateTime<Utc>,
    /// Tombstone timestamp; set instead of physical removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Keyed for Task {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl SoftDeletable for Task {
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// A comment attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Unique comment identifier.
    pub id: Uuid,
    /// Task this comment belongs to.
    pub task_id: Uuid,
    /// Comment body.
    pub content: String,
    /// User who wrote the comment.
    pub author_id: Uuid,
    /// When the comment was created.
    pub created_at: DateTime<Utc>,
    /// When the comment was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Tombstone timestamp; set instead of physical removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Keyed for Comment {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl SoftDeletable for Comment {
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// A board user as exposed over the wire.
///
/// API keys never appear here; credential lookup lives in the server's
/// user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique user identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
}
