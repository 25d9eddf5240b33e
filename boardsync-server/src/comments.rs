//! Comment service: mutations over the comment store plus event
//! publication. Mirrors the task service shape; commit first, publish
//! the full snapshot second.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use boardsync_proto::entity::Comment;
use boardsync_proto::event::{DomainEvent, EventKind};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::hub::EventHub;
use crate::store::{CommentStore, TaskStore};

/// Comment mutation failure.
#[derive(Debug, thiserror::Error)]
pub enum CommentError {
    /// No live comment with this id.
    #[error("comment {0} not found")]
    NotFound(Uuid),

    /// The comment names a task that does not exist.
    #[error("task {0} not found")]
    TaskNotFound(Uuid),
}

impl IntoResponse for CommentError {
    fn into_response(self) -> Response {
        let body = axum::Json(serde_json::json!({
            "statusCode": StatusCode::NOT_FOUND.as_u16(),
            "message": self.to_string(),
        }));
        (StatusCode::NOT_FOUND, body).into_response()
    }
}

/// Payload for creating a comment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateComment {
    /// Task the comment is attached to.
    pub task_id: Uuid,
    /// Comment body.
    pub content: String,
}

/// Payload for editing a comment body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateComment {
    /// New comment body.
    pub content: String,
}

/// Comment mutations plus event fan-out.
#[derive(Clone)]
pub struct CommentService {
    store: Arc<CommentStore>,
    tasks: Arc<TaskStore>,
    hub: EventHub,
}

impl CommentService {
    /// Creates a service over the given stores and hub.
    #[must_use]
    pub const fn new(store: Arc<CommentStore>, tasks: Arc<TaskStore>, hub: EventHub) -> Self {
        Self { store, tasks, hub }
    }

    /// Creates a comment and broadcasts a `created` event.
    ///
    /// # Errors
    ///
    /// Returns [`CommentError::TaskNotFound`] when the target task does
    /// not exist or is tombstoned.
    pub fn create(&self, author_id: Uuid, dto: CreateComment) -> Result<Comment, CommentError> {
        if self.tasks.find_one(dto.task_id).is_none() {
            return Err(CommentError::TaskNotFound(dto.task_id));
        }
        let now = Utc::now();
        let comment = self.store.create(Comment {
            id: Uuid::new_v4(),
            task_id: dto.task_id,
            content: dto.content,
            author_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        });
        tracing::info!(comment_id = %comment.id, task_id = %comment.task_id, "comment created");
        self.hub
            .broadcast(DomainEvent::comment(EventKind::Created, comment.clone()));
        Ok(comment)
    }

    /// Edits a comment body and broadcasts an `updated` event.
    ///
    /// # Errors
    ///
    /// Returns [`CommentError::NotFound`] for unknown or tombstoned ids.
    pub fn update(&self, id: Uuid, dto: UpdateComment) -> Result<Comment, CommentError> {
        let comment = self
            .store
            .update(id, |comment| comment.content = dto.content)
            .ok_or(CommentError::NotFound(id))?;
        tracing::info!(comment_id = %comment.id, "comment updated");
        self.hub
            .broadcast(DomainEvent::comment(EventKind::Updated, comment.clone()));
        Ok(comment)
    }

    /// Tombstones a comment and broadcasts a `deleted` event.
    ///
    /// # Errors
    ///
    /// Returns [`CommentError::NotFound`] for unknown or already-
    /// tombstoned ids.
    pub fn remove(&self, id: Uuid) -> Result<Comment, CommentError> {
        let comment = self.store.tombstone(id).ok_or(CommentError::NotFound(id))?;
        tracing::info!(comment_id = %comment.id, "comment tombstoned");
        self.hub
            .broadcast(DomainEvent::comment(EventKind::Deleted, comment.clone()));
        Ok(comment)
    }

    /// Read access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &CommentStore {
        &self.store
    }
}
