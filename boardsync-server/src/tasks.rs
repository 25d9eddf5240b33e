//! Task service: mutations over the task store plus event publication.
//!
//! Every mutation follows the same shape: commit to the store, then
//! publish the full post-mutation snapshot through the hub. Events are
//! emitted only after the store write, so a snapshot on the wire always
//! reflects committed state.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use boardsync_proto::entity::{Task, TaskStatus, User};
use boardsync_proto::event::{DomainEvent, EventKind};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::UserDirectory;
use crate::hub::EventHub;
use crate::store::TaskStore;

/// Task mutation failure.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// No live task with this id.
    #[error("task {0} not found")]
    NotFound(Uuid),

    /// Assignment named a user the directory does not know.
    #[error("assignee {0} not found")]
    UnknownAssignee(Uuid),
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UnknownAssignee(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let body = axum::Json(serde_json::json!({
            "statusCode": status.as_u16(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Payload for creating a task.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTask {
    /// Task title.
    pub title: String,
    /// Task description; empty when omitted.
    #[serde(default)]
    pub description: String,
    /// Initial board column; `to-do` when omitted.
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Initial assignee; must be in the user directory when given.
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
}

/// Payload for updating task fields. Omitted fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTask {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New board column.
    pub status: Option<TaskStatus>,
}

/// Payload for changing a task's assignee.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTask {
    /// New assignee, or `null` to unassign.
    pub assignee_id: Option<Uuid>,
}

/// Task mutations plus event fan-out.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<TaskStore>,
    users: Arc<UserDirectory>,
    hub: EventHub,
}

impl TaskService {
    /// Creates a service over the given store, directory, and hub.
    #[must_use]
    pub const fn new(store: Arc<TaskStore>, users: Arc<UserDirectory>, hub: EventHub) -> Self {
        Self { store, users, hub }
    }

    /// Creates a task and broadcasts a `created` event.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::UnknownAssignee`] when the initial assignee
    /// is not in the user directory.
    pub fn create(&self, dto: CreateTask) -> Result<Task, TaskError> {
        let assignee = self.resolve_assignee(dto.assignee_id)?;
        let now = Utc::now();
        let task = self.store.create(Task {
            id: Uuid::new_v4(),
            assignee_id: assignee.as_ref().map(|u| u.id),
            assignee_name: assignee.as_ref().map(|u| u.name.clone()),
            title: dto.title,
            description: dto.description,
            status: dto.status.unwrap_or(TaskStatus::ToDo),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        });
        tracing::info!(task_id = %task.id, "task created");
        self.hub
            .broadcast(DomainEvent::task(EventKind::Created, task.clone()));
        Ok(task)
    }

    /// Updates task fields and broadcasts an `updated` event.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for unknown or tombstoned ids.
    pub fn update(&self, id: Uuid, dto: UpdateTask) -> Result<Task, TaskError> {
        let task = self
            .store
            .update(id, |task| {
                if let Some(title) = dto.title {
                    task.title = title;
                }
                if let Some(description) = dto.description {
                    task.description = description;
                }
                if let Some(status) = dto.status {
                    task.status = status;
                }
            })
            .ok_or(TaskError::NotFound(id))?;
        tracing::info!(task_id = %task.id, "task updated");
        self.hub
            .broadcast(DomainEvent::task(EventKind::Updated, task.clone()));
        Ok(task)
    }

    /// Moves a task to a new board column.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for unknown or tombstoned ids.
    pub fn change_status(&self, id: Uuid, status: TaskStatus) -> Result<Task, TaskError> {
        self.update(
            id,
            UpdateTask {
                status: Some(status),
                ..UpdateTask::default()
            },
        )
    }

    /// Changes a task's assignee.
    ///
    /// Broadcasts one `updated` event, then delivers a targeted
    /// `assigned` event to the new assignee and, when different, to the
    /// previous assignee so their personal views refresh immediately.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for unknown or tombstoned ids and
    /// [`TaskError::UnknownAssignee`] when the new assignee is not in the
    /// user directory.
    pub fn assign(&self, id: Uuid, assignee_id: Option<Uuid>) -> Result<Task, TaskError> {
        let assignee = self.resolve_assignee(assignee_id)?;
        let previous = self
            .store
            .find_one(id)
            .ok_or(TaskError::NotFound(id))?
            .assignee_id;

        let task = self
            .store
            .update(id, |task| {
                task.assignee_id = assignee.as_ref().map(|u| u.id);
                task.assignee_name = assignee.as_ref().map(|u| u.name.clone());
            })
            .ok_or(TaskError::NotFound(id))?;

        tracing::info!(
            task_id = %task.id,
            assignee = ?task.assignee_id,
            previous = ?previous,
            "task assignment changed"
        );
        self.hub
            .broadcast(DomainEvent::task(EventKind::Updated, task.clone()));
        if let Some(new_assignee) = task.assignee_id {
            self.hub.send_to_user(
                new_assignee,
                DomainEvent::task(EventKind::Assigned, task.clone()),
            );
        }
        if let Some(previous) = previous
            && Some(previous) != task.assignee_id
        {
            self.hub.send_to_user(
                previous,
                DomainEvent::task(EventKind::Assigned, task.clone()),
            );
        }
        Ok(task)
    }

    /// Tombstones a task and broadcasts a `deleted` event.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for unknown or already-tombstoned
    /// ids.
    pub fn remove(&self, id: Uuid) -> Result<Task, TaskError> {
        let task = self.store.tombstone(id).ok_or(TaskError::NotFound(id))?;
        tracing::info!(task_id = %task.id, "task tombstoned");
        self.hub
            .broadcast(DomainEvent::task(EventKind::Deleted, task.clone()));
        Ok(task)
    }

    fn resolve_assignee(&self, assignee_id: Option<Uuid>) -> Result<Option<User>, TaskError> {
        match assignee_id {
            Some(user_id) => self
                .users
                .find(user_id)
                .map(Some)
                .ok_or(TaskError::UnknownAssignee(user_id)),
            None => Ok(None),
        }
    }

    /// Read access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &TaskStore {
        &self.store
    }
}
