//! HTTP client for the `BoardSync` REST API.
//!
//! Thin typed wrapper over reqwest. Every request carries the API key in
//! the `x-api-key` header; the server resolves it to a user.

use boardsync_proto::entity::{Comment, Task, TaskStatus, User};
use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

/// API request failure.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The base URL could not be parsed or joined.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The request failed at the transport level.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, usually a JSON error message.
        message: String,
    },
}

/// Filter for "changed since" catch-up reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncFilter {
    /// Only entities changed strictly after this instant.
    pub changed_since: Option<DateTime<Utc>>,
    /// Include tombstoned entities.
    pub include_deleted: bool,
}

impl SyncFilter {
    /// Filter for a poll catch-up: everything changed after `since`,
    /// tombstones included.
    #[must_use]
    pub const fn since(since: DateTime<Utc>) -> Self {
        Self {
            changed_since: Some(since),
            include_deleted: true,
        }
    }

    /// Filter for a full snapshot, tombstones included. Used by manual
    /// refreshes so deletes the client missed are still discovered.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            changed_since: None,
            include_deleted: true,
        }
    }

    fn query_pairs(self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(since) = self.changed_since {
            pairs.push(("changedSince", since.to_rfc3339()));
        }
        if self.include_deleted {
            pairs.push(("includeDeleted", "true".to_string()));
        }
        pairs
    }
}

/// Payload for creating a task.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
    /// Initial board column; server defaults to `to-do` when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Initial assignee; the server rejects ids missing from the user
    /// directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Uuid>,
}

/// Partial task update; omitted fields are left untouched.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New board column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

/// Typed client for one server and one identity.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl ApiClient {
    /// Creates a client for the given server base URL and API key.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Url`] if the base URL is not parseable.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            api_key: api_key.into(),
        })
    }

    /// The API key this client authenticates with.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Absolute URL for a path under the server base.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Url`] if the path does not join cleanly.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .header("x-api-key", &self.api_key)
            .query(query)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn send_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .request(method, self.endpoint(path)?)
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Opens the raw server-push event stream.
    ///
    /// The caller consumes the response body as an SSE byte stream.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection cannot be established or the
    /// server rejects the key.
    pub async fn open_event_stream(&self) -> Result<reqwest::Response, ApiError> {
        let response = self
            .http
            .get(self.endpoint("/events")?)
            .header("x-api-key", &self.api_key)
            .header("accept", "text/event-stream")
            .send()
            .await?;
        Self::check(response).await
    }

    /// Fetches tasks matching the filter, newest change first.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn tasks(&self, filter: SyncFilter) -> Result<Vec<Task>, ApiError> {
        self.get_json("/tasks", &filter.query_pairs()).await
    }

    /// Fetches tasks matching the filter as raw JSON rows.
    ///
    /// The poller reconciles row by row so that one malformed row never
    /// poisons the rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn tasks_raw(&self, filter: SyncFilter) -> Result<Vec<serde_json::Value>, ApiError> {
        self.get_json("/tasks", &filter.query_pairs()).await
    }

    /// Fetches one task by id.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Status`] with 404 for unknown ids.
    pub async fn task(&self, id: Uuid) -> Result<Task, ApiError> {
        self.get_json(&format!("/tasks/{id}"), &[]).await
    }

    /// Creates a task.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        self.send_json(reqwest::Method::POST, "/tasks", task).await
    }

    /// Applies a partial update to a task.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<Task, ApiError> {
        self.send_json(reqwest::Method::PATCH, &format!("/tasks/{id}"), patch)
            .await
    }

    /// Moves a task to a new board column.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn change_status(&self, id: Uuid, status: TaskStatus) -> Result<Task, ApiError> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/tasks/{id}/status"),
            &serde_json::json!({ "status": status }),
        )
        .await
    }

    /// Changes a task's assignee; `None` unassigns.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn assign_task(&self, id: Uuid, assignee_id: Option<Uuid>) -> Result<Task, ApiError> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/tasks/{id}/assign"),
            &serde_json::json!({ "assigneeId": assignee_id }),
        )
        .await
    }

    /// Deletes (tombstones) a task.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn delete_task(&self, id: Uuid) -> Result<Task, ApiError> {
        self.send_json(
            reqwest::Method::DELETE,
            &format!("/tasks/{id}"),
            &serde_json::json!({}),
        )
        .await
    }

    /// Fetches comments matching the filter, newest change first.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn comments(&self, filter: SyncFilter) -> Result<Vec<Comment>, ApiError> {
        self.get_json("/comments", &filter.query_pairs()).await
    }

    /// Fetches comments matching the filter as raw JSON rows.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn comments_raw(
        &self,
        filter: SyncFilter,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        self.get_json("/comments", &filter.query_pairs()).await
    }

    /// Fetches the live comments on one task.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn comments_for_task(&self, task_id: Uuid) -> Result<Vec<Comment>, ApiError> {
        self.get_json("/comments", &[("taskId", task_id.to_string())])
            .await
    }

    /// Creates a comment on a task.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn create_comment(&self, task_id: Uuid, content: &str) -> Result<Comment, ApiError> {
        self.send_json(
            reqwest::Method::POST,
            "/comments",
            &serde_json::json!({ "taskId": task_id, "content": content }),
        )
        .await
    }

    /// Edits a comment body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn update_comment(&self, id: Uuid, content: &str) -> Result<Comment, ApiError> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/comments/{id}"),
            &serde_json::json!({ "content": content }),
        )
        .await
    }

    /// Deletes (tombstones) a comment.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn delete_comment(&self, id: Uuid) -> Result<Comment, ApiError> {
        self.send_json(
            reqwest::Method::DELETE,
            &format!("/comments/{id}"),
            &serde_json::json!({}),
        )
        .await
    }

    /// Fetches the user directory.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn users(&self) -> Result<Vec<User>, ApiError> {
        self.get_json("/users", &[]).await
    }
}
