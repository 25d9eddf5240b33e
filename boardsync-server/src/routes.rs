//! HTTP surface: REST endpoints, the SSE push stream, and the presence
//! WebSocket upgrade.
//!
//! Every route requires API key authentication. Mutations go through the
//! services so that events are published; reads hit the stores directly.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRef, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, patch, post};
use boardsync_proto::entity::{Comment, Task, TaskStatus, User};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{AuthedUser, UserDirectory};
use crate::comments::{CommentError, CommentService, CreateComment, UpdateComment};
use crate::hub::EventHub;
use crate::presence::{self, PresenceState};
use crate::store::{CommentStore, FindFilter, TaskStore};
use crate::tasks::{AssignTask, CreateTask, TaskError, TaskService, UpdateTask};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Event hub shared by services and the push endpoint.
    pub hub: EventHub,
    /// Task mutations.
    pub tasks: TaskService,
    /// Comment mutations.
    pub comments: CommentService,
    /// API key directory.
    pub users: Arc<UserDirectory>,
    /// Presence relay registry.
    pub presence: Arc<PresenceState>,
}

impl FromRef<AppState> for Arc<UserDirectory> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.users)
    }
}

impl AppState {
    /// Builds fresh state around the given user directory.
    #[must_use]
    pub fn new(users: UserDirectory) -> Self {
        let hub = EventHub::new();
        let users = Arc::new(users);
        let task_store = Arc::new(TaskStore::new());
        let comment_store = Arc::new(CommentStore::new());
        Self {
            tasks: TaskService::new(
                Arc::clone(&task_store),
                Arc::clone(&users),
                hub.clone(),
            ),
            comments: CommentService::new(comment_store, task_store, hub.clone()),
            users,
            presence: Arc::new(PresenceState::new()),
            hub,
        }
    }

    /// Seeds a handful of demo tasks. Intended for first-run demos.
    pub fn seed_demo_tasks(&self) {
        for (title, status) in [
            ("Set up the project board", TaskStatus::Completed),
            ("Wire up the push stream", TaskStatus::InProgress),
            ("Write the onboarding guide", TaskStatus::ToDo),
        ] {
            match self.tasks.create(CreateTask {
                title: title.to_string(),
                description: String::new(),
                status: Some(status),
                assignee_id: None,
            }) {
                Ok(task) => tracing::debug!(task_id = %task.id, title, "seeded demo task"),
                Err(e) => tracing::warn!(error = %e, title, "demo seed skipped"),
            }
        }
    }
}

/// Query parameters for "changed since" catch-up reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindQuery {
    changed_since: Option<DateTime<Utc>>,
    include_deleted: Option<bool>,
}

impl FindQuery {
    fn filter(&self) -> FindFilter {
        FindFilter {
            changed_since: self.changed_since,
            include_deleted: self.include_deleted.unwrap_or(false),
        }
    }
}

/// Query parameters for comment reads; `taskId` narrows to one task.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentQuery {
    task_id: Option<Uuid>,
    changed_since: Option<DateTime<Utc>>,
    include_deleted: Option<bool>,
}

/// Body for moving a task to another board column.
#[derive(Debug, Deserialize)]
struct ChangeStatus {
    status: TaskStatus,
}

// ---------------------------------------------------------------------------
// Push stream and presence
// ---------------------------------------------------------------------------

/// SSE endpoint: one merged stream of broadcasts, targeted events, and
/// heartbeats. Dropping the connection releases the subscription.
async fn events_handler(
    AuthedUser(user): AuthedUser,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.register(user.id);
    let stream = futures_util::stream::unfold(subscription, |mut subscription| async move {
        loop {
            let envelope = subscription.recv().await?;
            let Ok(data) = serde_json::to_string(&envelope.data) else {
                continue;
            };
            let event = Event::default().id(envelope.id.to_string()).data(data);
            return Some((Ok(event), subscription));
        }
    });
    Sse::new(stream)
}

/// Upgrades to the presence relay WebSocket.
async fn presence_handler(
    ws: WebSocketUpgrade,
    AuthedUser(user): AuthedUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| presence::handle_socket(socket, Arc::clone(&state.presence), user))
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn list_tasks(
    AuthedUser(_): AuthedUser,
    Query(query): Query<FindQuery>,
    State(state): State<AppState>,
) -> Json<Vec<Task>> {
    Json(state.tasks.store().find_all(query.filter()))
}

async fn get_task(
    AuthedUser(_): AuthedUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Task>, TaskError> {
    state
        .tasks
        .store()
        .find_one(id)
        .map(Json)
        .ok_or(TaskError::NotFound(id))
}

async fn create_task(
    AuthedUser(_): AuthedUser,
    State(state): State<AppState>,
    Json(dto): Json<CreateTask>,
) -> Result<(StatusCode, Json<Task>), TaskError> {
    let task = state.tasks.create(dto)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    AuthedUser(_): AuthedUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(dto): Json<UpdateTask>,
) -> Result<Json<Task>, TaskError> {
    state.tasks.update(id, dto).map(Json)
}

async fn change_task_status(
    AuthedUser(_): AuthedUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(dto): Json<ChangeStatus>,
) -> Result<Json<Task>, TaskError> {
    state.tasks.change_status(id, dto.status).map(Json)
}

async fn assign_task(
    AuthedUser(_): AuthedUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(dto): Json<AssignTask>,
) -> Result<Json<Task>, TaskError> {
    state.tasks.assign(id, dto.assignee_id).map(Json)
}

async fn delete_task(
    AuthedUser(_): AuthedUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Task>, TaskError> {
    state.tasks.remove(id).map(Json)
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

async fn list_comments(
    AuthedUser(_): AuthedUser,
    Query(query): Query<CommentQuery>,
    State(state): State<AppState>,
) -> Json<Vec<Comment>> {
    let comments = if let Some(task_id) = query.task_id {
        state.comments.store().find_by_task(task_id)
    } else {
        state.comments.store().find_all(FindFilter {
            changed_since: query.changed_since,
            include_deleted: query.include_deleted.unwrap_or(false),
        })
    };
    Json(comments)
}

async fn create_comment(
    AuthedUser(user): AuthedUser,
    State(state): State<AppState>,
    Json(dto): Json<CreateComment>,
) -> Result<(StatusCode, Json<Comment>), CommentError> {
    let comment = state.comments.create(user.id, dto)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn update_comment(
    AuthedUser(_): AuthedUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(dto): Json<UpdateComment>,
) -> Result<Json<Comment>, CommentError> {
    state.comments.update(id, dto).map(Json)
}

async fn delete_comment(
    AuthedUser(_): AuthedUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Comment>, CommentError> {
    state.comments.remove(id).map(Json)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

async fn list_users(
    AuthedUser(_): AuthedUser,
    State(state): State<AppState>,
) -> Json<Vec<User>> {
    Json(state.users.all())
}

// ---------------------------------------------------------------------------
// Router and server startup
// ---------------------------------------------------------------------------

/// Builds the full application router.
pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/events", get(events_handler))
        .route("/presence", get(presence_handler))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/tasks/{id}/status", patch(change_task_status))
        .route("/tasks/{id}/assign", patch(assign_task))
        .route("/comments", get(list_comments).post(create_comment))
        .route(
            "/comments/{id}",
            patch(update_comment).delete(delete_comment),
        )
        .route("/users", get(list_users))
        .with_state(state)
}

/// Starts the server on the given address with demo users and returns
/// the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, AppState::new(UserDirectory::demo())).await
}

/// Starts the server with pre-built [`AppState`].
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: AppState,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}
