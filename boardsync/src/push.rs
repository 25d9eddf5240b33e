//! Server-push sync channel: consumes the SSE event stream and applies
//! snapshots to the local replica as they arrive.
//!
//! The connection is re-established with exponential backoff whenever it
//! drops; any events missed while disconnected are recovered by the next
//! poll, so the push channel never needs replay.

use std::sync::Arc;
use std::time::Duration;

use boardsync_proto::entity::Task;
use boardsync_proto::event::{self, DomainEvent, EventKind, StreamEvent};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::reconcile::{CommentCollection, TaskCollection};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// One parsed SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// Value of the `id:` field, if present.
    pub id: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
}

/// Incremental SSE frame parser.
///
/// Feed it raw body chunks; it yields complete messages as their
/// terminating blank line arrives, buffering partial lines across
/// chunk boundaries.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    id: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a body chunk and returns any messages it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut messages = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    messages.push(SseMessage {
                        id: self.id.take(),
                        data: self.data_lines.join("\n"),
                    });
                    self.data_lines.clear();
                }
                self.id = None;
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
            } else if let Some(value) = line.strip_prefix("id:") {
                self.id = Some(value.trim_start().to_string());
            }
            // Other fields (event:, retry:, comments) are ignored.
        }
        messages
    }
}

/// Applies one stream event to the replicas.
///
/// Creates go through the duplicate-create guard; everything else is a
/// plain overwrite. Targeted `assigned` events are additionally forwarded
/// on the notification channel so the view can alert the user.
fn apply_event(
    tasks: &TaskCollection,
    comments: &CommentCollection,
    assigned_tx: &mpsc::UnboundedSender<Task>,
    event: StreamEvent,
) {
    match event {
        StreamEvent::Heartbeat(_) => {}
        StreamEvent::Domain(DomainEvent::Task { kind, payload }) => {
            match kind {
                EventKind::Created => {
                    tasks.lock().insert_if_absent(payload);
                }
                EventKind::Updated | EventKind::Deleted => {
                    tasks.lock().apply(payload);
                }
                EventKind::Assigned => {
                    tasks.lock().apply(payload.clone());
                    let _ = assigned_tx.send(payload);
                }
            }
        }
        StreamEvent::Domain(DomainEvent::Comment { kind, payload }) => match kind {
            EventKind::Created => {
                comments.lock().insert_if_absent(payload);
            }
            _ => {
                comments.lock().apply(payload);
            }
        },
    }
}

/// Handle for the push sync channel.
pub struct PushChannel {
    api: ApiClient,
    tasks: TaskCollection,
    comments: CommentCollection,
    assigned_tx: mpsc::UnboundedSender<Task>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PushChannel {
    /// Creates the channel (not yet connected) and the receiver for
    /// targeted assignment notifications.
    #[must_use]
    pub fn new(
        api: ApiClient,
        tasks: TaskCollection,
        comments: CommentCollection,
    ) -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (assigned_tx, assigned_rx) = mpsc::unbounded_channel();
        (
            Self {
                api,
                tasks,
                comments,
                assigned_tx,
                handle: Mutex::new(None),
            },
            assigned_rx,
        )
    }

    /// Connects and keeps consuming until [`Self::stop`] is called,
    /// reconnecting with backoff on every stream drop. Replaces any
    /// previous connection.
    pub fn start(&self) {
        let api = self.api.clone();
        let tasks = Arc::clone(&self.tasks);
        let comments = Arc::clone(&self.comments);
        let assigned_tx = self.assigned_tx.clone();

        let handle = tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                match api.open_event_stream().await {
                    Ok(response) => {
                        tracing::info!("push stream connected");
                        backoff = INITIAL_BACKOFF;
                        let mut parser = SseParser::new();
                        let mut body = response.bytes_stream();
                        while let Some(chunk) = body.next().await {
                            let Ok(chunk) = chunk else { break };
                            for message in parser.feed(&chunk) {
                                match event::decode(&message.data) {
                                    Ok(event) => {
                                        apply_event(&tasks, &comments, &assigned_tx, event);
                                    }
                                    Err(e) => {
                                        tracing::warn!(error = %e, "skipping malformed push event");
                                    }
                                }
                            }
                        }
                        tracing::warn!("push stream dropped, reconnecting");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "push stream connect failed");
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        });

        if let Some(old) = self.handle.lock().replace(handle) {
            old.abort();
        }
    }

    /// Tears the connection down.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Drops the current connection and dials again immediately. Used
    /// after an identity switch so the stream authenticates as the new
    /// user.
    pub fn reconnect(&self) {
        self.stop();
        self.start();
    }

    /// Whether a consumer task is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.stop();
    }
}
