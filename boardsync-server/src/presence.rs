//! Presence relay: WebSocket endpoint for ephemeral typing signals.
//!
//! The relay keeps no typing state. Each frame from one connection is
//! relayed immediately to every other connection; malformed frames earn
//! the sender an `exception` frame and nobody else sees anything.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use boardsync_proto::entity::User;
use boardsync_proto::presence::{
    self, ClientFrame, ServerFrame, TypingUpdate,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Shared presence relay state: the registry of live connections.
pub struct PresenceState {
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<Message>>>,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceState {
    /// Creates a relay with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a connection, storing the sender half of its channel.
    pub async fn register(&self, connection_id: Uuid, sender: mpsc::UnboundedSender<Message>) {
        self.connections.write().await.insert(connection_id, sender);
    }

    /// Removes a connection from the registry.
    pub async fn unregister(&self, connection_id: Uuid) {
        self.connections.write().await.remove(&connection_id);
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Sends a frame to one connection.
    pub async fn send_to(&self, connection_id: Uuid, frame: &ServerFrame) {
        if let Some(sender) = self.connections.read().await.get(&connection_id)
            && let Ok(json) = presence::encode_server(frame)
        {
            let _ = sender.send(Message::Text(json.into()));
        }
    }

    /// Relays a frame to every connection except `exclude`.
    pub async fn relay_except(&self, exclude: Uuid, frame: &ServerFrame) {
        let Ok(json) = presence::encode_server(frame) else {
            return;
        };
        let connections = self.connections.read().await;
        for (connection_id, sender) in connections.iter() {
            if *connection_id == exclude {
                continue;
            }
            let _ = sender.send(Message::Text(json.clone().into()));
        }
    }
}

/// Handles an upgraded presence WebSocket for one authenticated user.
///
/// Lifecycle: register the connection, announce it to peers, relay typing
/// frames until the socket closes, then unregister and announce the
/// departure.
pub async fn handle_socket(socket: WebSocket, state: Arc<PresenceState>, user: User) {
    let connection_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    state.register(connection_id, tx).await;
    tracing::info!(connection_id = %connection_id, user_id = %user.id, "presence client connected");

    state
        .relay_except(
            connection_id,
            &ServerFrame::Connected {
                client_id: connection_id,
                message: "New client connected".to_string(),
            },
        )
        .await;

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection_id = %connection_id, "presence socket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_user = user.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(connection_id, &reader_user, text.as_str(), &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(connection_id = %connection_id, "presence client sent close");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(connection_id).await;
    state
        .relay_except(
            connection_id,
            &ServerFrame::Disconnected {
                client_id: connection_id,
                message: "Client disconnected".to_string(),
            },
        )
        .await;
    tracing::info!(connection_id = %connection_id, user_id = %user.id, "presence client disconnected");
}

/// Processes one text frame from a presence client.
async fn handle_frame(connection_id: Uuid, user: &User, text: &str, state: &Arc<PresenceState>) {
    let frame = match presence::decode_client(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "malformed presence frame");
            state
                .send_to(connection_id, &ServerFrame::exception("invalid frame"))
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::TypingStart(start) => {
            let update = ServerFrame::TypingUpdate(TypingUpdate {
                task_id: start.task_id,
                user_id: start.user_id,
                user_name: Some(start.user_name),
                is_typing: true,
            });
            state.relay_except(connection_id, &update).await;
        }
        ClientFrame::TypingStop(stop) => {
            let update = ServerFrame::TypingUpdate(TypingUpdate {
                task_id: stop.task_id,
                user_id: stop.user_id,
                user_name: None,
                is_typing: false,
            });
            state.relay_except(connection_id, &update).await;
        }
        ClientFrame::Ping => {
            tracing::debug!(connection_id = %connection_id, user_id = %user.id, "presence ping");
            state
                .send_to(
                    connection_id,
                    &ServerFrame::Pong {
                        timestamp: Utc::now().timestamp_millis(),
                    },
                )
                .await;
        }
    }
}
