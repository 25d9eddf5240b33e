//! Typing indicators: the local view of who is typing where, and the
//! WebSocket presence channel that feeds it.
//!
//! Typing state is ephemeral. Indicators expire locally when no fresh
//! signal arrives, so a peer that vanishes mid-keystroke never leaves a
//! stuck "is typing" label. Outgoing typing auto-stops after the same
//! interval of keyboard silence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use boardsync_proto::entity::User;
use boardsync_proto::presence::{
    self, ClientFrame, ServerFrame, TypingStart, TypingStop, TypingUpdate,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

/// How long an indicator lives without a fresh signal, and how long
/// after the last keystroke an outgoing start auto-stops.
pub const TYPING_EXPIRY: Duration = Duration::from_millis(1500);

struct Typist {
    name: Option<String>,
    generation: u64,
}

/// Local view of active typing indicators, keyed by task and user.
#[derive(Clone)]
pub struct TypingView {
    typists: Arc<Mutex<HashMap<(Uuid, Uuid), Typist>>>,
    expiry: Duration,
    generation: Arc<Mutex<u64>>,
}

impl Default for TypingView {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingView {
    /// Creates a view with the standard expiry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_expiry(TYPING_EXPIRY)
    }

    /// Creates a view with a custom expiry.
    #[must_use]
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            typists: Arc::new(Mutex::new(HashMap::new())),
            expiry,
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Applies a relayed typing state change.
    ///
    /// A start arms (or re-arms) the expiry timer for that indicator; a
    /// stop clears it immediately. The generation counter makes a stale
    /// timer from a superseded start a no-op.
    pub fn apply(&self, update: &TypingUpdate) {
        let key = (update.task_id, update.user_id);
        if !update.is_typing {
            self.typists.lock().remove(&key);
            return;
        }

        let generation = {
            let mut counter = self.generation.lock();
            *counter += 1;
            *counter
        };
        self.typists.lock().insert(
            key,
            Typist {
                name: update.user_name.clone(),
                generation,
            },
        );

        let typists = Arc::clone(&self.typists);
        let expiry = self.expiry;
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            let mut typists = typists.lock();
            if typists.get(&key).is_some_and(|t| t.generation == generation) {
                typists.remove(&key);
            }
        });
    }

    /// Users currently typing on the given task, with display names
    /// where known.
    #[must_use]
    pub fn typists(&self, task_id: Uuid) -> Vec<(Uuid, Option<String>)> {
        self.typists
            .lock()
            .iter()
            .filter(|((task, _), _)| *task == task_id)
            .map(|((_, user), typist)| (*user, typist.name.clone()))
            .collect()
    }

    /// Whether anyone is typing anywhere.
    #[must_use]
    pub fn is_anyone_typing(&self) -> bool {
        !self.typists.lock().is_empty()
    }
}

/// Presence channel failure.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// WebSocket connect or handshake failed.
    #[error("presence connect failed: {0}")]
    Connect(#[from] tungstenite::Error),

    /// The API key is not a valid header value.
    #[error("invalid API key header")]
    InvalidKey(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
}

/// WebSocket connection to the presence relay for one identity.
///
/// Incoming typing updates land in the shared [`TypingView`]; outgoing
/// signals are composed from the connected user's identity.
pub struct PresenceChannel {
    user: User,
    tx: mpsc::UnboundedSender<Message>,
    view: TypingView,
    typing_generation: Arc<Mutex<u64>>,
    context: Mutex<Option<Uuid>>,
    write_task: tokio::task::JoinHandle<()>,
    read_task: tokio::task::JoinHandle<()>,
}

impl PresenceChannel {
    /// Dials the relay at `url` (a `ws://.../presence` endpoint) and
    /// authenticates with the API key.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError`] when the handshake fails.
    pub async fn connect(
        url: &str,
        api_key: &str,
        user: User,
        view: TypingView,
    ) -> Result<Self, PresenceError> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("x-api-key", HeaderValue::from_str(api_key)?);
        let (socket, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    tracing::warn!("presence socket write failed");
                    break;
                }
            }
        });

        let reader_view = view.clone();
        let read_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = ws_receiver.next().await {
                match msg {
                    Message::Text(text) => match presence::decode_server(text.as_str()) {
                        Ok(ServerFrame::TypingUpdate(update)) => reader_view.apply(&update),
                        Ok(ServerFrame::Pong { timestamp }) => {
                            tracing::debug!(timestamp, "presence pong");
                        }
                        Ok(ServerFrame::Exception { message, .. }) => {
                            tracing::warn!(message = %message, "presence relay rejected a frame");
                        }
                        Ok(ServerFrame::Connected { client_id, .. }) => {
                            tracing::debug!(client_id = %client_id, "presence peer connected");
                        }
                        Ok(ServerFrame::Disconnected { client_id, .. }) => {
                            tracing::debug!(client_id = %client_id, "presence peer disconnected");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "undecodable presence frame");
                        }
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        tracing::info!(user_id = %user.id, "presence channel connected");
        Ok(Self {
            user,
            tx,
            view,
            typing_generation: Arc::new(Mutex::new(0)),
            context: Mutex::new(None),
            write_task,
            read_task,
        })
    }

    /// The shared typing view this channel feeds.
    #[must_use]
    pub const fn view(&self) -> &TypingView {
        &self.view
    }

    fn send_frame(&self, frame: &ClientFrame) {
        if let Ok(json) = presence::encode_client(frame) {
            let _ = self.tx.send(Message::Text(json.into()));
        }
    }

    /// Signals typing on a task and arms the auto-stop timer.
    ///
    /// Calling again before the timer fires re-arms it, so one signal
    /// per keystroke gives continuous typing with a single stop at the
    /// end.
    pub fn start_typing(&self, task_id: Uuid) {
        self.send_frame(&ClientFrame::TypingStart(TypingStart {
            task_id,
            user_id: self.user.id,
            user_name: self.user.name.clone(),
        }));

        let generation = {
            let mut counter = self.typing_generation.lock();
            *counter += 1;
            *counter
        };
        let tx = self.tx.clone();
        let user_id = self.user.id;
        let armed = Arc::clone(&self.typing_generation);
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_EXPIRY).await;
            if *armed.lock() != generation {
                return;
            }
            let stop = ClientFrame::TypingStop(TypingStop { task_id, user_id });
            if let Ok(json) = presence::encode_client(&stop) {
                let _ = tx.send(Message::Text(json.into()));
            }
        });
    }

    /// Signals that typing stopped, cancelling any pending auto-stop.
    pub fn stop_typing(&self, task_id: Uuid) {
        *self.typing_generation.lock() += 1;
        self.send_frame(&ClientFrame::TypingStop(TypingStop {
            task_id,
            user_id: self.user.id,
        }));
    }

    /// Marks the task whose editor has focus.
    ///
    /// Switching focus to a different task stops any typing signalled on
    /// the previous one, so peers never see a stale indicator on a task
    /// the user has left.
    pub fn set_context(&self, task_id: Uuid) {
        let previous = self.context.lock().replace(task_id);
        if let Some(previous) = previous
            && previous != task_id
        {
            self.stop_typing(previous);
        }
    }

    /// Clears the focused task, stopping any typing signalled on it.
    pub fn clear_context(&self) {
        let previous = self.context.lock().take();
        if let Some(previous) = previous {
            self.stop_typing(previous);
        }
    }

    /// Sends a liveness probe.
    pub fn ping(&self) {
        self.send_frame(&ClientFrame::Ping);
    }

    /// Closes the channel.
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
        self.read_task.abort();
        self.write_task.abort();
    }
}

impl Drop for PresenceChannel {
    fn drop(&mut self) {
        self.close();
    }
}
