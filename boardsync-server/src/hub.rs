//! Event hub: fan-out of domain events and heartbeats to push subscribers.
//!
//! Every mutation commits to its store first, then publishes a
//! [`StreamEvent`] here. Each push connection registers a [`Subscription`]
//! that merges three sources into one ordered stream: broadcast events,
//! events targeted at the subscriber's user, and periodic heartbeats
//! (heartbeats ride the broadcast channel). Delivery is fire-and-forget;
//! a slow or dead subscriber never blocks the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use boardsync_proto::event::{Envelope, HeartbeatEvent, StreamEvent};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Broadcast channel capacity; subscribers that fall further behind than
/// this observe a lag and skip ahead.
const BROADCAST_CAPACITY: usize = 256;

/// Sender half of one subscriber's targeted-delivery channel.
struct SubscriberHandle {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<Envelope>,
}

struct HubInner {
    broadcast_tx: broadcast::Sender<Envelope>,
    subscribers: RwLock<HashMap<Uuid, SubscriberHandle>>,
}

/// Shared event hub. Cheap to clone; all clones publish to the same
/// subscribers.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
    heartbeat: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Creates a hub with no subscribers and no heartbeat task running.
    #[must_use]
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                broadcast_tx,
                subscribers: RwLock::new(HashMap::new()),
            }),
            heartbeat: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers a push connection for the given user.
    ///
    /// The returned subscription receives every broadcast event plus any
    /// event targeted at `user_id`. Dropping it releases the registration.
    #[must_use]
    pub fn register(&self, user_id: Uuid) -> Subscription {
        let connection_id = Uuid::new_v4();
        let (tx, targeted_rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .write()
            .insert(connection_id, SubscriberHandle { user_id, tx });
        tracing::info!(connection_id = %connection_id, user_id = %user_id, "push subscriber registered");
        Subscription {
            connection_id,
            user_id,
            broadcast_rx: self.inner.broadcast_tx.subscribe(),
            targeted_rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Publishes an event to every current subscriber.
    pub fn broadcast(&self, event: impl Into<StreamEvent>) {
        let envelope = Envelope::new(event.into());
        // Err means no subscriber is listening right now; the event is
        // simply not delivered live (poll channels still see the mutation).
        let _ = self.inner.broadcast_tx.send(envelope);
    }

    /// Delivers an event to every connection belonging to `user_id`.
    ///
    /// A user with several open connections receives one copy per
    /// connection; a user with none receives nothing and no error is
    /// raised. Connections whose channel is gone are dropped from the
    /// registry here.
    pub fn send_to_user(&self, user_id: Uuid, event: impl Into<StreamEvent>) {
        let event = event.into();
        let mut dead = Vec::new();
        {
            let subscribers = self.inner.subscribers.read();
            for (connection_id, handle) in subscribers.iter() {
                if handle.user_id != user_id {
                    continue;
                }
                if handle.tx.send(Envelope::new(event.clone())).is_err() {
                    dead.push(*connection_id);
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.inner.subscribers.write();
            for connection_id in dead {
                subscribers.remove(&connection_id);
                tracing::warn!(connection_id = %connection_id, "removed dead push subscriber");
            }
        }
    }

    /// Starts the periodic heartbeat broadcast, replacing any previous
    /// heartbeat task.
    pub fn start_heartbeat(&self, interval: Duration) {
        let hub = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so heartbeats are
            // spaced a full interval apart from subscription time.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                hub.broadcast(HeartbeatEvent::now());
            }
        });
        if let Some(old) = self.heartbeat.lock().replace(handle) {
            old.abort();
        }
    }

    /// Removes a connection from the registry.
    ///
    /// Dropping the [`Subscription`] does this automatically; releasing a
    /// connection that is already gone is a no-op.
    pub fn release(&self, connection_id: Uuid) {
        if self
            .inner
            .subscribers
            .write()
            .remove(&connection_id)
            .is_some()
        {
            tracing::info!(connection_id = %connection_id, "push subscriber released");
        }
    }

    /// Stops the heartbeat task if one is running.
    pub fn shutdown(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }

    /// Number of currently registered push connections.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

/// One push connection's view of the hub.
///
/// Dropping the subscription unregisters it; releasing twice is harmless.
pub struct Subscription {
    connection_id: Uuid,
    user_id: Uuid,
    broadcast_rx: broadcast::Receiver<Envelope>,
    targeted_rx: mpsc::UnboundedReceiver<Envelope>,
    inner: Arc<HubInner>,
}

impl Subscription {
    /// Unique id of this connection.
    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// User this connection authenticated as.
    #[must_use]
    pub const fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Receives the next event on the merged stream.
    ///
    /// Returns `None` once both sources are closed. A subscriber that
    /// lagged behind the broadcast channel skips the missed events and
    /// keeps receiving; the missed mutations remain discoverable through
    /// a "changed since" poll.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            tokio::select! {
                targeted = self.targeted_rx.recv() => return targeted,
                broadcast = self.broadcast_rx.recv() => match broadcast {
                    Ok(envelope) => return Some(envelope),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            connection_id = %self.connection_id,
                            skipped,
                            "push subscriber lagged, skipping ahead"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return self.targeted_rx.recv().await;
                    }
                },
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self
            .inner
            .subscribers
            .write()
            .remove(&self.connection_id)
            .is_some()
        {
            tracing::info!(connection_id = %self.connection_id, "push subscriber released");
        }
    }
}
