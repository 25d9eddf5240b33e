//! Channel controller: independent toggles for the three sync channels,
//! persisted across sessions.
//!
//! Each channel (polling, push, presence) starts disabled and is toggled
//! on its own; any combination is valid. Toggles persist to a TOML file
//! so a returning user gets the channels they left enabled. Tab
//! visibility pauses the data channels without flipping the persisted
//! toggles; presence stays up so typing indicators survive a hidden tab.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use boardsync_proto::entity::{Task, User};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::api::{ApiClient, ApiError};
use crate::poller::{self, BoardFeed, Poller};
use crate::push::PushChannel;
use crate::reconcile::{self, CommentCollection, TaskCollection};
use crate::typing::{PresenceChannel, PresenceError, TypingView};

/// Default polling cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Persisted channel toggles. Everything defaults to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ChannelState {
    /// Periodic "changed since" polling.
    pub polling_enabled: bool,
    /// Server-push event stream.
    pub push_enabled: bool,
    /// Presence relay for typing indicators.
    pub presence_enabled: bool,
}

/// Errors persisting channel toggles.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Failed to read or write the settings file.
    #[error("settings file {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file is not valid TOML.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// The settings could not be serialized.
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ChannelState {
    /// Default persisted location: `~/.config/boardsync/channels.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("boardsync").join("channels.toml"))
    }

    /// Loads persisted toggles; a missing file means all channels off.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SettingsError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Persists the toggles, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] on write failure.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Runtime orchestrator for the sync channels of one board session.
pub struct ChannelController {
    api: Mutex<ApiClient>,
    user: Mutex<User>,
    presence_url: String,
    tasks: TaskCollection,
    comments: CommentCollection,
    view: TypingView,
    state: Mutex<ChannelState>,
    settings_path: Option<PathBuf>,
    poller: Mutex<Option<Poller>>,
    push: Mutex<Option<PushChannel>>,
    presence: Mutex<Option<PresenceChannel>>,
}

impl ChannelController {
    /// Creates a controller with all channels off.
    ///
    /// `presence_url` is the `ws://.../presence` endpoint. Returns the
    /// receiver on which targeted assignment notifications arrive while
    /// the push channel is enabled.
    #[must_use]
    pub fn new(
        api: ApiClient,
        user: User,
        presence_url: impl Into<String>,
        settings_path: Option<PathBuf>,
    ) -> (Self, mpsc::UnboundedReceiver<Task>) {
        let tasks: TaskCollection = reconcile::shared();
        let comments: CommentCollection = reconcile::shared();
        let (push, assigned_rx) =
            PushChannel::new(api.clone(), Arc::clone(&tasks), Arc::clone(&comments));

        let state = settings_path
            .as_deref()
            .map(|path| match ChannelState::load(path) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(error = %e, "could not load channel settings, starting clean");
                    ChannelState::default()
                }
            })
            .unwrap_or_default();

        (
            Self {
                api: Mutex::new(api),
                user: Mutex::new(user),
                presence_url: presence_url.into(),
                tasks,
                comments,
                view: TypingView::new(),
                state: Mutex::new(state),
                settings_path,
                poller: Mutex::new(None),
                push: Mutex::new(Some(push)),
                presence: Mutex::new(None),
            },
            assigned_rx,
        )
    }

    /// The shared task replica.
    #[must_use]
    pub fn tasks(&self) -> TaskCollection {
        Arc::clone(&self.tasks)
    }

    /// The shared comment replica.
    #[must_use]
    pub fn comments(&self) -> CommentCollection {
        Arc::clone(&self.comments)
    }

    /// The shared typing view.
    #[must_use]
    pub fn typing_view(&self) -> TypingView {
        self.view.clone()
    }

    /// Current toggle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Applies the persisted toggles, bringing the channels up.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError`] when the presence channel was enabled
    /// but cannot connect; the other channels still come up.
    pub async fn apply_persisted(&self) -> Result<(), PresenceError> {
        let state = self.state();
        if state.polling_enabled {
            self.start_poller();
        }
        if state.push_enabled
            && let Some(push) = self.push.lock().as_ref()
        {
            push.start();
        }
        if state.presence_enabled {
            self.connect_presence().await?;
        }
        Ok(())
    }

    fn feed(&self) -> BoardFeed {
        BoardFeed::new(
            self.api.lock().clone(),
            Arc::clone(&self.tasks),
            Arc::clone(&self.comments),
        )
    }

    fn start_poller(&self) {
        let poller = Poller::spawn(self.feed(), POLL_INTERVAL);
        if let Some(old) = self.poller.lock().replace(poller) {
            old.stop();
        }
    }

    fn persist(&self) {
        if let Some(path) = self.settings_path.as_deref()
            && let Err(e) = self.state.lock().save(path)
        {
            tracing::warn!(error = %e, "could not persist channel settings");
        }
    }

    /// Toggles the polling channel.
    pub fn set_polling(&self, enabled: bool) {
        self.state.lock().polling_enabled = enabled;
        if enabled {
            self.start_poller();
        } else if let Some(poller) = self.poller.lock().take() {
            poller.stop();
        }
        self.persist();
        tracing::info!(enabled, "polling channel toggled");
    }

    /// Toggles the push channel.
    pub fn set_push(&self, enabled: bool) {
        self.state.lock().push_enabled = enabled;
        if let Some(push) = self.push.lock().as_ref() {
            if enabled {
                push.start();
            } else {
                push.stop();
            }
        }
        self.persist();
        tracing::info!(enabled, "push channel toggled");
    }

    /// Toggles the presence channel.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError`] when enabling and the connect fails; the
    /// toggle is not persisted as on in that case.
    pub async fn set_presence(&self, enabled: bool) -> Result<(), PresenceError> {
        if enabled {
            self.connect_presence().await?;
        } else if let Some(presence) = self.presence.lock().take() {
            presence.close();
        }
        self.state.lock().presence_enabled = enabled;
        self.persist();
        tracing::info!(enabled, "presence channel toggled");
        Ok(())
    }

    async fn connect_presence(&self) -> Result<(), PresenceError> {
        let (api_key, user) = {
            (
                self.api.lock().api_key().to_string(),
                self.user.lock().clone(),
            )
        };
        let channel =
            PresenceChannel::connect(&self.presence_url, &api_key, user, self.view.clone()).await?;
        if let Some(old) = self.presence.lock().replace(channel) {
            old.close();
        }
        Ok(())
    }

    /// The presence channel, for sending typing signals.
    pub fn with_presence<R>(&self, f: impl FnOnce(&PresenceChannel) -> R) -> Option<R> {
        self.presence.lock().as_ref().map(f)
    }

    /// One-shot full refresh of the replica outside the polling cadence.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the fetch fails.
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        poller::refresh(&self.feed()).await
    }

    /// Reacts to the tab being hidden or shown.
    ///
    /// Hiding pauses polling and drops the push connection; showing
    /// resumes them per the persisted toggles. Presence is untouched.
    pub fn visibility_changed(&self, visible: bool) {
        let state = self.state();
        if visible {
            if let Some(poller) = self.poller.lock().as_ref() {
                poller.resume();
            }
            if state.push_enabled
                && let Some(push) = self.push.lock().as_ref()
            {
                push.start();
            }
        } else {
            if let Some(poller) = self.poller.lock().as_ref() {
                poller.pause();
            }
            if let Some(push) = self.push.lock().as_ref() {
                push.stop();
            }
        }
        tracing::debug!(visible, "visibility changed");
    }

    /// Switches the session to a new identity.
    ///
    /// Enabled channels are cycled so they re-authenticate as the new
    /// user; the replica is refreshed in full. Returns the assignment
    /// notification receiver for the new push channel.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError`] when the presence channel was enabled
    /// and reconnecting it fails.
    pub async fn set_identity(
        &self,
        api: ApiClient,
        user: User,
    ) -> Result<mpsc::UnboundedReceiver<Task>, PresenceError> {
        tracing::info!(user_id = %user.id, "switching identity");
        *self.api.lock() = api.clone();
        *self.user.lock() = user;

        let state = self.state();

        // The push channel captures the API client at creation time, so
        // an identity switch needs a fresh channel.
        let (push, assigned_rx) = PushChannel::new(
            api,
            Arc::clone(&self.tasks),
            Arc::clone(&self.comments),
        );
        if let Some(old) = self.push.lock().replace(push) {
            old.stop();
        }
        if state.push_enabled
            && let Some(push) = self.push.lock().as_ref()
        {
            push.start();
        }

        if state.polling_enabled {
            self.start_poller();
        }
        if state.presence_enabled {
            self.connect_presence().await?;
        }
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "post-switch refresh failed");
        }
        Ok(assigned_rx)
    }
}
