//! Client configuration: server location and credentials.
//!
//! Loaded from `~/.config/boardsync/config.toml` with compiled defaults
//! for anything missing. Channel toggles live in their own file (see
//! [`crate::channels::ChannelState`]); this covers the session basics.

use std::path::{Path, PathBuf};

/// Errors that can occur when loading client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// TOML config file structure (all fields optional for partial files).
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ClientConfigFile {
    server_url: Option<String>,
    api_key: Option<String>,
    poll_interval_ms: Option<u64>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server REST API.
    pub server_url: String,
    /// API key to authenticate with; `None` until the user picks an
    /// identity.
    pub api_key: Option<String>,
    /// Polling cadence in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            api_key: None,
            poll_interval_ms: 1000,
        }
    }
}

impl ClientConfig {
    /// Default config location: `~/.config/boardsync/config.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("boardsync").join("config.toml"))
    }

    /// Loads configuration from the default path; a missing file yields
    /// the compiled defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Loads configuration from an explicit path; a missing file yields
    /// the compiled defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let file = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientConfigFile::default(),
            Err(e) => {
                return Err(ConfigError::ReadFile {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        let defaults = Self::default();
        Ok(Self {
            server_url: file.server_url.unwrap_or(defaults.server_url),
            api_key: file.api_key,
            poll_interval_ms: file.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        })
    }

    /// WebSocket URL of the presence endpoint, derived from the server
    /// URL.
    #[must_use]
    pub fn presence_url(&self) -> String {
        let ws_base = self
            .server_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/presence", ws_base.trim_end_matches('/'))
    }
}
