//! `BoardSync` server -- REST API, server-push event stream, and
//! presence relay for a shared task board.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin boardsync-server
//!
//! # Run on custom address
//! cargo run --bin boardsync-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! BOARDSYNC_ADDR=127.0.0.1:8080 cargo run --bin boardsync-server
//! ```

use std::time::Duration;

use boardsync_server::auth::UserDirectory;
use boardsync_server::config::{ServerCliArgs, ServerConfig};
use boardsync_server::routes::{self, AppState};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting boardsync server");

    let state = AppState::new(UserDirectory::demo());
    if config.seed_demo_data {
        state.seed_demo_tasks();
    }
    state
        .hub
        .start_heartbeat(Duration::from_millis(config.heartbeat_interval_ms));

    match routes::start_server_with_state(&config.bind_addr, state.clone()).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "boardsync server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
            state.hub.shutdown();
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
