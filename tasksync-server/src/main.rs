//! `TaskSync` server -- version-authoritative task API.
//!
//! An axum JSON server holding the task and tag tables. Every accepted
//! write bumps the task's version; stale writes get 409 with the current
//! version (and, by default, the current snapshot inline).
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:4680
//! cargo run --bin tasksync-server
//!
//! # Run on custom address
//! cargo run --bin tasksync-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! TASKSYNC_ADDR=127.0.0.1:8080 cargo run --bin tasksync-server
//! ```

use std::sync::Arc;

use clap::Parser;
use tasksync_server::config::{ServerCliArgs, ServerConfig};
use tasksync_server::routes::{self, AppState};
use tasksync_server::store::TaskStore;

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

    tracing::info!(addr = %config.bind_addr, "starting tasksync server");

    let state = Arc::new(AppState::with_config(
        config.inline_snapshots,
        TaskStore::new(),
    ));

    match routes::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "task server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "task server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start task server");
            std::process::exit(1);
        }
    }
}
