//! Workdeck real-time server: chat rooms, presence and notifications over
//! WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:4000
//! cargo run --bin workdeck-realtime
//!
//! # Run on custom address with a users file
//! cargo run --bin workdeck-realtime -- --bind 127.0.0.1:8080 --config workdeck.toml
//!
//! # Or via environment variable
//! WORKDECK_ADDR=127.0.0.1:8080 cargo run --bin workdeck-realtime
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use workdeck_realtime::config::{ServerCliArgs, ServerConfig};
use workdeck_realtime::hub::{Hub, Services};
use workdeck_realtime::server;

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

    let _log_guard = init_logging(&config.log_level, config.log_dir.as_deref());

    let directory = Arc::new(config.build_directory());
    if directory.is_empty() {
        tracing::warn!("no users configured, every handshake will be rejected");
    }
    tracing::info!(addr = %config.bind_addr, users = directory.len(), "starting workdeck realtime server");

    let hub = Arc::new(Hub::new(
        Services::in_memory(directory),
        config.hub_settings(),
    ));
    let sweeper = hub
        .notifications()
        .spawn_sweeper(Duration::from_secs(config.sweep_interval_secs.max(1)));

    let (bound_addr, handle) = match server::start_server(&config.bind_addr, Arc::clone(&hub)).await
    {
        Ok(started) => started,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %bound_addr, "server listening");

    tokio::select! {
        result = handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server task failed");
            }
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!(connections = hub.registry().connection_count(), "shutting down");
            hub.close_all();
            // Give writer tasks a moment to flush their close frames.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    sweeper.abort();
}

/// Initialize logging to stdout, or to a daily rolling file under `log_dir`.
///
/// The returned [`WorkerGuard`] must be held until shutdown so buffered
/// file output is flushed.
fn init_logging(level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(dir) = log_dir else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };

    let file_appender = tracing_appender::rolling::daily(dir, "workdeck-realtime.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();
    Some(guard)
}
