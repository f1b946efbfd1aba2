//! console-log-server: collects browser console output over WebSocket
//!
//! Browser pages push their console calls as JSON frames:
//!
//! ```text
//! {"level":"error","args":["Uncaught TypeError","at line 42"],"url":"https://example.com/app.js"}
//! ```
//!
//! Every record is appended to `<log_dir>/console-<YYYY-MM-DD>.log` and
//! echoed to the console.
//!
//! Features:
//! - One task per connection, frames handled in arrival order
//! - Malformed frames are logged and skipped, never fatal
//! - Keep-alive pings drop silently dead peers
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod error;
mod handler;
mod record;
mod server;
mod writer;

use config::Config;
use server::Server;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        log_dir = %config.log_dir.display(),
        ping_interval = ?config.ping_interval,
        ping_timeout = ?config.ping_timeout,
        max_message_size = config.max_message_size,
        handshake_timeout = ?config.handshake_timeout,
        "Starting console-log-server"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    info!("Log server is running. Press Ctrl+C to stop.");
    Server::new(config).run(shutdown).await?;
    info!("Log server stopped");

    Ok(())
}

/// Cancel `shutdown` on SIGINT, or SIGTERM on unix.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
        }
        _ = terminate => {}
    }

    info!("Shutting down log server...");
    shutdown.cancel();
}
