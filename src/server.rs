//! WebSocket listener for browser log connections.
//!
//! Prepares the log directory, binds every address the configured host
//! resolves to and hands each accepted connection to its own session task
//! until shutdown is requested.

use crate::config::Config;
use crate::connection::ConnectionRegistry;
use crate::error::ServerError;
use crate::handler::{self, ConnectionContext, Keepalive};
use crate::writer::LogWriter;
use std::net::SocketAddr;
use std::path::PathBuf;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 10000;

/// Listen backlog for the bound socket
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    config: Config,
    registry: Arc<ConnectionRegistry>,
    writer: Arc<LogWriter>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let writer = Arc::new(LogWriter::new(config.log_dir.clone()));

        Server {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            writer,
            connection_limit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        }
    }

    /// Create the log directory if needed and return its absolute path.
    pub fn prepare_log_dir(&self) -> Result<PathBuf, ServerError> {
        let dir = self.writer.log_dir();
        let log_dir_error = |source| ServerError::LogDir {
            path: dir.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(log_dir_error)?;
        std::fs::canonicalize(dir).map_err(log_dir_error)
    }

    /// Prepare the log directory, then bind a listening socket for every
    /// address the configured host resolves to.
    ///
    /// `localhost` commonly resolves to both `::1` and `127.0.0.1`; clients
    /// may dial either.
    pub async fn bind(&self) -> Result<Vec<TcpListener>, ServerError> {
        let log_dir = self.prepare_log_dir()?;

        let address = self.config.address();
        info!("Starting log server on {address}");
        info!("Logs will be written to: {}", log_dir.display());

        let resolved = tokio::net::lookup_host(&address)
            .await
            .map_err(|source| ServerError::Resolve {
                address: address.clone(),
                source,
            })?;

        let mut addrs: Vec<SocketAddr> = Vec::new();
        for addr in resolved {
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        if addrs.is_empty() {
            return Err(ServerError::NoAddress(address));
        }

        bind_all(&addrs)
    }

    /// Accept connections on every listener until `shutdown` is cancelled,
    /// then wait for the open sessions to close.
    pub async fn serve(&self, listeners: Vec<TcpListener>, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();
        let ctx = ConnectionContext {
            registry: Arc::clone(&self.registry),
            writer: Arc::clone(&self.writer),
            keepalive: Keepalive {
                interval: self.config.ping_interval,
                timeout: self.config.ping_timeout,
            },
            max_message_size: self.config.max_message_size,
            handshake_timeout: self.config.handshake_timeout,
        };

        join_all(
            listeners
                .into_iter()
                .map(|listener| self.accept_loop(listener, &ctx, &tracker, &shutdown)),
        )
        .await;

        tracker.close();
        debug!(open = self.registry.len(), "Waiting for open sessions to close");
        tracker.wait().await;
    }

    /// Accept on one listener until `shutdown` is cancelled.
    async fn accept_loop(
        &self,
        listener: TcpListener,
        ctx: &ConnectionContext,
        tracker: &TaskTracker,
        shutdown: &CancellationToken,
    ) {
        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let ctx = ctx.clone();
                    let shutdown = shutdown.clone();
                    tracker.spawn(async move {
                        handler::handle_connection(stream, peer, ctx, shutdown).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        if let Ok(addr) = listener.local_addr() {
            debug!(address = %addr, "Stopped accepting");
        }
    }

    /// Bind and serve until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let listeners = self.bind().await?;
        self.serve(listeners, shutdown).await;
        Ok(())
    }

    /// Get a reference to the registry for testing
    #[cfg(test)]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

/// Bind one listener per address; any failure aborts the whole bind.
fn bind_all(addrs: &[SocketAddr]) -> Result<Vec<TcpListener>, ServerError> {
    addrs
        .iter()
        .map(|&addr| {
            let listener = create_listener(addr)
                .and_then(TcpListener::from_std)
                .map_err(|source| ServerError::Bind {
                    address: addr,
                    source,
                })?;
            let bound = listener.local_addr().unwrap_or(addr);
            info!(address = %bound, "Server listening");
            Ok(listener)
        })
        .collect()
}

fn create_listener(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
