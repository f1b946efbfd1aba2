//! Per-connection WebSocket session.
//!
//! A session moves through [`ConnState::Open`] (handshake),
//! [`ConnState::Receiving`] (registered, consuming frames) and
//! [`ConnState::Closed`]. Frames are handled one at a time in arrival
//! order and nothing is ever sent back for them; the only frames the server
//! writes are keep-alive pings and a close frame on shutdown.

use crate::connection::{ConnState, ConnectionRegistry, Registration};
use crate::error::DecodeError;
use crate::record::{self, RawRecord};
use crate::writer::LogWriter;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Keep-alive probe settings.
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    /// Time between pings; `None` disables probing
    pub interval: Option<Duration>,
    /// Time to wait for a pong before the peer is considered dead
    pub timeout: Duration,
}

/// Shared state handed to every connection task.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub writer: Arc<LogWriter>,
    pub keepalive: Keepalive,
    /// Largest accepted message (and frame) in bytes
    pub max_message_size: usize,
    /// Time a client gets to finish the WebSocket handshake
    pub handshake_timeout: Duration,
}

impl ConnectionContext {
    fn ws_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}

/// What happened to one inbound data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Record decoded and handed to the writer
    Written,
    /// Payload was not JSON
    InvalidJson,
    /// Payload was JSON but could not be turned into a record
    ProcessingError,
}

/// Why a session left the receive loop.
#[derive(Debug)]
enum CloseReason {
    /// Peer closed the connection
    Peer,
    /// Transport failed
    Transport(tungstenite::Error),
    /// No pong within the keep-alive timeout
    PingTimeout,
    /// Server is shutting down
    Shutdown,
}

/// Decode a frame payload and write the record.
///
/// Errors are logged here and never end the session.
pub fn process_frame(decoded: Result<RawRecord, DecodeError>, writer: &LogWriter) -> FrameOutcome {
    let raw = match decoded {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Invalid JSON received: {e}");
            return FrameOutcome::InvalidJson;
        }
    };

    match raw.normalize() {
        Ok(record) => {
            writer.write(&record);
            FrameOutcome::Written
        }
        Err(e) => {
            warn!(error = %e, "Error processing message: {e}");
            FrameOutcome::ProcessingError
        }
    }
}

/// Run a full session for an accepted TCP stream.
///
/// The connection is registered once the handshake succeeds and is
/// unregistered exactly once when the session ends, whatever the cause.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: ConnectionContext,
    shutdown: CancellationToken,
) {
    let mut state = ConnState::Open;
    trace!(peer = %peer, ?state, "Connection accepted");

    let handshake = tokio::time::timeout(
        ctx.handshake_timeout,
        tokio_tungstenite::accept_async_with_config(stream, Some(ctx.ws_config())),
    );
    let ws = tokio::select! {
        _ = shutdown.cancelled() => return,
        result = handshake => match result {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "WebSocket handshake failed");
                return;
            }
            Err(_) => {
                warn!(peer = %peer, timeout = ?ctx.handshake_timeout, "WebSocket handshake timed out");
                return;
            }
        },
    };

    let registration = Registration::new(Arc::clone(&ctx.registry), peer);
    state = ConnState::Receiving;
    trace!(peer = %peer, id = ?registration.id(), ?state, "Session started");

    let reason = receive_loop(ws, &ctx, &shutdown).await;

    drop(registration);
    state = ConnState::Closed;
    match reason {
        CloseReason::Transport(e) if !is_disconnect(&e) => {
            warn!(peer = %peer, error = %e, ?state, "Connection error");
        }
        CloseReason::PingTimeout => {
            warn!(peer = %peer, ?state, "Keep-alive timed out");
        }
        reason => debug!(peer = %peer, ?reason, ?state, "Session ended"),
    }
}

async fn receive_loop(
    mut ws: WebSocketStream<TcpStream>,
    ctx: &ConnectionContext,
    shutdown: &CancellationToken,
) -> CloseReason {
    let mut ping_timer = ctx.keepalive.interval.map(|period| {
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if !close_within(&mut ws, ctx.keepalive.timeout).await {
                    debug!("Close frame not delivered before timeout");
                }
                return CloseReason::Shutdown;
            }

            _ = tick(&mut ping_timer) => {
                if pong_deadline.is_none() {
                    if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                        return CloseReason::Transport(e);
                    }
                    pong_deadline = Some(Instant::now() + ctx.keepalive.timeout);
                }
            }

            _ = deadline(pong_deadline) => return CloseReason::PingTimeout,

            frame = ws.next() => match frame {
                None => return CloseReason::Peer,
                Some(Err(e)) => return CloseReason::Transport(e),
                Some(Ok(Message::Text(text))) => {
                    process_frame(record::decode(text.as_str()), &ctx.writer);
                }
                Some(Ok(Message::Binary(data))) => {
                    process_frame(record::decode_bytes(&data), &ctx.writer);
                }
                Some(Ok(Message::Pong(_))) => pong_deadline = None,
                // Pings are answered by the WebSocket layer; a close frame
                // ends the stream once the reply has been flushed.
                Some(Ok(Message::Ping(_) | Message::Close(_) | Message::Frame(_))) => {}
            },
        }
    }
}

/// Send a close frame, giving up after `limit`.
///
/// Returns whether the close frame was flushed in time.
async fn close_within<S>(ws: &mut WebSocketStream<S>, limit: Duration) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(limit, ws.close(None)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            trace!(error = %e, "Close on shutdown failed");
            false
        }
        Err(_) => false,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Errors that are just the peer going away.
fn is_disconnect(e: &tungstenite::Error) -> bool {
    use tungstenite::error::ProtocolError;

    matches!(
        e,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    ) || matches!(e, tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionReset)
}
