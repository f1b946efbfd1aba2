//! Connection bookkeeping.
//!
//! Every live client session is registered here for the duration of its
//! receive loop. The registry is only used for observability: connect and
//! disconnect notices, and the count of open sessions.

use slab::Slab;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Current state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted, WebSocket handshake not finished yet.
    Open,
    /// Registered and consuming frames.
    Receiving,
    /// Session ended; unregistered.
    Closed,
}

/// Handle of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(usize);

/// Registry of open connections using slab allocation.
///
/// Safe to share between connection tasks; all access goes through an
/// internal mutex.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Slab<SocketAddr>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slab<SocketAddr>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a connection from `peer` and log the connect event.
    pub fn register(&self, peer: SocketAddr) -> ConnectionId {
        let (id, active) = {
            let mut connections = self.lock();
            let id = connections.insert(peer);
            (id, connections.len())
        };
        info!(peer = %peer, active, "Client connected: {peer}");
        ConnectionId(id)
    }

    /// Remove a connection and log the disconnect event.
    ///
    /// Removing an id that is not registered is a no-op. Returns whether
    /// anything was removed.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, active) = {
            let mut connections = self.lock();
            let removed = connections.try_remove(id.0);
            (removed, connections.len())
        };
        match removed {
            Some(peer) => {
                info!(peer = %peer, active, "Client disconnected: {peer}");
                true
            }
            None => false,
        }
    }

    /// Check if a connection is registered.
    #[cfg(test)]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains(id.0)
    }

    /// Remote address of a registered connection.
    #[cfg(test)]
    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.lock().get(id.0).copied()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if there are no open connections.
    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Scoped registration: unregisters its connection exactly once, on drop.
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Registration {
    /// Register `peer` and return the guard that owns the registration.
    pub fn new(registry: Arc<ConnectionRegistry>, peer: SocketAddr) -> Self {
        let id = registry.register(peer);
        Self { registry, id }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
