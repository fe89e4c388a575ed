// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// An RAII guard to ensure connection resources are always cleaned up when a
/// connection handler's scope is exited.
pub struct ConnectionGuard {
    pub(crate) state: Arc<ServerState>,
    pub(crate) session_id: u64,
    pub(crate) addr: SocketAddr,
    /// Prevents cleanup if the connection was handed off to the replication
    /// handler, which takes over ownership of the registry entries.
    pub(crate) is_handed_off: bool,
}

impl ConnectionGuard {
    pub(crate) fn new(state: Arc<ServerState>, session_id: u64, addr: SocketAddr) -> Self {
        Self {
            state,
            session_id,
            addr,
            is_handed_off: false,
        }
    }

    /// Marks the connection as handed off, skipping cleanup in this guard's
    /// `Drop` implementation.
    pub(crate) fn set_handed_off(&mut self) {
        self.is_handed_off = true;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.is_handed_off {
            debug!(
                "ConnectionGuard for {} dropped without cleanup due to replication handoff.",
                self.addr
            );
            return;
        }

        debug!(
            "ConnectionGuard dropping, cleaning up resources for connection {}",
            self.addr
        );
        self.state.clients.remove(&self.session_id);
        self.state.replication.announced_ports.remove(&self.addr);
    }
}
