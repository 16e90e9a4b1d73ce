// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use super::client::Client;
use crate::core::metrics;
use crate::core::state::ServerState;
use std::sync::Arc;
use tracing::debug;

/// An RAII guard that removes a connection from the live set when the task driving
/// it ends, whether the read loop returned normally, failed or panicked.
pub struct ConnectionGuard {
    state: Arc<ServerState>,
    client: Arc<Client>,
}

impl ConnectionGuard {
    /// Creates a new `ConnectionGuard` and counts the connection as live.
    pub fn new(state: Arc<ServerState>, client: Arc<Client>) -> Self {
        metrics::CONNECTED_CLIENTS.inc();
        Self { state, client }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();

        if self.state.clients.remove(&self.client.id()).is_none() {
            debug!(
                "Client {} was not in the live set upon cleanup.",
                self.client.remote_endpoint()
            );
        }
        debug!(
            "Connection {} removed, {} still connected",
            self.client.remote_endpoint(),
            self.state.clients.len()
        );

        // Normally the handler has already closed the client. After a panic it has
        // not, and the write half may still be held by a handler task.
        if !self.client.is_closed()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let client = self.client.clone();
            handle.spawn(async move { client.close().await });
        }
    }
}
