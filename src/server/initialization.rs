// src/server/initialization.rs

//! Binds the listening socket and assembles the `ServerContext`.

use super::context::ServerContext;
use crate::core::WsError;
use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::info;

/// Binds the configured address. Bind failures are returned to the caller.
pub async fn setup(
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<ServerContext, WsError> {
    let config = &state.config;
    info!(
        "Starting ws-dispatch v{} (max_clients={}, max_frame_size={} bytes)",
        env!("CARGO_PKG_VERSION"),
        config.max_clients,
        config.max_frame_size
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {}", local_addr);

    let connection_permits = Arc::new(Semaphore::new(config.max_clients));
    let shutdown_rx = shutdown_tx.subscribe();

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        shutdown_rx,
        background_tasks: JoinSet::new(),
        connection_permits,
    })
}
