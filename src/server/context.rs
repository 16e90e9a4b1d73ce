// src/server/context.rs

use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the server's accept loop.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    /// Subscribed at bind time so a `stop()` issued before the loop starts is not lost.
    pub shutdown_rx: broadcast::Receiver<()>,
    pub background_tasks: JoinSet<()>,
    pub connection_permits: Arc<Semaphore>,
}
