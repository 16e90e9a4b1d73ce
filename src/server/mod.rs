// src/server/mod.rs

//! The `Server`: owns the listening socket and the live-connection set, and is
//! the handle applications use to register handlers and talk to clients.

use crate::config::Config;
use crate::connection::{Client, ClientId};
use crate::core::WsError;
use crate::core::state::{ServerState, StatsState};
use parking_lot::Mutex;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::warn;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;

use context::ServerContext;

/// A WebSocket server instance.
///
/// Typical use: build it, register handlers, then `start()` (or `listen()` followed
/// by `run()` when the caller needs the bound address first).
pub struct Server {
    state: Arc<ServerState>,
    started: AtomicBool,
    context: Mutex<Option<ServerContext>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state: Arc::new(ServerState::new(config)),
            started: AtomicBool::new(false),
            context: Mutex::new(None),
            local_addr: Mutex::new(None),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Accepted and rejected connection counts since the server was built.
    pub fn stats(&self) -> &StatsState {
        &self.state.stats
    }

    /// Registers a synchronous handler. Its non-empty return value is sent back as a
    /// text frame; an `Err` closes the connection.
    pub fn register_handler<F>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(&Arc<Client>, &str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.state.registry.register(command, handler);
    }

    /// Registers an asynchronous handler, spawned on its own task for each matching
    /// frame.
    pub fn register_async_handler<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.state.registry.register_async(command, handler);
    }

    pub fn unregister_handler(&self, command: &str) -> bool {
        self.state.registry.unregister(command)
    }

    pub fn unregister_async_handler(&self, command: &str) -> bool {
        self.state.registry.unregister_async(command)
    }

    /// Binds the configured address. Only the first successful call binds; later
    /// calls return `WsError::AlreadyStarted`.
    pub async fn listen(&self) -> Result<SocketAddr, WsError> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("WebSocket server already started");
            return Err(WsError::AlreadyStarted);
        }

        match initialization::setup(self.state.clone(), self.shutdown_tx.clone()).await {
            Ok(ctx) => {
                let addr = ctx.listener.local_addr()?;
                *self.local_addr.lock() = Some(addr);
                *self.context.lock() = Some(ctx);
                Ok(addr)
            }
            Err(e) => {
                // A failed bind leaves the server startable again.
                self.started.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Runs the accept loop on an address bound by `listen()`, until `stop()`.
    pub async fn run(&self) -> Result<(), WsError> {
        self.run_inner(false).await
    }

    /// Binds and runs the server, also stopping on SIGINT/SIGTERM.
    pub async fn start(&self) -> Result<(), WsError> {
        self.listen().await?;
        self.run_inner(true).await
    }

    async fn run_inner(&self, handle_signals: bool) -> Result<(), WsError> {
        let mut ctx = self.context.lock().take().ok_or_else(|| {
            WsError::Internal("listen() must succeed before the server can run".into())
        })?;

        if self.state.config.metrics.enabled {
            let metrics_state = self.state.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            ctx.background_tasks.spawn(metrics_server::run_metrics_server(
                metrics_state,
                shutdown_rx,
            ));
        }

        connection_loop::run(ctx, handle_signals).await
    }

    /// Asks the accept loop and every connection to shut down.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// The bound address, once `listen()` has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Sends `text` as a text frame. Returns false if the client is gone.
    pub async fn write(&self, client: &Client, text: &str) -> bool {
        client.send_text(text).await
    }

    pub async fn ping(&self, client: &Client) -> bool {
        client.send_ping().await
    }

    pub async fn pong(&self, client: &Client) -> bool {
        client.send_pong().await
    }

    pub fn connection_count(&self) -> usize {
        self.state.clients.len()
    }

    pub fn connection(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.state.clients.get(id).map(|entry| entry.value().clone())
    }

    pub fn connection_ids(&self) -> Vec<ClientId> {
        self.state.clients.iter().map(|entry| *entry.key()).collect()
    }
}
