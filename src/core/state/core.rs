// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use super::client::ClientMap;
use super::stats::StatsState;
use crate::config::Config;
use crate::core::handler::{CommandRegistry, Dispatcher};
use std::sync::Arc;

/// The central struct holding all shared, server-wide state.
///
/// It is wrapped in an `Arc` and handed to the accept loop and to every
/// connection task.
#[derive(Debug)]
pub struct ServerState {
    /// The server's configuration, fixed once the server is built.
    pub config: Config,
    /// A map of all live connections, keyed by connection id.
    pub clients: ClientMap,
    /// Command handlers registered by the application.
    pub registry: Arc<CommandRegistry>,
    /// The single subscriber for every connection's handshake and frame notifications.
    pub dispatcher: Arc<Dispatcher>,
    pub stats: StatsState,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(CommandRegistry::new());
        Self {
            config,
            clients: ClientMap::new(),
            dispatcher: Arc::new(Dispatcher::new(registry.clone())),
            registry,
            stats: StatsState::new(),
        }
    }
}
