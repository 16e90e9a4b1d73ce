// src/core/handler/registry.rs

//! The shared mapping from command names to application handlers.
//!
//! There are two independent tables. Synchronous handlers run inline on the
//! connection's task and may return a reply; asynchronous handlers are spawned as
//! their own task and never reply directly. Dispatch consults the synchronous
//! table first.

use crate::connection::Client;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// `(connection, request) -> reply`. An empty reply sends nothing.
pub type SyncHandler = Arc<dyn Fn(&Arc<Client>, &str) -> anyhow::Result<String> + Send + Sync>;

/// `(connection) -> ()`, run to completion on its own task.
pub type AsyncHandler = Arc<dyn Fn(Arc<Client>) -> BoxFuture<'static, ()> + Send + Sync>;

/// What a lookup found for a command name.
pub enum Route {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

#[derive(Default)]
pub struct CommandRegistry {
    sync_handlers: DashMap<String, SyncHandler>,
    async_handlers: DashMap<String, AsyncHandler>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("sync_handlers", &self.sync_handlers.len())
            .field("async_handlers", &self.async_handlers.len())
            .finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a synchronous handler, replacing any previous one under `name`.
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Arc<Client>, &str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        let name = name.into();
        if self
            .sync_handlers
            .insert(name.clone(), Arc::new(handler))
            .is_some()
        {
            debug!("Replaced synchronous handler for command '{}'", name);
        }
    }

    /// Registers an asynchronous handler, replacing any previous one under `name`.
    pub fn register_async<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handler: AsyncHandler = Arc::new(move |client| handler(client).boxed());
        if self.async_handlers.insert(name.clone(), handler).is_some() {
            debug!("Replaced asynchronous handler for command '{}'", name);
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.sync_handlers.remove(name).is_some()
    }

    pub fn unregister_async(&self, name: &str) -> bool {
        self.async_handlers.remove(name).is_some()
    }

    /// Finds the handler for `name`, synchronous table first.
    ///
    /// The handler is cloned out of the map so no shard lock is held while it runs.
    pub fn lookup(&self, name: &str) -> Option<Route> {
        if let Some(handler) = self.sync_handlers.get(name) {
            return Some(Route::Sync(handler.value().clone()));
        }
        self.async_handlers
            .get(name)
            .map(|handler| Route::Async(handler.value().clone()))
    }

    pub fn len(&self) -> usize {
        self.sync_handlers.len() + self.async_handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
