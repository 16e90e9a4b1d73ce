// src/meter.rs

//! A level-meter feed served over the command interface.
//!
//! A client that sends `GetVuMeterValues` receives a random reading in `1..100`
//! about fifteen times a second, until it sends `StopSendVuMeterValues` or goes
//! away. Each client's stream is independent of every other client's.

use crate::connection::{Client, ClientId};
use crate::server::Server;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const START_COMMAND: &str = "GetVuMeterValues";
pub const STOP_COMMAND: &str = "StopSendVuMeterValues";

/// Fifteen readings per second.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000 / 15);

#[derive(Debug)]
pub struct MeterFeed {
    /// Streaming clients, each mapped to the generation of its current stream.
    streams: DashMap<ClientId, u64>,
    next_generation: AtomicU64,
    interval: Duration,
}

impl MeterFeed {
    pub fn new(interval: Duration) -> Self {
        Self {
            streams: DashMap::new(),
            next_generation: AtomicU64::new(0),
            interval,
        }
    }

    /// Registers the start and stop commands on `server`.
    pub fn install(self: &Arc<Self>, server: &Server) {
        let feed = self.clone();
        server.register_async_handler(START_COMMAND, move |client| {
            let feed = feed.clone();
            async move { feed.stream(client).await }
        });

        let feed = self.clone();
        server.register_handler(STOP_COMMAND, move |client, _| {
            if !feed.stop(client.id()) {
                debug!("Client {} has never registered", client.id());
            }
            Ok(String::new())
        });
    }

    pub fn is_streaming(&self, id: &ClientId) -> bool {
        self.streams.contains_key(id)
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Ends the client's stream. Returns false if it had none.
    pub fn stop(&self, id: ClientId) -> bool {
        self.streams.remove(&id).is_some()
    }

    /// Streams readings to `client` until it is stopped or a write fails.
    /// A second request from a client that is already streaming is ignored.
    pub async fn stream(&self, client: Arc<Client>) {
        let id = client.id();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        match self.streams.entry(id) {
            Entry::Occupied(_) => {
                debug!("Client {} already registered", id);
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(generation);
            }
        }

        let mut rng = SmallRng::from_entropy();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            // A stop followed by a new start must not revive this loop.
            if self.streams.get(&id).map(|g| *g) != Some(generation) {
                break;
            }
            let reading: u32 = rng.gen_range(1..100);
            if !client.send_text(&reading.to_string()).await {
                debug!("Client {} stopped accepting readings", id);
                break;
            }
        }

        self.streams.remove_if(&id, |_, g| *g == generation);
    }
}
