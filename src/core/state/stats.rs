// src/core/state/stats.rs

//! Connection counters kept alongside the Prometheus metrics, readable without
//! scraping.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StatsState {
    accepted: AtomicU64,
    /// Sockets closed at accept time because `max_clients` was reached.
    rejected: AtomicU64,
}

impl StatsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections accepted since startup, including ones already gone.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
