// src/core/state/mod.rs

//! Defines the central `ServerState` struct and the state components it is built from.

mod client;
mod core;
mod stats;

pub use client::ClientMap;
pub use core::ServerState;
pub use stats::StatsState;
