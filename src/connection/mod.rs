// src/connection/mod.rs

//! Manages the lifecycle of a single client TCP connection: the shared `Client`
//! handle used for writing, the read loop that drives the handshake and frame
//! processing, and the guard that cleans up after it.

mod client;
mod guard;
mod handler;

pub use client::{Client, ClientId, ClientInfo};
pub use guard::ConnectionGuard;
pub use handler::{ConnectionHandler, ConnectionState};
