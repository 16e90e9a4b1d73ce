// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod meter;
pub mod server;

// Re-export
pub use crate::config::Config;
pub use crate::connection::{Client, ClientId};
pub use crate::core::WsError;
pub use crate::server::Server;
