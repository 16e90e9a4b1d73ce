// src/core/mod.rs

//! The protocol engine: frame codec, handshake, command routing and shared state.

pub mod errors;
pub mod handler;
pub mod metrics;
pub mod protocol;
pub mod state;

pub use errors::WsError;
pub use protocol::{Frame, OpCode};
