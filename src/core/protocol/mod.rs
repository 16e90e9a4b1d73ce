// src/core/protocol/mod.rs

pub mod codec;
pub mod frame;
pub mod handshake;

pub use codec::{CodecPhase, Inbound, WsCodec};
pub use frame::{Frame, FrameHeader, OpCode, apply_mask};
pub use handshake::{HandshakeRequest, accept_key, handshake_response};
