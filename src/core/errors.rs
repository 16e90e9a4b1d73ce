// src/core/errors.rs

//! Defines the primary error type for the entire server.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure the protocol engine can report.
///
/// Transport and protocol errors are always scoped to a single connection: the
/// connection handler logs them and tears that connection down. Only `AlreadyStarted`
/// and bind failures surface to the caller of `Server::listen`.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Invalid handshake request: {0}")]
    InvalidHandshake(String),

    #[error("Handshake request is missing the Sec-WebSocket-Key header")]
    MissingWebSocketKey,

    #[error("Handshake request exceeds {0} bytes")]
    HandshakeTooLarge(usize),

    #[error("Frame declares {declared} bytes but {actual} bytes were received")]
    FrameLengthMismatch { declared: u64, actual: u64 },

    #[error("Frame payload of {size} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { size: u64, max: usize },

    #[error("Client frames must be masked")]
    UnmaskedFrame,

    #[error("Text payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// `std::io::Error` is not cloneable, so it lives behind an `Arc`.
impl Clone for WsError {
    fn clone(&self) -> Self {
        match self {
            WsError::Io(e) => WsError::Io(Arc::clone(e)),
            WsError::IncompleteData => WsError::IncompleteData,
            WsError::InvalidHandshake(s) => WsError::InvalidHandshake(s.clone()),
            WsError::MissingWebSocketKey => WsError::MissingWebSocketKey,
            WsError::HandshakeTooLarge(n) => WsError::HandshakeTooLarge(*n),
            WsError::FrameLengthMismatch { declared, actual } => WsError::FrameLengthMismatch {
                declared: *declared,
                actual: *actual,
            },
            WsError::PayloadTooLarge { size, max } => WsError::PayloadTooLarge {
                size: *size,
                max: *max,
            },
            WsError::UnmaskedFrame => WsError::UnmaskedFrame,
            WsError::InvalidUtf8 => WsError::InvalidUtf8,
            WsError::ConnectionClosed => WsError::ConnectionClosed,
            WsError::AlreadyStarted => WsError::AlreadyStarted,
            WsError::Handler(s) => WsError::Handler(s.clone()),
            WsError::Internal(s) => WsError::Internal(s.clone()),
        }
    }
}

impl PartialEq for WsError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WsError::Io(e1), WsError::Io(e2)) => e1.kind() == e2.kind(),
            (WsError::InvalidHandshake(s1), WsError::InvalidHandshake(s2)) => s1 == s2,
            (WsError::HandshakeTooLarge(n1), WsError::HandshakeTooLarge(n2)) => n1 == n2,
            (
                WsError::FrameLengthMismatch {
                    declared: d1,
                    actual: a1,
                },
                WsError::FrameLengthMismatch {
                    declared: d2,
                    actual: a2,
                },
            ) => d1 == d2 && a1 == a2,
            (
                WsError::PayloadTooLarge { size: s1, max: m1 },
                WsError::PayloadTooLarge { size: s2, max: m2 },
            ) => s1 == s2 && m1 == m2,
            (WsError::Handler(s1), WsError::Handler(s2)) => s1 == s2,
            (WsError::Internal(s1), WsError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl WsError {
    /// Returns true for errors that mean the peer simply went away.
    pub fn is_normal_disconnect(&self) -> bool {
        match self {
            WsError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            WsError::ConnectionClosed => true,
            _ => false,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for WsError {
    fn from(e: std::io::Error) -> Self {
        WsError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for WsError {
    fn from(_: std::str::Utf8Error) -> Self {
        WsError::InvalidUtf8
    }
}

impl From<std::string::FromUtf8Error> for WsError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        WsError::InvalidUtf8
    }
}

impl From<anyhow::Error> for WsError {
    fn from(e: anyhow::Error) -> Self {
        WsError::Handler(format!("{e:#}"))
    }
}
