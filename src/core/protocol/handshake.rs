// src/core/protocol/handshake.rs

//! Computes the server side of the HTTP upgrade handshake (RFC 6455, section 4.2).
//!
//! Only as much of the HTTP request is parsed as is needed to find the
//! `Sec-WebSocket-Key` header; this is not a general HTTP parser.

use crate::core::WsError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use sha1::{Digest, Sha1};

/// The fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "Sec-WebSocket-Key";

/// Derives the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.trim().as_bytes());
    sha.update(WEBSOCKET_GUID.as_bytes());
    B64.encode(sha.finalize())
}

/// The parts of an upgrade request the server cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    headers: Vec<(&'a str, &'a str)>,
}

impl<'a> HandshakeRequest<'a> {
    /// Parses the request line and headers of `text`.
    ///
    /// Anything other than a `GET` request is rejected.
    pub fn parse(text: &'a str) -> Result<Self, WsError> {
        let mut lines = text.lines();
        let request_line = lines
            .next()
            .ok_or_else(|| WsError::InvalidHandshake("empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        if method != "GET" {
            return Err(WsError::InvalidHandshake(format!(
                "expected a GET request, got '{method}'"
            )));
        }
        let path = parts.next().unwrap_or("/");

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
            .collect();

        Ok(Self {
            method,
            path,
            headers,
        })
    }

    /// Looks up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn websocket_key(&self) -> Result<&'a str, WsError> {
        match self.header(KEY_HEADER) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(WsError::MissingWebSocketKey),
        }
    }

    /// The `101 Switching Protocols` response answering this request.
    pub fn response(&self) -> Result<Vec<u8>, WsError> {
        let key = self.websocket_key()?;
        Ok(format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            accept_key(key)
        )
        .into_bytes())
    }
}

/// Builds the complete `101 Switching Protocols` response for a raw upgrade request.
pub fn handshake_response(request: &str) -> Result<Vec<u8>, WsError> {
    HandshakeRequest::parse(request)?.response()
}
