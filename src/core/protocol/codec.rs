// src/core/protocol/codec.rs

//! A `tokio_util::codec` adapter that turns a raw byte stream into handshake
//! requests and WebSocket frames, and frames back into bytes.

use super::frame::{Frame, FrameHeader};
use crate::core::WsError;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on the size of an HTTP upgrade request.
pub const MAX_HANDSHAKE_LEN: usize = 8 * 1024;

/// Default upper bound on a single frame's payload.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Which kind of input the decoder is currently expecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecPhase {
    Handshake,
    Frames,
}

/// One decoded unit of inbound traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The raw text of the HTTP upgrade request, up to and including the blank line.
    Handshake(String),
    Frame(Frame),
}

#[derive(Debug)]
pub struct WsCodec {
    phase: CodecPhase,
    max_frame_size: usize,
}

impl WsCodec {
    /// A codec for the server side of a fresh connection, awaiting the upgrade request.
    pub fn server(max_frame_size: usize) -> Self {
        Self {
            phase: CodecPhase::Handshake,
            max_frame_size,
        }
    }

    /// A codec that only deals in frames.
    pub fn frames(max_frame_size: usize) -> Self {
        Self {
            phase: CodecPhase::Frames,
            max_frame_size,
        }
    }

    pub fn phase(&self) -> CodecPhase {
        self.phase
    }

    /// Switches the decoder to frame mode once the handshake has been answered.
    pub fn enter_frames(&mut self) {
        self.phase = CodecPhase::Frames;
    }

    fn decode_handshake(&self, src: &mut BytesMut) -> Result<Option<Inbound>, WsError> {
        // Reject non-HTTP peers as soon as the method is visible.
        let seen = src.len().min(3);
        if src[..seen] != b"GET"[..seen] {
            return Err(WsError::InvalidHandshake(
                "request does not start with GET".into(),
            ));
        }

        match find_header_end(src) {
            Some(pos) => {
                let raw = src.split_to(pos + HEADER_END.len());
                Ok(Some(Inbound::Handshake(
                    String::from_utf8_lossy(&raw).into_owned(),
                )))
            }
            None if src.len() > MAX_HANDSHAKE_LEN => {
                Err(WsError::HandshakeTooLarge(MAX_HANDSHAKE_LEN))
            }
            None => Ok(None),
        }
    }

    fn decode_frame(&self, src: &mut BytesMut) -> Result<Option<Inbound>, WsError> {
        let header = match FrameHeader::parse(src) {
            Ok(header) => header,
            Err(WsError::IncompleteData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if header.payload_len > self.max_frame_size as u64 {
            return Err(WsError::PayloadTooLarge {
                size: header.payload_len,
                max: self.max_frame_size,
            });
        }

        // Bounded by max_frame_size above, so this fits in usize.
        let frame_len = header.header_len + header.payload_len as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let raw = src.split_to(frame_len);
        Frame::decode(&raw).map(|frame| Some(Inbound::Frame(frame)))
    }
}

impl Decoder for WsCodec {
    type Item = Inbound;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match self.phase {
            CodecPhase::Handshake => self.decode_handshake(src),
            CodecPhase::Frames => self.decode_frame(src),
        }
    }
}

impl Encoder<Frame> for WsCodec {
    type Error = WsError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(None, dst);
        Ok(())
    }
}

/// Raw bytes pass through untouched; used for the handshake response.
impl Encoder<Bytes> for WsCodec {
    type Error = WsError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

fn find_header_end(src: &[u8]) -> Option<usize> {
    src.windows(HEADER_END.len())
        .position(|window| window == HEADER_END)
}
