// src/core/protocol/frame.rs

//! Implements the WebSocket frame structure (RFC 6455, section 5.2) with a strict
//! whole-buffer decoder and an encoder that uses the progressive 7/16/64-bit
//! payload length scheme.

use crate::core::WsError;
use bytes::{BufMut, Bytes, BytesMut};

/// The largest payload length that fits directly in the 7-bit length field.
pub const MAX_SHORT_PAYLOAD: usize = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_16_MARKER: u8 = 126;
const LEN_64_MARKER: u8 = 127;
const MASK_KEY_LEN: usize = 4;

/// The 4-bit opcode carried in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// 0x3-0x7 and 0xB-0xF. Carried through so the caller can log and skip them.
    Reserved(u8),
}

impl OpCode {
    /// Maps the low 4 bits of `byte` to an opcode. Every value is representable.
    pub fn from_u8(byte: u8) -> Self {
        match byte & OPCODE_BITS {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            other => OpCode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Reserved(b) => b & OPCODE_BITS,
        }
    }

    /// Control opcodes have the high bit of the nibble set.
    pub fn is_control(self) -> bool {
        self.as_u8() & 0x08 != 0
    }

    /// A stable lowercase name, used for log lines and metric labels.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Continuation => "continuation",
            OpCode::Text => "text",
            OpCode::Binary => "binary",
            OpCode::Close => "close",
            OpCode::Ping => "ping",
            OpCode::Pong => "pong",
            OpCode::Reserved(_) => "reserved",
        }
    }
}

/// The fixed part of a frame, as read from the start of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// RSV1-RSV3, right-aligned (0..=7).
    pub rsv: u8,
    pub opcode: OpCode,
    pub mask: Option<[u8; MASK_KEY_LEN]>,
    /// The payload length with the extended 16/64-bit forms already resolved.
    pub payload_len: u64,
    /// Bytes taken by the header, including the extended length and mask key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parses a header from the start of `buf`.
    ///
    /// Returns `WsError::IncompleteData` if `buf` ends before the header does.
    pub fn parse(buf: &[u8]) -> Result<Self, WsError> {
        if buf.len() < 2 {
            return Err(WsError::IncompleteData);
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = byte0 & FIN_BIT != 0;
        let rsv = (byte0 & RSV_BITS) >> 4;
        let opcode = OpCode::from_u8(byte0);
        let masked = byte1 & MASK_BIT != 0;

        let (payload_len, mut header_len) = match byte1 & LEN_BITS {
            LEN_16_MARKER => {
                if buf.len() < 4 {
                    return Err(WsError::IncompleteData);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
            }
            LEN_64_MARKER => {
                if buf.len() < 10 {
                    return Err(WsError::IncompleteData);
                }
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            short => (short as u64, 2),
        };

        let mask = if masked {
            if buf.len() < header_len + MASK_KEY_LEN {
                return Err(WsError::IncompleteData);
            }
            let mut key = [0u8; MASK_KEY_LEN];
            key.copy_from_slice(&buf[header_len..header_len + MASK_KEY_LEN]);
            header_len += MASK_KEY_LEN;
            Some(key)
        } else {
            None
        };

        Ok(FrameHeader {
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
            header_len,
        })
    }

    /// The total number of bytes the whole frame occupies on the wire.
    pub fn frame_len(&self) -> Option<u64> {
        (self.header_len as u64).checked_add(self.payload_len)
    }
}

/// A single decoded (or to-be-encoded) WebSocket frame.
///
/// After decoding, `payload` always holds the unmasked bytes; `masked` only records
/// whether the peer sent a mask key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv: u8,
    pub opcode: OpCode,
    pub masked: bool,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a final, unmasked frame.
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            rsv: 0,
            opcode,
            masked: false,
            payload: payload.into(),
        }
    }

    pub fn text(text: &str) -> Self {
        Self::new(OpCode::Text, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary, data)
    }

    /// A control frame with an empty payload.
    pub fn control(opcode: OpCode) -> Self {
        Self::new(opcode, Bytes::new())
    }

    pub fn ping() -> Self {
        Self::control(OpCode::Ping)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, payload)
    }

    pub fn close() -> Self {
        Self::control(OpCode::Close)
    }

    /// Returns the payload as UTF-8 text.
    pub fn as_text(&self) -> Result<&str, WsError> {
        Ok(std::str::from_utf8(&self.payload)?)
    }

    /// Decodes exactly one frame from `buf`.
    ///
    /// The buffer must contain the whole frame and nothing else: the header, the
    /// optional mask key and the declared payload length have to add up to
    /// `buf.len()`, otherwise `WsError::FrameLengthMismatch` is returned.
    pub fn decode(buf: &[u8]) -> Result<Frame, WsError> {
        let header = FrameHeader::parse(buf)?;
        let actual = (buf.len() - header.header_len) as u64;

        if header.frame_len() != Some(buf.len() as u64) {
            return Err(WsError::FrameLengthMismatch {
                declared: header.payload_len,
                actual,
            });
        }

        let mut payload = BytesMut::from(&buf[header.header_len..]);
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Frame {
            fin: header.fin,
            rsv: header.rsv,
            opcode: header.opcode,
            masked: header.mask.is_some(),
            payload: payload.freeze(),
        })
    }

    /// Encodes the frame unmasked, as the server sends it.
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len(false));
        self.encode_into(None, &mut dst);
        dst.freeze()
    }

    /// Encodes the frame with `mask` applied, as a client would send it.
    pub fn encode_masked(&self, mask: [u8; 4]) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len(true));
        self.encode_into(Some(mask), &mut dst);
        dst.freeze()
    }

    fn encoded_len(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let ext = match len {
            0..=MAX_SHORT_PAYLOAD => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + ext + if masked { MASK_KEY_LEN } else { 0 } + len
    }

    pub(crate) fn encode_into(&self, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
        let mut byte0 = self.opcode.as_u8() | ((self.rsv << 4) & RSV_BITS);
        if self.fin {
            byte0 |= FIN_BIT;
        }
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
        let len = self.payload.len();
        match len {
            0..=MAX_SHORT_PAYLOAD => dst.put_u8(mask_bit | len as u8),
            126..=0xFFFF => {
                dst.put_u8(mask_bit | LEN_16_MARKER);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(mask_bit | LEN_64_MARKER);
                dst.put_u64(len as u64);
            }
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }
}

/// XORs every byte of `buf` with `mask[i % 4]`. Applying it twice is a no-op.
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i % MASK_KEY_LEN];
    }
}
