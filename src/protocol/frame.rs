//! Frame codec
//!
//! Encodes outgoing payloads into WebSocket data frames and decodes
//! incoming client frames back into raw payload bytes.
//!
//! Header layout (RFC 6455 §5.2):
//! - byte 0: FIN (1 bit) + RSV1-3 (3 bits) + opcode (4 bits)
//! - byte 1: MASK (1 bit) + length indicator (7 bits)
//! - indicator 126: 2-byte big-endian length follows
//! - indicator 127: 8-byte big-endian length follows
//! - masking key: 4 bytes, present on every client frame
//!
//! Server frames are never masked.

use crate::protocol::error::{ProtocolError, ProtocolResult};

/// FIN bit of the first header byte
pub const FIN_BIT: u8 = 0x80;

/// MASK bit of the second header byte
pub const MASK_BIT: u8 = 0x80;

/// Length indicator announcing a 2-byte extended length
pub const LEN_16_MARKER: u8 = 126;

/// Length indicator announcing an 8-byte extended length
pub const LEN_64_MARKER: u8 = 127;

/// Largest payload that still fits in the one-byte length form
pub const MAX_SHORT_LEN: usize = 125;

/// Default cap on a single decoded payload (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const LEN_BITS: u8 = 0x7F;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Control frames (close, ping, pong) never carry application data
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// A single decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag (reported, never acted upon)
    pub fin: bool,
    pub opcode: OpCode,
    /// Masking key the client applied, if any
    pub masking_key: Option<[u8; 4]>,
    /// Unmasked payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Encode a server-to-client text frame (`0x81`, unmasked)
pub fn encode_text(payload: &[u8]) -> Vec<u8> {
    encode(OpCode::Text, payload, None)
}

/// Encode a client-to-server frame masked with `mask`
///
/// Servers never emit these; clients, tests and benches do.
pub fn encode_masked(opcode: OpCode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    encode(opcode, payload, Some(mask))
}

fn encode(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(header_len(payload.len(), mask.is_some()) + payload.len());
    out.push(FIN_BIT | opcode as u8);

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    write_length(&mut out, payload.len(), mask_bit);

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }

    out
}

/// Length indicator plus extended length, fixed-width big-endian
fn write_length(out: &mut Vec<u8>, len: usize, mask_bit: u8) {
    if len <= MAX_SHORT_LEN {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | LEN_16_MARKER);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | LEN_64_MARKER);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// Size of the frame header for a payload of `len` bytes
pub fn header_len(len: usize, masked: bool) -> usize {
    let base = if len <= MAX_SHORT_LEN {
        2
    } else if len <= u16::MAX as usize {
        4
    } else {
        10
    };
    if masked {
        base + 4
    } else {
        base
    }
}

/// XOR `bytes` in place with the 4-byte masking key
///
/// Masking is an involution: applying it twice restores the input.
pub fn apply_mask(bytes: &mut [u8], key: [u8; 4]) {
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Decode one client frame from the front of `buf`
///
/// Returns `Ok(None)` while the frame is still incomplete, otherwise the
/// frame and the number of bytes it occupied. Payloads longer than
/// `max_payload` are rejected before any allocation.
pub fn decode(buf: &[u8], max_payload: usize) -> ProtocolResult<Option<(Frame, usize)>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let first = buf[0];
    let second = buf[1];

    let rsv = first & RSV_BITS;
    if rsv != 0 {
        return Err(ProtocolError::ReservedBits(rsv));
    }
    let opcode = OpCode::try_from(first & OPCODE_BITS)?;
    if second & MASK_BIT == 0 {
        return Err(ProtocolError::UnmaskedFrame);
    }

    let (len, mask_offset) = match second & LEN_BITS {
        LEN_16_MARKER => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        LEN_64_MARKER => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut ext = [0u8; 8];
            ext.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(ext), 10)
        }
        short => (short as u64, 2),
    };

    if len > max_payload as u64 {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_payload,
        });
    }

    let data_offset = mask_offset + 4;
    let total = data_offset + len as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let mut key = [0u8; 4];
    key.copy_from_slice(&buf[mask_offset..data_offset]);

    let mut payload = buf[data_offset..total].to_vec();
    apply_mask(&mut payload, key);

    Ok(Some((
        Frame {
            fin: first & FIN_BIT != 0,
            opcode,
            masking_key: Some(key),
            payload,
        },
        total,
    )))
}
