//! Protocol error types
//!
//! Errors raised while parsing the opening handshake or decoding frames.

use thiserror::Error;

/// Errors that can occur while speaking the WebSocket wire protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The upgrade request carried no `Sec-WebSocket-Key` header
    #[error("Handshake request has no Sec-WebSocket-Key header")]
    MissingKey,

    /// The upgrade request head grew past the configured limit
    #[error("Handshake request exceeds {0} bytes")]
    HandshakeTooLarge(usize),

    /// Client frames must always carry a masking key
    #[error("Client frame is not masked")]
    UnmaskedFrame,

    /// RSV1-3 set without a negotiated extension
    #[error("Reserved bits set in frame header: {0:#04x}")]
    ReservedBits(u8),

    /// Opcode outside the RFC 6455 table
    #[error("Unknown opcode: {0:#03x}")]
    UnknownOpcode(u8),

    /// Declared payload length exceeds the configured limit
    #[error("Frame payload of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: u64, max: usize },
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
