//! WebSocket Wire Protocol
//!
//! Pure, socket-free pieces of RFC 6455 used by the server:
//!
//! - **frame**: frame encode/decode plus masking
//! - **handshake**: opening handshake key exchange
//! - **error**: protocol error types
//!
//! # Example
//!
//! ```rust
//! use wirecast::protocol::{accept_key, decode, encode_masked, OpCode, DEFAULT_MAX_FRAME_SIZE};
//!
//! assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
//!
//! let wire = encode_masked(OpCode::Text, b"hi", [1, 2, 3, 4]);
//! let (frame, _) = decode(&wire, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
//! assert_eq!(frame.payload, b"hi");
//! ```

pub mod error;
pub mod frame;
pub mod handshake;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{
    apply_mask, decode, encode_masked, encode_text, header_len, Frame, OpCode,
    DEFAULT_MAX_FRAME_SIZE,
};
pub use handshake::{
    accept_key, client_request, extract_key, negotiate, request_head_len, upgrade_response,
    BAD_REQUEST_RESPONSE, DEFAULT_MAX_HANDSHAKE_SIZE, WEBSOCKET_GUID,
};
