//! Server error types
//!
//! Defines all errors that can occur in the reactor, registry and broadcaster.

use std::net::SocketAddr;
use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::server::registry::ConnectionId;

/// Errors that can occur while running the server
#[derive(Error, Debug)]
pub enum ServerError {
    /// Creating, binding or listening on the server socket failed
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Socket I/O or readiness wait failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer violated the wire protocol
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Application payload transform failed
    #[error("Payload encoding error: {0}")]
    Encode(String),

    /// Peer stopped draining its socket and its queue hit the limit
    #[error("Output queue for client#{id} holds {pending} bytes, limit is {limit}")]
    Backpressure {
        id: ConnectionId,
        pending: usize,
        limit: usize,
    },

    /// Identity is not (or no longer) in the registry
    #[error("Unknown connection: client#{0}")]
    UnknownConnection(ConnectionId),
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Encode(err.to_string())
    }
}

/// Result type alias for server operations
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::UnknownConnection(ConnectionId(7));
        assert_eq!(err.to_string(), "Unknown connection: client#7");

        let err = ServerError::Backpressure {
            id: ConnectionId(3),
            pending: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Output queue for client#3 holds 2048 bytes, limit is 1024"
        );

        let err: ServerError = ProtocolError::MissingKey.into();
        assert_eq!(
            err.to_string(),
            "Protocol error: Handshake request has no Sec-WebSocket-Key header"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let server_err: ServerError = io_err.into();
        assert!(matches!(server_err, ServerError::Io(_)));
    }
}
