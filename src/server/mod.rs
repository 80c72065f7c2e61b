//! Broadcast Server
//!
//! Accepts raw TCP connections, upgrades them to WebSocket and relays every
//! message to every connected peer.
//!
//! ## Architecture
//!
//! - **Server** (`reactor`): the single-threaded readiness loop
//! - **ConnectionRegistry** (`registry`): owned map of live connections
//! - **broadcast**: fan-out of one frame to all established connections
//! - **PayloadEncoder** (`payload`): application payload transform (JSON by default)
//!
//! ## Example
//!
//! ```rust,no_run
//! use wirecast::server::{Server, ServerOptions};
//!
//! let mut server = Server::bind("127.0.0.1:4567".parse().unwrap(), ServerOptions::default())?;
//! server.run();
//! # Ok::<(), wirecast::server::ServerError>(())
//! ```

mod broadcast;
mod error;
mod payload;
mod reactor;
mod registry;

pub use broadcast::{broadcast, BroadcastReport};
pub use error::{ServerError, ServerResult};
pub use payload::{JsonEncoder, PayloadEncoder, RawEncoder};
pub use reactor::{
    Server, ServerOptions, DEFAULT_EVENTS_CAPACITY, DEFAULT_MAX_PENDING_OUTPUT,
    DEFAULT_READ_BUFFER_SIZE, HANDSHAKE_SUCCESS,
};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, ReadOutcome, LISTENER};
