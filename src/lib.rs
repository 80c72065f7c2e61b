//! # Wirecast
//!
//! A single-threaded WebSocket broadcast server written directly against raw
//! TCP sockets: it performs the opening handshake, decodes client frames and
//! relays every message to every connected peer.
//!
//! ## Features
//!
//! - **No framework**: RFC 6455 handshake and framing implemented in-crate
//! - **One reactor**: a single `mio` readiness loop, no threads, no locks
//! - **Fan-out**: every message reaches every established peer, sender included
//!
//! ## Modules
//!
//! - [`protocol`]: frame codec and opening handshake
//! - [`server`]: connection registry, broadcaster and event loop
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wirecast::{Config, Server};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let mut server = Server::bind(config.server.socket_addr()?, config.server.options())?;
//!
//!     // Blocks forever
//!     server.run();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod protocol;
pub mod server;

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig, ServerConfig};

pub use protocol::{Frame, OpCode, ProtocolError, ProtocolResult};

pub use server::{
    ConnectionId, ConnectionRegistry, JsonEncoder, PayloadEncoder, Server, ServerError,
    ServerOptions, ServerResult,
};
