//! Event Loop
//!
//! A single-threaded readiness loop over one `mio::Poll`. Every socket in
//! the registry is registered with the poll; each turn blocks on the poll,
//! then accepts, negotiates, decodes and broadcasts without yielding.
//!
//! ```text
//! poll ─┬─ listener ─► accept ─► registry.add
//!       └─ client ───► read ─┬─ 0 bytes ──────► remove ─► notice ─┐
//!                            ├─ no handshake ─► negotiate         │
//!                            └─ established ──► decode ─► payload ┤
//!                                                                 ▼
//!                                          encode payload ─► broadcast
//! ```

use mio::{Events, Poll};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::{self, Frame, OpCode, ProtocolError};
use crate::server::broadcast::broadcast;
use crate::server::error::{ServerError, ServerResult};
use crate::server::payload::{JsonEncoder, PayloadEncoder};
use crate::server::registry::{ConnectionId, ConnectionRegistry, LISTENER};

/// Payload of the frame sent right after a successful handshake
pub const HANDSHAKE_SUCCESS: &str = "handshake success";

/// Default read chunk size
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Default number of readiness events collected per turn
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Default cap on unwritten bytes queued for one peer (32 MiB)
pub const DEFAULT_MAX_PENDING_OUTPUT: usize = 32 * 1024 * 1024;

/// Tunables for the event loop
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bytes requested per `read` call
    pub read_buffer_size: usize,
    /// Upper bound on a buffered handshake request head
    pub max_handshake_size: usize,
    /// Upper bound on a single decoded frame payload
    pub max_frame_size: usize,
    /// Capacity of the readiness event buffer
    pub events_capacity: usize,
    /// Unwritten bytes a peer may accumulate before it is dropped
    pub max_pending_output: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_handshake_size: protocol::DEFAULT_MAX_HANDSHAKE_SIZE,
            max_frame_size: protocol::DEFAULT_MAX_FRAME_SIZE,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            max_pending_output: DEFAULT_MAX_PENDING_OUTPUT,
        }
    }
}

/// What the inbound processor decided after one step
enum Step {
    /// More buffered input may be processable
    Continue,
    /// Wait for more bytes
    Idle,
    /// Terminal failure or close: remove and announce
    Disconnect,
    /// Handshake refused: remove silently
    Reject,
}

/// The broadcast server
pub struct Server {
    poll: Poll,
    events: Events,
    registry: ConnectionRegistry,
    encoder: Box<dyn PayloadEncoder>,
    options: ServerOptions,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the listening socket and build the poll around it
    ///
    /// Failure here is fatal for the process.
    pub fn bind(addr: SocketAddr, options: ServerOptions) -> ServerResult<Self> {
        let listener = mio::net::TcpListener::bind(addr)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        let registry = ConnectionRegistry::new(listener, poll.registry().try_clone()?)?
            .with_max_pending_output(options.max_pending_output);

        tracing::info!(addr = %local_addr, "Listening");

        Ok(Self {
            poll,
            events: Events::with_capacity(options.events_capacity.max(1)),
            registry,
            encoder: Box::new(JsonEncoder),
            options,
            local_addr,
        })
    }

    /// Replace the default JSON payload transform
    pub fn with_encoder(mut self, encoder: impl PayloadEncoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Run forever. Readiness-wait failures are logged and the loop continues.
    pub fn run(&mut self) {
        loop {
            if let Err(e) = self.turn(None) {
                tracing::error!(error = %e, "Readiness wait failed");
            }
        }
    }

    /// One loop iteration: wait for readiness, then service every ready socket
    ///
    /// Returns the number of readiness events handled. `None` blocks until
    /// something is ready.
    pub fn turn(&mut self, timeout: Option<Duration>) -> ServerResult<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e.into()),
        }

        let ready: Vec<(ConnectionId, bool, bool)> = self
            .events
            .iter()
            .map(|event| {
                (
                    ConnectionId::from_token(event.token()),
                    event.is_readable() || event.is_read_closed() || event.is_error(),
                    event.is_writable(),
                )
            })
            .collect();

        for &(id, readable, writable) in &ready {
            if id == LISTENER {
                self.accept_pending();
                continue;
            }
            if writable {
                self.flush_connection(id);
            }
            if readable {
                self.service_readable(id);
            }
        }

        Ok(ready.len())
    }

    fn accept_pending(&mut self) {
        loop {
            match self.registry.listener().accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    match self.registry.add(stream) {
                        Ok(id) => {
                            tracing::info!(connection_id = %id, peer = %peer, "Client connected")
                        }
                        Err(e) => {
                            tracing::warn!(peer = %peer, error = %e, "Failed to register client")
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if is_peer_accept_error(&e) => {
                    tracing::debug!(error = %e, "Accept skipped");
                    continue;
                }
                Err(e) => {
                    // Out of descriptors or similar; retried on the next readiness event
                    tracing::warn!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    fn flush_connection(&mut self, id: ConnectionId) {
        if !self.registry.contains(id) {
            return;
        }
        if let Err(e) = self.registry.flush(id) {
            tracing::debug!(connection_id = %id, error = %e, "Write failed");
            self.disconnect(id);
        }
    }

    /// Read and process until the socket is drained
    ///
    /// Before the handshake a read stops one byte past `max_handshake_size`,
    /// enough to tell an oversized head from a complete one. Whatever the
    /// limit left in the socket is read once the head has been processed.
    fn service_readable(&mut self, id: ConnectionId) {
        let read_buffer_size = self.options.read_buffer_size;
        let handshake_limit = self.options.max_handshake_size.saturating_add(1);

        loop {
            let outcome = match self.registry.get_mut(id) {
                Some(connection) => {
                    let limit = if connection.is_handshake_complete() {
                        usize::MAX
                    } else {
                        handshake_limit
                    };
                    connection.fill_inbound(read_buffer_size, limit)
                }
                // Already removed earlier in this turn
                None => return,
            };

            match outcome {
                Ok(outcome) => {
                    if outcome.bytes > 0 {
                        tracing::trace!(connection_id = %id, bytes = outcome.bytes, "Read");
                        self.process_inbound(id);
                    }
                    if outcome.eof && self.registry.contains(id) {
                        self.disconnect(id);
                        return;
                    }
                    if !outcome.limited {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "Read failed");
                    self.disconnect(id);
                    return;
                }
            }
        }
    }

    /// Drive the handshake and frame decoder over everything buffered
    fn process_inbound(&mut self, id: ConnectionId) {
        loop {
            match self.step(id) {
                Step::Continue => continue,
                Step::Idle => return,
                Step::Disconnect => {
                    if self.registry.contains(id) {
                        self.disconnect(id);
                    }
                    return;
                }
                Step::Reject => {
                    self.reject(id);
                    return;
                }
            }
        }
    }

    fn step(&mut self, id: ConnectionId) -> Step {
        let max_handshake_size = self.options.max_handshake_size;
        let max_frame_size = self.options.max_frame_size;

        let Some(connection) = self.registry.get_mut(id) else {
            return Step::Idle;
        };

        if !connection.is_handshake_complete() {
            let Some(head_len) = protocol::request_head_len(&connection.inbound) else {
                if connection.inbound.len() > max_handshake_size {
                    tracing::warn!(
                        connection_id = %id,
                        error = %ProtocolError::HandshakeTooLarge(max_handshake_size),
                        "Handshake rejected"
                    );
                    return Step::Reject;
                }
                return Step::Idle;
            };
            if head_len > max_handshake_size {
                tracing::warn!(
                    connection_id = %id,
                    error = %ProtocolError::HandshakeTooLarge(max_handshake_size),
                    "Handshake rejected"
                );
                return Step::Reject;
            }
            let head: Vec<u8> = connection.inbound.drain(..head_len).collect();
            return self.handshake(id, &head);
        }

        match protocol::decode(&connection.inbound, max_frame_size) {
            Ok(None) => Step::Idle,
            Ok(Some((frame, consumed))) => {
                connection.inbound.drain(..consumed);
                self.handle_frame(id, frame)
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Malformed frame");
                Step::Disconnect
            }
        }
    }

    /// Answer the upgrade request, then greet the client with one frame
    fn handshake(&mut self, id: ConnectionId, request: &[u8]) -> Step {
        let response = match protocol::negotiate(request) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Handshake rejected");
                return Step::Reject;
            }
        };

        if let Err(e) = self.registry.send(id, response.as_bytes()) {
            tracing::debug!(connection_id = %id, error = %e, "Handshake write failed");
            return Step::Disconnect;
        }
        self.registry.mark_handshake_complete(id);
        tracing::info!(connection_id = %id, "Handshake complete");

        let greeting = match self.encoder.encode(HANDSHAKE_SUCCESS.as_bytes()) {
            Ok(payload) => protocol::encode_text(&payload),
            Err(e) => {
                tracing::error!(connection_id = %id, error = %e, "Failed to encode greeting");
                return Step::Continue;
            }
        };
        if let Err(e) = self.registry.send(id, &greeting) {
            tracing::debug!(connection_id = %id, error = %e, "Greeting write failed");
            return Step::Disconnect;
        }

        Step::Continue
    }

    fn handle_frame(&mut self, id: ConnectionId, frame: Frame) -> Step {
        match frame.opcode {
            OpCode::Close => {
                tracing::debug!(connection_id = %id, "Client sent close frame");
                Step::Disconnect
            }
            OpCode::Ping | OpCode::Pong => {
                tracing::trace!(
                    connection_id = %id,
                    opcode = ?frame.opcode,
                    "Control frame ignored"
                );
                Step::Continue
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                tracing::debug!(
                    connection_id = %id,
                    bytes = frame.payload_len(),
                    "Message received"
                );
                self.publish(frame.payload);
                Step::Continue
            }
        }
    }

    fn disconnect(&mut self, id: ConnectionId) {
        match self.registry.remove(id) {
            Ok(notice) => {
                tracing::info!(connection_id = %id, "Client disconnected");
                self.publish(notice.into_bytes());
            }
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Disconnect of unknown client")
            }
        }
    }

    /// Refuse the upgrade with a 400 and drop the socket without a notice
    fn reject(&mut self, id: ConnectionId) {
        if let Err(e) = self.registry.send(id, protocol::BAD_REQUEST_RESPONSE) {
            tracing::debug!(connection_id = %id, error = %e, "Failed to send rejection");
        }
        if let Err(e) = self.registry.remove(id) {
            tracing::debug!(connection_id = %id, error = %e, "Reject of unknown client");
        }
    }

    /// Encode and broadcast a message, then announce any peer the broadcast lost
    fn publish(&mut self, payload: Vec<u8>) {
        let mut pending = VecDeque::from([payload]);

        while let Some(payload) = pending.pop_front() {
            let frame = match self.encoder.encode(&payload) {
                Ok(encoded) => protocol::encode_text(&encoded),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode payload");
                    continue;
                }
            };

            let report = broadcast(&mut self.registry, &frame);
            for failed in report.failed {
                match self.registry.remove(failed) {
                    Ok(notice) => {
                        tracing::info!(connection_id = %failed, "Client dropped after failed send");
                        pending.push_back(notice.into_bytes());
                    }
                    Err(e) => {
                        tracing::debug!(connection_id = %failed, error = %e, "Already removed")
                    }
                }
            }
        }
    }
}

/// Accept failures caused by the pending peer rather than the listener
fn is_peer_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
