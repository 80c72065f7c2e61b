//! Connection Registry
//!
//! The authoritative map of live connections, keyed by identity. The
//! listening socket always holds identity 0 and lives in its own slot,
//! so it can never be handed out as a client connection.
//!
//! Only the reactor mutates the registry; it is never shared.

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use crate::server::error::{ServerError, ServerResult};

/// Identity of the listening socket
pub const LISTENER: ConnectionId = ConnectionId(0);

/// Stable identity of one socket for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub usize);

impl ConnectionId {
    pub fn token(self) -> Token {
        Token(self.0)
    }

    pub fn from_token(token: Token) -> Self {
        ConnectionId(token.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of draining a readable socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes appended to the inbound buffer
    pub bytes: usize,
    /// Peer closed its write half (a zero-byte read was observed)
    pub eof: bool,
    /// Reading stopped at the buffer limit; the socket may hold more
    pub limited: bool,
}

/// One accepted TCP peer
pub struct Connection {
    id: ConnectionId,
    socket: TcpStream,
    handshake_complete: bool,
    /// Bytes read but not yet consumed by the handshake or frame decoder
    pub(crate) inbound: Vec<u8>,
    /// Bytes queued for the peer that the kernel has not taken yet
    outbound: Vec<u8>,
    writable_registered: bool,
}

impl Connection {
    fn new(id: ConnectionId, socket: TcpStream) -> Self {
        Self {
            id,
            socket,
            handshake_complete: false,
            inbound: Vec::new(),
            outbound: Vec::new(),
            writable_registered: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.socket.peer_addr().ok()
    }

    /// Bytes still waiting for the socket to become writable
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    /// Read until the socket would block or `inbound` holds `limit` bytes
    ///
    /// Readiness is edge-triggered: a read that stops on the limit leaves
    /// data behind, reported through `ReadOutcome::limited`.
    pub(crate) fn fill_inbound(
        &mut self,
        chunk_size: usize,
        limit: usize,
    ) -> io::Result<ReadOutcome> {
        let mut chunk = vec![0u8; chunk_size.max(1)];
        let mut outcome = ReadOutcome {
            bytes: 0,
            eof: false,
            limited: false,
        };

        loop {
            let room = limit.saturating_sub(self.inbound.len());
            if room == 0 {
                outcome.limited = true;
                return Ok(outcome);
            }
            let want = room.min(chunk.len());

            match self.socket.read(&mut chunk[..want]) {
                Ok(0) => {
                    outcome.eof = true;
                    return Ok(outcome);
                }
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    outcome.bytes += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(outcome),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Push queued bytes into the socket until done or it would block
    fn write_pending(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.socket.write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("handshake_complete", &self.handshake_complete)
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}

/// Owns the listener and every client connection
pub struct ConnectionRegistry {
    poll_registry: mio::Registry,
    listener: TcpListener,
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: usize,
    max_pending_output: usize,
}

impl ConnectionRegistry {
    /// Take ownership of the listener and register it for accept readiness
    pub fn new(mut listener: TcpListener, poll_registry: mio::Registry) -> ServerResult<Self> {
        poll_registry.register(&mut listener, LISTENER.token(), Interest::READABLE)?;

        Ok(Self {
            poll_registry,
            listener,
            connections: BTreeMap::new(),
            next_id: LISTENER.0 + 1,
            max_pending_output: usize::MAX,
        })
    }

    /// Cap on bytes a single connection may leave unwritten
    pub fn with_max_pending_output(mut self, limit: usize) -> Self {
        self.max_pending_output = limit;
        self
    }

    pub fn max_pending_output(&self) -> usize {
        self.max_pending_output
    }

    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }

    pub fn listener_identity(&self) -> ConnectionId {
        LISTENER
    }

    /// Register a freshly accepted socket, handshake not yet complete
    pub fn add(&mut self, mut socket: TcpStream) -> ServerResult<ConnectionId> {
        let id = ConnectionId(self.next_id);
        self.poll_registry
            .register(&mut socket, id.token(), Interest::READABLE)?;
        self.next_id += 1;

        self.connections.insert(id, Connection::new(id, socket));
        Ok(id)
    }

    /// Drop a connection and return its disconnect notice
    pub fn remove(&mut self, id: ConnectionId) -> ServerResult<String> {
        let mut connection = self
            .connections
            .remove(&id)
            .ok_or(ServerError::UnknownConnection(id))?;

        if let Err(e) = self.poll_registry.deregister(&mut connection.socket) {
            tracing::debug!(connection_id = %id, error = %e, "Deregister failed");
        }

        Ok(format!("client#{} disconnect", id))
    }

    /// Flag the connection as upgraded; unknown identities are ignored
    pub fn mark_handshake_complete(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.handshake_complete = true;
        }
    }

    /// Every identity, listener first
    pub fn all(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        std::iter::once(LISTENER).chain(self.connections.keys().copied())
    }

    /// Every client connection in identity order
    pub fn all_except_listener(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.values()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of client connections (the listener is not counted)
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue bytes for a connection and write as much as the socket takes
    ///
    /// Fails with `Backpressure` when the peer is not draining and the
    /// unwritten remainder would exceed `max_pending_output`; the caller
    /// is expected to drop the connection.
    pub fn send(&mut self, id: ConnectionId, bytes: &[u8]) -> ServerResult<()> {
        let limit = self.max_pending_output;
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(ServerError::UnknownConnection(id))?;

        let pending = connection.outbound.len().saturating_add(bytes.len());
        if !connection.outbound.is_empty() && pending > limit {
            return Err(ServerError::Backpressure { id, pending, limit });
        }

        connection.outbound.extend_from_slice(bytes);
        self.flush(id)?;

        let pending = self.connections.get(&id).map_or(0, |c| c.outbound.len());
        if pending > limit {
            return Err(ServerError::Backpressure { id, pending, limit });
        }
        Ok(())
    }

    /// Retry pending output and keep WRITABLE interest only while some remains
    pub fn flush(&mut self, id: ConnectionId) -> ServerResult<()> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(ServerError::UnknownConnection(id))?;
        connection.write_pending()?;

        let want_writable = !connection.outbound.is_empty();
        if want_writable != connection.writable_registered {
            let interest = if want_writable {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            self.poll_registry
                .reregister(&mut connection.socket, id.token(), interest)?;
            connection.writable_registered = want_writable;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;
    use std::net::TcpListener as StdListener;
    use std::net::TcpStream as StdStream;

    /// Connected (server side, client side) pair without going through accept readiness
    fn socket_pair(listener: &StdListener) -> (TcpStream, StdStream) {
        let client = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    fn registry() -> (Poll, ConnectionRegistry, StdListener) {
        let poll = Poll::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let registry =
            ConnectionRegistry::new(listener, poll.registry().try_clone().unwrap()).unwrap();
        let pairs = StdListener::bind("127.0.0.1:0").unwrap();
        (poll, registry, pairs)
    }

    #[test]
    fn test_add_assigns_increasing_ids() {
        let (_poll, mut registry, pairs) = registry();
        let (a, _ca) = socket_pair(&pairs);
        let (b, _cb) = socket_pair(&pairs);

        let id_a = registry.add(a).unwrap();
        let id_b = registry.add(b).unwrap();

        assert_eq!(id_a, ConnectionId(1));
        assert_eq!(id_b, ConnectionId(2));
        assert_eq!(registry.len(), 2);
        assert!(!registry.get(id_a).unwrap().is_handshake_complete());
    }

    #[test]
    fn test_all_includes_listener_but_broadcast_view_does_not() {
        let (_poll, mut registry, pairs) = registry();
        let (a, _ca) = socket_pair(&pairs);
        let id = registry.add(a).unwrap();

        let all: Vec<_> = registry.all().collect();
        assert_eq!(all, vec![LISTENER, id]);

        let clients: Vec<_> = registry.all_except_listener().map(|c| c.id()).collect();
        assert_eq!(clients, vec![id]);
        assert_eq!(registry.listener_identity(), LISTENER);
    }

    #[test]
    fn test_remove_returns_notice() {
        let (_poll, mut registry, pairs) = registry();
        let (a, _ca) = socket_pair(&pairs);
        let id = registry.add(a).unwrap();

        let notice = registry.remove(id).unwrap();
        assert_eq!(notice, format!("client#{} disconnect", id.0));
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_error() {
        let (_poll, mut registry, _pairs) = registry();
        let result = registry.remove(ConnectionId(42));
        assert!(matches!(
            result,
            Err(ServerError::UnknownConnection(ConnectionId(42)))
        ));
    }

    #[test]
    fn test_mark_handshake_complete() {
        let (_poll, mut registry, pairs) = registry();
        let (a, _ca) = socket_pair(&pairs);
        let id = registry.add(a).unwrap();

        registry.mark_handshake_complete(id);
        assert!(registry.get(id).unwrap().is_handshake_complete());

        // Unknown identity is silently ignored
        registry.mark_handshake_complete(ConnectionId(99));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_send_reaches_peer() {
        let (_poll, mut registry, pairs) = registry();
        let (a, mut client) = socket_pair(&pairs);
        let id = registry.add(a).unwrap();

        registry.send(id, b"hello").unwrap();
        assert_eq!(registry.get(id).unwrap().pending_output(), 0);

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_fill_inbound_reports_eof() {
        let (_poll, mut registry, pairs) = registry();
        let (a, mut client) = socket_pair(&pairs);
        let id = registry.add(a).unwrap();

        client.write_all(b"abc").unwrap();
        drop(client);

        let connection = registry.get_mut(id).unwrap();
        let mut seen = 0;
        let mut eof = false;
        for _ in 0..100 {
            let outcome = connection.fill_inbound(2, usize::MAX).unwrap();
            seen += outcome.bytes;
            if outcome.eof {
                eof = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        assert!(eof);
        assert_eq!(seen, 3);
        assert_eq!(connection.inbound, b"abc");
    }

    #[test]
    fn test_fill_inbound_stops_at_limit() {
        let (_poll, mut registry, pairs) = registry();
        let (a, mut client) = socket_pair(&pairs);
        let id = registry.add(a).unwrap();

        client.write_all(&[b'x'; 10_000]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let connection = registry.get_mut(id).unwrap();
        let outcome = connection.fill_inbound(2048, 100).unwrap();
        assert!(outcome.limited);
        assert!(!outcome.eof);
        assert_eq!(outcome.bytes, 100);
        assert_eq!(connection.inbound.len(), 100);

        // Raising the limit picks up where the last read stopped
        let outcome = connection.fill_inbound(2048, 300).unwrap();
        assert!(outcome.limited);
        assert_eq!(connection.inbound.len(), 300);
    }

    #[test]
    fn test_send_to_stalled_peer_hits_output_limit() {
        let (_poll, registry, pairs) = registry();
        let mut registry = registry.with_max_pending_output(256 * 1024);
        let (a, _client) = socket_pair(&pairs);
        let id = registry.add(a).unwrap();

        // The peer never reads: kernel buffers fill, then the queue does
        let chunk = vec![0u8; 64 * 1024];
        let mut result = Ok(());
        for _ in 0..2048 {
            result = registry.send(id, &chunk);
            if result.is_err() {
                break;
            }
        }

        match result {
            Err(ServerError::Backpressure { id: failed, limit, .. }) => {
                assert_eq!(failed, id);
                assert_eq!(limit, 256 * 1024);
            }
            other => panic!("expected backpressure, got {:?}", other),
        }
        assert!(registry.get(id).unwrap().pending_output() <= 256 * 1024 + chunk.len());
    }

    #[test]
    fn test_single_frame_larger_than_limit_is_accepted_by_idle_peer() {
        let (_poll, registry, pairs) = registry();
        let mut registry = registry.with_max_pending_output(16);
        let (a, mut client) = socket_pair(&pairs);
        let id = registry.add(a).unwrap();

        registry.send(id, &[7u8; 64]).unwrap();

        let mut buf = [0u8; 64];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [7u8; 64]);
    }
}
