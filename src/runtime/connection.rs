//! Per-connection records and the fixed-capacity registry.
//!
//! Each connection owns its transport and its protocol buffers, so tearing
//! a slot down is a drop: no name or pending body can survive into a reused
//! identifier.

use crate::protocol::frame;
use crate::protocol::state::State;
use bytes::Bytes;
use mio::net::TcpStream;
use slab::Slab;
use std::io;

/// A single client connection and its protocol state.
#[derive(Debug)]
pub struct Connection {
    /// Transport. `None` once the connection has been closed.
    stream: Option<TcpStream>,
    /// Current protocol state.
    pub state: State,
    /// Display name, set once during the naming phase.
    pub name: Option<Bytes>,
    /// Most recently decoded frame body; valid only across one handler call.
    pub pending: Option<Bytes>,
}

impl Connection {
    /// Create a record for a freshly accepted stream, in the bootstrap state.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
            state: State::Init,
            name: None,
            pending: None,
        }
    }

    /// Mutable access to the transport.
    ///
    /// # Panics
    /// Panics if the connection has already been closed; the event loop only
    /// decodes from open connections.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("connection is closed")
    }

    /// Send the one-byte acknowledgement to the peer.
    pub fn send_ack(&mut self, ok: bool) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => frame::write_ack(stream, ok),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            )),
        }
    }

    /// Close the transport and reset the slot: deregister from the poller,
    /// drop the stream (closing the socket), release both buffers, and
    /// return the state to `Init`. Safe to call more than once.
    pub fn close(&mut self, registry: &mio::Registry) {
        if let Some(mut stream) = self.stream.take() {
            let _ = registry.deregister(&mut stream);
        }
        self.name = None;
        self.pending = None;
        self.state = State::Init;
    }

    /// Whether the transport has been closed (slot awaiting removal).
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

/// Registry of active connections using slab allocation.
///
/// Capacity is fixed at construction. Identifiers are small integers below
/// the capacity, and the lowest free identifier is reissued only after the
/// previous occupant has been removed, so a reused slot never inherits
/// buffers or state.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with the given maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection, returning its identifier.
    ///
    /// Returns `None` at capacity; the caller closes the transport without
    /// registering it.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection, freeing its identifier for reuse.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        if self.connections.contains(id) {
            Some(self.connections.remove(id))
        } else {
            None
        }
    }

    /// Check if an identifier is allocated.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use mio::net::TcpStream;

    /// A non-blocking mio stream plus its blocking peer end, over loopback.
    pub(crate) fn stream_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        (TcpStream::from_std(accepted), peer)
    }
}
