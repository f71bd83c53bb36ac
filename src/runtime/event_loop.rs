//! mio event loop: one thread of control for every connection.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking reads and writes. Uses epoll on Linux, kqueue on
//! macOS. The listener lives under a reserved token; ready connections are
//! serviced in ascending identifier order. mio registers edge-triggered
//! interest, so both accepts and frames are drained until the socket would
//! block: a notification left half-consumed is a notification lost.

use crate::config::Config;
use crate::protocol::frame::decode_frame;
use crate::protocol::state::{next_state, State};
use crate::runtime::connection::{Connection, ConnectionRegistry};
use crate::runtime::handlers;
use crate::sink::LogSink;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER: Token = Token(usize::MAX);
const LISTEN_BACKLOG: i32 = 1024;

/// The server: listener, poller, connection registry, and append sink.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: ConnectionRegistry,
    sink: Box<dyn LogSink>,
    /// Running total of frames serviced.
    frames_serviced: u64,
}

impl Server {
    /// Bind the listening socket and set up the poller.
    pub fn bind(config: &Config, sink: Box<dyn LogSink>) -> io::Result<Server> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let poll = Poll::new()?;
        let listener = create_listener(addr)?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        info!(
            addr = %listener.local_addr()?,
            max_clients = config.max_clients,
            "listening for new connections"
        );

        Ok(Server {
            poll,
            events: Events::with_capacity(config.max_clients.max(8)),
            listener,
            connections: ConnectionRegistry::new(config.max_clients),
            sink,
            frames_serviced: 0,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Total frames decoded and dispatched so far.
    pub fn frames_serviced(&self) -> u64 {
        self.frames_serviced
    }

    /// Serve forever. The poll call is the only blocking point; shutdown is
    /// the surrounding process terminating the loop and letting the OS
    /// reclaim the descriptors.
    pub fn run(mut self) -> io::Result<()> {
        loop {
            self.poll_once(None)?;
        }
    }

    /// One readiness cycle: wait for events (up to `timeout`), then service
    /// the listener first and every ready connection in ascending
    /// identifier order.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut accept_ready = false;
        let mut ready: Vec<usize> = Vec::new();
        for event in self.events.iter() {
            match event.token() {
                LISTENER => accept_ready = true,
                Token(id) => ready.push(id),
            }
        }
        ready.sort_unstable();
        ready.dedup();

        if accept_ready {
            self.accept_ready();
        }
        for id in ready {
            self.service(id);
        }
        Ok(())
    }

    /// Accept until the listener would block.
    ///
    /// A connection beyond capacity is closed on the spot and never enters
    /// the registry; everyone else gets a slot at `Init`, whose handler runs
    /// synchronously since it needs no network wait.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = match self.connections.insert(Connection::new(stream)) {
                        Some(id) => id,
                        None => {
                            // Dropping the stream closes it.
                            warn!(
                                %peer,
                                capacity = self.connections.capacity(),
                                "client limit hit, rejecting connection"
                            );
                            continue;
                        }
                    };
                    let conn = self.connections.get_mut(id).expect("just inserted");
                    if let Err(e) = self.poll.registry().register(
                        conn.stream_mut(),
                        Token(id),
                        Interest::READABLE,
                    ) {
                        error!(id, error = %e, "failed to register connection");
                        conn.close(self.poll.registry());
                        self.connections.remove(id);
                        continue;
                    }
                    debug!(id, %peer, "accepted connection");

                    let outcome = handlers::dispatch(conn, self.poll.registry(), &mut *self.sink);
                    conn.state = next_state(conn.state, outcome);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Service one ready connection.
    ///
    /// Drains frames until the socket has no more buffered bytes, validating
    /// each frame against the expected state and running sink-state handlers
    /// inline. A closed descriptor never becomes ready again, so TERM and
    /// ERROR must be drained before returning to the readiness wait.
    fn service(&mut self, id: usize) {
        // The slot may have been torn down earlier in this cycle.
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };

        while !conn.is_closed() {
            if conn.state.is_immediate() {
                // Capture the state first: the sink handlers reset the slot.
                let state = conn.state;
                let outcome = handlers::dispatch(conn, self.poll.registry(), &mut *self.sink);
                conn.state = next_state(state, outcome);
                continue;
            }

            let frame = match decode_frame(conn.stream_mut()) {
                Ok(Some(frame)) => frame,
                // Drained; back to the readiness wait.
                Ok(None) => break,
                Err(e) => {
                    debug!(id, error = %e, "error or close, hanging up on client");
                    conn.state = State::Error;
                    continue;
                }
            };

            self.frames_serviced += 1;

            if frame.tag == State::Term {
                // Universal escape: TERM is honored from any state.
                conn.state = State::Term;
                continue;
            }
            if frame.tag != conn.state {
                warn!(
                    id,
                    expected = ?conn.state,
                    got = ?frame.tag,
                    "desynchronized client, hanging up"
                );
                conn.state = State::Error;
                continue;
            }

            conn.pending = Some(frame.body);
            let state = conn.state;
            let outcome = handlers::dispatch(conn, self.poll.registry(), &mut *self.sink);
            conn.state = next_state(state, outcome);
            conn.pending = None;
        }

        let closed = conn.is_closed();
        if closed {
            self.connections.remove(id);
            debug!(id, total_frames = self.frames_serviced, "connection closed");
        }
    }
}

/// Build the listening socket: non-blocking with address reuse, so restarts
/// do not trip over lingering TIME_WAIT sockets.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
