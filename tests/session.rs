//! End-to-end protocol sessions over loopback.
//!
//! The server is driven deterministically on the test thread through
//! `Server::poll_once`, while a plain blocking `TcpStream` plays the client.

use mlogd::config::Config;
use mlogd::protocol::frame::{encode_frame, ACK_OK, ACK_REJECT};
use mlogd::protocol::state::State;
use mlogd::runtime::Server;
use mlogd::sink::LogSink;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sink that stays observable after being handed to the server.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl LogSink for SharedSink {
    fn append(&mut self, record: &[u8]) -> io::Result<()> {
        self.0.lock().unwrap().extend_from_slice(record);
        Ok(())
    }
}

fn start(max_clients: usize) -> (Server, SocketAddr, SharedSink) {
    let config = Config {
        host: "127.0.0.1".into(),
        port: 0,
        max_clients,
        file: "unused".into(),
        log_level: "info".into(),
    };
    let sink = SharedSink::default();
    let server = Server::bind(&config, Box::new(sink.clone())).unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr, sink)
}

fn connect(server: &mut Server, addr: SocketAddr) -> TcpStream {
    let client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    // Let the server accept and run the INIT bootstrap.
    server.poll_once(Some(Duration::from_millis(50))).unwrap();
    client
}

/// Pump the server until one byte arrives on the client socket.
fn read_byte(server: &mut Server, client: &mut TcpStream) -> Option<u8> {
    let mut byte = [0u8; 1];
    for _ in 0..20 {
        server.poll_once(Some(Duration::from_millis(10))).unwrap();
        match client.read(&mut byte) {
            Ok(1) => return Some(byte[0]),
            // EOF: the server closed the connection.
            Ok(_) => return None,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => return None,
            Err(e) => panic!("client read failed: {e}"),
        }
    }
    panic!("no server response within deadline");
}

fn send(client: &mut TcpStream, tag: State, body: &[u8]) {
    client.write_all(&encode_frame(tag, body)).unwrap();
}

fn send_expect_ack(server: &mut Server, client: &mut TcpStream, tag: State, body: &[u8]) -> u8 {
    send(client, tag, body);
    read_byte(server, client).expect("connection closed while awaiting ack")
}

/// Pump until the client observes EOF.
fn expect_eof(server: &mut Server, client: &mut TcpStream) {
    assert!(
        read_byte(server, client).is_none(),
        "expected server to close the connection"
    );
}

#[test]
fn test_full_session() {
    let (mut server, addr, sink) = start(4);
    let mut client = connect(&mut server, addr);

    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Name, b"alice"),
        ACK_OK
    );
    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Auth, b"\x01"),
        ACK_OK
    );
    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Log, b"hello"),
        ACK_OK
    );
    assert_eq!(sink.contents(), b"[alice]: hello\n");

    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Term, b""),
        ACK_OK
    );
    expect_eof(&mut server, &mut client);
}

#[test]
fn test_steady_state_accepts_many_messages() {
    let (mut server, addr, sink) = start(4);
    let mut client = connect(&mut server, addr);

    send_expect_ack(&mut server, &mut client, State::Name, b"bob");
    send_expect_ack(&mut server, &mut client, State::Auth, b"\x03");
    for msg in [&b"one"[..], b"two", b"three"] {
        assert_eq!(
            send_expect_ack(&mut server, &mut client, State::Log, msg),
            ACK_OK
        );
    }
    assert_eq!(sink.contents(), b"[bob]: one\n[bob]: two\n[bob]: three\n");
}

#[test]
fn test_auth_failure_closes_connection() {
    let (mut server, addr, _sink) = start(4);
    let mut client = connect(&mut server, addr);

    send_expect_ack(&mut server, &mut client, State::Name, b"mallory");
    // Even first byte: the placeholder credential check fails.
    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Auth, b"\x02"),
        ACK_REJECT
    );
    expect_eof(&mut server, &mut client);
}

#[test]
fn test_desync_closes_without_logging() {
    let (mut server, addr, sink) = start(4);
    let mut client = connect(&mut server, addr);

    send_expect_ack(&mut server, &mut client, State::Name, b"alice");
    // Connection expects AUTH; a LOG frame is a desynchronization.
    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Log, b"sneaky"),
        ACK_REJECT
    );
    expect_eof(&mut server, &mut client);
    assert!(sink.contents().is_empty());
}

#[test]
fn test_term_escapes_from_any_state() {
    let (mut server, addr, _sink) = start(4);

    // Straight after connect, while the server awaits NAME.
    let mut client = connect(&mut server, addr);
    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Term, b""),
        ACK_OK
    );
    expect_eof(&mut server, &mut client);

    // And mid-handshake, while the server awaits AUTH.
    let mut client = connect(&mut server, addr);
    send_expect_ack(&mut server, &mut client, State::Name, b"carol");
    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Term, b""),
        ACK_OK
    );
    expect_eof(&mut server, &mut client);
}

#[test]
fn test_bad_payload_arity_closes_connection() {
    let (mut server, addr, _sink) = start(4);
    let mut client = connect(&mut server, addr);

    // A NAME frame with a declared length of zero violates the arity rule.
    client.write_all(&[State::Name as u8, 0, 0]).unwrap();
    assert_eq!(read_byte(&mut server, &mut client), Some(ACK_REJECT));
    expect_eof(&mut server, &mut client);
}

#[test]
fn test_capacity_rejects_excess_connections() {
    let (mut server, addr, _sink) = start(1);
    let mut first = connect(&mut server, addr);

    // The registry is full: the second connection is closed immediately.
    let mut second = connect(&mut server, addr);
    expect_eof(&mut server, &mut second);

    // The first connection is unaffected.
    assert_eq!(
        send_expect_ack(&mut server, &mut first, State::Name, b"alice"),
        ACK_OK
    );
}

#[test]
fn test_slot_reuse_carries_nothing_over() {
    let (mut server, addr, sink) = start(1);

    let mut client = connect(&mut server, addr);
    send_expect_ack(&mut server, &mut client, State::Name, b"alice");
    send_expect_ack(&mut server, &mut client, State::Auth, b"\x01");
    send_expect_ack(&mut server, &mut client, State::Log, b"hello");
    send_expect_ack(&mut server, &mut client, State::Term, b"");
    expect_eof(&mut server, &mut client);
    drop(client);

    // With capacity 1, the next client reuses the identifier just released.
    let mut client = connect(&mut server, addr);
    send_expect_ack(&mut server, &mut client, State::Name, b"bob");
    send_expect_ack(&mut server, &mut client, State::Auth, b"\x05");
    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Log, b"hi"),
        ACK_OK
    );
    assert_eq!(sink.contents(), b"[alice]: hello\n[bob]: hi\n");
}

#[test]
fn test_pipelined_frames_are_drained() {
    let (mut server, addr, sink) = start(4);
    let mut client = connect(&mut server, addr);

    // The whole session arrives before a single readiness notification.
    let mut burst = Vec::new();
    burst.extend_from_slice(&encode_frame(State::Name, b"alice"));
    burst.extend_from_slice(&encode_frame(State::Auth, b"\x01"));
    burst.extend_from_slice(&encode_frame(State::Log, b"hello"));
    burst.extend_from_slice(&encode_frame(State::Term, b""));
    client.write_all(&burst).unwrap();

    for _ in 0..4 {
        assert_eq!(read_byte(&mut server, &mut client), Some(ACK_OK));
    }
    expect_eof(&mut server, &mut client);
    assert_eq!(sink.contents(), b"[alice]: hello\n");
    assert_eq!(server.frames_serviced(), 4);
}

#[test]
fn test_abrupt_disconnect_frees_the_slot() {
    let (mut server, addr, _sink) = start(1);

    let client = connect(&mut server, addr);
    drop(client);
    // Hangup is observed on the next readiness cycle and the slot is reset.
    for _ in 0..5 {
        server.poll_once(Some(Duration::from_millis(10))).unwrap();
    }

    let mut client = connect(&mut server, addr);
    assert_eq!(
        send_expect_ack(&mut server, &mut client, State::Name, b"dave"),
        ACK_OK
    );
}
