//! State handlers: one function per protocol state.
//!
//! On entry, `conn.pending` holds the just-decoded frame body (empty for
//! lightweight states). Each handler consumes it, performs its side effects
//! (acknowledgement, log write, slot teardown) and reports an [`Outcome`]
//! for the transition table to resolve.
//!
//! Acknowledgement writes are best-effort: if the peer is gone, the next
//! decode on this connection reports the hangup and the ERROR sink tears
//! the slot down, which is exactly what an ack failure calls for anyway.

use crate::protocol::state::{Outcome, State};
use crate::runtime::connection::Connection;
use crate::sink::LogSink;
use tracing::{debug, warn};

/// Dispatch `conn` to the handler for its current state.
pub fn dispatch(conn: &mut Connection, registry: &mio::Registry, sink: &mut dyn LogSink) -> Outcome {
    match conn.state {
        State::Init => on_init(conn),
        State::Name => on_name(conn),
        State::Auth => on_auth(conn),
        State::Log => on_log(conn, sink),
        State::Term => on_term(conn, registry),
        State::Error => on_error(conn, registry),
        // The accepting socket is serviced by the accept path and never
        // enters the registry.
        State::Listen => Outcome::Stay,
    }
}

/// Post-accept bootstrap.
///
/// The accept path already armed the socket for non-blocking operation, so
/// all that is left is to verify the slot carries no stale buffers. A reused
/// identifier is removed from the registry before being reissued, so a stale
/// buffer here indicates a lifecycle bug upstream; log it and free it.
fn on_init(conn: &mut Connection) -> Outcome {
    if conn.pending.take().is_some() {
        warn!("superfluous pending-body cleanup on fresh connection");
    }
    if conn.name.take().is_some() {
        warn!("superfluous name cleanup on fresh connection");
    }
    Outcome::Next
}

/// Store the client's display name.
fn on_name(conn: &mut Connection) -> Outcome {
    let body = match conn.pending.take() {
        // No empty or NUL-led names.
        Some(body) if !body.is_empty() && body[0] != 0 => body,
        _ => {
            warn!("rejecting empty name");
            return Outcome::Error;
        }
    };
    if conn.name.replace(body).is_some() {
        warn!("superfluous name cleanup during naming");
    }
    if let Err(e) = conn.send_ack(true) {
        debug!(error = %e, "name ack write failed");
    }
    Outcome::Next
}

/// Placeholder credential check: the credential passes iff the low bit of
/// its first byte is set. Not a security primitive.
fn on_auth(conn: &mut Connection) -> Outcome {
    let body = match conn.pending.take() {
        Some(body) if !body.is_empty() => body,
        _ => {
            warn!("given empty credential");
            return Outcome::Error;
        }
    };
    if body[0] & 1 == 0 {
        warn!("invalid credential");
        // The failure ack is sent by the ERROR sink.
        return Outcome::Error;
    }
    debug!("client authenticated");
    if let Err(e) = conn.send_ack(true) {
        debug!(error = %e, "auth ack write failed");
    }
    Outcome::Next
}

/// Append one message to the durable log.
fn on_log(conn: &mut Connection, sink: &mut dyn LogSink) -> Outcome {
    let body = match conn.pending.take() {
        // No empty records.
        Some(body) if !body.is_empty() => body,
        _ => return Outcome::Error,
    };

    let name = conn.name.as_deref().unwrap_or(b"");
    let mut record = Vec::with_capacity(name.len() + body.len() + 5);
    record.push(b'[');
    record.extend_from_slice(name);
    record.extend_from_slice(b"]: ");
    record.extend_from_slice(&body);
    record.push(b'\n');

    if let Err(e) = sink.append(&record) {
        warn!(error = %e, "log sink write failed");
        return Outcome::Error;
    }
    if let Err(e) = conn.send_ack(true) {
        debug!(error = %e, "log ack write failed");
    }
    Outcome::Next
}

/// Graceful close: ack, close the transport, reset the slot.
fn on_term(conn: &mut Connection, registry: &mio::Registry) -> Outcome {
    if let Err(e) = conn.send_ack(true) {
        debug!(error = %e, "term ack write failed");
    }
    conn.close(registry);
    Outcome::Next
}

/// Abnormal close: failure ack, close the transport, reset the slot.
fn on_error(conn: &mut Connection, registry: &mio::Registry) -> Outcome {
    // The peer may already be gone; the failure ack is best-effort.
    let _ = conn.send_ack(false);
    conn.close(registry);
    Outcome::Next
}
