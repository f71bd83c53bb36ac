//! Frame codec for the wire protocol.
//!
//! Wire format: `type:1 | length:2 (big-endian) | body:length`. The codec
//! reads whole frames only: a short read, including EOF or a would-block in
//! the middle of a frame, is a hangup rather than "wait for more data".
//! Nothing is buffered across calls; the kernel's socket buffer is the only
//! staging area.

use crate::protocol::state::State;
use bytes::Bytes;
use std::io::{self, Read, Write};

/// Acknowledgement byte for an accepted transaction.
pub const ACK_OK: u8 = 0x00;
/// Acknowledgement byte for a rejected transaction. The server closes the
/// connection right after sending it.
pub const ACK_REJECT: u8 = 0x01;

/// One decoded protocol message.
///
/// Exists only between decode and dispatch; the body is handed to the
/// connection for the duration of one handler call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Declared frame type. Must match the state the server expects next,
    /// except for the universal `Term` escape.
    pub tag: State,
    /// Frame body. Empty exactly for lightweight types.
    pub body: Bytes,
}

/// Frame codec errors.
///
/// Every variant is recovered by forcing the offending connection to the
/// ERROR sink; none is fatal to the process.
#[derive(Debug)]
pub enum FrameError {
    /// Peer closed, or a read came up short mid-frame.
    Hangup,
    /// Frame type byte does not name a known state.
    UnknownType(u8),
    /// Lightweight type with a payload, or payload-bearing type without one.
    BadPayloadArity { tag: State, length: u16 },
    /// Underlying transport error.
    Io(io::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Hangup => write!(f, "connection hung up mid-frame"),
            FrameError::UnknownType(tag) => write!(f, "unknown frame type {tag:#04x}"),
            FrameError::BadPayloadArity { tag, length } => {
                write!(f, "bad payload arity for {tag:?} frame: length {length}")
            }
            FrameError::Io(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Result of filling a fixed-size region from the transport.
enum ReadStatus {
    Done,
    /// Would block before the first byte arrived.
    Idle,
    Hangup,
    Io(io::Error),
}

/// Read exactly `buf.len()` bytes, retrying on `Interrupted`.
///
/// EOF, or a would-block after at least one byte has been taken, is a
/// hangup: the transport is assumed to be drained in full per frame.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> ReadStatus {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return ReadStatus::Hangup,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                if filled == 0 {
                    return ReadStatus::Idle;
                }
                return ReadStatus::Hangup;
            }
            Err(e) => return ReadStatus::Io(e),
        }
    }
    ReadStatus::Done
}

/// Decode one frame from `reader`.
///
/// Returns `Ok(None)` when the transport has no bytes buffered at all (the
/// non-blocking read would block before the first header byte); the caller
/// should go back to the readiness wait. Once the first byte has arrived the
/// rest of the frame must follow, and any failure reports an error without
/// leaking a partial frame.
pub fn decode_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>, FrameError> {
    let mut tag_buf = [0u8; 1];
    match read_full(reader, &mut tag_buf) {
        ReadStatus::Done => {}
        ReadStatus::Idle => return Ok(None),
        ReadStatus::Hangup => return Err(FrameError::Hangup),
        ReadStatus::Io(e) => return Err(FrameError::Io(e)),
    }
    let tag = State::from_wire(tag_buf[0]).ok_or(FrameError::UnknownType(tag_buf[0]))?;

    let mut len_buf = [0u8; 2];
    match read_full(reader, &mut len_buf) {
        ReadStatus::Done => {}
        ReadStatus::Idle | ReadStatus::Hangup => return Err(FrameError::Hangup),
        ReadStatus::Io(e) => return Err(FrameError::Io(e)),
    }
    let length = u16::from_be_bytes(len_buf);

    // Lightweight frames must be empty; everything else must carry a body.
    if (length == 0) != tag.is_lightweight() {
        return Err(FrameError::BadPayloadArity { tag, length });
    }

    let mut body = vec![0u8; length as usize];
    if length > 0 {
        match read_full(reader, &mut body) {
            ReadStatus::Done => {}
            ReadStatus::Idle | ReadStatus::Hangup => return Err(FrameError::Hangup),
            ReadStatus::Io(e) => return Err(FrameError::Io(e)),
        }
    }

    Ok(Some(Frame {
        tag,
        body: body.into(),
    }))
}

/// Encode a frame. Inverse of [`decode_frame`]; used by tests and client
/// tooling.
///
/// # Panics
/// Panics if `body` is longer than a `u16` length field can describe.
pub fn encode_frame(tag: State, body: &[u8]) -> Vec<u8> {
    let length = u16::try_from(body.len()).expect("frame body too long");
    let mut out = Vec::with_capacity(3 + body.len());
    out.push(tag as u8);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Write the single-byte acknowledgement.
///
/// `write_all` retries `Interrupted` and fails on a zero-length write, which
/// is the entire retry discipline for a one-byte payload; any error means
/// the connection is dead.
pub fn write_ack<W: Write>(writer: &mut W, ok: bool) -> io::Result<()> {
    let byte = if ok { ACK_OK } else { ACK_REJECT };
    writer.write_all(&[byte])
}
