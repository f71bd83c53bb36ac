//! mlogd: a connection-oriented message logging server.
//!
//! Clients walk a small handshake protocol (NAME, then AUTH), stream LOG
//! frames that are appended to a durable log file, and leave with TERM.
//! A single thread of control services every connection through one
//! readiness-multiplexed event loop.

pub mod config;
pub mod protocol;
pub mod runtime;
pub mod sink;
