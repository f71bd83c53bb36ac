//! Single-threaded runtime: connection registry, state handlers, and the
//! readiness-multiplexed event loop.

pub mod connection;
mod event_loop;
pub mod handlers;

pub use connection::{Connection, ConnectionRegistry};
pub use event_loop::Server;
