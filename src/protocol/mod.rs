//! Wire protocol: frame codec and the connection state machine.

pub mod frame;
pub mod state;

pub use frame::{decode_frame, encode_frame, Frame, FrameError};
pub use state::{next_state, Outcome, State};
