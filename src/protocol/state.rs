//! Protocol states and the transition table.
//!
//! A connection advances NAME -> AUTH -> LOG, loops in LOG, and leaves
//! through TERM (graceful) or ERROR (abnormal). Handlers report an abstract
//! [`Outcome`]; the static table resolves it to the concrete next state.

/// Protocol state of a connection.
///
/// The discriminant doubles as the wire frame type byte: a client in state
/// `Name` is expected to send a frame tagged `1`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Post-accept bootstrap. Runs synchronously during accept; no network
    /// wait ever happens in this state.
    Init = 0,
    /// Awaiting the client's display name.
    Name = 1,
    /// Awaiting the client's credential.
    Auth = 2,
    /// Steady state: awaiting messages to record.
    Log = 3,
    /// Graceful close (sink).
    Term = 4,
    /// Pseudo-state owned by the accepting socket only.
    Listen = 5,
    /// Abnormal close (sink).
    Error = 6,
}

impl State {
    /// Decode a wire frame type byte.
    pub fn from_wire(tag: u8) -> Option<State> {
        match tag {
            0 => Some(State::Init),
            1 => Some(State::Name),
            2 => Some(State::Auth),
            3 => Some(State::Log),
            4 => Some(State::Term),
            5 => Some(State::Listen),
            6 => Some(State::Error),
            _ => None,
        }
    }

    /// States whose frames carry no payload.
    pub fn is_lightweight(self) -> bool {
        matches!(self, State::Term | State::Error)
    }

    /// States whose handler must run inline rather than waiting for another
    /// readiness notification. A closed descriptor never becomes ready
    /// again, so the close-and-reset sinks have to be drained immediately.
    pub fn is_immediate(self) -> bool {
        matches!(self, State::Term | State::Error)
    }
}

/// Abstract result of running a state handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Outcome {
    /// Remain in the current state. Reserved; no default handler uses it.
    Stay = 0,
    /// Advance to the state's natural successor.
    Next = 1,
    /// Go to the graceful close sink.
    Close = 2,
    /// Go to the abnormal close sink.
    Error = 3,
}

/// `TRANSITIONS[state][outcome]` is the next state.
///
/// `Stay` keeps the current state, `Close` and `Error` map to the sinks from
/// anywhere, and `Next` advances INIT -> NAME -> AUTH -> LOG -> LOG. Both
/// sinks recycle to INIT: their handler fully tears the slot down, so the
/// identifier is immediately reusable.
const TRANSITIONS: [[State; 4]; 7] = [
    //              Stay           Next           Close        Error
    /* Init   */ [State::Init, State::Name, State::Term, State::Error],
    /* Name   */ [State::Name, State::Auth, State::Term, State::Error],
    /* Auth   */ [State::Auth, State::Log, State::Term, State::Error],
    /* Log    */ [State::Log, State::Log, State::Term, State::Error],
    /* Term   */ [State::Term, State::Init, State::Term, State::Error],
    /* Listen */ [State::Listen, State::Listen, State::Term, State::Error],
    /* Error  */ [State::Error, State::Init, State::Term, State::Error],
];

/// Resolve a handler outcome against the transition table.
pub fn next_state(state: State, outcome: Outcome) -> State {
    TRANSITIONS[state as usize][outcome as usize]
}
