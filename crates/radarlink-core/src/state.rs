//! Client session states.

use std::fmt;

/// Lifecycle state of a [`crate::client::Client`].
///
/// States only move forward (`Closed` -> `Connected` -> `SessionSetUp` ->
/// `Streaming`), except that `stop_session` returns to `SessionSetUp` and
/// `close` resets fully. `Streaming` implies `SessionSetUp` implies
/// `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    Closed,
    Connected,
    SessionSetUp,
    Streaming,
}

impl ClientState {
    pub fn is_connected(&self) -> bool {
        *self >= ClientState::Connected
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Closed => write!(f, "CLOSED"),
            ClientState::Connected => write!(f, "CONNECTED"),
            ClientState::SessionSetUp => write!(f, "SESSION_SET_UP"),
            ClientState::Streaming => write!(f, "STREAMING"),
        }
    }
}
