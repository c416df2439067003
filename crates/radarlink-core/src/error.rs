//! Crate-wide error taxonomy.
//!
//! Every failure surfaced by this crate falls into one of five categories:
//!
//! - [`Error::Link`]: transport-level I/O failure or timeout, fatal to the
//!   current connection.
//! - [`Error::Parse`]: malformed or unexpected wire message shape (protocol
//!   version mismatch or firmware bug), never retried.
//! - [`Error::Protocol`]: local misuse of the protocol vocabulary (unknown
//!   register, service mode, or value outside its declared map).
//! - [`Error::Server`]: the firmware explicitly reported an error; the
//!   message is passed through verbatim.
//! - [`Error::Client`]: a precondition violation on the client state machine
//!   or a payload/metadata consistency violation. Always a programmer-visible
//!   bug, never expected in correct usage.

use thiserror::Error;

use crate::link::LinkError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("client error: {0}")]
    Client(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub(crate) fn server(msg: impl Into<String>) -> Self {
        Error::Server(msg.into())
    }

    pub(crate) fn client(msg: impl Into<String>) -> Self {
        Error::Client(msg.into())
    }
}
