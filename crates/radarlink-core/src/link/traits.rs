//! Transport link abstraction.
//!
//! Defines the byte-stream `Link` trait shared by all physical transports
//! (TCP socket, serial port, worker-thread serial, USB CDC, mock).

use std::time::Duration;

use thiserror::Error;

/// Default deadline for every blocking link operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("link is not connected")]
    NotConnected,

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("recv timeout")]
    RecvTimeout,

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-oriented duplex channel, independent of the physical medium.
///
/// All receive operations buffer partial reads internally: bytes that arrive
/// beyond what a call consumed are retained for the next call within the same
/// connection. `disconnect` clears that buffer and is idempotent.
pub trait Link: Send {
    /// Open the underlying device or socket.
    fn connect(&mut self) -> Result<(), LinkError>;

    /// Release the underlying handle and clear internal buffers. Idempotent.
    fn disconnect(&mut self) -> Result<(), LinkError>;

    /// Blocking full write of `data`.
    fn send(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Blocking read of exactly `n` bytes.
    ///
    /// Fails with [`LinkError::RecvTimeout`] if `n` bytes have not arrived
    /// within the configured timeout.
    fn recv(&mut self, n: usize) -> Result<Vec<u8>, LinkError>;

    /// Blocking read up to and including the first occurrence of `delimiter`.
    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, LinkError>;

    /// Current per-operation deadline.
    fn timeout(&self) -> Duration;

    /// Change the per-operation deadline.
    fn set_timeout(&mut self, timeout: Duration);
}

/// Links whose line rate can be changed between connects.
pub trait BaudLink: Link {
    /// Set the baud rate used by the next `connect` (and the live port, if
    /// one is open).
    fn set_baudrate(&mut self, baudrate: u32);

    /// Currently configured baud rate.
    fn baudrate(&self) -> u32;
}
