//! Mock link for testing protocol and session logic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::buffer::RecvBuffer;
use super::traits::{BaudLink, DEFAULT_TIMEOUT, Link, LinkError};
use crate::protocol::constants::DEFAULT_BAUDRATE;

#[derive(Default)]
struct Shared {
    /// Scripted inbound chunks; a chunk tagged with a baud rate is only
    /// served while the link is configured at that rate.
    reads: VecDeque<(Option<u32>, Vec<u8>)>,
    /// Captured outbound writes.
    writes: Vec<Vec<u8>>,
    /// Journal of link operations, in call order.
    ops: Vec<String>,
    buf: RecvBuffer,
    connected: bool,
    baudrate: u32,
}

/// Mock link with scripted reads, a write log, and an operation journal.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and keep another for scripting and assertions.
#[derive(Clone)]
pub struct MockLink {
    shared: Arc<Mutex<Shared>>,
    timeout: Duration,
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                baudrate: DEFAULT_BAUDRATE,
                ..Shared::default()
            })),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Queue an inbound chunk served at any baud rate.
    pub fn queue_read(&self, bytes: &[u8]) {
        self.shared
            .lock()
            .unwrap()
            .reads
            .push_back((None, bytes.to_vec()));
    }

    /// Queue an inbound chunk served only while configured at `baudrate`.
    pub fn queue_read_at(&self, baudrate: u32, bytes: &[u8]) {
        self.shared
            .lock()
            .unwrap()
            .reads
            .push_back((Some(baudrate), bytes.to_vec()));
    }

    /// All captured writes, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.lock().unwrap().writes.clone()
    }

    /// The operation journal (`connect`, `disconnect`, `set_baudrate N`,
    /// `send`).
    pub fn ops(&self) -> Vec<String> {
        self.shared.lock().unwrap().ops.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().unwrap().connected
    }

    /// Move every queued chunk eligible at the current baud rate into the
    /// receive buffer.
    fn pump(shared: &mut Shared) {
        loop {
            let eligible = match shared.reads.front() {
                Some((Some(baud), _)) => *baud == shared.baudrate,
                Some((None, _)) => true,
                None => false,
            };
            if !eligible {
                break;
            }
            let (_, chunk) = shared.reads.pop_front().unwrap();
            shared.buf.extend(&chunk);
        }
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for MockLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        let mut shared = self.shared.lock().unwrap();
        shared.ops.push("connect".into());
        shared.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        let mut shared = self.shared.lock().unwrap();
        shared.ops.push("disconnect".into());
        shared.connected = false;
        shared.buf.clear();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.connected {
            return Err(LinkError::NotConnected);
        }
        shared.ops.push("send".into());
        shared.writes.push(data.to_vec());
        Ok(())
    }

    fn recv(&mut self, n: usize) -> Result<Vec<u8>, LinkError> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.connected {
            return Err(LinkError::NotConnected);
        }
        Self::pump(&mut shared);
        // No real clock in the mock: missing data times out immediately.
        shared.buf.take(n).ok_or(LinkError::RecvTimeout)
    }

    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, LinkError> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.connected {
            return Err(LinkError::NotConnected);
        }
        Self::pump(&mut shared);
        shared.buf.take_until(delimiter).ok_or(LinkError::RecvTimeout)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl BaudLink for MockLink {
    fn set_baudrate(&mut self, baudrate: u32) {
        let mut shared = self.shared.lock().unwrap();
        shared.ops.push(format!("set_baudrate {baudrate}"));
        shared.baudrate = baudrate;
    }

    fn baudrate(&self) -> u32 {
        self.shared.lock().unwrap().baudrate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_reads_and_write_log() {
        let mut link = MockLink::new();
        link.connect().unwrap();
        link.queue_read(b"hello ");
        link.queue_read(b"world\n");

        assert_eq!(link.recv(5).unwrap(), b"hello");
        assert_eq!(link.recv_until(b"\n").unwrap(), b" world\n");
        assert!(matches!(link.recv(1), Err(LinkError::RecvTimeout)));

        link.send(b"cmd").unwrap();
        assert_eq!(link.writes(), vec![b"cmd".to_vec()]);
    }

    #[test]
    fn baud_filtered_reads() {
        let mut link = MockLink::new();
        link.connect().unwrap();
        link.queue_read_at(DEFAULT_BAUDRATE, b"slow");
        link.queue_read_at(3_000_000, b"fast");

        assert_eq!(link.recv(4).unwrap(), b"slow");
        assert!(matches!(link.recv(4), Err(LinkError::RecvTimeout)));

        link.set_baudrate(3_000_000);
        assert_eq!(link.recv(4).unwrap(), b"fast");
    }

    #[test]
    fn disconnect_clears_buffer() {
        let mut link = MockLink::new();
        link.connect().unwrap();
        link.queue_read(b"stale");
        let _ = link.recv(1).unwrap();
        link.disconnect().unwrap();
        link.connect().unwrap();
        assert!(matches!(link.recv(4), Err(LinkError::RecvTimeout)));
    }
}
