//! TCP socket link.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::buffer::RecvBuffer;
use super::traits::{DEFAULT_TIMEOUT, Link, LinkError};

/// Link over a plain TCP socket.
pub struct SocketLink {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    buf: RecvBuffer,
    timeout: Duration,
}

impl SocketLink {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            buf: RecvBuffer::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, LinkError> {
        self.stream.as_mut().ok_or(LinkError::NotConnected)
    }

    /// Read one chunk from the socket into the buffer, waiting at most
    /// `remaining`. Returns whether any bytes arrived.
    fn fill(&mut self, remaining: Duration) -> Result<bool, LinkError> {
        let stream = self.stream()?;
        stream
            .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))
            .map_err(LinkError::Io)?;

        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk) {
            Ok(0) => Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ))),
            Ok(n) => {
                self.buf.extend(&chunk[..n]);
                Ok(true)
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(false)
            }
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

impl Link for SocketLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?
            .next()
            .ok_or_else(|| {
                LinkError::ConnectFailed(format!("could not resolve {}:{}", self.host, self.port))
            })?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
        stream.set_nodelay(true).map_err(LinkError::Io)?;

        info!(host = %self.host, port = self.port, "Socket connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        if self.stream.take().is_some() {
            debug!(host = %self.host, "Socket disconnected");
        }
        self.buf.clear();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        use std::io::Write;
        self.stream()?
            .write_all(data)
            .map_err(|e| LinkError::SendFailed(e.to_string()))
    }

    fn recv(&mut self, n: usize) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(bytes) = self.buf.take(n) {
                return Ok(bytes);
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(LinkError::RecvTimeout)?;
            self.fill(remaining)?;
        }
    }

    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(bytes) = self.buf.take_until(delimiter) {
                return Ok(bytes);
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(LinkError::RecvTimeout)?;
            self.fill(remaining)?;
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}
