//! Direct serial port link.

use std::io::Read;
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use super::buffer::RecvBuffer;
use super::traits::{BaudLink, DEFAULT_TIMEOUT, Link, LinkError};
use crate::protocol::constants::DEFAULT_BAUDRATE;

/// Poll interval for the underlying port; the `Link` deadline is enforced on
/// top of this.
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Link over a directly-owned serial port.
pub struct SerialLink {
    path: String,
    baudrate: u32,
    flow_control: bool,
    port: Option<Box<dyn SerialPort>>,
    buf: RecvBuffer,
    timeout: Duration,
}

impl SerialLink {
    pub fn new(path: impl Into<String>, baudrate: Option<u32>, flow_control: bool) -> Self {
        Self {
            path: path.into(),
            baudrate: baudrate.unwrap_or(DEFAULT_BAUDRATE),
            flow_control,
            port: None,
            buf: RecvBuffer::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, LinkError> {
        self.port.as_mut().ok_or(LinkError::NotConnected)
    }

    /// Read one chunk into the buffer. A port-level timeout is not an error,
    /// only the caller's deadline is.
    fn fill(&mut self) -> Result<(), LinkError> {
        let port = self.port()?;
        let mut chunk = [0u8; 4096];
        match port.read(&mut chunk) {
            Ok(n) => {
                self.buf.extend(&chunk[..n]);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(()),
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

impl Link for SerialLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        let flow = if self.flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        let port = serialport::new(&self.path, self.baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;

        info!(path = %self.path, baudrate = self.baudrate, "Serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        if self.port.take().is_some() {
            debug!(path = %self.path, "Serial port closed");
        }
        self.buf.clear();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        use std::io::Write;
        let port = self.port()?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| LinkError::SendFailed(e.to_string()))
    }

    fn recv(&mut self, n: usize) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(bytes) = self.buf.take(n) {
                return Ok(bytes);
            }
            if Instant::now() >= deadline {
                return Err(LinkError::RecvTimeout);
            }
            self.fill()?;
        }
    }

    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(bytes) = self.buf.take_until(delimiter) {
                return Ok(bytes);
            }
            if Instant::now() >= deadline {
                return Err(LinkError::RecvTimeout);
            }
            self.fill()?;
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl BaudLink for SerialLink {
    fn set_baudrate(&mut self, baudrate: u32) {
        self.baudrate = baudrate;
        if let Some(port) = self.port.as_mut() {
            if let Err(e) = port.set_baud_rate(baudrate) {
                debug!(error = %e, "set_baud_rate on open port failed");
            }
        }
    }

    fn baudrate(&self) -> u32 {
        self.baudrate
    }
}
