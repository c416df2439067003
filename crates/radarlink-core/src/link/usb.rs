//! USB CDC link on nusb bulk endpoints.
//!
//! Key nusb 0.2 API patterns:
//! - `list_devices().wait()` for device enumeration
//! - `device_info.open().wait()` to open a device
//! - `device.claim_interface(n).wait()` to claim the data interface
//! - `interface.endpoint::<Bulk, In/Out>(addr)` + `.reader()`/`.writer()`

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use nusb::transfer::{Bulk, In, Out};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info};

use super::buffer::RecvBuffer;
use super::traits::{DEFAULT_TIMEOUT, Link, LinkError};

struct UsbConn {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
}

/// Link over a USB CDC device's bulk endpoint pair.
pub struct UsbCdcLink {
    vid: u16,
    pid: u16,
    serial_number: Option<String>,
    conn: Option<UsbConn>,
    buf: RecvBuffer,
    timeout: Duration,
}

impl UsbCdcLink {
    pub fn new(vid: u16, pid: u16, serial_number: Option<String>) -> Self {
        Self {
            vid,
            pid,
            serial_number,
            conn: None,
            buf: RecvBuffer::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn conn(&mut self) -> Result<&mut UsbConn, LinkError> {
        self.conn.as_mut().ok_or(LinkError::NotConnected)
    }

    fn fill(&mut self) -> Result<(), LinkError> {
        let conn = self.conn()?;
        let ep = conn
            .interface
            .endpoint::<Bulk, In>(conn.in_endpoint)
            .map_err(|e| LinkError::Io(std::io::Error::other(e.to_string())))?;
        let mut reader = ep.reader(4096);
        let mut chunk = [0u8; 4096];
        match reader.read(&mut chunk) {
            Ok(n) => {
                self.buf.extend(&chunk[..n]);
                Ok(())
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(())
            }
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

impl Link for UsbCdcLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?
            .find(|d| {
                d.vendor_id() == self.vid
                    && d.product_id() == self.pid
                    && match &self.serial_number {
                        Some(sn) => d.serial_number() == Some(sn.as_str()),
                        None => true,
                    }
            })
            .ok_or_else(|| {
                LinkError::ConnectFailed(format!(
                    "device not found: VID={:04X} PID={:04X}",
                    self.vid, self.pid
                ))
            })?;

        let device = device_info
            .open()
            .wait()
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;

        // Find the CDC data interface: the one carrying a bulk IN/OUT pair.
        let mut data_interface: Option<u8> = None;
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;
        for config in device.configurations() {
            for iface in config.interfaces() {
                for alt in iface.alt_settings() {
                    let mut ep_in = 0;
                    let mut ep_out = 0;
                    for ep in alt.endpoints() {
                        if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                            if ep.direction() == nusb::transfer::Direction::In {
                                ep_in = ep.address();
                            } else {
                                ep_out = ep.address();
                            }
                        }
                    }
                    if ep_in != 0 && ep_out != 0 && data_interface.is_none() {
                        data_interface = Some(iface.interface_number());
                        in_endpoint = ep_in;
                        out_endpoint = ep_out;
                    }
                }
            }
        }

        let interface_number = data_interface.ok_or_else(|| {
            LinkError::ConnectFailed("no bulk endpoint pair found on device".into())
        })?;

        let interface = device
            .claim_interface(interface_number)
            .wait()
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;

        info!(
            vid = %format!("{:04X}", self.vid),
            pid = %format!("{:04X}", self.pid),
            interface = interface_number,
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "USB device opened"
        );

        self.conn = Some(UsbConn {
            interface,
            in_endpoint,
            out_endpoint,
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        if self.conn.take().is_some() {
            debug!("USB device released");
        }
        self.buf.clear();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let conn = self.conn()?;
        let ep = conn
            .interface
            .endpoint::<Bulk, Out>(conn.out_endpoint)
            .map_err(|e| LinkError::SendFailed(e.to_string()))?;
        let mut writer = ep.writer(4096);
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
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
