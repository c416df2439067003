//! Transport layer module.

mod buffer;
pub mod mock;
pub mod serial;
pub mod tcp;
pub mod traits;
pub mod usb;
pub mod worker;

pub use mock::MockLink;
pub use serial::SerialLink;
pub use tcp::SocketLink;
pub use traits::{BaudLink, DEFAULT_TIMEOUT, Link, LinkError};
pub use usb::UsbCdcLink;
pub use worker::WorkerSerialLink;

use crate::config::ClientInfo;

/// Select the transport for a [`ClientInfo`].
///
/// Pure function of the connection description; no further dynamic dispatch
/// happens after this choice. Serial connections get the worker-thread
/// variant so blocking port I/O cannot stall the controlling flow.
pub fn link_for(info: &ClientInfo) -> Box<dyn Link> {
    match info {
        ClientInfo::Socket { ip, tcp_port } => Box::new(SocketLink::new(ip.clone(), *tcp_port)),
        ClientInfo::Serial {
            port,
            override_baudrate,
            flow_control,
        } => Box::new(WorkerSerialLink::new(
            port.clone(),
            *override_baudrate,
            *flow_control,
        )),
        ClientInfo::Usb {
            vid,
            pid,
            serial_number,
        } => Box::new(UsbCdcLink::new(*vid, *pid, serial_number.clone())),
        ClientInfo::Mock => Box::new(MockLink::new()),
    }
}
