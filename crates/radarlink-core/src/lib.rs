//! radarlink-core: session and streaming protocol engine for FMCW radar
//! sensors.
//!
//! This crate implements the host side of the sensor's measurement
//! streaming protocols: framing, sending, and parsing binary and JSON
//! messages over TCP, serial, or USB transports, plus the session lifecycle
//! (setup -> start -> stream -> stop -> teardown) that turns raw byte
//! buffers into structured per-sensor measurement frames.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Link**: byte-stream transport abstraction (TCP, serial, worker-thread
//!   serial, USB CDC, mock)
//! - **Protocol**: frame codecs, the register protocol vocabulary, and the
//!   JSON streaming protocol
//! - **Assemble**: slicing stream payloads into per-sensor measurements
//! - **Client**: session state machine and facade
//! - **Recorder**: observer seam for persisting sessions
//!
//! # Example
//!
//! ```no_run
//! use radarlink_core::client::Client;
//! use radarlink_core::config::{ClientInfo, SessionConfig};
//!
//! let mut client = Client::open(ClientInfo::socket("192.168.1.10", 6110))
//!     .expect("connect failed");
//! client
//!     .setup_session(SessionConfig::default(), None)
//!     .expect("setup failed");
//! client.start_session().expect("start failed");
//! let results = client.get_next().expect("no frame");
//! println!("tick: {}", results[0][0].1.tick);
//! client.stop_session().expect("stop failed");
//! client.close().expect("close failed");
//! ```

pub mod assemble;
pub mod client;
pub mod config;
pub mod error;
pub mod info;
pub mod link;
pub mod measurement;
pub mod metadata;
pub mod protocol;
pub mod recorder;
pub mod state;

// Re-exports for convenience
pub use client::Client;
pub use config::{
    ClientInfo, IdleState, Prf, Profile, SensorConfig, SensorEntry, SessionConfig, SubsweepConfig,
};
pub use error::{Error, Result};
pub use info::{SensorCalibration, ServerInfo};
pub use link::{BaudLink, Link, LinkError, MockLink, SerialLink, SocketLink, UsbCdcLink};
pub use measurement::{Measurement, ResultContext, SampleFrame};
pub use metadata::{Extended, Metadata};
pub use recorder::{MemoryRecorder, Recorder};
pub use state::ClientState;
