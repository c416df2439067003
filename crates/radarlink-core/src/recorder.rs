//! Recording seam.
//!
//! A recorder observes the client's session lifecycle and receives every
//! measurement as it is dispatched. Persistent sinks (HDF5 files and the
//! like) implement this trait outside the core; [`MemoryRecorder`] is the
//! in-memory implementation used by tests and short captures.

use std::sync::{Arc, Mutex};

use crate::config::{ClientInfo, SessionConfig};
use crate::info::{SensorCalibration, ServerInfo};
use crate::measurement::Measurement;
use crate::metadata::{Extended, Metadata};

pub trait Recorder: Send {
    /// Called once when the recorder is attached to a connected client.
    fn start(&mut self, client_info: &ClientInfo, server_info: &ServerInfo);

    /// Called at every session setup.
    fn start_session(
        &mut self,
        config: &SessionConfig,
        metadata: &Extended<Metadata>,
        calibration: &[(u32, SensorCalibration)],
    );

    /// Called once per dispatched result batch.
    fn sample(&mut self, results: &Extended<Measurement>);

    /// Called at every session stop.
    fn stop_session(&mut self);
}

/// One recorded session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSession {
    pub config: SessionConfig,
    pub metadata: Extended<Metadata>,
    pub calibration: Vec<(u32, SensorCalibration)>,
    pub samples: Vec<Extended<Measurement>>,
    pub stopped: bool,
}

/// Everything a [`MemoryRecorder`] has observed.
#[derive(Debug, Default)]
pub struct RecorderLog {
    pub client_info: Option<ClientInfo>,
    pub server_info: Option<ServerInfo>,
    pub sessions: Vec<RecordedSession>,
}

/// Recorder that keeps everything in memory.
///
/// The log is shared: keep a handle from [`MemoryRecorder::log`] to inspect
/// what was recorded after the recorder has been handed to a client.
#[derive(Default)]
pub struct MemoryRecorder {
    log: Arc<Mutex<RecorderLog>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<Mutex<RecorderLog>> {
        Arc::clone(&self.log)
    }
}

impl Recorder for MemoryRecorder {
    fn start(&mut self, client_info: &ClientInfo, server_info: &ServerInfo) {
        let mut log = self.log.lock().unwrap();
        log.client_info = Some(client_info.clone());
        log.server_info = Some(server_info.clone());
    }

    fn start_session(
        &mut self,
        config: &SessionConfig,
        metadata: &Extended<Metadata>,
        calibration: &[(u32, SensorCalibration)],
    ) {
        self.log.lock().unwrap().sessions.push(RecordedSession {
            config: config.clone(),
            metadata: metadata.clone(),
            calibration: calibration.to_vec(),
            samples: Vec::new(),
            stopped: false,
        });
    }

    fn sample(&mut self, results: &Extended<Measurement>) {
        if let Some(session) = self.log.lock().unwrap().sessions.last_mut() {
            session.samples.push(results.clone());
        }
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.log.lock().unwrap().sessions.last_mut() {
            session.stopped = true;
        }
    }
}
