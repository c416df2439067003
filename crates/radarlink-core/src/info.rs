//! Firmware-reported server information and per-sensor calibration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Capabilities reported by the firmware during connect. Populated once,
/// read-only for the lifetime of the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub rss_version: String,
    pub sensor_count: u32,
    /// Tick-to-time conversion factor.
    pub ticks_per_second: u64,
    /// Which sensor ports have a sensor attached.
    pub connected_sensors: BTreeMap<u32, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_baudrate: Option<u32>,
}

impl ServerInfo {
    /// Whether `sensor_id` reported as connected.
    pub fn sensor_connected(&self, sensor_id: u32) -> bool {
        self.connected_sensors.get(&sensor_id).copied().unwrap_or(false)
    }
}

/// Opaque per-sensor calibration blob.
///
/// `provided` distinguishes caller-supplied calibration from values the
/// firmware measured itself; the flag travels with the calibration into any
/// persisted recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorCalibration {
    pub data: String,
    pub temperature: i16,
    pub provided: bool,
}
