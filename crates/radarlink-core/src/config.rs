//! Connection and session configuration value objects.
//!
//! All of these are built by the caller and consumed, never mutated, by the
//! client. `SessionConfig` serializes to the exact JSON shape the setup
//! command carries on the wire.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How to reach a sensor. Exactly one transport; constructed once at open
/// time and serializable for recording provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ClientInfo {
    Serial {
        port: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        override_baudrate: Option<u32>,
        #[serde(default)]
        flow_control: bool,
    },
    Usb {
        vid: u16,
        pid: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        serial_number: Option<String>,
    },
    Socket {
        ip: String,
        tcp_port: u16,
    },
    Mock,
}

impl ClientInfo {
    pub fn socket(ip: impl Into<String>, tcp_port: u16) -> Self {
        ClientInfo::Socket {
            ip: ip.into(),
            tcp_port,
        }
    }

    pub fn serial(port: impl Into<String>) -> Self {
        ClientInfo::Serial {
            port: port.into(),
            override_baudrate: None,
            flow_control: false,
        }
    }

    pub fn usb(vid: u16, pid: u16) -> Self {
        ClientInfo::Usb {
            vid,
            pid,
            serial_number: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::parse(format!("client info: {e}")))
    }
}

/// Pulse length profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    #[serde(rename = "profile_1")]
    Profile1,
    #[serde(rename = "profile_2")]
    Profile2,
    #[serde(rename = "profile_3")]
    Profile3,
    #[serde(rename = "profile_4")]
    Profile4,
    #[serde(rename = "profile_5")]
    Profile5,
}

/// Pulse repetition frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prf {
    #[serde(rename = "19_5_MHz")]
    Prf19_5MHz,
    #[serde(rename = "15_6_MHz")]
    Prf15_6MHz,
    #[serde(rename = "13_0_MHz")]
    Prf13_0MHz,
    #[serde(rename = "8_7_MHz")]
    Prf8_7MHz,
    #[serde(rename = "6_5_MHz")]
    Prf6_5MHz,
    #[serde(rename = "5_2_MHz")]
    Prf5_2MHz,
}

/// Sensor idle state between sweeps or frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    DeepSleep,
    Sleep,
    Ready,
}

/// One contiguous distance-sampling segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsweepConfig {
    pub start_point: i32,
    pub num_points: u32,
    pub step_length: u32,
    pub profile: Profile,
    pub hwaas: u32,
    pub receiver_gain: u32,
    pub prf: Prf,
}

impl Default for SubsweepConfig {
    fn default() -> Self {
        Self {
            start_point: 80,
            num_points: 160,
            step_length: 1,
            profile: Profile::Profile3,
            hwaas: 8,
            receiver_gain: 16,
            prf: Prf::Prf15_6MHz,
        }
    }
}

/// Per-sensor configuration: an ordered sequence of subsweeps plus frame
/// pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub subsweeps: Vec<SubsweepConfig>,
    pub sweeps_per_frame: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    pub inter_frame_idle_state: IdleState,
    pub inter_sweep_idle_state: IdleState,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            subsweeps: vec![SubsweepConfig::default()],
            sweeps_per_frame: 1,
            sweep_rate: None,
            frame_rate: None,
            inter_frame_idle_state: IdleState::DeepSleep,
            inter_sweep_idle_state: IdleState::Ready,
        }
    }
}

/// One sensor within a group, in wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEntry {
    pub sensor_id: u32,
    pub config: SensorConfig,
}

/// Full session configuration: one or more groups, each an ordered sequence
/// of sensor entries. The session is "extended" when more than one group or
/// sensor is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub groups: Vec<Vec<SensorEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_rate: Option<f64>,
}

impl SessionConfig {
    /// Single-group, single-sensor session.
    pub fn new(sensor_id: u32, config: SensorConfig) -> Self {
        Self {
            groups: vec![vec![SensorEntry { sensor_id, config }]],
            update_rate: None,
        }
    }

    pub fn from_groups(groups: Vec<Vec<SensorEntry>>) -> Self {
        Self {
            groups,
            update_rate: None,
        }
    }

    pub fn extended(&self) -> bool {
        self.groups.len() > 1 || self.groups.first().is_some_and(|g| g.len() > 1)
    }

    /// Sensor ids per group, in wire order.
    pub fn sensor_ids(&self) -> Vec<Vec<u32>> {
        self.groups
            .iter()
            .map(|group| group.iter().map(|entry| entry.sensor_id).collect())
            .collect()
    }

    /// Structural checks required for the protocol to make sense. Field-level
    /// schema validation is the firmware's job.
    pub fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            return Err(Error::client("session config has no groups"));
        }
        for group in &self.groups {
            if group.is_empty() {
                return Err(Error::client("session config has an empty group"));
            }
            for entry in group {
                if entry.config.subsweeps.is_empty() {
                    return Err(Error::client(format!(
                        "sensor {} has no subsweeps",
                        entry.sensor_id
                    )));
                }
                if entry.config.sweeps_per_frame == 0 {
                    return Err(Error::client(format!(
                        "sensor {} has sweeps_per_frame = 0",
                        entry.sensor_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::parse(format!("session config: {e}")))
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::protocol(format!("session config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(1, SensorConfig::default())
    }
}
