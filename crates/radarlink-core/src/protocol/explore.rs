//! JSON streaming protocol.
//!
//! Structured command/response vocabulary: newline-terminated JSON commands,
//! `status`-keyed responses, and the setup/stream response shapes that carry
//! session metadata and per-frame result info.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::frame::{read_json_line, write_json_line};
use crate::config::{SensorEntry, SessionConfig};
use crate::error::{Error, Result};
use crate::info::{SensorCalibration, ServerInfo};
use crate::link::Link;
use crate::metadata::{Extended, Metadata};

/// Calibration entry as it appears on the wire, both in setup commands and
/// setup responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub sensor_id: u32,
    pub data: String,
    pub temperature: i16,
}

/// Host-to-server command vocabulary.
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command<'a> {
    GetSystemInfo,
    GetSensorInfo,
    Setup {
        groups: &'a [Vec<SensorEntry>],
        #[serde(skip_serializing_if = "Option::is_none")]
        update_rate: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        calibration_info: Option<Vec<CalibrationEntry>>,
    },
    StartStreaming,
    StopStreaming,
}

// ============================================================================
// Status handling
// ============================================================================

fn status_of(response: &Value) -> Result<&str> {
    response
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::parse("response has no status field"))
}

fn server_message(response: &Value) -> String {
    response
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unspecified server error")
        .to_string()
}

/// Check a response's status against what the request expects.
///
/// An explicit error status, or any status other than the expected one,
/// surfaces as a server error carrying the firmware's message verbatim.
pub fn check_status(response: &Value, expected: &str) -> Result<()> {
    let status = status_of(response)?;
    if status == expected {
        Ok(())
    } else if status == "error" {
        Err(Error::server(server_message(response)))
    } else {
        Err(Error::server(format!(
            "unexpected status {status:?}, expected {expected:?}"
        )))
    }
}

// ============================================================================
// Connect: system and sensor info
// ============================================================================

#[derive(Deserialize)]
struct SystemInfoFields {
    rss_version: String,
    sensor_count: u32,
    ticks_per_second: u64,
    #[serde(default)]
    hardware_name: Option<String>,
    #[serde(default)]
    max_baudrate: Option<u32>,
}

#[derive(Deserialize)]
struct SensorInfoEntry {
    sensor_id: u32,
    connected: bool,
}

/// Query system and sensor info; together they form the [`ServerInfo`].
pub fn fetch_server_info(link: &mut dyn Link) -> Result<ServerInfo> {
    write_json_line(link, &Command::GetSystemInfo)?;
    let response = read_json_line(link)?;
    check_status(&response, "ok")?;
    let system: SystemInfoFields = response
        .get("system_info")
        .cloned()
        .ok_or_else(|| Error::parse("response has no system_info"))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| Error::parse(format!("system_info: {e}")))
        })?;

    write_json_line(link, &Command::GetSensorInfo)?;
    let response = read_json_line(link)?;
    check_status(&response, "ok")?;
    let sensors: Vec<SensorInfoEntry> = response
        .get("sensor_info")
        .cloned()
        .ok_or_else(|| Error::parse("response has no sensor_info"))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| Error::parse(format!("sensor_info: {e}")))
        })?;

    Ok(ServerInfo {
        rss_version: system.rss_version,
        sensor_count: system.sensor_count,
        ticks_per_second: system.ticks_per_second,
        connected_sensors: sensors
            .into_iter()
            .map(|s| (s.sensor_id, s.connected))
            .collect(),
        hardware_name: system.hardware_name,
        max_baudrate: system.max_baudrate,
    })
}

// ============================================================================
// Setup
// ============================================================================

/// Parsed outcome of a setup exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupResult {
    pub metadata: Extended<Metadata>,
    /// Firmware-reported calibration, `provided` not yet resolved.
    pub calibration: Vec<(u32, SensorCalibration)>,
}

/// Send a setup command and parse the response into extended metadata.
pub fn setup_session(
    link: &mut dyn Link,
    config: &SessionConfig,
    provided_calibration: Option<Vec<CalibrationEntry>>,
) -> Result<SetupResult> {
    write_json_line(
        link,
        &Command::Setup {
            groups: &config.groups,
            update_rate: config.update_rate,
            calibration_info: provided_calibration,
        },
    )?;
    let response = read_json_line(link)?;
    check_status(&response, "ok")?;
    parse_setup_response(&response, config)
}

/// Parse a setup response against the configuration that produced it.
///
/// The response's metadata nesting carries no sensor ids; they are implied by
/// the configuration's group order, which is why the config is needed here.
/// The top-level `tick_period` is copied into every per-sensor metadata.
pub fn parse_setup_response(response: &Value, config: &SessionConfig) -> Result<SetupResult> {
    let tick_period = response
        .get("tick_period")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::parse("setup response has no tick_period"))?;

    let raw: Vec<Vec<Metadata>> = response
        .get("metadata")
        .cloned()
        .ok_or_else(|| Error::parse("setup response has no metadata"))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| Error::parse(format!("metadata: {e}")))
        })?;

    let ids = config.sensor_ids();
    if raw.len() != ids.len() {
        return Err(Error::parse(format!(
            "setup response has {} metadata groups, config has {}",
            raw.len(),
            ids.len()
        )));
    }

    let mut metadata: Extended<Metadata> = Vec::with_capacity(raw.len());
    for (group_ids, group_meta) in ids.iter().zip(raw) {
        if group_meta.len() != group_ids.len() {
            return Err(Error::parse(format!(
                "metadata group has {} sensors, config group has {}",
                group_meta.len(),
                group_ids.len()
            )));
        }
        metadata.push(
            group_ids
                .iter()
                .copied()
                .zip(group_meta.into_iter().map(|mut meta| {
                    meta.tick_period = tick_period;
                    meta
                }))
                .collect(),
        );
    }

    let calibration = match response.get("calibration_info") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => {
            let entries: Vec<CalibrationEntry> = serde_json::from_value(value.clone())
                .map_err(|e| Error::parse(format!("calibration_info: {e}")))?;
            entries
                .into_iter()
                .map(|e| {
                    (
                        e.sensor_id,
                        SensorCalibration {
                            data: e.data,
                            temperature: e.temperature,
                            provided: false,
                        },
                    )
                })
                .collect()
        }
    };

    Ok(SetupResult {
        metadata,
        calibration,
    })
}

// ============================================================================
// Streaming
// ============================================================================

/// Per-sensor header fields of one stream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResultInfo {
    pub tick: u64,
    #[serde(default)]
    pub data_saturated: bool,
    #[serde(default)]
    pub frame_delayed: bool,
    #[serde(default)]
    pub calibration_needed: bool,
    #[serde(default)]
    pub temperature: i16,
}

/// One parsed stream header line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamHeader {
    /// A result frame follows: per-group result info plus the byte count of
    /// the binary payload that comes immediately after the header.
    Result {
        result_info: Vec<Vec<ResultInfo>>,
        payload_size: usize,
    },
    /// The server acknowledged `stop_streaming`.
    Stopped,
}

/// Parse one header line read off the stream.
pub fn parse_stream_header(response: &Value) -> Result<StreamHeader> {
    if let Some(info) = response.get("result_info") {
        let result_info: Vec<Vec<ResultInfo>> = serde_json::from_value(info.clone())
            .map_err(|e| Error::parse(format!("result_info: {e}")))?;
        let payload_size = response
            .get("payload_size")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::parse("stream header has no payload_size"))?;
        return Ok(StreamHeader::Result {
            result_info,
            payload_size: payload_size as usize,
        });
    }

    match status_of(response)? {
        "stop" => Ok(StreamHeader::Stopped),
        "error" => Err(Error::server(server_message(response))),
        other => Err(Error::parse(format!(
            "unexpected stream header status: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use crate::link::MockLink;

    #[test]
    fn command_wire_shapes() {
        let value = serde_json::to_value(Command::GetSystemInfo).unwrap();
        assert_eq!(value, serde_json::json!({"cmd": "get_system_info"}));

        let value = serde_json::to_value(Command::StartStreaming).unwrap();
        assert_eq!(value, serde_json::json!({"cmd": "start_streaming"}));

        let config = SessionConfig::new(2, SensorConfig::default());
        let value = serde_json::to_value(Command::Setup {
            groups: &config.groups,
            update_rate: None,
            calibration_info: None,
        })
        .unwrap();
        assert_eq!(value["cmd"], "setup");
        assert_eq!(value["groups"][0][0]["sensor_id"], 2);
        assert!(value["groups"][0][0]["config"]["subsweeps"].is_array());
        // Omitted, not null.
        assert!(value.get("update_rate").is_none());
    }

    #[test]
    fn setup_response_literal_scenario() {
        let response: Value = serde_json::from_str(
            r#"{"status":"ok","tick_period":50,"metadata":[[{"sweep_data_length":100,
            "frame_data_length":100,"subsweep_data_offset":[0],"subsweep_data_length":[100],
            "calibration_temperature":10,"base_step_length_m":0.0025,"max_sweep_rate":1000.0}]]}"#,
        )
        .unwrap();

        let config = SessionConfig::new(1, SensorConfig::default());
        let setup = parse_setup_response(&response, &config).unwrap();

        assert_eq!(setup.metadata.len(), 1);
        let (sensor_id, meta) = &setup.metadata[0][0];
        assert_eq!(*sensor_id, 1);
        assert_eq!(meta.frame_data_length, 100);
        assert_eq!(meta.tick_period, 50);
        assert_eq!(meta.base_step_length_m, 0.0025);
        assert!(setup.calibration.is_empty());
    }

    #[test]
    fn setup_group_count_mismatch_is_parse_error() {
        let response = serde_json::json!({
            "status": "ok",
            "tick_period": 50,
            "metadata": [[], []],
        });
        let config = SessionConfig::new(1, SensorConfig::default());
        assert!(matches!(
            parse_setup_response(&response, &config),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn error_status_carries_message_verbatim() {
        let response = serde_json::json!({
            "status": "error",
            "message": "sensor 1 not connected",
        });
        match check_status(&response, "ok") {
            Err(Error::Server(msg)) => assert_eq!(msg, "sensor 1 not connected"),
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn unexpected_status_is_server_error() {
        let response = serde_json::json!({"status": "start"});
        assert!(matches!(
            check_status(&response, "ok"),
            Err(Error::Server(_))
        ));
    }

    #[test]
    fn fetch_server_info_over_mock_link() {
        let mut link = MockLink::new();
        link.connect().unwrap();
        let system = serde_json::json!({
            "status": "ok",
            "system_info": {
                "rss_version": "v2.9.0",
                "sensor_count": 5,
                "ticks_per_second": 1_000_000,
                "hardware_name": "xm125",
                "max_baudrate": 3_000_000,
            },
        });
        link.queue_read(format!("{system}\n").as_bytes());
        let sensors = serde_json::json!({
            "status": "ok",
            "sensor_info": [
                {"sensor_id": 1, "connected": true},
                {"sensor_id": 2, "connected": false},
            ],
        });
        link.queue_read(format!("{sensors}\n").as_bytes());

        let info = fetch_server_info(&mut link).unwrap();
        assert_eq!(info.rss_version, "v2.9.0");
        assert_eq!(info.ticks_per_second, 1_000_000);
        assert!(info.sensor_connected(1));
        assert!(!info.sensor_connected(2));
        assert_eq!(info.hardware_name.as_deref(), Some("xm125"));

        let writes = link.writes();
        assert_eq!(writes[0], b"{\"cmd\":\"get_system_info\"}\n");
        assert_eq!(writes[1], b"{\"cmd\":\"get_sensor_info\"}\n");
    }

    #[test]
    fn stream_header_variants() {
        let header = serde_json::json!({
            "result_info": [[{"tick": 1234, "data_saturated": false,
                              "frame_delayed": false, "calibration_needed": false,
                              "temperature": 21}]],
            "payload_size": 400,
        });
        match parse_stream_header(&header).unwrap() {
            StreamHeader::Result {
                result_info,
                payload_size,
            } => {
                assert_eq!(payload_size, 400);
                assert_eq!(result_info[0][0].tick, 1234);
                assert_eq!(result_info[0][0].temperature, 21);
            }
            other => panic!("expected result header, got {other:?}"),
        }

        let stop = serde_json::json!({"status": "stop"});
        assert_eq!(parse_stream_header(&stop).unwrap(), StreamHeader::Stopped);

        let error = serde_json::json!({"status": "error", "message": "sensor fault"});
        assert!(matches!(
            parse_stream_header(&error),
            Err(Error::Server(_))
        ));
    }

    #[test]
    fn setup_response_with_calibration() {
        let response = serde_json::json!({
            "status": "ok",
            "tick_period": 50,
            "metadata": [[{
                "sweep_data_length": 10,
                "frame_data_length": 10,
                "subsweep_data_offset": [0],
                "subsweep_data_length": [10],
                "calibration_temperature": 24,
                "base_step_length_m": 0.0025,
                "max_sweep_rate": 500.0,
            }]],
            "calibration_info": [
                {"sensor_id": 1, "data": "3q2+7w==", "temperature": 24},
            ],
        });
        let config = SessionConfig::new(1, SensorConfig::default());
        let setup = parse_setup_response(&response, &config).unwrap();
        assert_eq!(setup.calibration.len(), 1);
        let (sensor_id, calibration) = &setup.calibration[0];
        assert_eq!(*sensor_id, 1);
        assert_eq!(calibration.temperature, 24);
        assert!(!calibration.provided);
    }
}
