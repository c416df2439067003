//! Client facade: session lifecycle over a transport link.
//!
//! The client owns exactly one link and drives the session state machine
//! `Closed -> Connected -> SessionSetUp -> Streaming`. Out-of-order calls
//! fail fast with a client error naming the violated precondition instead of
//! producing undefined device behavior. All operations are synchronous; the
//! caller must not invoke methods concurrently without external
//! synchronization.

use tracing::{info, warn};

use crate::config::{ClientInfo, SessionConfig};
use crate::error::{Error, Result};
use crate::info::{SensorCalibration, ServerInfo};
use crate::link::{Link, link_for};
use crate::measurement::Measurement;
use crate::metadata::{Extended, Metadata};
use crate::protocol::explore::{
    self, CalibrationEntry, Command, StreamHeader, parse_stream_header,
};
use crate::protocol::frame::{read_json_line, write_json_line};
use crate::recorder::Recorder;
use crate::state::ClientState;

pub struct Client {
    info: ClientInfo,
    link: Box<dyn Link>,
    state: ClientState,
    server_info: Option<ServerInfo>,
    config: Option<SessionConfig>,
    metadata: Option<Extended<Metadata>>,
    calibration: Vec<(u32, SensorCalibration)>,
    recorder: Option<Box<dyn Recorder>>,
}

impl Client {
    /// Connect to the server described by `info`.
    ///
    /// The transport is selected once from the connection description; after
    /// the link is up, system and sensor info are fetched and the client
    /// enters the `Connected` state.
    pub fn open(info: ClientInfo) -> Result<Self> {
        let link = link_for(&info);
        Self::open_with_link(info, link)
    }

    /// Connect using a caller-supplied link (custom transports, tests).
    pub fn open_with_link(info: ClientInfo, mut link: Box<dyn Link>) -> Result<Self> {
        link.connect()?;
        let server_info = match explore::fetch_server_info(link.as_mut()) {
            Ok(server_info) => server_info,
            Err(e) => {
                let _ = link.disconnect();
                return Err(e);
            }
        };
        info!(
            rss_version = %server_info.rss_version,
            sensor_count = server_info.sensor_count,
            "Connected"
        );
        Ok(Self {
            info,
            link,
            state: ClientState::Connected,
            server_info: Some(server_info),
            config: None,
            metadata: None,
            calibration: Vec::new(),
            recorder: None,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.info
    }

    /// Firmware capabilities, available from `Connected` onward.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Metadata of the current session, available from `SessionSetUp` onward.
    pub fn metadata(&self) -> Option<&Extended<Metadata>> {
        self.metadata.as_ref()
    }

    /// Configuration of the current session, available from `SessionSetUp`
    /// onward.
    pub fn session_config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    /// Calibration state of the current session, caller-provided entries
    /// flagged as such.
    pub fn calibration(&self) -> &[(u32, SensorCalibration)] {
        &self.calibration
    }

    fn require(&self, allowed: &[ClientState], operation: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(Error::client(format!(
            "{operation} is not allowed in state {}",
            self.state
        )))
    }

    fn ticks_per_second(&self) -> Result<u64> {
        self.server_info
            .as_ref()
            .map(|s| s.ticks_per_second)
            .ok_or_else(|| Error::client("server info is not available"))
    }

    /// Set up a session on the server.
    ///
    /// Legal from `Connected` or `SessionSetUp`; a streaming session must be
    /// stopped first. The previous session's metadata and calibration are
    /// replaced wholesale. Caller-supplied calibration is forwarded to the
    /// server and tracked with its `provided` flag set.
    pub fn setup_session(
        &mut self,
        config: SessionConfig,
        calibration: Option<Vec<(u32, SensorCalibration)>>,
    ) -> Result<Extended<Metadata>> {
        self.require(
            &[ClientState::Connected, ClientState::SessionSetUp],
            "setup_session",
        )?;
        config.validate()?;

        let wire_calibration = calibration.as_ref().map(|entries| {
            entries
                .iter()
                .map(|(sensor_id, cal)| CalibrationEntry {
                    sensor_id: *sensor_id,
                    data: cal.data.clone(),
                    temperature: cal.temperature,
                })
                .collect()
        });

        let setup = explore::setup_session(self.link.as_mut(), &config, wire_calibration)?;

        // Firmware-measured calibration first, then caller-supplied entries
        // override with the provided flag set.
        let mut merged = setup.calibration;
        if let Some(entries) = calibration {
            for (sensor_id, mut cal) in entries {
                cal.provided = true;
                match merged.iter_mut().find(|(id, _)| *id == sensor_id) {
                    Some(slot) => slot.1 = cal,
                    None => merged.push((sensor_id, cal)),
                }
            }
        }

        info!(
            groups = setup.metadata.len(),
            extended = config.extended(),
            "Session set up"
        );

        if let Some(recorder) = &mut self.recorder {
            recorder.start_session(&config, &setup.metadata, &merged);
        }

        self.config = Some(config);
        self.metadata = Some(setup.metadata.clone());
        self.calibration = merged;
        self.state = ClientState::SessionSetUp;
        Ok(setup.metadata)
    }

    /// Start streaming. Legal from `SessionSetUp`.
    pub fn start_session(&mut self) -> Result<()> {
        self.require(&[ClientState::SessionSetUp], "start_session")?;
        write_json_line(self.link.as_mut(), &Command::StartStreaming)?;
        let response = read_json_line(self.link.as_mut())?;
        explore::check_status(&response, "start")?;
        self.state = ClientState::Streaming;
        info!("Streaming started");
        Ok(())
    }

    /// Block until the next frame arrives and return one measurement per
    /// sensor per group, in session order. Legal only while `Streaming`.
    pub fn get_next(&mut self) -> Result<Extended<Measurement>> {
        self.require(&[ClientState::Streaming], "get_next")?;

        let header = read_json_line(self.link.as_mut())?;
        let (result_info, payload_size) = match parse_stream_header(&header)? {
            StreamHeader::Result {
                result_info,
                payload_size,
            } => (result_info, payload_size),
            StreamHeader::Stopped => {
                return Err(Error::parse("server sent stop while streaming"));
            }
        };

        let payload = if payload_size > 0 {
            self.link.recv(payload_size)?
        } else {
            Vec::new()
        };

        let ticks_per_second = self.ticks_per_second()?;
        let metadata = self
            .metadata
            .as_ref()
            .ok_or_else(|| Error::client("session metadata is not available"))?;
        let results =
            crate::assemble::assemble_results(metadata, &result_info, ticks_per_second, &payload)?;

        if let Some(recorder) = &mut self.recorder {
            recorder.sample(&results);
        }
        Ok(results)
    }

    /// Stop streaming and return to `SessionSetUp`.
    ///
    /// Frames already in flight when the stop command lands are drained and
    /// discarded until the server acknowledges the stop.
    pub fn stop_session(&mut self) -> Result<()> {
        self.require(&[ClientState::Streaming], "stop_session")?;
        write_json_line(self.link.as_mut(), &Command::StopStreaming)?;

        let mut drained = 0usize;
        loop {
            let header = read_json_line(self.link.as_mut())?;
            match parse_stream_header(&header)? {
                StreamHeader::Result { payload_size, .. } => {
                    if payload_size > 0 {
                        self.link.recv(payload_size)?;
                    }
                    drained += 1;
                }
                StreamHeader::Stopped => break,
            }
        }
        if drained > 0 {
            info!(frames = drained, "Drained in-flight frames on stop");
        }

        if let Some(recorder) = &mut self.recorder {
            recorder.stop_session();
        }
        self.state = ClientState::SessionSetUp;
        info!("Streaming stopped");
        Ok(())
    }

    /// Disconnect and reset to `Closed`. Legal in any state; a streaming
    /// session is stopped on a best-effort basis first.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ClientState::Streaming {
            if let Err(e) = self.stop_session() {
                warn!(error = %e, "Stop during close failed");
            }
        }
        self.link.disconnect()?;
        self.state = ClientState::Closed;
        self.server_info = None;
        self.config = None;
        self.metadata = None;
        self.calibration.clear();
        Ok(())
    }

    /// Attach a recorder. At most one may be attached; legal in any
    /// connected state, and the recorder immediately observes the connection
    /// info.
    pub fn attach_recorder(&mut self, mut recorder: Box<dyn Recorder>) -> Result<()> {
        self.require(
            &[
                ClientState::Connected,
                ClientState::SessionSetUp,
                ClientState::Streaming,
            ],
            "attach_recorder",
        )?;
        if self.recorder.is_some() {
            return Err(Error::client("a recorder is already attached"));
        }
        let server_info = self
            .server_info
            .as_ref()
            .ok_or_else(|| Error::client("server info is not available"))?;
        recorder.start(&self.info, server_info);
        self.recorder = Some(recorder);
        Ok(())
    }

    /// Detach and return the current recorder.
    pub fn detach_recorder(&mut self) -> Result<Box<dyn Recorder>> {
        self.require(
            &[
                ClientState::Connected,
                ClientState::SessionSetUp,
                ClientState::Streaming,
            ],
            "detach_recorder",
        )?;
        self.recorder
            .take()
            .ok_or_else(|| Error::client("no recorder is attached"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use crate::link::MockLink;
    use crate::recorder::MemoryRecorder;

    fn queue_line(link: &MockLink, value: serde_json::Value) {
        link.queue_read(format!("{value}\n").as_bytes());
    }

    fn queue_open_responses(link: &MockLink) {
        queue_line(
            link,
            serde_json::json!({
                "status": "ok",
                "system_info": {
                    "rss_version": "v2.9.0",
                    "sensor_count": 5,
                    "ticks_per_second": 1_000_000,
                },
            }),
        );
        queue_line(
            link,
            serde_json::json!({
                "status": "ok",
                "sensor_info": [{"sensor_id": 1, "connected": true}],
            }),
        );
    }

    fn queue_setup_response(link: &MockLink, frame_data_length: u32, sweep_data_length: u32) {
        queue_line(
            link,
            serde_json::json!({
                "status": "ok",
                "tick_period": 50,
                "metadata": [[{
                    "frame_data_length": frame_data_length,
                    "sweep_data_length": sweep_data_length,
                    "subsweep_data_offset": [0],
                    "subsweep_data_length": [sweep_data_length],
                    "calibration_temperature": 25,
                    "base_step_length_m": 0.0025,
                    "max_sweep_rate": 1000.0,
                }]],
            }),
        );
    }

    fn queue_result_frame(link: &MockLink, samples: u32, tick: u64) {
        queue_line(
            link,
            serde_json::json!({
                "result_info": [[{"tick": tick, "temperature": 21}]],
                "payload_size": samples * 4,
            }),
        );
        let mut payload = Vec::new();
        for i in 0..samples {
            payload.extend_from_slice(&(i as i16).to_le_bytes());
            payload.extend_from_slice(&0i16.to_le_bytes());
        }
        link.queue_read(&payload);
    }

    fn open_client() -> (Client, MockLink) {
        let link = MockLink::new();
        queue_open_responses(&link);
        let client = Client::open_with_link(ClientInfo::Mock, Box::new(link.clone())).unwrap();
        (client, link)
    }

    fn client_in_state(state: ClientState) -> (Client, MockLink) {
        let (mut client, link) = open_client();
        if state == ClientState::Closed {
            client.close().unwrap();
            return (client, link);
        }
        if state >= ClientState::SessionSetUp {
            queue_setup_response(&link, 4, 4);
            client
                .setup_session(SessionConfig::default(), None)
                .unwrap();
        }
        if state == ClientState::Streaming {
            queue_line(&link, serde_json::json!({"status": "start"}));
            client.start_session().unwrap();
        }
        assert_eq!(client.state(), state);
        (client, link)
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Op {
        Setup,
        Start,
        GetNext,
        Stop,
        Attach,
        Detach,
    }

    fn attempt(client: &mut Client, link: &MockLink, op: Op) -> Result<()> {
        match op {
            Op::Setup => {
                queue_setup_response(link, 4, 4);
                client
                    .setup_session(SessionConfig::default(), None)
                    .map(|_| ())
            }
            Op::Start => {
                queue_line(link, serde_json::json!({"status": "start"}));
                client.start_session()
            }
            Op::GetNext => {
                queue_result_frame(link, 4, 1);
                client.get_next().map(|_| ())
            }
            Op::Stop => {
                queue_line(link, serde_json::json!({"status": "stop"}));
                client.stop_session()
            }
            Op::Attach => client.attach_recorder(Box::new(MemoryRecorder::new())),
            Op::Detach => {
                // Detachment needs something attached; attach first where the
                // state machine allows it at all.
                let _ = client.attach_recorder(Box::new(MemoryRecorder::new()));
                client.detach_recorder().map(|_| ())
            }
        }
    }

    #[test]
    fn state_machine_legality_table() {
        use ClientState::*;
        use Op::*;

        let table = [
            (Closed, vec![]),
            (Connected, vec![Setup, Attach, Detach]),
            (SessionSetUp, vec![Setup, Start, Attach, Detach]),
            (Streaming, vec![GetNext, Stop, Attach, Detach]),
        ];

        for (state, legal) in table {
            for op in [Setup, Start, GetNext, Stop, Attach, Detach] {
                let (mut client, link) = client_in_state(state);
                let outcome = attempt(&mut client, &link, op);
                if legal.contains(&op) {
                    assert!(
                        outcome.is_ok(),
                        "{op:?} in {state} should succeed: {outcome:?}"
                    );
                } else {
                    assert!(
                        matches!(outcome, Err(Error::Client(_))),
                        "{op:?} in {state} should be a client error: {outcome:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn close_is_legal_everywhere() {
        use ClientState::*;
        for state in [Closed, Connected, SessionSetUp, Streaming] {
            let (mut client, link) = client_in_state(state);
            if state == Streaming {
                queue_line(&link, serde_json::json!({"status": "stop"}));
            }
            client.close().unwrap();
            assert_eq!(client.state(), Closed);
        }
    }

    #[test]
    fn full_session_roundtrip() {
        let (mut client, link) = open_client();

        queue_setup_response(&link, 4, 4);
        let metadata = client
            .setup_session(SessionConfig::default(), None)
            .unwrap();
        assert_eq!(metadata[0][0].1.frame_data_length, 4);
        assert_eq!(metadata[0][0].1.tick_period, 50);
        assert_eq!(client.session_config(), Some(&SessionConfig::default()));

        queue_line(&link, serde_json::json!({"status": "start"}));
        client.start_session().unwrap();

        queue_result_frame(&link, 4, 12345);
        let results = client.get_next().unwrap();
        let (sensor_id, measurement) = &results[0][0];
        assert_eq!(*sensor_id, 1);
        assert_eq!(measurement.tick, 12345);
        assert_eq!(measurement.frame.len(), 4);
        assert_eq!(measurement.temperature, 21);

        queue_line(&link, serde_json::json!({"status": "stop"}));
        client.stop_session().unwrap();
        assert_eq!(client.state(), ClientState::SessionSetUp);

        client.close().unwrap();
    }

    #[test]
    fn stop_drains_in_flight_frames() {
        let (mut client, link) = client_in_state(ClientState::Streaming);

        // Two frames already on the wire before the stop ack.
        queue_result_frame(&link, 4, 1);
        queue_result_frame(&link, 4, 2);
        queue_line(&link, serde_json::json!({"status": "stop"}));

        client.stop_session().unwrap();
        assert_eq!(client.state(), ClientState::SessionSetUp);
    }

    #[test]
    fn resetup_replaces_metadata_wholesale() {
        let (mut client, link) = open_client();

        queue_setup_response(&link, 100, 100);
        let config_one_sweep = SessionConfig::new(
            1,
            SensorConfig {
                sweeps_per_frame: 1,
                ..SensorConfig::default()
            },
        );
        let first = client.setup_session(config_one_sweep, None).unwrap();

        queue_setup_response(&link, 200, 100);
        let config_two_sweeps = SessionConfig::new(
            1,
            SensorConfig {
                sweeps_per_frame: 2,
                ..SensorConfig::default()
            },
        );
        let second = client.setup_session(config_two_sweeps, None).unwrap();

        assert_ne!(first, second);
        assert_eq!(first[0][0].1.frame_data_length, 100);
        assert_eq!(second[0][0].1.frame_data_length, 200);
        assert_eq!(
            client.metadata().unwrap()[0][0].1.frame_data_length,
            200
        );
    }

    #[test]
    fn server_error_on_setup_is_surfaced_verbatim() {
        let (mut client, link) = open_client();
        queue_line(
            &link,
            serde_json::json!({"status": "error", "message": "hwaas out of range"}),
        );
        match client.setup_session(SessionConfig::default(), None) {
            Err(Error::Server(msg)) => assert_eq!(msg, "hwaas out of range"),
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn recorder_observes_the_whole_session() {
        let (mut client, link) = open_client();

        let recorder = MemoryRecorder::new();
        let log = recorder.log();
        client.attach_recorder(Box::new(recorder)).unwrap();

        queue_setup_response(&link, 4, 4);
        client
            .setup_session(SessionConfig::default(), None)
            .unwrap();

        queue_line(&link, serde_json::json!({"status": "start"}));
        client.start_session().unwrap();

        queue_result_frame(&link, 4, 1);
        client.get_next().unwrap();

        queue_line(&link, serde_json::json!({"status": "stop"}));
        client.stop_session().unwrap();

        client.detach_recorder().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.client_info, Some(ClientInfo::Mock));
        assert!(log.server_info.is_some());
        assert_eq!(log.sessions.len(), 1);
        assert_eq!(log.sessions[0].samples.len(), 1);
        assert!(log.sessions[0].stopped);
    }

    #[test]
    fn double_attach_and_empty_detach_are_client_errors() {
        let (mut client, _link) = open_client();

        client
            .attach_recorder(Box::new(MemoryRecorder::new()))
            .unwrap();
        assert!(matches!(
            client.attach_recorder(Box::new(MemoryRecorder::new())),
            Err(Error::Client(_))
        ));

        client.detach_recorder().unwrap();
        assert!(matches!(
            client.detach_recorder(),
            Err(Error::Client(_))
        ));
    }

    #[test]
    fn provided_calibration_is_flagged() {
        let (mut client, link) = open_client();

        queue_setup_response(&link, 4, 4);
        let calibration = vec![(
            1,
            SensorCalibration {
                data: "3q2+7w==".into(),
                temperature: 23,
                provided: false,
            },
        )];
        client
            .setup_session(SessionConfig::default(), Some(calibration))
            .unwrap();

        let tracked = client.calibration();
        assert_eq!(tracked.len(), 1);
        assert!(tracked[0].1.provided);

        // The calibration also went out on the wire with the setup command.
        let writes = link.writes();
        let setup_line = writes
            .iter()
            .find(|w| w.starts_with(b"{\"cmd\":\"setup\""))
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(setup_line).unwrap();
        assert_eq!(value["calibration_info"][0]["sensor_id"], 1);
    }

    #[test]
    fn link_timeout_surfaces_as_link_error() {
        let (mut client, _link) = client_in_state(ClientState::Streaming);
        // Nothing queued: the read must time out, not hang or panic.
        assert!(matches!(client.get_next(), Err(Error::Link(_))));
    }
}
