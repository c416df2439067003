//! Legacy register protocol.
//!
//! Typed register read/write requests and responses, the immutable register
//! table, the connect handshake, baud negotiation, and the service-mode
//! stream payload decoders.

use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex;
use tracing::{debug, info, warn};

use super::constants::*;
use super::frame::{encode_frame, read_frame};
use crate::error::{Error, Result};
use crate::link::{BaudLink, Link};

// ============================================================================
// Register table
// ============================================================================

/// Access permission of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(&self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// How a register's 4-byte wire value maps to a typed value.
#[derive(Debug, Clone, Copy)]
pub enum ValueCodec {
    /// Plain unsigned integer.
    UInt,
    /// 0 or 1.
    Bool,
    /// Signed fixed-point in milli-units, exposed as a float.
    Milli,
    /// Closed name <-> raw mapping.
    Enum(&'static [(&'static str, u32)]),
}

/// One register descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Reg {
    pub name: &'static str,
    pub address: u8,
    pub access: Access,
    pub codec: ValueCodec,
}

pub const MAIN_CONTROL_VALUES: &[(&str, u32)] = &[
    ("stop", 0),
    ("create", 1),
    ("activate", 2),
    ("create_and_activate", 3),
    ("clear_status", 4),
];

pub const MODE_SELECTION_VALUES: &[(&str, u32)] = &[
    ("power_bins", 1),
    ("envelope", 2),
    ("iq", 3),
    ("distance_peaks", 0x100),
];

pub const STREAMING_CONTROL_VALUES: &[(&str, u32)] = &[("disable", 0), ("uart", 1)];

pub const REPETITION_MODE_VALUES: &[(&str, u32)] = &[("host_driven", 1), ("streaming", 2)];

pub const SENSOR_POWER_MODE_VALUES: &[(&str, u32)] =
    &[("off", 0), ("sleep", 1), ("ready", 2), ("active", 3)];

/// The register table. Immutable, constructed once, looked up by name or
/// address.
const REGISTERS: &[Reg] = &[
    Reg {
        name: "mode_selection",
        address: REG_MODE_SELECTION,
        access: Access::ReadWrite,
        codec: ValueCodec::Enum(MODE_SELECTION_VALUES),
    },
    Reg {
        name: "main_control",
        address: REG_MAIN_CONTROL,
        access: Access::WriteOnly,
        codec: ValueCodec::Enum(MAIN_CONTROL_VALUES),
    },
    Reg {
        name: "streaming_control",
        address: REG_STREAMING_CONTROL,
        access: Access::ReadWrite,
        codec: ValueCodec::Enum(STREAMING_CONTROL_VALUES),
    },
    Reg {
        name: "status",
        address: REG_STATUS,
        access: Access::ReadOnly,
        codec: ValueCodec::UInt,
    },
    Reg {
        name: "uart_baudrate",
        address: REG_UART_BAUDRATE,
        access: Access::ReadWrite,
        codec: ValueCodec::UInt,
    },
    Reg {
        name: "sensor_power_mode",
        address: REG_SENSOR_POWER_MODE,
        access: Access::ReadWrite,
        codec: ValueCodec::Enum(SENSOR_POWER_MODE_VALUES),
    },
    Reg {
        name: "product_identification",
        address: REG_PRODUCT_IDENTIFICATION,
        access: Access::ReadOnly,
        codec: ValueCodec::UInt,
    },
    Reg {
        name: "product_version",
        address: REG_PRODUCT_VERSION,
        access: Access::ReadOnly,
        codec: ValueCodec::UInt,
    },
    Reg {
        name: "max_baudrate",
        address: REG_MAX_BAUDRATE,
        access: Access::ReadOnly,
        codec: ValueCodec::UInt,
    },
    Reg {
        name: "output_buffer_length",
        address: REG_OUTPUT_BUFFER_LENGTH,
        access: Access::ReadOnly,
        codec: ValueCodec::UInt,
    },
    Reg {
        name: "range_start",
        address: REG_RANGE_START,
        access: Access::ReadWrite,
        codec: ValueCodec::Milli,
    },
    Reg {
        name: "range_length",
        address: REG_RANGE_LENGTH,
        access: Access::ReadWrite,
        codec: ValueCodec::Milli,
    },
    Reg {
        name: "repetition_mode",
        address: REG_REPETITION_MODE,
        access: Access::ReadWrite,
        codec: ValueCodec::Enum(REPETITION_MODE_VALUES),
    },
    Reg {
        name: "update_rate",
        address: REG_UPDATE_RATE,
        access: Access::ReadWrite,
        codec: ValueCodec::Milli,
    },
    Reg {
        name: "gain",
        address: REG_GAIN,
        access: Access::ReadWrite,
        codec: ValueCodec::Milli,
    },
    Reg {
        name: "downsampling_factor",
        address: REG_DOWNSAMPLING_FACTOR,
        access: Access::ReadWrite,
        codec: ValueCodec::UInt,
    },
    Reg {
        name: "tx_disable",
        address: REG_TX_DISABLE,
        access: Access::ReadWrite,
        codec: ValueCodec::Bool,
    },
];

/// All known registers.
pub fn registers() -> &'static [Reg] {
    REGISTERS
}

pub fn find_by_name(name: &str) -> Result<&'static Reg> {
    REGISTERS
        .iter()
        .find(|r| r.name == name)
        .ok_or_else(|| Error::protocol(format!("unknown register: {name}")))
}

pub fn find_by_address(address: u8) -> Result<&'static Reg> {
    REGISTERS
        .iter()
        .find(|r| r.address == address)
        .ok_or_else(|| Error::protocol(format!("unknown register address: {address:#04X}")))
}

// ============================================================================
// Register values
// ============================================================================

/// A typed register value.
#[derive(Debug, Clone, PartialEq)]
pub enum RegValue {
    UInt(u32),
    Bool(bool),
    Milli(f64),
    Enum(&'static str),
}

/// Encode a typed value into the fixed 4-byte wire field.
pub fn encode_reg_val(reg: &Reg, value: &RegValue) -> Result<[u8; 4]> {
    let raw: u32 = match (&reg.codec, value) {
        (ValueCodec::UInt, RegValue::UInt(v)) => *v,
        (ValueCodec::Bool, RegValue::Bool(v)) => *v as u32,
        (ValueCodec::Milli, RegValue::Milli(v)) => {
            let milli = (v * 1000.0).round();
            if milli < i32::MIN as f64 || milli > i32::MAX as f64 {
                return Err(Error::protocol(format!(
                    "value {v} out of range for register {}",
                    reg.name
                )));
            }
            (milli as i32) as u32
        }
        (ValueCodec::Enum(map), RegValue::Enum(name)) => {
            map.iter()
                .find(|(n, _)| n == name)
                .ok_or_else(|| {
                    Error::protocol(format!("value {name:?} not valid for register {}", reg.name))
                })?
                .1
        }
        _ => {
            return Err(Error::protocol(format!(
                "value {value:?} does not match register {} codec",
                reg.name
            )));
        }
    };
    let mut field = [0u8; REG_VALUE_SIZE];
    LittleEndian::write_u32(&mut field, raw);
    Ok(field)
}

/// Decode a 4-byte wire field into a typed value.
pub fn decode_reg_val(reg: &Reg, field: [u8; 4]) -> Result<RegValue> {
    let raw = LittleEndian::read_u32(&field);
    match &reg.codec {
        ValueCodec::UInt => Ok(RegValue::UInt(raw)),
        ValueCodec::Bool => match raw {
            0 => Ok(RegValue::Bool(false)),
            1 => Ok(RegValue::Bool(true)),
            other => Err(Error::protocol(format!(
                "value {other} is not a boolean for register {}",
                reg.name
            ))),
        },
        ValueCodec::Milli => Ok(RegValue::Milli((raw as i32) as f64 / 1000.0)),
        ValueCodec::Enum(map) => map
            .iter()
            .find(|(_, v)| *v == raw)
            .map(|(n, _)| RegValue::Enum(n))
            .ok_or_else(|| {
                Error::protocol(format!(
                    "raw value {raw:#X} not in the map of register {}",
                    reg.name
                ))
            }),
    }
}

// ============================================================================
// Packets
// ============================================================================

/// One register-protocol packet (frame contents minus framing).
#[derive(Debug, Clone, PartialEq)]
pub enum RegPacket {
    ReadRequest { address: u8 },
    ReadResponse { address: u8, value: [u8; 4] },
    WriteRequest { address: u8, value: [u8; 4] },
    WriteResponse { address: u8, value: [u8; 4] },
    Stream(Vec<u8>),
}

pub fn encode_packet(packet: &RegPacket) -> Vec<u8> {
    match packet {
        RegPacket::ReadRequest { address } => vec![REG_READ_REQUEST, *address],
        RegPacket::ReadResponse { address, value } => {
            let mut out = vec![REG_READ_RESPONSE, *address];
            out.extend_from_slice(value);
            out
        }
        RegPacket::WriteRequest { address, value } => {
            let mut out = vec![REG_WRITE_REQUEST, *address];
            out.extend_from_slice(value);
            out
        }
        RegPacket::WriteResponse { address, value } => {
            let mut out = vec![REG_WRITE_RESPONSE, *address];
            out.extend_from_slice(value);
            out
        }
        RegPacket::Stream(payload) => {
            let mut out = vec![STREAM_PACKET];
            out.extend_from_slice(payload);
            out
        }
    }
}

pub fn parse_packet(packet: &[u8]) -> Result<RegPacket> {
    let (&ptype, rest) = packet
        .split_first()
        .ok_or_else(|| Error::parse("empty packet"))?;

    let reg_fields = |rest: &[u8]| -> Result<(u8, [u8; 4])> {
        if rest.len() != 1 + REG_VALUE_SIZE {
            return Err(Error::parse(format!(
                "register packet {ptype:#04X} has {} payload bytes, expected {}",
                rest.len(),
                1 + REG_VALUE_SIZE
            )));
        }
        let mut value = [0u8; 4];
        value.copy_from_slice(&rest[1..5]);
        Ok((rest[0], value))
    };

    match ptype {
        REG_READ_REQUEST => {
            if rest.len() != 1 {
                return Err(Error::parse("read request must carry exactly one address byte"));
            }
            Ok(RegPacket::ReadRequest { address: rest[0] })
        }
        REG_READ_RESPONSE => {
            let (address, value) = reg_fields(rest)?;
            Ok(RegPacket::ReadResponse { address, value })
        }
        REG_WRITE_REQUEST => {
            let (address, value) = reg_fields(rest)?;
            Ok(RegPacket::WriteRequest { address, value })
        }
        REG_WRITE_RESPONSE => {
            let (address, value) = reg_fields(rest)?;
            Ok(RegPacket::WriteResponse { address, value })
        }
        STREAM_PACKET => Ok(RegPacket::Stream(rest.to_vec())),
        other => Err(Error::parse(format!("unknown packet type: {other:#04X}"))),
    }
}

// ============================================================================
// Register operations
// ============================================================================

/// Read a register by name.
pub fn read_register(link: &mut dyn Link, name: &str) -> Result<RegValue> {
    let reg = find_by_name(name)?;
    if !reg.access.readable() {
        return Err(Error::protocol(format!("register {name} is not readable")));
    }
    let request = encode_frame(&encode_packet(&RegPacket::ReadRequest {
        address: reg.address,
    }))?;
    link.send(&request)?;

    match parse_packet(&read_frame(link)?)? {
        RegPacket::ReadResponse { address, value } if address == reg.address => {
            decode_reg_val(reg, value)
        }
        other => Err(Error::parse(format!(
            "expected read response for {name}, got {other:?}"
        ))),
    }
}

/// Write a register by name and wait for the device's acknowledgement.
pub fn write_register(link: &mut dyn Link, name: &str, value: &RegValue) -> Result<()> {
    let reg = find_by_name(name)?;
    if !reg.access.writable() {
        return Err(Error::protocol(format!("register {name} is not writable")));
    }
    let field = encode_reg_val(reg, value)?;
    let request = encode_frame(&encode_packet(&RegPacket::WriteRequest {
        address: reg.address,
        value: field,
    }))?;
    link.send(&request)?;

    match parse_packet(&read_frame(link)?)? {
        RegPacket::WriteResponse { address, .. } if address == reg.address => Ok(()),
        other => Err(Error::parse(format!(
            "expected write response for {name}, got {other:?}"
        ))),
    }
}

/// Read the next frame, expecting a stream packet, and return its payload.
pub fn recv_stream_payload(link: &mut dyn Link) -> Result<Vec<u8>> {
    match parse_packet(&read_frame(link)?)? {
        RegPacket::Stream(payload) => Ok(payload),
        other => Err(Error::parse(format!(
            "expected stream packet, got {other:?}"
        ))),
    }
}

// ============================================================================
// Handshake and baud negotiation
// ============================================================================

/// Perform the connect handshake.
///
/// A `main_control = stop` write is sent without expecting an immediate ack;
/// the device echoes the exact request frame once it is listening. After the
/// echo, the product identification register must report the expected value.
pub fn handshake(link: &mut dyn Link) -> Result<()> {
    let reg = find_by_name("main_control")?;
    let field = encode_reg_val(reg, &RegValue::Enum("stop"))?;
    let request = encode_frame(&encode_packet(&RegPacket::WriteRequest {
        address: reg.address,
        value: field,
    }))?;

    link.send(&request)?;
    link.recv_until(&request)?;
    debug!("Handshake echo received");

    match read_register(link, "product_identification")? {
        RegValue::UInt(id) if id == EXPECTED_PRODUCT_ID => {
            debug!(product_id = %format!("{id:#010X}"), "Handshake complete");
            Ok(())
        }
        RegValue::UInt(id) => Err(Error::client(format!(
            "unexpected product id: {id:#010X}, expected {EXPECTED_PRODUCT_ID:#010X}"
        ))),
        other => Err(Error::parse(format!(
            "product_identification decoded as {other:?}"
        ))),
    }
}

/// Connect a serial link at the highest supported rate.
///
/// Tries the maximum baud rate first. If that handshake fails at the link
/// level the device is assumed to be at its boot rate: fall back to the
/// default, handshake, command the rate switch through `uart_baudrate`, then
/// reconnect at the maximum and handshake again. A device resident at any
/// other rate is unsupported and surfaces as the fallback handshake error.
pub fn connect_and_negotiate<L: BaudLink>(link: &mut L) -> Result<()> {
    link.set_baudrate(MAX_BAUDRATE);
    link.connect()?;
    match handshake(link) {
        Ok(()) => {
            info!(baudrate = MAX_BAUDRATE, "Connected");
            return Ok(());
        }
        Err(Error::Link(e)) => {
            warn!(error = %e, "Handshake failed at max baudrate, falling back");
        }
        Err(e) => {
            link.disconnect()?;
            return Err(e);
        }
    }

    link.disconnect()?;
    link.set_baudrate(DEFAULT_BAUDRATE);
    link.connect()?;
    handshake(link)?;

    write_register(link, "uart_baudrate", &RegValue::UInt(MAX_BAUDRATE))?;
    info!(
        from = DEFAULT_BAUDRATE,
        to = MAX_BAUDRATE,
        "Commanded baudrate switch"
    );

    link.disconnect()?;
    link.set_baudrate(MAX_BAUDRATE);
    link.connect()?;
    handshake(link)?;
    info!(baudrate = MAX_BAUDRATE, "Connected after fallback");
    Ok(())
}

// ============================================================================
// Service-mode payload decoding
// ============================================================================

/// Stream payload interpretation, fixed per configured service mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    PowerBins,
    Envelope,
    Iq,
    DistancePeaks,
}

/// One detected peak from the distance-peaks service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistancePeak {
    pub distance_m: f32,
    pub amplitude: u16,
}

/// Decoded stream payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepData {
    PowerBins(Vec<f32>),
    Envelope(Vec<f32>),
    Iq(Vec<Complex<f32>>),
    DistancePeaks(Vec<DistancePeak>),
}

fn check_aligned(payload: &[u8], elem: usize, what: &str) -> Result<()> {
    if payload.len() % elem != 0 {
        return Err(Error::parse(format!(
            "{what} payload of {} bytes is not a multiple of {elem}",
            payload.len()
        )));
    }
    Ok(())
}

/// Little-endian float32 array.
pub fn decode_power_bins(payload: &[u8]) -> Result<Vec<f32>> {
    check_aligned(payload, 4, "power bins")?;
    Ok(payload
        .chunks_exact(4)
        .map(LittleEndian::read_f32)
        .collect())
}

/// Little-endian uint16 array, widened to float.
pub fn decode_envelope(payload: &[u8]) -> Result<Vec<f32>> {
    check_aligned(payload, 2, "envelope")?;
    Ok(payload
        .chunks_exact(2)
        .map(|c| LittleEndian::read_u16(c) as f32)
        .collect())
}

/// Interleaved little-endian int16 pairs (real, imaginary), scaled by the
/// sensor's 2^-12 fixed-point factor.
pub fn decode_iq(payload: &[u8]) -> Result<Vec<Complex<f32>>> {
    check_aligned(payload, COMPLEX_SAMPLE_SIZE, "iq")?;
    Ok(payload
        .chunks_exact(COMPLEX_SAMPLE_SIZE)
        .map(|c| {
            let re = LittleEndian::read_i16(&c[0..2]) as f32;
            let im = LittleEndian::read_i16(&c[2..4]) as f32;
            Complex::new(re * IQ_SCALE, im * IQ_SCALE)
        })
        .collect())
}

/// Packed (float32 distance, uint16 amplitude) pairs.
pub fn decode_distance_peaks(payload: &[u8]) -> Result<Vec<DistancePeak>> {
    check_aligned(payload, 6, "distance peaks")?;
    Ok(payload
        .chunks_exact(6)
        .map(|c| DistancePeak {
            distance_m: LittleEndian::read_f32(&c[0..4]),
            amplitude: LittleEndian::read_u16(&c[4..6]),
        })
        .collect())
}

/// Decode a stream payload according to the configured service mode.
pub fn decode_stream_payload(mode: ServiceMode, payload: &[u8]) -> Result<SweepData> {
    match mode {
        ServiceMode::PowerBins => decode_power_bins(payload).map(SweepData::PowerBins),
        ServiceMode::Envelope => decode_envelope(payload).map(SweepData::Envelope),
        ServiceMode::Iq => decode_iq(payload).map(SweepData::Iq),
        ServiceMode::DistancePeaks => decode_distance_peaks(payload).map(SweepData::DistancePeaks),
    }
}
