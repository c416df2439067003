//! Wire protocol constants.

// ============================================================================
// Binary framing (register protocol)
// ============================================================================

/// First byte of every binary frame.
pub const START_MARKER: u8 = 0xCC;

/// Last byte of every binary frame.
pub const END_MARKER: u8 = 0xCD;

/// Width of the little-endian length field.
pub const LEN_FIELD_SIZE: usize = 2;

/// Largest value the length field can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

// ============================================================================
// Packet types (first byte of a frame's packet)
// ============================================================================

pub const REG_READ_REQUEST: u8 = 0xF8;
pub const REG_READ_RESPONSE: u8 = 0xF6;
pub const REG_WRITE_REQUEST: u8 = 0xF9;
pub const REG_WRITE_RESPONSE: u8 = 0xF5;
pub const STREAM_PACKET: u8 = 0xFE;

/// Register value fields are always this wide.
pub const REG_VALUE_SIZE: usize = 4;

// ============================================================================
// Register addresses
// ============================================================================

pub const REG_MODE_SELECTION: u8 = 0x02;
pub const REG_MAIN_CONTROL: u8 = 0x03;
pub const REG_STREAMING_CONTROL: u8 = 0x05;
pub const REG_STATUS: u8 = 0x06;
pub const REG_UART_BAUDRATE: u8 = 0x07;
pub const REG_SENSOR_POWER_MODE: u8 = 0x0A;
pub const REG_PRODUCT_IDENTIFICATION: u8 = 0x10;
pub const REG_PRODUCT_VERSION: u8 = 0x11;
pub const REG_MAX_BAUDRATE: u8 = 0x12;
pub const REG_OUTPUT_BUFFER_LENGTH: u8 = 0x13;
pub const REG_RANGE_START: u8 = 0x20;
pub const REG_RANGE_LENGTH: u8 = 0x21;
pub const REG_REPETITION_MODE: u8 = 0x22;
pub const REG_UPDATE_RATE: u8 = 0x23;
pub const REG_GAIN: u8 = 0x24;
pub const REG_DOWNSAMPLING_FACTOR: u8 = 0x25;
pub const REG_TX_DISABLE: u8 = 0x26;

// ============================================================================
// Handshake
// ============================================================================

/// Value the product identification register must report.
pub const EXPECTED_PRODUCT_ID: u32 = 0x52414431; // 'RAD1'

// ============================================================================
// Serial line rates
// ============================================================================

/// Rate the device boots at.
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// Highest rate the UART supports; negotiated after a default-rate handshake.
pub const MAX_BAUDRATE: u32 = 3_000_000;

// ============================================================================
// Streaming server
// ============================================================================

/// TCP port the streaming server listens on.
pub const DEFAULT_TCP_PORT: u16 = 6110;

/// Size in bytes of one complex sample on the wire: two little-endian i16,
/// real then imaginary.
pub const COMPLEX_SAMPLE_SIZE: usize = 4;

/// Fixed-point scale applied to IQ service data.
pub const IQ_SCALE: f32 = 1.0 / 4096.0; // 2^-12
