//! Protocol module - wire vocabulary for both protocol families.

pub mod constants;
pub mod explore;
pub mod frame;
pub mod reg;

pub use constants::*;
pub use explore::{CalibrationEntry, Command, ResultInfo, StreamHeader};
pub use frame::{encode_frame, read_frame, read_json_line, write_json_line};
pub use reg::{Access, Reg, RegPacket, RegValue, ServiceMode, SweepData, ValueCodec};
