//! Per-sensor session metadata.

use serde::{Deserialize, Serialize};

/// Potentially multi-sensor, potentially multi-group data: an ordered
/// sequence of groups, each an ordered sequence of (sensor id, value) pairs.
///
/// Order is load-bearing. Stream payloads carry no per-sensor length tags,
/// so slicing depends on walking this structure in exactly the order the
/// metadata was produced in.
pub type Extended<T> = Vec<Vec<(u32, T)>>;

/// Firmware-reported facts about one sensor's session, fixed for the life of
/// a setup. Replaced wholesale on re-setup, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Samples per frame.
    pub frame_data_length: u32,
    /// Samples per sweep.
    pub sweep_data_length: u32,
    /// Start offset of each subsweep within a sweep, in samples.
    pub subsweep_data_offset: Vec<u32>,
    /// Length of each subsweep, in samples.
    pub subsweep_data_length: Vec<u32>,
    pub calibration_temperature: i16,
    /// Duration of one tick; top-level in the setup response, copied into
    /// each per-sensor metadata during parsing.
    #[serde(default)]
    pub tick_period: u64,
    /// Distance resolution in meters.
    pub base_step_length_m: f64,
    pub max_sweep_rate: f64,
}

impl Metadata {
    /// Sweeps per frame implied by the frame and sweep lengths.
    pub fn sweeps_per_frame(&self) -> u32 {
        if self.sweep_data_length == 0 {
            0
        } else {
            self.frame_data_length / self.sweep_data_length
        }
    }

    /// Byte span of one frame in a stream payload.
    pub fn frame_byte_size(&self) -> usize {
        self.frame_data_length as usize * crate::protocol::constants::COMPLEX_SAMPLE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_shape() {
        let meta = Metadata {
            frame_data_length: 320,
            sweep_data_length: 160,
            subsweep_data_offset: vec![0],
            subsweep_data_length: vec![160],
            calibration_temperature: 25,
            tick_period: 50,
            base_step_length_m: 0.0025,
            max_sweep_rate: 1000.0,
        };
        assert_eq!(meta.sweeps_per_frame(), 2);
        assert_eq!(meta.frame_byte_size(), 1280);
    }
}
