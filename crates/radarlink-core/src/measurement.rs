//! Measurement results.

use num_complex::Complex;

use crate::error::{Error, Result};
use crate::metadata::Metadata;

/// Complex-valued samples of one frame, shaped sweeps x points.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    sweeps: usize,
    points: usize,
    data: Vec<Complex<f32>>,
}

impl SampleFrame {
    pub fn new(sweeps: usize, points: usize, data: Vec<Complex<f32>>) -> Result<Self> {
        if sweeps * points != data.len() {
            return Err(Error::client(format!(
                "frame shape {sweeps}x{points} does not match {} samples",
                data.len()
            )));
        }
        Ok(Self {
            sweeps,
            points,
            data,
        })
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All samples, sweep-major.
    pub fn data(&self) -> &[Complex<f32>] {
        &self.data
    }

    /// One sweep's samples.
    pub fn sweep(&self, index: usize) -> &[Complex<f32>] {
        &self.data[index * self.points..(index + 1) * self.points]
    }

    pub fn get(&self, sweep: usize, point: usize) -> Complex<f32> {
        self.data[sweep * self.points + point]
    }
}

/// Snapshot a measurement carries so it stays interpretable after the client
/// has been re-set-up with a different configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultContext {
    pub metadata: Metadata,
    pub ticks_per_second: u64,
}

/// One measurement frame for one sensor. Ownership transfers to the caller
/// (or an attached recorder); the client holds nothing after dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub frame: SampleFrame,
    /// Firmware-side monotonic counter at capture time.
    pub tick: u64,
    pub data_saturated: bool,
    pub frame_delayed: bool,
    pub calibration_needed: bool,
    pub temperature: i16,
    pub context: ResultContext,
}

impl Measurement {
    /// Capture time in seconds, derived from the tick counter.
    pub fn tick_time(&self) -> f64 {
        self.tick as f64 / self.context.ticks_per_second as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_mismatch_rejected() {
        let data = vec![Complex::new(0.0, 0.0); 6];
        assert!(SampleFrame::new(2, 3, data.clone()).is_ok());
        assert!(matches!(
            SampleFrame::new(2, 4, data),
            Err(Error::Client(_))
        ));
    }

    #[test]
    fn sweep_indexing() {
        let data: Vec<_> = (0..6).map(|i| Complex::new(i as f32, 0.0)).collect();
        let frame = SampleFrame::new(2, 3, data).unwrap();
        assert_eq!(frame.sweep(1)[0], Complex::new(3.0, 0.0));
        assert_eq!(frame.get(1, 2), Complex::new(5.0, 0.0));
    }
}
