//! Result assembly: slicing a stream payload into per-sensor measurements.

use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::measurement::{Measurement, ResultContext, SampleFrame};
use crate::metadata::{Extended, Metadata};
use crate::protocol::constants::COMPLEX_SAMPLE_SIZE;
use crate::protocol::explore::ResultInfo;

/// Slice one frame's payload into per-sensor measurements.
///
/// The payload carries no per-sensor length tags: byte spans are implied
/// entirely by the metadata, walked in group/sensor order. `result_info` is
/// positional and must mirror the metadata nesting. A sensor slice that
/// would run past the end of the payload means the stream has desynced from
/// the metadata and is fatal; it is never silently truncated.
pub fn assemble_results(
    metadata: &Extended<Metadata>,
    result_info: &[Vec<ResultInfo>],
    ticks_per_second: u64,
    payload: &[u8],
) -> Result<Extended<Measurement>> {
    if result_info.len() != metadata.len()
        || result_info
            .iter()
            .zip(metadata)
            .any(|(infos, group)| infos.len() != group.len())
    {
        return Err(Error::client(
            "result info nesting does not match session metadata",
        ));
    }

    let mut results: Extended<Measurement> = Vec::with_capacity(metadata.len());
    let mut offset = 0usize;
    for (group, infos) in metadata.iter().zip(result_info) {
        let mut group_results = Vec::with_capacity(group.len());
        for ((sensor_id, meta), info) in group.iter().zip(infos) {
            let span = meta.frame_byte_size();
            let end = offset + span;
            if end > payload.len() {
                return Err(Error::client(format!(
                    "payload/metadata mismatch: sensor {sensor_id} needs bytes {offset}..{end}, \
                     payload has {}",
                    payload.len()
                )));
            }
            let frame = decode_frame_samples(&payload[offset..end], meta)?;
            offset = end;

            group_results.push((
                *sensor_id,
                Measurement {
                    frame,
                    tick: info.tick,
                    data_saturated: info.data_saturated,
                    frame_delayed: info.frame_delayed,
                    calibration_needed: info.calibration_needed,
                    temperature: info.temperature,
                    context: ResultContext {
                        metadata: meta.clone(),
                        ticks_per_second,
                    },
                },
            ));
        }
        results.push(group_results);
    }

    if offset != payload.len() {
        warn!(
            consumed = offset,
            payload = payload.len(),
            "Stream payload has trailing bytes"
        );
    }
    Ok(results)
}

/// Decode one sensor's byte slice into its declared frame shape. Samples are
/// pairs of little-endian i16, real then imaginary.
fn decode_frame_samples(bytes: &[u8], meta: &Metadata) -> Result<SampleFrame> {
    let data: Vec<Complex<f32>> = bytes
        .chunks_exact(COMPLEX_SAMPLE_SIZE)
        .map(|c| {
            Complex::new(
                LittleEndian::read_i16(&c[0..2]) as f32,
                LittleEndian::read_i16(&c[2..4]) as f32,
            )
        })
        .collect();
    SampleFrame::new(
        meta.sweeps_per_frame() as usize,
        meta.sweep_data_length as usize,
        data,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(frame_data_length: u32, sweep_data_length: u32) -> Metadata {
        Metadata {
            frame_data_length,
            sweep_data_length,
            subsweep_data_offset: vec![0],
            subsweep_data_length: vec![sweep_data_length],
            calibration_temperature: 25,
            tick_period: 50,
            base_step_length_m: 0.0025,
            max_sweep_rate: 1000.0,
        }
    }

    fn info(tick: u64) -> ResultInfo {
        ResultInfo {
            tick,
            data_saturated: false,
            frame_delayed: false,
            calibration_needed: false,
            temperature: 21,
        }
    }

    fn payload_of_pairs(pairs: impl IntoIterator<Item = (i16, i16)>) -> Vec<u8> {
        let mut payload = Vec::new();
        for (re, im) in pairs {
            payload.extend_from_slice(&re.to_le_bytes());
            payload.extend_from_slice(&im.to_le_bytes());
        }
        payload
    }

    #[test]
    fn single_sensor_counting_scenario() {
        // 100 samples with values (i, 0) must come back as [0+0j .. 99+0j].
        let metadata: Extended<Metadata> = vec![vec![(1, meta(100, 100))]];
        let payload = payload_of_pairs((0..100).map(|i| (i as i16, 0i16)));

        let results =
            assemble_results(&metadata, &[vec![info(7)]], 1_000_000, &payload).unwrap();

        let (sensor_id, measurement) = &results[0][0];
        assert_eq!(*sensor_id, 1);
        assert_eq!(measurement.tick, 7);
        assert_eq!(measurement.frame.len(), 100);
        for (i, sample) in measurement.frame.data().iter().enumerate() {
            assert_eq!(*sample, Complex::new(i as f32, 0.0));
        }
    }

    #[test]
    fn multi_sensor_slicing_invariant() {
        // Three sensors across two groups with distinct frame lengths; every
        // slice must land at the right offset and carry the right values.
        let metadata: Extended<Metadata> = vec![
            vec![(1, meta(4, 2)), (3, meta(6, 6))],
            vec![(2, meta(2, 2))],
        ];
        let total: usize = 4 + 6 + 2;
        let payload = payload_of_pairs((0..total).map(|i| (i as i16, -(i as i16))));

        let result_info = [vec![info(10), info(10)], vec![info(11)]];
        let results = assemble_results(&metadata, &result_info, 1_000, &payload).unwrap();

        assert_eq!(results.len(), 2);
        let (_, first) = &results[0][0];
        let (_, second) = &results[0][1];
        let (_, third) = &results[1][0];

        assert_eq!(first.frame.len(), 4);
        assert_eq!((first.frame.sweeps(), first.frame.points()), (2, 2));
        assert_eq!(second.frame.len(), 6);
        assert_eq!(third.frame.len(), 2);

        // Offsets advance in metadata order.
        assert_eq!(first.frame.data()[0], Complex::new(0.0, 0.0));
        assert_eq!(second.frame.data()[0], Complex::new(4.0, -4.0));
        assert_eq!(third.frame.data()[0], Complex::new(10.0, -10.0));
        assert_eq!(third.frame.data()[1], Complex::new(11.0, -11.0));
    }

    #[test]
    fn short_payload_is_fatal() {
        let metadata: Extended<Metadata> = vec![vec![(1, meta(100, 100))]];
        let payload = payload_of_pairs((0..99).map(|i| (i as i16, 0i16)));

        let err = assemble_results(&metadata, &[vec![info(0)]], 1_000, &payload);
        assert!(matches!(err, Err(Error::Client(_))));
    }

    #[test]
    fn result_info_nesting_mismatch_is_fatal() {
        let metadata: Extended<Metadata> = vec![vec![(1, meta(2, 2))]];
        let payload = payload_of_pairs([(0, 0), (1, 1)]);

        let err = assemble_results(
            &metadata,
            &[vec![info(0), info(0)]],
            1_000,
            &payload,
        );
        assert!(matches!(err, Err(Error::Client(_))));
    }

    #[test]
    fn context_snapshot_travels_with_the_measurement() {
        let metadata: Extended<Metadata> = vec![vec![(1, meta(2, 2))]];
        let payload = payload_of_pairs([(5, 6), (7, 8)]);

        let results =
            assemble_results(&metadata, &[vec![info(2_000_000)]], 1_000_000, &payload).unwrap();
        let (_, measurement) = &results[0][0];
        assert_eq!(measurement.context.metadata.frame_data_length, 2);
        assert_eq!(measurement.tick_time(), 2.0);
    }
}
