//! Sample-rate conversion between device rates and the fixed context rates.
//!
//! Devices rarely run at 16 kHz or 24 kHz natively (48 kHz is typical), so
//! the host pumps convert in both directions:
//!
//! - capture: device rate → 16 kHz before frames reach the codec
//! - render: 24 kHz mixer output → device rate before the output ring
//!
//! Conversion runs on the pump threads, never inside a device callback.
//! When both rates match, [`RateConverter`] is a passthrough and no rubato
//! state is allocated.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{ParleyError, Result};

/// Converts mono f32 audio between two fixed rates.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Input carried over until a full chunk is available.
    pending: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Parameters
    /// - `from_rate`: rate of the incoming samples (Hz).
    /// - `to_rate`: rate to produce (Hz).
    /// - `chunk_size`: input frames consumed per rubato call.
    ///
    /// # Errors
    /// `ParleyError::AudioStream` if rubato rejects the ratio or chunk size.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        let chunk_size = chunk_size.max(1);
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )
        .map_err(|e| ParleyError::AudioStream(format!("resampler init: {e}")))?;

        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];
        debug!(from_rate, to_rate, chunk_size, "rate conversion enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
        })
    }

    /// Convert `samples`, returning whatever full chunks produced (may be empty).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        let mut consumed = 0;

        while self.pending.len() - consumed >= self.chunk_size {
            let chunk = &self.pending[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[chunk], &mut self.output_buf, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.output_buf[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            consumed += self.chunk_size;
        }
        self.pending.drain(..consumed);
        out
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_pass_through() {
        let mut rc = RateConverter::new(24_000, 24_000, 240).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..100).map(|i| i as f32 * 0.01).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn capture_direction_downsamples() {
        let mut rc = RateConverter::new(48_000, 16_000, 480).unwrap();
        let out = rc.process(&vec![0.0f32; 4_800]);
        // 100 ms at 16 kHz ≈ 1600 samples.
        assert!((out.len() as isize - 1_600).unsigned_abs() <= 20, "len={}", out.len());
    }

    #[test]
    fn render_direction_upsamples() {
        let mut rc = RateConverter::new(24_000, 48_000, 240).unwrap();
        let out = rc.process(&vec![0.0f32; 240]);
        assert!((out.len() as isize - 480).unsigned_abs() <= 10, "len={}", out.len());
    }

    #[test]
    fn partial_chunks_are_carried_over() {
        let mut rc = RateConverter::new(48_000, 16_000, 480).unwrap();
        assert!(rc.process(&vec![0.0f32; 300]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 300]).is_empty());
    }
}
