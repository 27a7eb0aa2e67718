//! Amplitude analysers for the capture and render graphs.
//!
//! ## Algorithm
//!
//! Mirrors the behaviour of a browser `AnalyserNode` so thresholds tuned
//! against one carry over to the other:
//!
//! 1. Take the most recent `fft_size` samples from the tap.
//! 2. Apply a Blackman window and run a forward FFT.
//! 3. Magnitude per bin = `|X[k]| / fft_size`, for `k < fft_size / 2`.
//! 4. Smooth over time: `m = τ·m_prev + (1 − τ)·|X[k]|`.
//! 5. Convert to dB and map `[-100 dB, -30 dB]` linearly onto `0..=255`.
//!
//! The amplitude scalar is the mean byte value divided by 255.
//!
//! Producers (pump threads) only copy samples into an [`AnalyserTap`]; all
//! FFT work happens on the session loop when it asks for a reading.

use std::f32::consts::PI;
use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Lower edge of the byte mapping.
const MIN_DECIBELS: f32 = -100.0;
/// Upper edge of the byte mapping.
const MAX_DECIBELS: f32 = -30.0;

/// Waveform bars shown per direction.
pub const WAVEFORM_BANDS: usize = 8;
/// A band below this level displays as empty.
const WAVEFORM_THRESHOLD: f32 = 0.6;
/// Per-update decay applied to a bar that is not refreshed.
const WAVEFORM_DECAY: f32 = 0.8;

struct TapRing {
    buf: Vec<f32>,
    pos: usize,
}

/// Write side of an analyser: a fixed-size ring holding the latest samples.
///
/// Cloning shares the same ring.
#[derive(Clone)]
pub struct AnalyserTap {
    ring: Arc<Mutex<TapRing>>,
}

impl AnalyserTap {
    fn new(size: usize) -> Self {
        Self {
            ring: Arc::new(Mutex::new(TapRing {
                buf: vec![0.0; size],
                pos: 0,
            })),
        }
    }

    /// Append samples, overwriting the oldest. Never allocates.
    pub fn write(&self, samples: &[f32]) {
        let mut ring = self.ring.lock();
        let len = ring.buf.len();
        if len == 0 {
            return;
        }
        // Only the tail can survive a long write.
        let tail = &samples[samples.len().saturating_sub(len)..];
        for &s in tail {
            let pos = ring.pos;
            ring.buf[pos] = s;
            ring.pos = (pos + 1) % len;
        }
    }

    /// Zero the ring (e.g. after playback is flushed).
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        ring.buf.fill(0.0);
        ring.pos = 0;
    }

    /// Copy the ring into `out`, oldest sample first.
    fn snapshot(&self, out: &mut [f32]) {
        let ring = self.ring.lock();
        let len = ring.buf.len().min(out.len());
        for (i, slot) in out.iter_mut().take(len).enumerate() {
            *slot = ring.buf[(ring.pos + i) % ring.buf.len()];
        }
    }
}

impl std::fmt::Debug for AnalyserTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyserTap").finish_non_exhaustive()
    }
}

/// Frequency-domain meter over an [`AnalyserTap`].
pub struct Analyser {
    tap: AnalyserTap,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothing: f32,
    time: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bins: Vec<u8>,
}

impl Analyser {
    /// # Parameters
    /// - `fft_size`: transform length; must be a power of two ≥ 2.
    /// - `smoothing`: time constant in [0, 1).
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(2).next_power_of_two();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        Self {
            tap: AnalyserTap::new(fft_size),
            fft,
            window: build_blackman_window(fft_size),
            smoothing: smoothing.clamp(0.0, 0.99),
            time: vec![0.0; fft_size],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
            bins: vec![0; fft_size / 2],
        }
    }

    /// Handle for producers to feed samples in.
    pub fn tap(&self) -> AnalyserTap {
        self.tap.clone()
    }

    /// Number of frequency bins (`fft_size / 2`).
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Recompute byte-scaled frequency bins from the current tap contents.
    pub fn update(&mut self) -> &[u8] {
        let n = self.time.len();
        self.tap.snapshot(&mut self.time);

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            *slot = Complex::new(self.time[i] * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let range = MAX_DECIBELS - MIN_DECIBELS;
        for k in 0..self.bins.len() {
            let magnitude = self.scratch[k].norm() / n as f32;
            let m = self.smoothing * self.smoothed[k] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[k] = if m.is_finite() { m } else { 0.0 };

            self.bins[k] = if self.smoothed[k] <= 0.0 {
                0
            } else {
                let db = 20.0 * self.smoothed[k].log10();
                ((255.0 / range) * (db - MIN_DECIBELS)).clamp(0.0, 255.0) as u8
            };
        }
        &self.bins
    }

    /// Bins from the last [`update`](Self::update).
    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    /// Mean bin level normalized to [0, 1], from the last update.
    pub fn amplitude(&self) -> f32 {
        if self.bins.is_empty() {
            return 0.0;
        }
        let sum: u32 = self.bins.iter().map(|&b| b as u32).sum();
        sum as f32 / self.bins.len() as f32 / 255.0
    }

    /// Drop smoothing history and tap contents.
    pub fn reset(&mut self) {
        self.tap.clear();
        self.smoothed.fill(0.0);
        self.bins.fill(0);
    }
}

fn build_blackman_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Decaying bar levels for a waveform display.
#[derive(Debug, Clone, Default)]
pub struct WaveformMeter {
    bands: [f32; WAVEFORM_BANDS],
}

impl WaveformMeter {
    /// Fold a fresh set of analyser bins into the bars.
    pub fn update(&mut self, bins: &[u8]) -> [f32; WAVEFORM_BANDS] {
        let width = bins.len() / WAVEFORM_BANDS;
        if width == 0 {
            return self.bands;
        }
        for (i, band) in self.bands.iter_mut().enumerate() {
            let slice = &bins[i * width..(i + 1) * width];
            let avg = slice.iter().map(|&b| b as f32).sum::<f32>() / width as f32 / 255.0;
            let fresh = if avg > WAVEFORM_THRESHOLD { avg } else { 0.0 };
            *band = fresh.max(*band * WAVEFORM_DECAY);
        }
        self.bands
    }

    pub fn bands(&self) -> [f32; WAVEFORM_BANDS] {
        self.bands
    }

    pub fn reset(&mut self) {
        self.bands = [0.0; WAVEFORM_BANDS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: f32, amp: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn silence_reads_zero() {
        let mut a = Analyser::new(32, 0.8);
        a.tap().write(&[0.0; 64]);
        a.update();
        assert_eq!(a.amplitude(), 0.0);
        assert_eq!(a.bin_count(), 16);
    }

    #[test]
    fn sustained_tone_reads_above_quiet_threshold() {
        let mut a = Analyser::new(32, 0.8);
        a.tap().write(&tone(1_000.0, 24_000.0, 0.5, 256));
        for _ in 0..30 {
            a.update();
        }
        assert!(a.amplitude() > 0.2, "amplitude={}", a.amplitude());
    }

    #[test]
    fn smoothing_delays_the_rise() {
        let mut a = Analyser::new(32, 0.8);
        a.tap().write(&tone(1_000.0, 24_000.0, 0.5, 64));
        a.update();
        let first = a.amplitude();
        for _ in 0..30 {
            a.update();
        }
        assert!(a.amplitude() >= first);
    }

    #[test]
    fn reset_clears_history() {
        let mut a = Analyser::new(32, 0.8);
        a.tap().write(&tone(1_000.0, 24_000.0, 0.5, 64));
        a.update();
        a.reset();
        a.update();
        assert_eq!(a.amplitude(), 0.0);
    }

    #[test]
    fn tap_keeps_latest_samples_in_order() {
        let a = Analyser::new(4, 0.0);
        let tap = a.tap();
        tap.write(&[1.0, 2.0, 3.0]);
        tap.write(&[4.0, 5.0]);
        let mut out = [0.0; 4];
        tap.snapshot(&mut out);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn waveform_bars_gate_and_decay() {
        let mut meter = WaveformMeter::default();
        let loud = [255u8; 16];
        let bars = meter.update(&loud);
        assert!(bars.iter().all(|&b| (b - 1.0).abs() < 1e-6));

        let quiet = [100u8; 16];
        let bars = meter.update(&quiet);
        assert!(bars.iter().all(|&b| (b - 0.8).abs() < 1e-6));
    }
}
