//! Capture and render audio graphs.
//!
//! ```text
//! capture:  host ─► CaptureSink ─ gain ─► analyser tap
//!                                   └──► 4096-sample AudioFrame ─► deliver
//!
//! render:   RenderHandle (mixer) ─ gain ─► RenderSource ─► analyser tap ─► host
//! ```
//!
//! Both graphs run at fixed context rates (16 kHz capture, 24 kHz render).
//! The host converts to and from whatever the devices actually run at.

use tracing::{debug, info, warn};

use super::analyser::{Analyser, AnalyserTap, WaveformMeter, WAVEFORM_BANDS};
use super::host::{AudioHost, StreamGuard};
use super::mixer::RenderHandle;
use crate::buffering::AudioFrame;
use crate::config::SessionConfig;
use crate::error::{ParleyError, Result};

/// Which side of the duplex graph to meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Callback receiving each completed capture frame.
pub type FrameDelivery = Box<dyn FnMut(AudioFrame) + Send>;

/// Capture-side endpoint: the host pushes context-rate samples in.
pub struct CaptureSink {
    sample_rate: u32,
    block_size: usize,
    gain: f32,
    tap: AnalyserTap,
    pending: Vec<f32>,
    deliver: FrameDelivery,
}

impl CaptureSink {
    /// Context rate the host must convert to.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Accept samples, emitting one frame per completed block.
    pub fn push(&mut self, samples: &[f32]) {
        let start = self.pending.len();
        self.pending.extend_from_slice(samples);
        if self.gain != 1.0 {
            for s in &mut self.pending[start..] {
                *s *= self.gain;
            }
        }
        self.tap.write(&self.pending[start..]);

        while self.pending.len() >= self.block_size {
            let rest = self.pending.split_off(self.block_size);
            let block = std::mem::replace(&mut self.pending, rest);
            (self.deliver)(AudioFrame::new(block, self.sample_rate));
        }
    }
}

/// Render-side endpoint: the host pulls context-rate blocks out.
pub struct RenderSource {
    handle: RenderHandle,
    tap: AnalyserTap,
}

impl RenderSource {
    pub fn sample_rate(&self) -> u32 {
        self.handle.sample_rate()
    }

    /// Render the next block into `out`, advancing the render clock.
    pub fn fill(&mut self, out: &mut [f32]) {
        self.handle.render(out);
        self.tap.write(out);
    }
}

struct Meter {
    analyser: Analyser,
    waveform: WaveformMeter,
}

impl Meter {
    fn new(config: &SessionConfig) -> Self {
        Self {
            analyser: Analyser::new(config.fft_size, config.smoothing),
            waveform: WaveformMeter::default(),
        }
    }

    fn sample(&mut self) -> f32 {
        let bins = self.analyser.update();
        self.waveform.update(bins);
        self.analyser.amplitude()
    }

    fn reset(&mut self) {
        self.analyser.reset();
        self.waveform.reset();
    }
}

/// Owns the device streams, the render mixer and both analysers.
pub struct AudioGraph {
    host: Box<dyn AudioHost>,
    config: SessionConfig,
    render: Option<RenderHandle>,
    output: Option<Box<dyn StreamGuard>>,
    input: Option<Box<dyn StreamGuard>>,
    input_meter: Meter,
    output_meter: Meter,
}

impl AudioGraph {
    pub fn new(host: Box<dyn AudioHost>, config: SessionConfig) -> Self {
        let input_meter = Meter::new(&config);
        let output_meter = Meter::new(&config);
        Self {
            host,
            config,
            render: None,
            output: None,
            input: None,
            input_meter,
            output_meter,
        }
    }

    /// Create the render graph and start the output device.
    ///
    /// A second call while already open does nothing.
    pub fn open(&mut self) -> Result<()> {
        if self.render.is_some() {
            return Ok(());
        }
        let handle = RenderHandle::new(self.config.render_sample_rate, self.config.output_gain);
        let source = RenderSource {
            handle: handle.clone(),
            tap: self.output_meter.analyser.tap(),
        };
        let guard = self
            .host
            .open_output(source, self.config.output_device.as_deref())?;
        self.output = Some(guard);
        self.render = Some(handle);
        info!(
            render_rate = self.config.render_sample_rate,
            capture_rate = self.config.capture_sample_rate,
            "audio graph opened"
        );
        Ok(())
    }

    /// Start the microphone and route completed frames to `deliver`.
    ///
    /// # Errors
    /// `GraphClosed` before [`open`](Self::open); the host's error (usually
    /// `PermissionDenied`) if the microphone is refused.
    pub fn attach_capture(&mut self, deliver: FrameDelivery) -> Result<()> {
        if self.render.is_none() {
            return Err(ParleyError::GraphClosed);
        }
        self.detach_capture();
        let sink = CaptureSink {
            sample_rate: self.config.capture_sample_rate,
            block_size: self.config.capture_block_size.max(1),
            gain: self.config.input_gain,
            tap: self.input_meter.analyser.tap(),
            pending: Vec::with_capacity(self.config.capture_block_size),
            deliver,
        };
        let guard = self
            .host
            .open_input(sink, self.config.input_device.as_deref())?;
        self.input = Some(guard);
        info!("capture attached");
        Ok(())
    }

    /// Stop the microphone. No-op if capture is not attached.
    pub fn detach_capture(&mut self) {
        if let Some(mut guard) = self.input.take() {
            guard.stop();
            debug!("capture detached");
        }
    }

    /// Render graph handle while open.
    pub fn render(&self) -> Option<&RenderHandle> {
        self.render.as_ref()
    }

    /// Current amplitude in [0, 1] for one direction.
    ///
    /// Also refreshes that direction's waveform bands.
    pub fn sample_amplitude(&mut self, direction: Direction) -> f32 {
        match direction {
            Direction::Input => self.input_meter.sample(),
            Direction::Output => self.output_meter.sample(),
        }
    }

    /// Drop one direction's analyser history and tapped samples.
    ///
    /// Called after a playback flush so the output meter does not keep
    /// reporting audio that will never be heard.
    pub fn reset_meter(&mut self, direction: Direction) {
        match direction {
            Direction::Input => self.input_meter.reset(),
            Direction::Output => self.output_meter.reset(),
        }
    }

    /// Waveform bars from the last amplitude sample.
    pub fn band_levels(&self, direction: Direction) -> [f32; WAVEFORM_BANDS] {
        match direction {
            Direction::Input => self.input_meter.waveform.bands(),
            Direction::Output => self.output_meter.waveform.bands(),
        }
    }

    /// Release capture, playback sources and both device streams.
    ///
    /// Safe to call any number of times.
    pub fn close(&mut self) {
        let was_open = self.render.is_some() || self.input.is_some();
        self.detach_capture();
        if let Some(render) = self.render.take() {
            render.clear();
        }
        if let Some(mut guard) = self.output.take() {
            guard.stop();
        }
        self.input_meter.reset();
        self.output_meter.reset();
        if was_open {
            info!("audio graph closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.render.is_some()
    }

    pub fn is_capturing(&self) -> bool {
        self.input.is_some()
    }
}

impl Drop for AudioGraph {
    fn drop(&mut self) {
        if self.is_open() || self.is_capturing() {
            warn!("audio graph dropped while open; closing");
        }
        self.close();
    }
}
