//! Platform audio boundary.
//!
//! An [`AudioHost`] turns the graph's context-rate endpoints into running
//! device streams:
//!
//! - output: the host pulls 24 kHz blocks from a [`RenderSource`]
//! - input: the host pushes 16 kHz samples into a [`CaptureSink`]
//!
//! Rate conversion, device selection and threading are the host's business.
//! [`ManualHost`] is a host without devices: the owner pulls rendered audio
//! and pushes capture samples by hand (offline rendering, tests).

use std::sync::Arc;

use parking_lot::Mutex;

use super::graph::{CaptureSink, RenderSource};
use crate::error::{ParleyError, Result};

/// A running device stream. Dropping or stopping it releases the device.
pub trait StreamGuard: Send {
    /// Stop the stream and release the device. Calling it twice is a no-op.
    fn stop(&mut self);
}

/// Factory for device streams.
pub trait AudioHost: Send {
    /// Open the playback device and start pulling from `source`.
    fn open_output(
        &mut self,
        source: RenderSource,
        preferred_device: Option<&str>,
    ) -> Result<Box<dyn StreamGuard>>;

    /// Open the microphone and start pushing into `sink`.
    ///
    /// # Errors
    /// `ParleyError::PermissionDenied` or `ParleyError::NoInputDevice` when no
    /// microphone is granted.
    fn open_input(
        &mut self,
        sink: CaptureSink,
        preferred_device: Option<&str>,
    ) -> Result<Box<dyn StreamGuard>>;
}

#[derive(Default)]
struct ManualState {
    render: Option<RenderSource>,
    capture: Option<CaptureSink>,
    deny_input: Option<String>,
    deny_output: Option<String>,
    open_streams: usize,
}

/// Device-less host driven by its owner.
///
/// Clones share state, so keep one clone after handing the other to an
/// [`AudioGraph`](super::graph::AudioGraph).
#[derive(Clone, Default)]
pub struct ManualHost {
    state: Arc<Mutex<ManualState>>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future `open_input` calls fail as if the user refused access.
    pub fn deny_input(&self, reason: impl Into<String>) {
        self.state.lock().deny_input = Some(reason.into());
    }

    /// Make future `open_output` calls fail.
    pub fn deny_output(&self, reason: impl Into<String>) {
        self.state.lock().deny_output = Some(reason.into());
    }

    /// Pull `frames` rendered samples, advancing the render clock.
    /// Returns silence without advancing anything when no output is open.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        if let Some(source) = self.state.lock().render.as_mut() {
            source.fill(&mut out);
        }
        out
    }

    /// Push context-rate capture samples. Returns `false` if no input is open.
    pub fn capture(&self, samples: &[f32]) -> bool {
        match self.state.lock().capture.as_mut() {
            Some(sink) => {
                sink.push(samples);
                true
            }
            None => false,
        }
    }

    /// Streams opened and not yet stopped.
    pub fn open_streams(&self) -> usize {
        self.state.lock().open_streams
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().capture.is_some()
    }

    pub fn is_rendering(&self) -> bool {
        self.state.lock().render.is_some()
    }
}

impl AudioHost for ManualHost {
    fn open_output(
        &mut self,
        source: RenderSource,
        _preferred_device: Option<&str>,
    ) -> Result<Box<dyn StreamGuard>> {
        let mut state = self.state.lock();
        if let Some(reason) = state.deny_output.clone() {
            return Err(ParleyError::AudioDevice(reason));
        }
        state.render = Some(source);
        state.open_streams += 1;
        Ok(Box::new(ManualGuard {
            state: Arc::clone(&self.state),
            kind: StreamKind::Output,
            stopped: false,
        }))
    }

    fn open_input(
        &mut self,
        sink: CaptureSink,
        _preferred_device: Option<&str>,
    ) -> Result<Box<dyn StreamGuard>> {
        let mut state = self.state.lock();
        if let Some(reason) = state.deny_input.clone() {
            return Err(ParleyError::PermissionDenied(reason));
        }
        state.capture = Some(sink);
        state.open_streams += 1;
        Ok(Box::new(ManualGuard {
            state: Arc::clone(&self.state),
            kind: StreamKind::Input,
            stopped: false,
        }))
    }
}

#[derive(Clone, Copy)]
enum StreamKind {
    Input,
    Output,
}

struct ManualGuard {
    state: Arc<Mutex<ManualState>>,
    kind: StreamKind,
    stopped: bool,
}

impl StreamGuard for ManualGuard {
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let mut state = self.state.lock();
        match self.kind {
            StreamKind::Input => state.capture = None,
            StreamKind::Output => state.render = None,
        }
        state.open_streams = state.open_streams.saturating_sub(1);
    }
}

impl Drop for ManualGuard {
    fn drop(&mut self) {
        self.stop();
    }
}
