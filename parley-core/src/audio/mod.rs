//! Audio graph, analysers and platform hosts.
//!
//! Everything above [`host`] is device-agnostic and runs against any
//! [`AudioHost`]. The cpal backend lives in `cpal_host` behind the
//! `audio-cpal` feature.

pub mod analyser;
#[cfg(feature = "audio-cpal")]
pub mod cpal_host;
pub mod device;
pub mod graph;
pub mod host;
pub mod mixer;
pub mod resample;

pub use analyser::{Analyser, AnalyserTap, WaveformMeter, WAVEFORM_BANDS};
#[cfg(feature = "audio-cpal")]
pub use cpal_host::CpalHost;
pub use graph::{AudioGraph, CaptureSink, Direction, FrameDelivery, RenderSource};
pub use host::{AudioHost, ManualHost, StreamGuard};
pub use mixer::{RenderHandle, SegmentId};
