//! # parley-core
//!
//! Duplex voice session engine: stream the microphone to a remote dialog
//! service and play its synthesized speech back without gaps.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → device callback → SPSC ring → capture pump → CaptureSink
//!                                                              │ AudioFrame
//!                                                              ▼
//!                                 DuplexSession (single loop) ─► codec::encode ─► DialogConnection
//!                                  │        ▲
//!                     SilenceMonitor        └── ServiceEventSink ◄── DialogService callbacks
//!                                  │
//!                    codec::decode ─► PlaybackScheduler ─► Mixer (render clock)
//!                                                              │
//!                            render pump → SPSC ring → device callback → Speaker
//! ```
//!
//! Device callbacks are allocation-free. All orchestration happens on the
//! session loop; see [`session`] for the state machine.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod config;
pub mod error;
pub mod ipc;
pub mod monitor;
pub mod recovery;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod voices;

// Convenience re-exports for downstream crates
pub use audio::{AudioHost, ManualHost};
#[cfg(feature = "audio-cpal")]
pub use audio::CpalHost;
pub use config::{
    ConnectConfig, EndSensitivity, ResponseModality, SessionConfig, StartRequest, StartSensitivity,
};
pub use error::{ParleyError, Result};
pub use ipc::events::{SessionSignal, SessionState, SessionStatus};
pub use recovery::{NoAudioRecovery, RecoveryAction};
pub use service::{DialogConnection, DialogService, EchoService};
pub use session::{spawn, DuplexSession, SessionHandle};
