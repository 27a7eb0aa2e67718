//! Session and connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default dialog model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-native-audio-dialog";

/// Default prebuilt voice.
pub const DEFAULT_VOICE: &str = "Puck";

/// Configuration for a [`DuplexSession`](crate::session::DuplexSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capture context rate in Hz (what the codec sends).
    pub capture_sample_rate: u32,
    /// Render context rate in Hz (what the service returns).
    pub render_sample_rate: u32,
    /// Samples per outbound capture frame.
    pub capture_block_size: usize,
    /// Channel count of inbound audio payloads.
    pub render_channels: usize,
    /// Analyser transform length.
    pub fft_size: usize,
    /// Analyser smoothing time constant.
    pub smoothing: f32,
    /// Output amplitude below this is "quiet".
    pub silence_threshold: f32,
    /// Startup quiet timer before `NoAudio`.
    pub startup_quiet: Duration,
    /// Quiet stretch after speech before `ExtendedQuiet`.
    pub extended_quiet: Duration,
    /// Outbound frames are discarded for this long after entering `Recording`.
    pub send_quiet_window: Duration,
    /// Monitor tick cadence.
    pub monitor_interval: Duration,
    pub input_gain: f32,
    pub output_gain: f32,
    /// Preferred microphone name; falls back to the system default.
    pub input_device: Option<String>,
    /// Preferred speaker name; falls back to the system default.
    pub output_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            render_sample_rate: 24_000,
            capture_block_size: 4096,
            render_channels: 1,
            fft_size: 32,
            smoothing: 0.8,
            silence_threshold: 0.2,
            startup_quiet: Duration::from_secs(2),
            extended_quiet: Duration::from_secs(10),
            send_quiet_window: Duration::from_secs(2),
            monitor_interval: Duration::from_millis(16),
            input_gain: 1.0,
            output_gain: 1.0,
            input_device: None,
            output_device: None,
        }
    }
}

/// How eagerly the service detects the start of user speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartSensitivity {
    Low,
    #[default]
    High,
}

/// How eagerly the service detects the end of user speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndSensitivity {
    Low,
    #[default]
    High,
}

/// What the service should answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    #[default]
    Audio,
    Text,
}

/// Parameters handed to the dialog service on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectConfig {
    pub model: String,
    pub voice: String,
    pub start_sensitivity: StartSensitivity,
    pub end_sensitivity: EndSensitivity,
    pub response_modality: ResponseModality,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            start_sensitivity: StartSensitivity::default(),
            end_sensitivity: EndSensitivity::default(),
            response_modality: ResponseModality::default(),
        }
    }
}

/// Everything needed to start one session.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Greeting text sent once, right after the connection opens.
    pub greeting: String,
    pub connect: ConnectConfig,
}

impl StartRequest {
    pub fn new(greeting: impl Into<String>, connect: ConnectConfig) -> Self {
        Self {
            greeting: greeting.into(),
            connect,
        }
    }
}
