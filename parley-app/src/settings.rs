//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_core::config::{DEFAULT_MODEL, DEFAULT_VOICE};
use parley_core::voices::find_voice;
use parley_core::{
    ConnectConfig, EndSensitivity, ResponseModality, SessionConfig, StartSensitivity,
};
use serde::{Deserialize, Serialize};

const DEFAULT_PERSONA: &str = "a cheerful pirate who loves to talk about the sea";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub model: String,
    pub voice: String,
    pub start_sensitivity: String,
    pub end_sensitivity: String,
    /// Character description folded into the greeting.
    pub persona: String,
    pub input_gain: f32,
    pub output_gain: f32,
    pub silence_threshold: f32,
    pub extended_quiet_secs: u64,
    pub no_audio_retry_limit: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            preferred_output_device: None,
            model: DEFAULT_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            start_sensitivity: "high".into(),
            end_sensitivity: "high".into(),
            persona: DEFAULT_PERSONA.into(),
            input_gain: 1.0,
            output_gain: 1.0,
            silence_threshold: 0.2,
            extended_quiet_secs: 10,
            no_audio_retry_limit: parley_core::recovery::DEFAULT_NO_AUDIO_LIMIT,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.model = normalize_model(&self.model);
        self.voice = normalize_voice(&self.voice);
        self.start_sensitivity = normalize_sensitivity(&self.start_sensitivity);
        self.end_sensitivity = normalize_sensitivity(&self.end_sensitivity);
        self.persona = self.persona.trim().to_string();
        if self.persona.is_empty() {
            self.persona = DEFAULT_PERSONA.into();
        }
        self.input_gain = clamp_or(self.input_gain, 0.0, 4.0, 1.0);
        self.output_gain = clamp_or(self.output_gain, 0.0, 4.0, 1.0);
        self.silence_threshold = clamp_or(self.silence_threshold, 0.01, 0.9, 0.2);
        self.extended_quiet_secs = self.extended_quiet_secs.clamp(3, 600);
        self.no_audio_retry_limit = self.no_audio_retry_limit.clamp(1, 10);
        self.preferred_input_device = normalize_device(self.preferred_input_device.take());
        self.preferred_output_device = normalize_device(self.preferred_output_device.take());
    }

    /// Overlay `PARLEY_*` environment variables, then re-normalize.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PARLEY_MODEL") {
            self.model = v;
        }
        if let Some(v) = lookup("PARLEY_VOICE") {
            self.voice = v;
        }
        if let Some(v) = lookup("PARLEY_PERSONA") {
            self.persona = v;
        }
        if let Some(v) = lookup("PARLEY_INPUT_DEVICE") {
            self.preferred_input_device = Some(v);
        }
        if let Some(v) = lookup("PARLEY_OUTPUT_DEVICE") {
            self.preferred_output_device = Some(v);
        }
        if let Some(v) = lookup("PARLEY_START_SENSITIVITY") {
            self.start_sensitivity = v;
        }
        if let Some(v) = lookup("PARLEY_END_SENSITIVITY") {
            self.end_sensitivity = v;
        }
        if let Some(gain) = lookup("PARLEY_INPUT_GAIN").and_then(|v| v.trim().parse().ok()) {
            self.input_gain = gain;
        }
        if let Some(gain) = lookup("PARLEY_OUTPUT_GAIN").and_then(|v| v.trim().parse().ok()) {
            self.output_gain = gain;
        }
        self.normalize();
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            silence_threshold: self.silence_threshold,
            extended_quiet: Duration::from_secs(self.extended_quiet_secs),
            input_gain: self.input_gain,
            output_gain: self.output_gain,
            input_device: self.preferred_input_device.clone(),
            output_device: self.preferred_output_device.clone(),
            ..SessionConfig::default()
        }
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
            start_sensitivity: if self.start_sensitivity == "low" {
                StartSensitivity::Low
            } else {
                StartSensitivity::High
            },
            end_sensitivity: if self.end_sensitivity == "low" {
                EndSensitivity::Low
            } else {
                EndSensitivity::High
            },
            response_modality: ResponseModality::Audio,
        }
    }
}

pub fn normalize_model(raw: &str) -> String {
    let model = raw.trim();
    match model {
        "" => DEFAULT_MODEL.into(),
        _ => model.strip_prefix("models/").unwrap_or(model).to_string(),
    }
}

pub fn normalize_voice(raw: &str) -> String {
    find_voice(raw).unwrap_or(DEFAULT_VOICE).to_string()
}

pub fn normalize_sensitivity(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" | "start_sensitivity_low" | "end_sensitivity_low" => "low".into(),
        _ => "high".into(),
    }
}

fn normalize_device(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Parley")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("parley")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
