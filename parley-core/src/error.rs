use thiserror::Error;

use crate::codec::DecodeError;

/// All errors produced by parley-core.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no input device found")]
    NoInputDevice,

    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("audio graph is not open")]
    GraphClosed,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParleyError {
    /// Build a connection-level error, routing resource-exhaustion payloads
    /// to [`ParleyError::QuotaExceeded`].
    pub fn from_service_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if crate::service::is_quota_exhausted(&message) {
            Self::QuotaExceeded(message)
        } else {
            Self::Connection(message)
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
