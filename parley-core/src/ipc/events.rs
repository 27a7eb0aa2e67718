//! Outward session signals and status snapshots.
//!
//! | Type | Delivery |
//! |------|----------|
//! | `SessionSignal` | `broadcast` channel from [`SessionHandle::subscribe`](crate::session::SessionHandle::subscribe) |
//! | `SessionStatus` | pulled with [`SessionHandle::status`](crate::session::SessionHandle::status) |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// The four signals a session raises to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionSignal {
    /// The remote turn produced no audible output; the host should retry.
    NoAudio,
    /// Remote output became audible for the first time this session.
    SpeakingStarted,
    /// Remote output has been silent for an abnormally long stretch.
    ExtendedQuiet,
    /// The service rejected the request for resource exhaustion.
    QuotaExceeded,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a duplex session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    /// Audio graph open, waiting for the remote connection.
    Connecting,
    /// Microphone streaming, no remote audio outstanding.
    Recording,
    /// At least one remote segment is queued or playing.
    Speaking,
    /// Flushing playback after a barge-in.
    Interrupted,
    /// The session loop has exited; no further transitions.
    Stopped,
}

impl SessionState {
    /// States in which the microphone must be open.
    pub fn is_capturing(self) -> bool {
        matches!(self, Self::Recording | Self::Speaking | Self::Interrupted)
    }

    /// States that hold resources (graph, connection or both).
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    /// Last surfaced error, if any.
    pub detail: Option<String>,
}
