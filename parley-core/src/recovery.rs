//! Bounded retry policy for `NoAudio`.
//!
//! Each `NoAudio` signal asks for a restart. Every `limit`-th one
//! also switches to a different voice, on the theory that the current voice
//! configuration is what keeps producing silence.

use tracing::info;

/// Consecutive `NoAudio` signals before the voice is changed.
pub const DEFAULT_NO_AUDIO_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Restart with the same settings.
    Retry { attempt: u32 },
    /// Restart with a freshly chosen voice; the counter starts over.
    RetryWithRandomVoice,
}

#[derive(Debug, Clone)]
pub struct NoAudioRecovery {
    count: u32,
    limit: u32,
}

impl NoAudioRecovery {
    pub fn new(limit: u32) -> Self {
        Self {
            count: 0,
            limit: limit.max(1),
        }
    }

    /// Record one `NoAudio` and decide how to recover.
    pub fn on_no_audio(&mut self) -> RecoveryAction {
        self.count += 1;
        if self.count >= self.limit {
            info!(limit = self.limit, "no-audio limit reached; switching voice");
            self.count = 0;
            RecoveryAction::RetryWithRandomVoice
        } else {
            RecoveryAction::Retry {
                attempt: self.count,
            }
        }
    }

    /// Forget past failures, e.g. after a manual restart.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Default for NoAudioRecovery {
    fn default() -> Self {
        Self::new(DEFAULT_NO_AUDIO_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_failure_switches_voice_and_resets() {
        let mut r = NoAudioRecovery::default();
        assert_eq!(r.on_no_audio(), RecoveryAction::Retry { attempt: 1 });
        assert_eq!(r.on_no_audio(), RecoveryAction::Retry { attempt: 2 });
        assert_eq!(r.on_no_audio(), RecoveryAction::RetryWithRandomVoice);
        assert_eq!(r.count(), 0);
        assert_eq!(r.on_no_audio(), RecoveryAction::Retry { attempt: 1 });
    }

    #[test]
    fn reset_clears_count() {
        let mut r = NoAudioRecovery::default();
        r.on_no_audio();
        r.reset();
        assert_eq!(r.count(), 0);
    }
}
