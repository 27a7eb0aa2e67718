//! Output silence detection.
//!
//! The session feeds one output amplitude reading per tick. Two failure modes
//! are reported:
//!
//! - **startup silence**: nothing audible has played yet and output has been
//!   quiet for `startup_quiet`. The timer is checked once, when it elapses:
//!   if the remote had already sent audio by then, [`MonitorSignal::NoAudio`]
//!   is reported; either way the rule is spent for the session.
//! - **extended silence**: output was audible, then stayed quiet for
//!   `extended_quiet`. Reported once per quiet stretch as
//!   [`MonitorSignal::ExtendedQuiet`]; the next loud reading re-arms it.
//!
//! The first loud reading of a session yields [`MonitorSignal::SpeakingStarted`].
//! Time is passed in by the caller, so tests drive the monitor with a
//! synthetic clock.

use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    NoAudio,
    SpeakingStarted,
    ExtendedQuiet,
}

#[derive(Debug, Clone)]
pub struct SilenceMonitor {
    threshold: f32,
    startup_quiet: Duration,
    extended_quiet: Duration,
    has_started_speaking: bool,
    startup_deadline: Option<Instant>,
    startup_fired: bool,
    last_activity_at: Option<Instant>,
    extended_latched: bool,
}

impl SilenceMonitor {
    pub fn new(threshold: f32, startup_quiet: Duration, extended_quiet: Duration) -> Self {
        Self {
            threshold,
            startup_quiet,
            extended_quiet,
            has_started_speaking: false,
            startup_deadline: None,
            startup_fired: false,
            last_activity_at: None,
            extended_latched: false,
        }
    }

    /// Forget everything; called when a new session begins.
    pub fn reset(&mut self) {
        self.has_started_speaking = false;
        self.startup_deadline = None;
        self.startup_fired = false;
        self.last_activity_at = None;
        self.extended_latched = false;
    }

    /// Evaluate one amplitude reading taken at `now`.
    ///
    /// `audio_received` tells whether any remote audio chunk has arrived this
    /// session. It only matters on the tick where the startup timer elapses.
    pub fn tick(
        &mut self,
        now: Instant,
        amplitude: f32,
        audio_received: bool,
    ) -> Option<MonitorSignal> {
        if amplitude >= self.threshold {
            self.last_activity_at = Some(now);
            self.extended_latched = false;
            self.startup_deadline = None;
            if !self.has_started_speaking {
                self.has_started_speaking = true;
                debug!(amplitude, "output became audible");
                return Some(MonitorSignal::SpeakingStarted);
            }
            return None;
        }

        if !self.has_started_speaking {
            if self.startup_fired {
                return None;
            }
            let deadline = *self
                .startup_deadline
                .get_or_insert_with(|| now + self.startup_quiet);
            if now < deadline {
                return None;
            }
            self.startup_fired = true;
            if audio_received {
                return Some(MonitorSignal::NoAudio);
            }
            debug!("startup quiet elapsed before any remote audio");
            return None;
        }

        let quiet_for = self
            .last_activity_at
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
        if quiet_for >= self.extended_quiet && !self.extended_latched {
            self.extended_latched = true;
            return Some(MonitorSignal::ExtendedQuiet);
        }
        None
    }

    pub fn has_started_speaking(&self) -> bool {
        self.has_started_speaking
    }

    pub fn last_activity_at(&self) -> Option<Instant> {
        self.last_activity_at
    }
}
