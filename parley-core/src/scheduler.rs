//! Gapless playback scheduling on the render clock.
//!
//! A single cursor, `next_start_time`, marks the earliest instant the next
//! segment may start. Each [`schedule`](PlaybackScheduler::schedule) call
//! places its segment at `max(cursor, now)` and moves the cursor to the
//! segment's end before the segment is handed to the mixer, so ranges never
//! overlap. [`flush`](PlaybackScheduler::flush) stops everything at once and
//! pulls the cursor back to the current render time.
//!
//! Only the session loop calls into the scheduler; device threads never do.

use tracing::{debug, trace};

use crate::audio::mixer::{RenderHandle, SegmentId};
use crate::buffering::PlaybackSegment;

/// Bookkeeping for one segment in the active set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveSegment {
    pub id: SegmentId,
    pub start_at: f64,
    pub duration: f64,
}

impl ActiveSegment {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

pub struct PlaybackScheduler {
    render: RenderHandle,
    next_start_time: f64,
    active: Vec<ActiveSegment>,
    next_id: SegmentId,
}

impl PlaybackScheduler {
    /// Start with the cursor at the render clock's current time.
    pub fn new(render: RenderHandle) -> Self {
        let next_start_time = render.now();
        Self {
            render,
            next_start_time,
            active: Vec::new(),
            next_id: 0,
        }
    }

    /// Queue `segment` right after everything already scheduled.
    ///
    /// Sets `segment.start_at` and returns its active-set entry.
    pub fn schedule(&mut self, segment: &mut PlaybackSegment) -> ActiveSegment {
        let id = self.next_id;
        self.next_id += 1;

        let duration = segment.duration();
        let start_at = self
            .render
            .push_render_buffer(id, segment, self.next_start_time);
        self.next_start_time = start_at + duration;
        segment.start_at = Some(start_at);

        let entry = ActiveSegment {
            id,
            start_at,
            duration,
        };
        self.active.push(entry);
        trace!(segment = id, start_at, duration, "segment scheduled");
        entry
    }

    /// Stop every active segment immediately and reset the cursor.
    ///
    /// Returns how many segments were still active.
    pub fn flush(&mut self) -> usize {
        let flushed = self.active.len();
        for seg in self.active.drain(..) {
            if !self.render.stop_source(seg.id) {
                // Finished naturally between the last reap and now.
                debug!(segment = seg.id, "segment already ended before flush");
            }
        }
        self.render.clear();
        // Completions queued before the stop are stale now.
        self.render.drain_ended();
        self.next_start_time = self.render.now();
        debug!(flushed, cursor = self.next_start_time, "playback flushed");
        flushed
    }

    /// Drop segments that finished playing from the active set.
    pub fn reap(&mut self) -> usize {
        let ended = self.render.drain_ended();
        if ended.is_empty() {
            return 0;
        }
        let before = self.active.len();
        self.active.retain(|seg| !ended.contains(&seg.id));
        before - self.active.len()
    }

    pub fn active(&self) -> &[ActiveSegment] {
        &self.active
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn render_now(&self) -> f64 {
        self.render.now()
    }
}
