//! Render graph source queue.
//!
//! The [`Mixer`] owns every playback source that has been started on the
//! render clock and sums them into the output block by block. The render
//! clock is simply the number of frames rendered so far, so it only advances
//! when the output device (or a manual host) pulls audio.
//!
//! Sources finishing naturally are reported through a crossbeam channel; the
//! playback scheduler drains it from the session loop.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

use crate::buffering::PlaybackSegment;

/// Identifier of a scheduled playback source.
pub type SegmentId = u64;

struct Source {
    id: SegmentId,
    samples: Arc<[f32]>,
    start_frame: u64,
}

impl Source {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled sources into output blocks and keeps the render clock.
pub struct Mixer {
    sample_rate: u32,
    clock_frames: u64,
    gain: f32,
    sources: Vec<Source>,
    ended_tx: Sender<SegmentId>,
}

impl Mixer {
    fn new(sample_rate: u32, gain: f32, ended_tx: Sender<SegmentId>) -> Self {
        Self {
            sample_rate,
            clock_frames: 0,
            gain,
            sources: Vec::new(),
            ended_tx,
        }
    }

    fn now(&self) -> f64 {
        self.clock_frames as f64 / self.sample_rate as f64
    }

    fn secs_to_frame(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Start `samples` at `not_before` or the current clock, whichever is later.
    fn start(&mut self, id: SegmentId, samples: Arc<[f32]>, not_before: f64) -> f64 {
        let start_frame = self.secs_to_frame(not_before).max(self.clock_frames);
        self.sources.push(Source {
            id,
            samples,
            start_frame,
        });
        start_frame as f64 / self.sample_rate as f64
    }

    fn stop(&mut self, id: SegmentId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let block_start = self.clock_frames;
        let block_end = block_start + out.len() as u64;

        for source in &self.sources {
            let from = source.start_frame.max(block_start);
            let to = source.end_frame().min(block_end);
            if from >= to {
                continue;
            }
            let src_offset = (from - source.start_frame) as usize;
            let dst_offset = (from - block_start) as usize;
            let len = (to - from) as usize;
            for (dst, src) in out[dst_offset..dst_offset + len]
                .iter_mut()
                .zip(&source.samples[src_offset..src_offset + len])
            {
                *dst += *src;
            }
        }

        if self.gain != 1.0 {
            for sample in out.iter_mut() {
                *sample *= self.gain;
            }
        }

        self.clock_frames = block_end;

        let ended_tx = &self.ended_tx;
        self.sources.retain(|source| {
            if source.end_frame() <= block_end {
                trace!(segment = source.id, "playback source ended");
                let _ = ended_tx.send(source.id);
                false
            } else {
                true
            }
        });
    }
}

/// Shared handle to the render graph.
///
/// Cloning is cheap; the output pump, the playback scheduler and the audio
/// graph all hold one.
#[derive(Clone)]
pub struct RenderHandle {
    mixer: Arc<Mutex<Mixer>>,
    ended_rx: Receiver<SegmentId>,
    sample_rate: u32,
}

impl RenderHandle {
    /// Create a fresh render graph with its clock at zero.
    pub fn new(sample_rate: u32, gain: f32) -> Self {
        let (ended_tx, ended_rx) = unbounded();
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new(sample_rate, gain, ended_tx))),
            ended_rx,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current render clock, in seconds.
    pub fn now(&self) -> f64 {
        self.mixer.lock().now()
    }

    /// Hand a segment to the active source queue.
    ///
    /// The source starts at `not_before` or at the current clock if that has
    /// already passed; the actual start time is returned. Both the clock read
    /// and the insertion happen under one lock, so the source can never land
    /// in the past.
    pub fn push_render_buffer(
        &self,
        id: SegmentId,
        segment: &PlaybackSegment,
        not_before: f64,
    ) -> f64 {
        let samples: Arc<[f32]> = segment.downmix().into();
        self.mixer.lock().start(id, samples, not_before)
    }

    /// Stop a source immediately. Returns `false` if it had already ended.
    pub fn stop_source(&self, id: SegmentId) -> bool {
        self.mixer.lock().stop(id)
    }

    /// Drop every source without completion notices.
    pub fn clear(&self) {
        self.mixer.lock().sources.clear();
    }

    /// Number of sources still queued or playing.
    pub fn active_sources(&self) -> usize {
        self.mixer.lock().sources.len()
    }

    /// Render the next block and advance the clock by `out.len()` frames.
    pub fn render(&self, out: &mut [f32]) {
        self.mixer.lock().render(out);
    }

    /// Sources that ended naturally since the last call.
    pub fn drain_ended(&self) -> Vec<SegmentId> {
        self.ended_rx.try_iter().collect()
    }
}

impl std::fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHandle")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}
