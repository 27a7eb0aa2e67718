//! Decoded, render-ready playback audio.

/// One decoded unit of remote speech awaiting (or undergoing) playback.
///
/// Created by [`crate::codec::decode_playback`]; `start_at` stays `None`
/// until [`crate::scheduler::PlaybackScheduler::schedule`] assigns it a slot
/// on the render clock.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSegment {
    /// One sample buffer per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz (24000 for render).
    pub sample_rate: u32,
    /// Assigned start time on the render clock, in seconds.
    pub start_at: Option<f64>,
}

impl PlaybackSegment {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            start_at: None,
        }
    }

    /// Build a single-channel segment.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Average all channels into one buffer for the mono render graph.
    pub fn downmix(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => {
                let frames = self.frames();
                (0..frames)
                    .map(|f| self.channels.iter().map(|c| c[f]).sum::<f32>() / n as f32)
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_frames_and_rate() {
        let seg = PlaybackSegment::mono(vec![0.0; 24_000], 24_000);
        assert!((seg.duration() - 1.0).abs() < 1e-9);
        assert_eq!(seg.start_at, None);
    }

    #[test]
    fn downmix_averages_channels() {
        let seg = PlaybackSegment::new(vec![vec![0.5, 1.0], vec![-0.5, 0.0]], 24_000);
        assert_eq!(seg.downmix(), vec![0.0, 0.5]);
    }
}
