//! Typed capture frame passed from the capture pump to the codec.

/// A contiguous block of mono samples at a known sample rate.
///
/// Allocated once per capture block on the pump thread, never in the device
/// callback. Ownership moves to the session loop, which encodes and drops it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (16000 for capture).
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}
