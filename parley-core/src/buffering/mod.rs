//! Lock-free SPSC ring buffers for audio samples, plus the typed units that
//! travel through the session (capture frames, playback segments).
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice` /
//! `pop_slice` safe to call from real-time audio callbacks.

pub mod frame;
pub mod segment;

use ringbuf::{traits::Split, HeapRb};

pub use frame::AudioFrame;
pub use ringbuf::traits::{Consumer, Observer, Producer};
pub use segment::PlaybackSegment;

/// Type alias for the producer half of a sample ring.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half of a sample ring.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz.
/// The capture pump drains every few milliseconds, so this only absorbs stalls.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 18;

/// Render ring capacity: 2^15 = 32 768 samples ≈ 680 ms at 48 kHz.
/// Kept short because everything queued here has already left the mixer and
/// can no longer be flushed by an interruption.
pub const RENDER_RING_CAPACITY: usize = 1 << 15;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_round_trips_samples_in_order() {
        let (mut prod, mut cons) = create_audio_ring(8);
        assert_eq!(prod.push_slice(&[0.1, 0.2, 0.3]), 3);
        let mut out = [0.0f32; 3];
        assert_eq!(cons.pop_slice(&mut out), 3);
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn full_ring_reports_short_write() {
        let (mut prod, _cons) = create_audio_ring(4);
        let written = prod.push_slice(&[0.0; 6]);
        assert_eq!(written, 4);
        assert_eq!(prod.vacant_len(), 0);
    }
}
