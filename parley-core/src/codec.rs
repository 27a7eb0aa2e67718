//! Linear PCM16 transport codec.
//!
//! Outbound: normalized f32 capture samples → 16-bit little-endian PCM →
//! base64 text, labelled `audio/pcm;rate=16000`.
//!
//! Inbound: base64 text → 16-bit little-endian PCM → f32 per channel.
//!
//! The encode step truncates toward zero and keeps the low 16 bits without
//! clamping, so a sample of exactly `1.0` wraps to `-32768`. Receivers rely
//! on the bit-exact behaviour.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffering::{AudioFrame, PlaybackSegment};

/// Scale between normalized samples and 16-bit integers.
const PCM16_SCALE: f32 = 32768.0;

/// MIME-style label attached to every outbound chunk.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Errors produced while decoding inbound audio.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("PCM16 payload has odd byte length {0}")]
    OddLength(usize),

    #[error("invalid transport encoding: {0}")]
    Transport(#[from] base64::DecodeError),
}

/// One captured frame, packed and encoded for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedChunk {
    /// Base64 of little-endian PCM16 samples.
    pub data: String,
    pub mime_type: String,
}

/// Pack normalized samples as little-endian PCM16 bytes.
pub fn pack_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let value = (s * PCM16_SCALE) as i32 as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Encode a capture frame for transmission.
pub fn encode_capture(frame: &AudioFrame) -> EncodedChunk {
    EncodedChunk {
        data: STANDARD.encode(pack_pcm16(&frame.samples)),
        mime_type: CAPTURE_MIME_TYPE.to_string(),
    }
}

/// Undo the transport encoding of an inbound payload.
pub fn decode_transport(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(text)?)
}

/// Encode raw bytes with the transport encoding.
pub fn encode_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Convert a PCM16 byte stream into a playback segment.
///
/// With `channels > 1` the samples are treated as interleaved: channel `i`
/// receives every sample at index `i mod channels`. `channels == 0` is a
/// degenerate case kept for compatibility and yields a single channel.
pub fn decode_playback(
    bytes: &[u8],
    sample_rate: u32,
    channels: usize,
) -> Result<PlaybackSegment, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect();

    if channels <= 1 {
        return Ok(PlaybackSegment::mono(samples, sample_rate));
    }

    let frames = samples.len() / channels;
    let split = (0..channels)
        .map(|ch| {
            samples
                .iter()
                .skip(ch)
                .step_by(channels)
                .take(frames)
                .copied()
                .collect()
        })
        .collect();

    Ok(PlaybackSegment::new(split, sample_rate))
}
