//! `EchoService`: offline stand-in for a remote dialog service.
//!
//! Lets the whole duplex pipeline run without network access:
//!
//! 1. The greeting turn is answered with a short tone and `turnComplete`.
//! 2. Captured audio is collected per second; a second that is not silent is
//!    resampled to the render rate and streamed back, followed by
//!    `turnComplete`.
//! 3. `close()` reports a remote close like a real stream would.

use std::f32::consts::PI;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    ClientMessage, DialogConnection, DialogService, ServerMessage, ServiceEvent, ServiceEventSink,
};
use crate::audio::resample::RateConverter;
use crate::codec::{decode_playback, decode_transport, encode_transport, pack_pcm16};
use crate::config::{ConnectConfig, ResponseModality};
use crate::error::{ParleyError, Result};

/// Seconds of captured audio gathered before an echo.
const ECHO_WINDOW_SECS: usize = 1;
/// RMS below this counts as silence and is not echoed.
const ECHO_GATE_RMS: f32 = 0.01;
/// Reply audio is streamed in chunks of this many milliseconds.
const REPLY_CHUNK_MS: usize = 250;

/// Echo-style stub service.
#[derive(Debug, Clone)]
pub struct EchoService {
    capture_rate: u32,
    reply_rate: u32,
}

impl EchoService {
    pub fn new(capture_rate: u32, reply_rate: u32) -> Self {
        Self {
            capture_rate,
            reply_rate,
        }
    }
}

impl Default for EchoService {
    fn default() -> Self {
        Self::new(16_000, 24_000)
    }
}

#[async_trait]
impl DialogService for EchoService {
    async fn connect(
        &self,
        config: ConnectConfig,
        events: ServiceEventSink,
    ) -> Result<Box<dyn DialogConnection>> {
        if config.response_modality != ResponseModality::Audio {
            return Err(ParleyError::Connection(
                "echo service only answers with audio".into(),
            ));
        }
        info!(
            model = config.model.as_str(),
            voice = config.voice.as_str(),
            "echo service connected"
        );
        let block = (self.capture_rate / 10) as usize;
        Ok(Box::new(EchoConnection {
            events,
            capture_rate: self.capture_rate,
            reply_rate: self.reply_rate,
            pending: Vec::new(),
            converter: RateConverter::new(self.capture_rate, self.reply_rate, block)?,
            closed: false,
        }))
    }
}

struct EchoConnection {
    events: ServiceEventSink,
    capture_rate: u32,
    reply_rate: u32,
    pending: Vec<f32>,
    converter: RateConverter,
    closed: bool,
}

impl EchoConnection {
    fn reply(&self, samples: &[f32]) {
        let chunk = (self.reply_rate as usize * REPLY_CHUNK_MS / 1000).max(1);
        for part in samples.chunks(chunk) {
            let data = encode_transport(&pack_pcm16(part));
            self.events.message(ServerMessage::audio(data));
        }
        self.events.message(ServerMessage::turn_complete());
    }
}

impl DialogConnection for EchoConnection {
    fn send(&mut self, message: ClientMessage) -> Result<()> {
        if self.closed {
            return Err(ParleyError::Connection("echo connection closed".into()));
        }
        match message {
            ClientMessage::Turn { turn_text, .. } => {
                debug!(chars = turn_text.len(), "echo: greeting received");
                self.reply(&chime(self.reply_rate));
            }
            ClientMessage::Media { media } => {
                let bytes = decode_transport(&media.data)?;
                let frame = decode_playback(&bytes, self.capture_rate, 1)?;
                self.pending.extend(frame.downmix());

                let window = self.capture_rate as usize * ECHO_WINDOW_SECS;
                while self.pending.len() >= window {
                    let second: Vec<f32> = self.pending.drain(..window).collect();
                    if rms(&second) < ECHO_GATE_RMS {
                        continue;
                    }
                    let echoed = self.converter.process(&second);
                    debug!(samples = echoed.len(), "echo: replaying captured speech");
                    self.reply(&echoed);
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.events.emit(ServiceEvent::Closed(None));
    }
}

impl Drop for EchoConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// 600 ms, 1 kHz, with 20 ms fades.
fn chime(rate: u32) -> Vec<f32> {
    let len = rate as usize * 600 / 1000;
    let fade = (rate as usize * 20 / 1000).max(1);
    (0..len)
        .map(|i| {
            let env = (i.min(len - 1 - i) as f32 / fade as f32).min(1.0);
            0.5 * env * (2.0 * PI * 1_000.0 * i as f32 / rate as f32).sin()
        })
        .collect()
}
