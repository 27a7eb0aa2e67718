//! cpal-backed [`AudioHost`].
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so every stream is built, run and dropped on one dedicated device
//! thread. That thread also runs the pump for its direction:
//!
//! ```text
//! input:  device callback ─► SPSC ring ─► capture pump (resample → CaptureSink)
//! output: RenderSource ─► render pump (resample) ─► SPSC ring ─► device callback
//! ```
//!
//! A sync oneshot reports open success or failure back to the caller, so
//! `open_*` returns only once the device is actually running.
//!
//! # Callback contract
//!
//! The device callbacks never lock, allocate after warm-up, or perform I/O.
//! They only move samples between the device buffer and a lock-free ring.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BuildStreamError, Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig, SupportedStreamConfig,
};
use tracing::{debug, error, info, warn};

use super::device::is_loopback_like_name;
use super::graph::{CaptureSink, RenderSource};
use super::host::{AudioHost, StreamGuard};
use super::resample::RateConverter;
use crate::buffering::{
    create_audio_ring, AudioConsumer, AudioProducer, Consumer, Observer, Producer,
    CAPTURE_RING_CAPACITY, RENDER_RING_CAPACITY,
};
use crate::error::{ParleyError, Result};

/// Pump sleep when there is nothing to move.
const PUMP_IDLE: Duration = Duration::from_millis(2);
/// Audio kept queued ahead of the output device.
const RENDER_LEAD_MS: usize = 60;
/// Pump block length.
const PUMP_BLOCK_MS: u32 = 10;

/// Opens real devices through the platform default cpal host.
#[derive(Debug, Default)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }
}

impl AudioHost for CpalHost {
    fn open_output(
        &mut self,
        source: RenderSource,
        preferred_device: Option<&str>,
    ) -> Result<Box<dyn StreamGuard>> {
        let preferred = preferred_device.map(str::to_owned);
        spawn_device_thread("parley-render", move |running, open_tx| {
            let (producer, consumer) = create_audio_ring(RENDER_RING_CAPACITY);
            let opened = open_output_stream(consumer, Arc::clone(&running), preferred.as_deref())
                .and_then(|(stream, rate)| {
                    let block = (source.sample_rate() * PUMP_BLOCK_MS / 1000) as usize;
                    let converter = RateConverter::new(source.sample_rate(), rate, block)?;
                    Ok((stream, rate, converter))
                });
            let (stream, rate, converter) = match opened {
                Ok(v) => v,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };
            let _ = open_tx.send(Ok(rate));
            render_pump(source, producer, converter, rate, &running);
            // Stream drops here, on the thread that built it.
            drop(stream);
        })
    }

    fn open_input(
        &mut self,
        sink: CaptureSink,
        preferred_device: Option<&str>,
    ) -> Result<Box<dyn StreamGuard>> {
        let preferred = preferred_device.map(str::to_owned);
        spawn_device_thread("parley-capture", move |running, open_tx| {
            let (producer, consumer) = create_audio_ring(CAPTURE_RING_CAPACITY);
            let opened = open_input_stream(producer, Arc::clone(&running), preferred.as_deref())
                .and_then(|(stream, rate)| {
                    let block = (rate * PUMP_BLOCK_MS / 1000) as usize;
                    let converter = RateConverter::new(rate, sink.sample_rate(), block)?;
                    Ok((stream, rate, converter))
                });
            let (stream, rate, converter) = match opened {
                Ok(v) => v,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };
            let _ = open_tx.send(Ok(rate));
            capture_pump(sink, consumer, converter, &running);
            drop(stream);
        })
    }
}

/// A device thread; stopping it ends the pump and drops the stream.
struct DeviceThread {
    name: &'static str,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamGuard for DeviceThread {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(thread = self.name, "device thread panicked");
            } else {
                debug!(thread = self.name, "device thread stopped");
            }
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_device_thread<F>(name: &'static str, body: F) -> Result<Box<dyn StreamGuard>>
where
    F: FnOnce(Arc<AtomicBool>, mpsc::Sender<Result<u32>>) + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let thread_running = Arc::clone(&running);
    let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(thread_running, open_tx))?;

    // Block until the device is confirmed open.
    let outcome = open_rx.recv();
    let mut guard = DeviceThread {
        name,
        running,
        thread: Some(thread),
    };
    match outcome {
        Ok(Ok(rate)) => {
            info!(thread = name, device_rate = rate, "device stream running");
            Ok(Box::new(guard))
        }
        Ok(Err(e)) => {
            guard.stop();
            Err(e)
        }
        Err(_) => {
            guard.stop();
            Err(ParleyError::Other(anyhow::anyhow!(
                "{name} thread died before opening its device"
            )))
        }
    }
}

fn find_named<I>(devices: I, name: &str) -> Option<Device>
where
    I: Iterator<Item = Device>,
{
    devices.into_iter().find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

fn select_input_device(host: &cpal::Host, preferred: Option<&str>) -> Result<Device> {
    if let Some(name) = preferred {
        match host.input_devices() {
            Ok(devices) => match find_named(devices, name) {
                Some(device) => return Ok(device),
                None => warn!("preferred input device '{name}' not found, falling back"),
            },
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }
    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }
    let mut devices = host
        .input_devices()
        .map_err(|e| ParleyError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(ParleyError::NoInputDevice)?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}

fn select_output_device(host: &cpal::Host, preferred: Option<&str>) -> Result<Device> {
    if let Some(name) = preferred {
        match host.output_devices() {
            Ok(devices) => match find_named(devices, name) {
                Some(device) => return Ok(device),
                None => warn!("preferred output device '{name}' not found, falling back"),
            },
            Err(e) => warn!("failed to list output devices while resolving preference: {e}"),
        }
    }
    if let Some(device) = host.default_output_device() {
        return Ok(device);
    }
    host.output_devices()
        .map_err(|e| ParleyError::AudioDevice(e.to_string()))?
        .next()
        .ok_or_else(|| ParleyError::AudioDevice("no output device available".into()))
}

/// Open the speaker, preferring a native 24 kHz float config when offered.
fn open_output_stream(
    consumer: AudioConsumer,
    running: Arc<AtomicBool>,
    preferred: Option<&str>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = select_output_device(&host, preferred)?;
    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let native = device.supported_output_configs().ok().and_then(|mut configs| {
        configs.find_map(|c| {
            let fits = c.sample_format() == SampleFormat::F32
                && c.min_sample_rate().0 <= 24_000
                && c.max_sample_rate().0 >= 24_000;
            fits.then(|| c.with_sample_rate(SampleRate(24_000)))
        })
    });
    let supported = match native {
        Some(c) => c,
        None => device
            .default_output_config()
            .map_err(|e| ParleyError::AudioDevice(e.to_string()))?,
    };

    let sample_rate = supported.sample_rate().0;
    let config = stream_config(&supported);
    info!(sample_rate, channels = config.channels, "output config selected");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, consumer, running),
        SampleFormat::I16 => build_output::<i16>(&device, &config, consumer, running),
        SampleFormat::U16 => build_output::<u16>(&device, &config, consumer, running),
        fmt => {
            return Err(ParleyError::AudioStream(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| ParleyError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| ParleyError::AudioStream(e.to_string()))?;
    Ok((stream, sample_rate))
}

/// Open the microphone at its default config.
fn open_input_stream(
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    preferred: Option<&str>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = select_input_device(&host, preferred)?;
    let name = device.name().unwrap_or_default();
    if is_loopback_like_name(&name) {
        warn!(
            device = name.as_str(),
            "input device looks like system output capture; the remote voice may echo back"
        );
    }
    info!(device = name.as_str(), "opening input device");

    let supported = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            ParleyError::PermissionDenied(format!("input device '{name}' is not available"))
        }
        other => ParleyError::AudioDevice(other.to_string()),
    })?;

    let sample_rate = supported.sample_rate().0;
    let config = stream_config(&supported);
    info!(sample_rate, channels = config.channels, "input config selected");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, producer, running),
        SampleFormat::I16 => build_input::<i16>(&device, &config, producer, running),
        SampleFormat::U8 => build_input::<u8>(&device, &config, producer, running),
        fmt => {
            return Err(ParleyError::AudioStream(format!(
                "unsupported input sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| match e {
        BuildStreamError::DeviceNotAvailable => {
            ParleyError::PermissionDenied(format!("input device '{name}' is not available"))
        }
        other => ParleyError::AudioStream(other.to_string()),
    })?;

    stream
        .play()
        .map_err(|e| ParleyError::AudioStream(e.to_string()))?;
    Ok((stream, sample_rate))
}

fn stream_config(supported: &SupportedStreamConfig) -> StreamConfig {
    StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Downmix interleaved device frames to mono and push them into the ring.
fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> std::result::Result<Stream, BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    let mut mix_buf: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _info| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let frames = data.len() / ch;
            mix_buf.resize(frames, 0.0);
            for (f, slot) in mix_buf.iter_mut().enumerate() {
                let frame = &data[f * ch..(f + 1) * ch];
                let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                *slot = sum / ch as f32;
            }
            let written = producer.push_slice(&mix_buf);
            if written < mix_buf.len() {
                warn!("capture ring full: dropped {} frames", mix_buf.len() - written);
            }
        },
        |err| error!("input stream error: {err}"),
        None,
    )
}

/// Pop mono samples from the ring and copy each to every device channel.
/// Underruns play silence.
fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: AudioConsumer,
    running: Arc<AtomicBool>,
) -> std::result::Result<Stream, BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let ch = config.channels.max(1) as usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], _info| {
            let live = running.load(Ordering::Relaxed);
            for frame in data.chunks_mut(ch) {
                let sample = if live {
                    consumer.try_pop().unwrap_or(0.0)
                } else {
                    0.0
                };
                let value = T::from_sample(sample);
                for slot in frame.iter_mut() {
                    *slot = value;
                }
            }
        },
        |err| error!("output stream error: {err}"),
        None,
    )
}

/// Keep the output ring topped up with mixer output until stopped.
fn render_pump(
    mut source: RenderSource,
    mut producer: AudioProducer,
    mut converter: RateConverter,
    device_rate: u32,
    running: &AtomicBool,
) {
    let block = (source.sample_rate() * PUMP_BLOCK_MS / 1000) as usize;
    let lead = device_rate as usize * RENDER_LEAD_MS / 1000;
    let mut buf = vec![0.0f32; block];

    while running.load(Ordering::Relaxed) {
        if producer.occupied_len() >= lead {
            thread::sleep(PUMP_IDLE);
            continue;
        }
        source.fill(&mut buf);
        let out = converter.process(&buf);
        let written = producer.push_slice(&out);
        if written < out.len() {
            warn!("render ring full: dropped {} samples", out.len() - written);
        }
    }
    debug!("render pump stopped");
}

/// Move device samples into the capture sink until stopped.
fn capture_pump(
    mut sink: CaptureSink,
    mut consumer: AudioConsumer,
    mut converter: RateConverter,
    running: &AtomicBool,
) {
    let mut buf = vec![0.0f32; 4096];
    while running.load(Ordering::Relaxed) {
        let n = consumer.pop_slice(&mut buf);
        if n == 0 {
            thread::sleep(PUMP_IDLE);
            continue;
        }
        let out = converter.process(&buf[..n]);
        if !out.is_empty() {
            sink.push(&out);
        }
    }
    debug!("capture pump stopped");
}
