use std::f32::consts::PI;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};

use parley_core::codec::{encode_transport, pack_pcm16, CAPTURE_MIME_TYPE};
use parley_core::config::{ConnectConfig, SessionConfig, StartRequest};
use parley_core::service::{
    ClientMessage, DialogConnection, DialogService, ServerMessage, ServiceEvent, ServiceEventSink,
};
use parley_core::session::{DuplexSession, SessionEvent};
use parley_core::audio::Direction;
use parley_core::{ManualHost, ParleyError, SessionSignal, SessionState};

// ---------------------------------------------------------------------------
// Scripted dialog service
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Script {
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    closes: Arc<AtomicUsize>,
    sink: Arc<Mutex<Option<ServiceEventSink>>>,
}

impl Script {
    fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn sink(&self) -> ServiceEventSink {
        self.sink.lock().clone().expect("service connected")
    }
}

struct ScriptedService {
    script: Script,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    fail_with: Option<String>,
}

impl ScriptedService {
    fn new(script: Script) -> Self {
        Self {
            script,
            gate: Mutex::new(None),
            fail_with: None,
        }
    }

    /// Connect blocks until the returned sender fires.
    fn gated(script: Script) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let service = Self {
            gate: Mutex::new(Some(rx)),
            ..Self::new(script)
        };
        (service, tx)
    }

    fn failing(script: Script, message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new(script)
        }
    }
}

#[async_trait]
impl DialogService for ScriptedService {
    async fn connect(
        &self,
        _config: ConnectConfig,
        events: ServiceEventSink,
    ) -> Result<Box<dyn DialogConnection>, ParleyError> {
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(message) = &self.fail_with {
            return Err(ParleyError::from_service_message(message.clone()));
        }
        *self.script.sink.lock() = Some(events);
        Ok(Box::new(ScriptedConnection {
            script: self.script.clone(),
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    script: Script,
    closed: bool,
}

impl DialogConnection for ScriptedConnection {
    fn send(&mut self, message: ClientMessage) -> Result<(), ParleyError> {
        if self.closed {
            return Err(ParleyError::Connection("closed".into()));
        }
        self.script.sent.lock().push(message);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.script.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn request() -> StartRequest {
    StartRequest::new("Hello there.", ConnectConfig::default())
}

fn session_with(
    service: ScriptedService,
    host: &ManualHost,
) -> (DuplexSession, UnboundedReceiver<SessionEvent>) {
    DuplexSession::new(
        SessionConfig::default(),
        Arc::new(service),
        Box::new(host.clone()),
    )
}

/// Wait for the connect task and apply its result.
async fn complete_connect(
    session: &mut DuplexSession,
    events: &mut UnboundedReceiver<SessionEvent>,
    now: Instant,
) {
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("connect resolved in time")
        .expect("event channel open");
    assert!(matches!(event, SessionEvent::Connected { .. }));
    session.handle_event(event, now);
}

/// Apply every queued event.
fn pump(session: &mut DuplexSession, events: &mut UnboundedReceiver<SessionEvent>, now: Instant) {
    while let Ok(event) = events.try_recv() {
        session.handle_event(event, now);
    }
}

fn tone_payload(secs: f32, amplitude: f32) -> String {
    let len = (24_000.0 * secs) as usize;
    let samples: Vec<f32> = (0..len)
        .map(|i| amplitude * (2.0 * PI * 1_000.0 * i as f32 / 24_000.0).sin())
        .collect();
    encode_transport(&pack_pcm16(&samples))
}

async fn recording_session(
    host: &ManualHost,
    script: &Script,
    t0: Instant,
) -> (DuplexSession, UnboundedReceiver<SessionEvent>) {
    let (mut session, mut events) = session_with(ScriptedService::new(script.clone()), host);
    session.start(request()).expect("start");
    complete_connect(&mut session, &mut events, t0).await;
    assert_eq!(session.state(), SessionState::Recording);
    (session, events)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_sends_greeting_and_opens_capture() {
    let host = ManualHost::new();
    let script = Script::default();
    let (session, _events) = recording_session(&host, &script, Instant::now()).await;

    assert!(host.is_capturing());
    assert_eq!(host.open_streams(), 2);
    assert_eq!(script.sent(), vec![ClientMessage::greeting("Hello there.")]);
    assert_eq!(session.status().state, SessionState::Recording);
}

#[tokio::test]
async fn stop_while_connecting_ignores_late_connection() {
    let host = ManualHost::new();
    let script = Script::default();
    let (service, gate) = ScriptedService::gated(script.clone());
    let (mut session, mut events) = session_with(service, &host);

    session.start(request()).expect("start");
    assert_eq!(session.state(), SessionState::Connecting);
    assert!(!host.is_capturing());

    session.stop();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(host.open_streams(), 0);

    gate.send(()).expect("connect task waiting");
    complete_connect(&mut session, &mut events, Instant::now()).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(!host.is_capturing());
    assert_eq!(host.open_streams(), 0);
    assert_eq!(script.closes(), 1);
    assert!(script.sent().is_empty());
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let host = ManualHost::new();
    let script = Script::default();
    let (mut session, _events) = recording_session(&host, &script, Instant::now()).await;
    assert!(matches!(
        session.start(request()),
        Err(ParleyError::AlreadyRunning)
    ));
}

#[tokio::test]
async fn stop_releases_everything_and_allows_restart() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;

    session.stop();
    session.stop();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(host.open_streams(), 0);
    assert_eq!(script.closes(), 1);
    assert!(session.scheduler().is_none());

    session.start(request()).expect("restart");
    complete_connect(&mut session, &mut events, t0).await;
    assert_eq!(session.state(), SessionState::Recording);
    assert_eq!(host.open_streams(), 2);
}

#[tokio::test]
async fn drop_releases_devices_and_connection() {
    let host = ManualHost::new();
    let script = Script::default();
    {
        let _ = recording_session(&host, &script, Instant::now()).await;
    }
    assert_eq!(host.open_streams(), 0);
    assert_eq!(script.closes(), 1);
}

#[tokio::test]
async fn permission_denied_returns_to_idle() {
    let host = ManualHost::new();
    host.deny_input("microphone blocked");
    let script = Script::default();
    let (mut session, mut events) = session_with(ScriptedService::new(script.clone()), &host);

    session.start(request()).expect("start");
    complete_connect(&mut session, &mut events, Instant::now()).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(host.open_streams(), 0);
    assert_eq!(script.closes(), 1);
    let detail = session.status().detail.expect("error surfaced");
    assert!(detail.contains("microphone blocked"), "detail={detail}");
}

#[tokio::test]
async fn output_device_failure_fails_start() {
    let host = ManualHost::new();
    host.deny_output("no speaker");
    let (mut session, _events) = session_with(ScriptedService::new(Script::default()), &host);
    assert!(matches!(
        session.start(request()),
        Err(ParleyError::AudioDevice(_))
    ));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(host.open_streams(), 0);
}

#[tokio::test]
async fn quota_failure_on_connect_is_signalled() {
    let host = ManualHost::new();
    let service = ScriptedService::failing(Script::default(), "RESOURCE_EXHAUSTED: quota");
    let (mut session, mut events) = session_with(service, &host);
    let mut signals = session.subscribe();

    session.start(request()).expect("start");
    complete_connect(&mut session, &mut events, Instant::now()).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(host.open_streams(), 0);
    assert_eq!(signals.try_recv(), Ok(SessionSignal::QuotaExceeded));
    assert!(session.status().detail.is_some());
}

#[tokio::test]
async fn plain_connect_failure_is_not_a_quota_signal() {
    let host = ManualHost::new();
    let service = ScriptedService::failing(Script::default(), "handshake refused");
    let (mut session, mut events) = session_with(service, &host);
    let mut signals = session.subscribe();

    session.start(request()).expect("start");
    complete_connect(&mut session, &mut events, Instant::now()).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn remote_close_forces_idle() {
    let host = ManualHost::new();
    let script = Script::default();
    let (mut session, mut events) = recording_session(&host, &script, Instant::now()).await;

    script.sink().emit(ServiceEvent::Closed(Some("bye".into())));
    pump(&mut session, &mut events, Instant::now());

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(host.open_streams(), 0);
    assert_eq!(session.status().detail.as_deref(), Some("bye"));
}

#[tokio::test]
async fn mid_session_quota_error_signals_without_stopping() {
    let host = ManualHost::new();
    let script = Script::default();
    let (mut session, mut events) = recording_session(&host, &script, Instant::now()).await;
    let mut signals = session.subscribe();

    script
        .sink()
        .emit(ServiceEvent::Error("429 Too Many Requests".into()));
    pump(&mut session, &mut events, Instant::now());

    assert_eq!(signals.try_recv(), Ok(SessionSignal::QuotaExceeded));
    assert_eq!(session.state(), SessionState::Recording);
    assert!(host.is_capturing());
}

// ---------------------------------------------------------------------------
// Capture path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn frames_inside_quiet_window_are_discarded() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;

    assert!(host.capture(&vec![0.1; 4096]));
    pump(&mut session, &mut events, t0 + Duration::from_millis(1_500));
    assert_eq!(script.sent().len(), 1);

    assert!(host.capture(&vec![0.1; 4096]));
    pump(&mut session, &mut events, t0 + Duration::from_millis(2_500));
    let sent = script.sent();
    assert_eq!(sent.len(), 2);
    match &sent[1] {
        ClientMessage::Media { media } => assert_eq!(media.mime_type, CAPTURE_MIME_TYPE),
        other => panic!("expected media, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Playback path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn interruption_flushes_playback_and_resets_cursor() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;

    script.sink().message(ServerMessage::audio(tone_payload(1.0, 0.5)));
    pump(&mut session, &mut events, t0);
    assert_eq!(session.state(), SessionState::Speaking);
    assert_eq!(session.scheduler().expect("scheduler").active_len(), 1);

    host.render(4_800);
    script.sink().message(ServerMessage::interrupted());
    pump(&mut session, &mut events, t0);

    let scheduler = session.scheduler().expect("scheduler");
    assert_eq!(scheduler.active_len(), 0);
    assert_abs_diff_eq!(scheduler.render_now(), 0.2, epsilon = 1e-9);
    assert_abs_diff_eq!(
        scheduler.next_start_time(),
        scheduler.render_now(),
        epsilon = 1e-9
    );
    assert_eq!(session.state(), SessionState::Recording);
    assert!(host.is_capturing());

    // Nothing left to play.
    assert!(host.render(2_400).iter().all(|&s| s == 0.0));
}

#[tokio::test]
async fn chunks_are_scheduled_back_to_back() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;

    for _ in 0..3 {
        script.sink().message(ServerMessage::audio(tone_payload(0.25, 0.5)));
    }
    pump(&mut session, &mut events, t0);

    let active = session.scheduler().expect("scheduler").active().to_vec();
    assert_eq!(active.len(), 3);
    for pair in active.windows(2) {
        assert_abs_diff_eq!(pair[1].start_at, pair[0].end_at(), epsilon = 1e-9);
    }
}

#[tokio::test]
async fn malformed_chunk_is_dropped_and_turn_continues() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;

    script
        .sink()
        .message(ServerMessage::audio(encode_transport(&[1, 2, 3])));
    pump(&mut session, &mut events, t0);
    assert_eq!(session.state(), SessionState::Recording);
    assert!(session.scheduler().expect("scheduler").is_idle());
    assert!(!session.audio_received());

    script.sink().message(ServerMessage::audio(tone_payload(0.1, 0.5)));
    pump(&mut session, &mut events, t0);
    assert_eq!(session.state(), SessionState::Speaking);
}

#[tokio::test]
async fn speaking_returns_to_recording_once_playback_drains() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;

    script.sink().message(ServerMessage::audio(tone_payload(0.1, 0.5)));
    pump(&mut session, &mut events, t0);
    assert_eq!(session.state(), SessionState::Speaking);

    host.render(4_800);
    session.tick(t0 + Duration::from_millis(200));
    assert_eq!(session.state(), SessionState::Recording);
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn turn_complete_without_audio_raises_no_audio_once() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;
    let mut signals = session.subscribe();

    script.sink().message(ServerMessage::turn_complete());
    script.sink().message(ServerMessage::turn_complete());
    pump(&mut session, &mut events, t0);

    assert_eq!(signals.try_recv(), Ok(SessionSignal::NoAudio));
    assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn inaudible_output_raises_no_audio_after_startup_window() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;
    let mut signals = session.subscribe();

    // A chunk of digital silence: audio was received but nothing is audible.
    script.sink().message(ServerMessage::audio(tone_payload(3.0, 0.0)));
    pump(&mut session, &mut events, t0);

    session.tick(t0);
    host.render(2_400);
    session.tick(t0 + Duration::from_millis(1_900));
    assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));

    session.tick(t0 + Duration::from_millis(2_100));
    assert_eq!(signals.try_recv(), Ok(SessionSignal::NoAudio));
}

#[tokio::test]
async fn audible_output_raises_speaking_started() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;
    let mut signals = session.subscribe();

    script.sink().message(ServerMessage::audio(tone_payload(1.0, 0.5)));
    pump(&mut session, &mut events, t0);

    let mut started = false;
    for i in 0..40u64 {
        host.render(256);
        session.tick(t0 + Duration::from_millis(16 * i));
        if let Ok(signal) = signals.try_recv() {
            assert_eq!(signal, SessionSignal::SpeakingStarted);
            started = true;
            break;
        }
    }
    assert!(started, "output never became audible");
}

#[tokio::test]
async fn slow_first_reply_is_not_reported_as_silence() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;
    let mut signals = session.subscribe();

    // The service takes three seconds to answer; the startup timer runs out
    // with nothing received.
    for ms in [0u64, 1_000, 2_100, 3_000] {
        session.tick(t0 + Duration::from_millis(ms));
    }
    assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));

    script.sink().message(ServerMessage::audio(tone_payload(1.0, 0.5)));
    pump(&mut session, &mut events, t0 + Duration::from_millis(3_000));
    assert_eq!(session.state(), SessionState::Speaking);

    // First tick lands before the device has pulled any of the reply.
    session.tick(t0 + Duration::from_millis(3_016));
    assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));

    let mut seen = Vec::new();
    for i in 2..40u64 {
        host.render(256);
        session.tick(t0 + Duration::from_millis(3_000 + 16 * i));
        while let Ok(signal) = signals.try_recv() {
            seen.push(signal);
        }
    }
    assert_eq!(seen, vec![SessionSignal::SpeakingStarted]);
}

#[tokio::test]
async fn extended_quiet_reaches_subscribers_without_ending_session() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;
    let mut signals = session.subscribe();

    script.sink().message(ServerMessage::audio(tone_payload(0.25, 0.5)));
    pump(&mut session, &mut events, t0);

    // Play the reply out and let the meter decay to silence.
    let mut seen = Vec::new();
    for i in 0..120u64 {
        host.render(256);
        session.tick(t0 + Duration::from_millis(16 * i));
        while let Ok(signal) = signals.try_recv() {
            seen.push(signal);
        }
    }
    assert_eq!(seen, vec![SessionSignal::SpeakingStarted]);
    assert_eq!(session.state(), SessionState::Recording);

    host.render(256);
    session.tick(t0 + Duration::from_secs(13));
    assert_eq!(signals.try_recv(), Ok(SessionSignal::ExtendedQuiet));
    assert_eq!(session.state(), SessionState::Recording);
    assert!(host.is_capturing());
    assert_eq!(script.closes(), 0);

    // Latched until output becomes audible again.
    session.tick(t0 + Duration::from_secs(14));
    assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn interruption_silences_the_output_meter() {
    let host = ManualHost::new();
    let script = Script::default();
    let t0 = Instant::now();
    let (mut session, mut events) = recording_session(&host, &script, t0).await;
    let mut signals = session.subscribe();

    script.sink().message(ServerMessage::audio(tone_payload(1.0, 0.5)));
    pump(&mut session, &mut events, t0);
    host.render(4_800);

    script.sink().message(ServerMessage::interrupted());
    pump(&mut session, &mut events, t0);

    // Flushed audio never reaches the monitor.
    for i in 0..10u64 {
        host.render(256);
        session.tick(t0 + Duration::from_millis(16 * i));
    }
    assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(session.band_levels(Direction::Output), [0.0; 8]);
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spawned_loop_runs_and_shuts_down_cleanly() {
    let host = ManualHost::new();
    let script = Script::default();
    let (handle, join) = parley_core::spawn(
        SessionConfig::default(),
        Arc::new(ScriptedService::new(script.clone())),
        Box::new(host.clone()),
    );

    handle.start(request()).await.expect("start");
    let deadline = Instant::now() + Duration::from_secs(2);
    while handle.status().state != SessionState::Recording {
        assert!(Instant::now() < deadline, "never reached Recording");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(
        handle.start(request()).await,
        Err(ParleyError::AlreadyRunning)
    ));

    handle.shutdown();
    join.await.expect("session task");
    assert_eq!(handle.status().state, SessionState::Stopped);
    assert_eq!(host.open_streams(), 0);
    assert_eq!(script.closes(), 1);
    assert!(handle.stop().is_err());
}
