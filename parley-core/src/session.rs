//! Duplex session state machine.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start()──► Connecting ──connected──► Recording ◄──► Speaking
//!  ▲                    │                        │   ▲
//!  │                    │ open failed            │   └── Interrupted (flush)
//!  └────────────────────┴──── stop() / remote close / teardown
//! ```
//!
//! `Stopped` is entered once, when [`DuplexSession::run`] exits.
//!
//! ## Event flow
//!
//! Everything that happens off the session loop is turned into a
//! [`SessionEvent`] and delivered through one unbounded channel:
//!
//! - capture frames from the device pump thread
//! - the result of the asynchronous connect task
//! - message/error/close callbacks from the dialog service
//!
//! Every event carries the attempt number it was created under. Starting,
//! stopping or releasing a session bumps the attempt, so callbacks from an
//! abandoned attempt (a connect that resolves after `stop()`, a close raised
//! by our own teardown) are recognised and ignored.
//!
//! All mutation of the scheduler, monitor and connection happens on the
//! session loop; the device callbacks only touch lock-free rings.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::audio::graph::{AudioGraph, Direction, FrameDelivery};
use crate::audio::host::AudioHost;
use crate::audio::WAVEFORM_BANDS;
use crate::buffering::AudioFrame;
use crate::codec::{decode_playback, decode_transport, encode_capture};
use crate::config::{SessionConfig, StartRequest};
use crate::error::{ParleyError, Result};
use crate::ipc::events::{SessionSignal, SessionState, SessionStatus};
use crate::monitor::{MonitorSignal, SilenceMonitor};
use crate::scheduler::PlaybackScheduler;
use crate::service::{
    is_quota_exhausted, ClientMessage, DialogConnection, DialogService, ServerMessage,
    ServiceEvent, ServiceEventSink,
};

/// Capacity of the signal broadcast channel.
const SIGNAL_CAPACITY: usize = 32;

/// Input to the session loop from outside it.
pub enum SessionEvent {
    /// A completed capture frame.
    Captured { attempt: u64, frame: AudioFrame },
    /// The connect task finished.
    Connected {
        attempt: u64,
        result: Result<Box<dyn DialogConnection>>,
    },
    /// A callback from the dialog service.
    Service { attempt: u64, event: ServiceEvent },
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Captured { attempt, frame } => f
                .debug_struct("Captured")
                .field("attempt", attempt)
                .field("samples", &frame.samples.len())
                .finish(),
            Self::Connected { attempt, result } => f
                .debug_struct("Connected")
                .field("attempt", attempt)
                .field("ok", &result.is_ok())
                .finish(),
            Self::Service { attempt, event } => f
                .debug_struct("Service")
                .field("attempt", attempt)
                .field("event", event)
                .finish(),
        }
    }
}

/// Commands accepted by a running session loop.
pub enum SessionCommand {
    Start(StartRequest, oneshot::Sender<Result<()>>),
    Stop,
    /// Tear down and exit the loop.
    Shutdown,
}

/// One live conversation.
pub struct DuplexSession {
    config: SessionConfig,
    service: Arc<dyn DialogService>,
    graph: AudioGraph,
    scheduler: Option<PlaybackScheduler>,
    monitor: SilenceMonitor,
    connection: Option<Box<dyn DialogConnection>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    signals: broadcast::Sender<SessionSignal>,
    status: Arc<Mutex<SessionStatus>>,
    state: SessionState,
    attempt: u64,
    pending_greeting: Option<String>,
    recording_since: Option<Instant>,
    audio_received: bool,
    no_audio_raised: bool,
}

impl DuplexSession {
    /// Build an idle session.
    ///
    /// The returned receiver carries this session's events; feed them back
    /// through [`handle_event`](Self::handle_event), or hand both to
    /// [`run`](Self::run).
    pub fn new(
        config: SessionConfig,
        service: Arc<dyn DialogService>,
        host: Box<dyn AudioHost>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let monitor = SilenceMonitor::new(
            config.silence_threshold,
            config.startup_quiet,
            config.extended_quiet,
        );
        let session = Self {
            graph: AudioGraph::new(host, config.clone()),
            config,
            service,
            scheduler: None,
            monitor,
            connection: None,
            events_tx,
            signals,
            status: Arc::new(Mutex::new(SessionStatus::default())),
            state: SessionState::Idle,
            attempt: 0,
            pending_greeting: None,
            recording_since: None,
            audio_received: false,
            no_audio_raised: false,
        };
        (session, events_rx)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// `Idle → Connecting`: open the audio graph and begin connecting.
    ///
    /// Must be called inside a Tokio runtime; the connect runs as a task and
    /// its outcome arrives later as [`SessionEvent::Connected`].
    ///
    /// # Errors
    /// - `AlreadyRunning` unless the session is `Idle`.
    /// - The host's error if the output device cannot be opened; the session
    ///   stays `Idle`.
    pub fn start(&mut self, request: StartRequest) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(ParleyError::AlreadyRunning);
        }

        self.attempt += 1;
        self.audio_received = false;
        self.no_audio_raised = false;
        self.recording_since = None;
        self.monitor.reset();
        self.set_detail(None);
        self.set_state(SessionState::Connecting);

        let opened = self
            .graph
            .open()
            .and_then(|()| self.graph.render().cloned().ok_or(ParleyError::GraphClosed));
        let render = match opened {
            Ok(render) => render,
            Err(e) => {
                error!(error = %e, "failed to open audio graph");
                self.release();
                self.set_detail(Some(e.to_string()));
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };
        self.scheduler = Some(PlaybackScheduler::new(render));
        self.pending_greeting = Some(request.greeting);

        let attempt = self.attempt;
        let service = Arc::clone(&self.service);
        let sink = ServiceEventSink::new(attempt, self.events_tx.clone());
        let tx = self.events_tx.clone();
        let connect = request.connect;
        info!(
            attempt,
            model = connect.model.as_str(),
            voice = connect.voice.as_str(),
            "session connecting"
        );
        tokio::spawn(async move {
            let result = service.connect(connect, sink).await;
            // A closed loop drops the connection, which releases it.
            let _ = tx.send(SessionEvent::Connected { attempt, result });
        });
        Ok(())
    }

    /// Any state `→ Idle`: release capture, playback, connection and graph.
    ///
    /// Safe in every state, including `Connecting`; a connect still in
    /// flight is closed as soon as it resolves.
    pub fn stop(&mut self) {
        let was = self.state;
        self.release();
        if was == SessionState::Stopped {
            return;
        }
        if was.is_active() {
            info!(from = ?was, "session stopped");
        }
        self.set_state(SessionState::Idle);
    }

    /// Release every resource exactly once and invalidate outstanding events.
    fn release(&mut self) {
        self.attempt += 1;
        self.graph.detach_capture();
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.flush();
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.graph.close();
        self.pending_greeting = None;
        self.recording_since = None;
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Apply one event, observed at `now`.
    pub fn handle_event(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Connected { attempt, result } => self.on_connected(attempt, result, now),
            SessionEvent::Captured { attempt, frame } if attempt == self.attempt => {
                self.on_captured(frame, now)
            }
            SessionEvent::Service { attempt, event } if attempt == self.attempt => {
                self.on_service(event)
            }
            stale => trace!(event = ?stale, current = self.attempt, "ignoring stale event"),
        }
    }

    fn on_connected(
        &mut self,
        attempt: u64,
        result: Result<Box<dyn DialogConnection>>,
        now: Instant,
    ) {
        if attempt != self.attempt || self.state != SessionState::Connecting {
            if let Ok(mut connection) = result {
                debug!(attempt, "abandoned connect resolved late; closing it");
                connection.close();
            }
            return;
        }

        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                let detail = e.to_string();
                if e.is_quota() || is_quota_exhausted(&detail) {
                    self.emit(SessionSignal::QuotaExceeded);
                }
                error!(error = %e, "connection failed");
                self.release();
                self.set_detail(Some(detail));
                self.set_state(SessionState::Idle);
                return;
            }
        };
        self.connection = Some(connection);

        let tx = self.events_tx.clone();
        let attempt = self.attempt;
        let deliver: FrameDelivery = Box::new(move |frame| {
            let _ = tx.send(SessionEvent::Captured { attempt, frame });
        });
        if let Err(e) = self.graph.attach_capture(deliver) {
            error!(error = %e, "microphone unavailable");
            self.release();
            self.set_detail(Some(e.to_string()));
            self.set_state(SessionState::Idle);
            return;
        }

        if let Some(greeting) = self.pending_greeting.take() {
            self.send(ClientMessage::greeting(greeting));
        }
        self.recording_since = Some(now);
        self.set_state(SessionState::Recording);
    }

    fn on_captured(&mut self, frame: AudioFrame, now: Instant) {
        if !self.state.is_capturing() {
            return;
        }
        let Some(since) = self.recording_since else {
            return;
        };
        if now.saturating_duration_since(since) < self.config.send_quiet_window {
            trace!(samples = frame.samples.len(), "frame dropped inside quiet window");
            return;
        }
        self.send(ClientMessage::Media {
            media: encode_capture(&frame),
        });
    }

    fn on_service(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::Message(message) => self.on_message(message),
            ServiceEvent::Error(message) => {
                if is_quota_exhausted(&message) {
                    self.emit(SessionSignal::QuotaExceeded);
                }
                warn!(error = message.as_str(), "dialog service error");
                self.set_detail(Some(message));
            }
            ServiceEvent::Closed(reason) => {
                info!(reason = reason.as_deref().unwrap_or(""), "remote closed the session");
                self.release();
                if let Some(reason) = reason {
                    self.set_detail(Some(reason));
                }
                self.set_state(SessionState::Idle);
            }
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        if message.interrupted {
            self.set_state(SessionState::Interrupted);
            if let Some(scheduler) = self.scheduler.as_mut() {
                let flushed = scheduler.flush();
                info!(flushed, "interrupted; playback flushed");
            }
            self.graph.reset_meter(Direction::Output);
            self.set_state(SessionState::Recording);
            return;
        }

        if let Some(audio) = message.audio {
            let decoded = decode_transport(&audio.data).and_then(|bytes| {
                decode_playback(
                    &bytes,
                    self.config.render_sample_rate,
                    self.config.render_channels,
                )
            });
            match (decoded, self.scheduler.as_mut()) {
                (Ok(mut segment), Some(scheduler)) => {
                    let entry = scheduler.schedule(&mut segment);
                    debug!(
                        segment = entry.id,
                        start_at = entry.start_at,
                        duration = entry.duration,
                        "remote audio scheduled"
                    );
                    self.audio_received = true;
                    if self.state == SessionState::Recording {
                        self.set_state(SessionState::Speaking);
                    }
                }
                (Ok(_), None) => debug!("audio arrived without a render graph; dropped"),
                (Err(e), _) => warn!(error = %e, "dropping malformed audio chunk"),
            }
        }

        if message.turn_complete {
            debug!(audio_received = self.audio_received, "turn complete");
            if !self.audio_received {
                self.raise_no_audio();
            }
        }
    }

    /// Periodic work: reap finished segments, meter both directions and run
    /// the silence monitor.
    pub fn tick(&mut self, now: Instant) {
        if !self.state.is_capturing() {
            return;
        }
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.reap();
            if self.state == SessionState::Speaking && scheduler.is_idle() {
                self.set_state(SessionState::Recording);
            }
        }

        self.graph.sample_amplitude(Direction::Input);
        let output = self.graph.sample_amplitude(Direction::Output);
        match self.monitor.tick(now, output, self.audio_received) {
            Some(MonitorSignal::NoAudio) => self.raise_no_audio(),
            Some(MonitorSignal::SpeakingStarted) => self.emit(SessionSignal::SpeakingStarted),
            Some(MonitorSignal::ExtendedQuiet) => self.emit(SessionSignal::ExtendedQuiet),
            None => {}
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn send(&mut self, message: ClientMessage) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if let Err(e) = connection.send(message) {
            warn!(error = %e, "failed to send to dialog service");
        }
    }

    fn raise_no_audio(&mut self) {
        if self.no_audio_raised {
            return;
        }
        self.no_audio_raised = true;
        warn!("no audible response this turn");
        self.emit(SessionSignal::NoAudio);
    }

    fn emit(&self, signal: SessionSignal) {
        debug!(?signal, "signal");
        // No subscribers is fine.
        let _ = self.signals.send(signal);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "session state");
        }
        self.state = state;
        self.status.lock().state = state;
    }

    fn set_detail(&self, detail: Option<String>) {
        self.status.lock().detail = detail;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }

    pub fn scheduler(&self) -> Option<&PlaybackScheduler> {
        self.scheduler.as_ref()
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    /// Waveform bars for one direction, as of the last tick.
    pub fn band_levels(&self, direction: Direction) -> [f32; WAVEFORM_BANDS] {
        self.graph.band_levels(direction)
    }

    /// Whether any remote audio has arrived since the last start.
    pub fn audio_received(&self) -> bool {
        self.audio_received
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// Drive the session until `Shutdown` or until every handle is dropped.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Start(request, reply)) => {
                        let _ = reply.send(self.start(request));
                    }
                    Some(SessionCommand::Stop) => self.stop(),
                    Some(SessionCommand::Shutdown) | None => break,
                },
                Some(event) = events.recv() => self.handle_event(event, Instant::now()),
                _ = ticker.tick() => self.tick(Instant::now()),
            }
        }

        self.stop();
        self.set_state(SessionState::Stopped);
        info!("session loop exited");
    }
}

impl Drop for DuplexSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Cloneable control handle for a session running on its own task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    signals: broadcast::Sender<SessionSignal>,
    status: Arc<Mutex<SessionStatus>>,
}

impl SessionHandle {
    /// Start a session and wait for the `Idle → Connecting` step.
    ///
    /// Connection and microphone outcomes arrive later; watch
    /// [`status`](Self::status) and the signal stream.
    pub async fn start(&self, request: StartRequest) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Start(request, reply_tx))
            .map_err(|_| ParleyError::NotRunning)?;
        reply_rx.await.map_err(|_| ParleyError::NotRunning)?
    }

    pub fn stop(&self) -> Result<()> {
        self.commands
            .send(SessionCommand::Stop)
            .map_err(|_| ParleyError::NotRunning)
    }

    /// Ask the loop to tear down and exit.
    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().clone()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Spawn a session loop on the current runtime.
pub fn spawn(
    config: SessionConfig,
    service: Arc<dyn DialogService>,
    host: Box<dyn AudioHost>,
) -> (SessionHandle, JoinHandle<()>) {
    let (session, events) = DuplexSession::new(config, service, host);
    let (commands, command_rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        commands,
        signals: session.signals.clone(),
        status: Arc::clone(&session.status),
    };
    let join = tokio::spawn(session.run(command_rx, events));
    (handle, join)
}
