//! Remote dialog service boundary.
//!
//! The session talks to the service through two traits:
//!
//! - [`DialogService::connect`] opens one bidirectional stream. It resolves
//!   once the remote side acknowledges the open.
//! - [`DialogConnection`] is the send half of that stream.
//!
//! Inbound traffic (messages, errors, close) is pushed by the service into
//! the [`ServiceEventSink`] it was handed on connect, which forwards it to the
//! session loop tagged with the attempt it belongs to. Late callbacks from an
//! abandoned attempt are therefore recognised and ignored.
//!
//! Transport, authentication and reconnection belong to the implementor.

pub mod echo;

pub use echo::EchoService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::codec::EncodedChunk;
use crate::config::ConnectConfig;
use crate::error::Result;
use crate::session::SessionEvent;

/// Error payload markers that identify resource exhaustion.
const QUOTA_MARKERS: &[&str] = &["RESOURCE_EXHAUSTED", "429"];

/// Whether a service error message reports an exhausted quota.
pub fn is_quota_exhausted(message: &str) -> bool {
    QUOTA_MARKERS.iter().any(|m| message.contains(m))
}

/// Outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// One captured audio frame.
    Media { media: EncodedChunk },
    /// Text turn; the greeting is sent this way with `turn_complete = true`.
    #[serde(rename_all = "camelCase")]
    Turn { turn_text: String, turn_complete: bool },
}

impl ClientMessage {
    pub fn greeting(text: impl Into<String>) -> Self {
        Self::Turn {
            turn_text: text.into(),
            turn_complete: true,
        }
    }
}

/// Inline audio payload of a server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineAudio {
    /// Transport-encoded PCM16.
    pub data: String,
    pub mime_type: String,
}

/// Inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerMessage {
    pub audio: Option<InlineAudio>,
    /// Transcript text; carried through but not interpreted.
    pub transcript: Option<String>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl ServerMessage {
    /// Audio-only message.
    pub fn audio(data: impl Into<String>) -> Self {
        Self {
            audio: Some(InlineAudio {
                data: data.into(),
                mime_type: "audio/pcm;rate=24000".to_string(),
            }),
            ..Self::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }

    pub fn turn_complete() -> Self {
        Self {
            turn_complete: true,
            ..Self::default()
        }
    }
}

/// Connection-level callback from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Message(ServerMessage),
    /// Error callback; the connection may still be alive.
    Error(String),
    /// Remote side closed the stream.
    Closed(Option<String>),
}

/// Where a connection delivers its inbound events.
#[derive(Debug, Clone)]
pub struct ServiceEventSink {
    attempt: u64,
    tx: UnboundedSender<SessionEvent>,
}

impl ServiceEventSink {
    pub(crate) fn new(attempt: u64, tx: UnboundedSender<SessionEvent>) -> Self {
        Self { attempt, tx }
    }

    /// Forward an event to the session. Returns `false` once the session is gone.
    pub fn emit(&self, event: ServiceEvent) -> bool {
        self.tx
            .send(SessionEvent::Service {
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }

    pub fn message(&self, message: ServerMessage) -> bool {
        self.emit(ServiceEvent::Message(message))
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }
}

/// Factory for remote dialog streams.
#[async_trait]
pub trait DialogService: Send + Sync + 'static {
    /// Open a stream and wait for the remote acknowledgement.
    ///
    /// # Errors
    /// Any failure before the open is acknowledged. Quota failures should
    /// carry the remote error text so they can be recognised.
    async fn connect(
        &self,
        config: ConnectConfig,
        events: ServiceEventSink,
    ) -> Result<Box<dyn DialogConnection>>;
}

/// Send half of an open dialog stream.
///
/// Dropping a connection must release it as if `close` had been called.
pub trait DialogConnection: Send {
    fn send(&mut self, message: ClientMessage) -> Result<()>;

    /// Close the stream. Calling it twice is a no-op.
    fn close(&mut self);
}
