//! Transport trait, events, payloads and errors.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

/// Channel on which a transport reports session events.
pub type EventSink = mpsc::Sender<TransportEvent>;

/// Something that happened to the live transport session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The remote side wants the device paired; carries the raw string
    /// that must be encoded into a scannable QR.
    PairingChallenge(String),
    /// The session is authenticated and can send.
    Opened,
    /// The session ended.  `recoverable == false` means the device was
    /// logged out and a new pairing is required.
    Closed { cause: String, recoverable: bool },
    /// The transport hit a condition it cannot recover from.
    FatalError(String),
    /// The transport's credential blob changed and should be persisted.
    CredentialsUpdated(serde_json::Value),
}

impl TransportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PairingChallenge(_) => "pairing_challenge",
            Self::Opened => "opened",
            Self::Closed { .. } => "closed",
            Self::FatalError(_) => "fatal_error",
            Self::CredentialsUpdated(_) => "credentials_updated",
        }
    }
}

/// Outbound message body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundPayload {
    Text { body: String },
    Image { url: String, caption: Option<String> },
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bridge HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no open transport session")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(String),

    #[error("timeout waiting for transport")]
    Timeout,

    #[error("device logged out")]
    LoggedOut,
}

/// The messaging transport capability.
///
/// Implementations hold at most one session.  `open` on a transport that
/// already has a session returns `Ok(())` without creating a second one.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short identifier for logs (`"bridge"`, `"loopback"`).
    fn name(&self) -> &'static str;

    /// Establish a session from persisted credentials.  Events for this
    /// session go to `events` until it closes.
    async fn open(&self, events: EventSink) -> Result<(), TransportError>;

    /// Tear down the session, releasing its resources.  No-op without one.
    async fn close(&self, reason: &str);

    /// Log the unpaired session out and start a fresh pairing handshake,
    /// which yields a new `PairingChallenge`.  Fails with `NotConnected`
    /// when there is no session to restart.
    async fn restart_pairing(&self) -> Result<(), TransportError>;

    /// Send `payload` to `jid` and return the transport's message id.
    async fn send(&self, jid: &str, payload: &OutboundPayload) -> Result<String, TransportError>;

    /// Whether a session exists (paired or not).
    fn has_session(&self) -> bool;
}
