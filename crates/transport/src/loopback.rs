//! In-process transport.
//!
//! Nothing leaves the host: `open` issues a synthetic pairing challenge and
//! sends are captured in memory.  The paired [`LoopbackHandle`] plays the
//! remote side: it can mark the device as scanned, drop the connection,
//! fail the next connect, and inspect what was sent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::{EventSink, OutboundPayload, Transport, TransportError, TransportEvent};

/// A message captured by the loopback transport.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub message_id: String,
    pub jid: String,
    pub payload: OutboundPayload,
    pub sent_at: DateTime<Utc>,
}

#[derive(Default)]
struct LoopbackState {
    events: Option<EventSink>,
    paired: bool,
    opens: u32,
    restarts: u32,
    challenges: u32,
    sent: Vec<SentRecord>,
    fail_next_open: Option<String>,
    fail_sends: Option<String>,
    manual_challenge: bool,
}

impl LoopbackState {
    fn next_challenge(&mut self) -> String {
        self.challenges += 1;
        format!("2@loopback-challenge-{}", self.challenges)
    }
}

pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

/// Remote-side controls for a [`LoopbackTransport`].
#[derive(Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, LoopbackHandle) {
        let state = Arc::new(Mutex::new(LoopbackState::default()));
        (
            Self {
                state: state.clone(),
            },
            LoopbackHandle { state },
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn open(&self, events: EventSink) -> Result<(), TransportError> {
        let challenge = {
            let mut st = self.state.lock();
            if st.events.is_some() {
                return Ok(());
            }
            if let Some(msg) = st.fail_next_open.take() {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    msg,
                )));
            }
            st.opens += 1;
            st.paired = false;
            st.events = Some(events.clone());
            (!st.manual_challenge).then(|| st.next_challenge())
        };

        if let Some(raw) = challenge {
            let _ = events.send(TransportEvent::PairingChallenge(raw)).await;
        }
        Ok(())
    }

    async fn close(&self, reason: &str) {
        let mut st = self.state.lock();
        if st.events.take().is_some() {
            tracing::debug!(reason, "loopback session closed");
        }
        st.paired = false;
    }

    async fn restart_pairing(&self) -> Result<(), TransportError> {
        let (sink, raw) = {
            let mut st = self.state.lock();
            let sink = st.events.clone().ok_or(TransportError::NotConnected)?;
            st.paired = false;
            st.restarts += 1;
            if st.manual_challenge {
                return Ok(());
            }
            (sink, st.next_challenge())
        };
        sink.send(TransportEvent::PairingChallenge(raw))
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    async fn send(&self, jid: &str, payload: &OutboundPayload) -> Result<String, TransportError> {
        let mut st = self.state.lock();
        if st.events.is_none() || !st.paired {
            return Err(TransportError::NotConnected);
        }
        if let Some(msg) = &st.fail_sends {
            return Err(TransportError::Send(msg.clone()));
        }
        let message_id = format!("LB{}", uuid::Uuid::new_v4().simple()).to_uppercase();
        st.sent.push(SentRecord {
            message_id: message_id.clone(),
            jid: jid.to_owned(),
            payload: payload.clone(),
            sent_at: Utc::now(),
        });
        Ok(message_id)
    }

    fn has_session(&self) -> bool {
        self.state.lock().events.is_some()
    }
}

impl LoopbackHandle {
    /// Deliver `event` to the current session.  Returns `false` without one.
    ///
    /// `Closed` and `FatalError` end the session, like a real transport.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sink = {
            let mut st = self.state.lock();
            let sink = match st.events.clone() {
                Some(s) => s,
                None => return false,
            };
            match &event {
                TransportEvent::Opened => st.paired = true,
                TransportEvent::Closed { .. } | TransportEvent::FatalError(_) => {
                    st.paired = false;
                    st.events = None;
                }
                _ => {}
            }
            sink
        };
        sink.send(event).await.is_ok()
    }

    /// The device scanned the QR: report credentials, then `Opened`.
    pub async fn pair(&self, owner_jid: &str) -> bool {
        self.emit(TransportEvent::CredentialsUpdated(serde_json::json!({
            "me": owner_jid,
        })))
        .await
            && self.emit(TransportEvent::Opened).await
    }

    /// Drop the connection with the given cause.
    pub async fn drop_connection(&self, cause: &str, recoverable: bool) -> bool {
        self.emit(TransportEvent::Closed {
            cause: cause.to_owned(),
            recoverable,
        })
        .await
    }

    /// Issue a fresh challenge on the current session (QR rotation).
    pub async fn rotate_challenge(&self) -> bool {
        let raw = self.state.lock().next_challenge();
        self.emit(TransportEvent::PairingChallenge(raw)).await
    }

    /// Make the next `open` fail with a connection-refused I/O error.
    pub fn fail_next_open(&self, message: &str) {
        self.state.lock().fail_next_open = Some(message.to_owned());
    }

    /// Make every send fail (`None` restores normal sends).
    pub fn fail_sends(&self, message: Option<&str>) {
        self.state.lock().fail_sends = message.map(str::to_owned);
    }

    /// Stop `open` and `restart_pairing` from issuing a challenge on their
    /// own; the script then calls [`rotate_challenge`](Self::rotate_challenge)
    /// when it wants one.
    pub fn set_manual_challenge(&self, manual: bool) {
        self.state.lock().manual_challenge = manual;
    }

    /// How many sessions were opened so far.
    pub fn open_count(&self) -> u32 {
        self.state.lock().opens
    }

    /// How many pairing restarts were requested so far.
    pub fn restart_count(&self) -> u32 {
        self.state.lock().restarts
    }

    /// How many challenges were issued so far.
    pub fn challenge_count(&self) -> u32 {
        self.state.lock().challenges
    }

    pub fn has_session(&self) -> bool {
        self.state.lock().events.is_some()
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.state.lock().sent.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn open_is_idempotent_and_issues_one_challenge() {
        let (transport, handle) = LoopbackTransport::new();
        let (tx, mut rx) = mpsc::channel(8);

        transport.open(tx.clone()).await.unwrap();
        transport.open(tx).await.unwrap();

        assert_eq!(handle.open_count(), 1);
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::PairingChallenge(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_requires_pairing() {
        let (transport, handle) = LoopbackTransport::new();
        let (tx, _rx) = mpsc::channel(8);
        transport.open(tx).await.unwrap();

        let payload = OutboundPayload::Text { body: "hola".into() };
        assert!(matches!(
            transport.send("1@s.whatsapp.net", &payload).await,
            Err(TransportError::NotConnected)
        ));

        assert!(handle.pair("999@s.whatsapp.net").await);
        let id = transport.send("1@s.whatsapp.net", &payload).await.unwrap();
        assert!(id.starts_with("LB"));
        assert_eq!(handle.sent().len(), 1);
    }

    #[tokio::test]
    async fn closed_event_ends_session() {
        let (transport, handle) = LoopbackTransport::new();
        let (tx, _rx) = mpsc::channel(8);
        transport.open(tx).await.unwrap();
        assert!(handle.drop_connection("ETIMEDOUT", true).await);
        assert!(!transport.has_session());
        assert!(!handle.drop_connection("again", true).await);
    }

    #[tokio::test]
    async fn fail_next_open_fails_once() {
        let (transport, handle) = LoopbackTransport::new();
        handle.fail_next_open("refused");
        let (tx, _rx) = mpsc::channel(8);
        assert!(transport.open(tx.clone()).await.is_err());
        assert!(transport.open(tx).await.is_ok());
    }

    #[tokio::test]
    async fn manual_mode_waits_for_rotation() {
        let (transport, handle) = LoopbackTransport::new();
        handle.set_manual_challenge(true);
        let (tx, mut rx) = mpsc::channel(8);
        transport.open(tx).await.unwrap();
        transport.restart_pairing().await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.restart_count(), 1);
        assert_eq!(handle.challenge_count(), 0);

        assert!(handle.rotate_challenge().await);
        match rx.recv().await {
            Some(TransportEvent::PairingChallenge(raw)) => {
                assert_eq!(raw, "2@loopback-challenge-1")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn restart_pairing_needs_a_session() {
        let (transport, _handle) = LoopbackTransport::new();
        assert!(matches!(
            transport.restart_pairing().await,
            Err(TransportError::NotConnected)
        ));
    }
}
