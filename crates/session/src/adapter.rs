//! Owns the transport and funnels its events into the controller.
//!
//! Every successful `connect` starts a new *generation*.  Events are tagged
//! with the generation of the session that produced them, so the
//! controller can drop anything a torn-down session still had in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wb_transport::{AuthStore, OutboundPayload, Transport, TransportError, TransportEvent};

/// Buffer between a transport session and its forwarder.
const SESSION_EVENT_BUFFER: usize = 32;

/// A transport event stamped with the session generation that emitted it.
#[derive(Debug, Clone)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

pub struct TransportAdapter {
    transport: Arc<dyn Transport>,
    auth: Option<Arc<AuthStore>>,
    out: mpsc::Sender<TaggedEvent>,
    connect_timeout: Duration,
    generation: u64,
    forwarder: Option<JoinHandle<()>>,
}

impl TransportAdapter {
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: Option<AuthStore>,
        out: mpsc::Sender<TaggedEvent>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            auth: auth.map(Arc::new),
            out,
            connect_timeout,
            generation: 0,
            forwarder: None,
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_session(&self) -> bool {
        self.transport.has_session()
    }

    /// Open a transport session.  Succeeds without a second session when
    /// one already exists.
    pub async fn connect(&mut self) -> Result<u64, TransportError> {
        if self.transport.has_session() {
            return Ok(self.generation);
        }
        self.stop_forwarder();
        self.generation += 1;
        let generation = self.generation;

        let (tx, rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        self.forwarder = Some(tokio::spawn(forward(
            generation,
            rx,
            self.out.clone(),
            self.auth.clone(),
        )));

        let opened = match tokio::time::timeout(self.connect_timeout, self.transport.open(tx)).await
        {
            Ok(r) => r,
            Err(_) => {
                self.transport.close("connect timed out").await;
                Err(TransportError::Timeout)
            }
        };
        if let Err(e) = opened {
            tracing::warn!(
                transport = self.transport.name(),
                generation,
                error = %e,
                "transport connect failed"
            );
            self.stop_forwarder();
            self.generation += 1;
            return Err(e);
        }
        tracing::info!(transport = self.transport.name(), generation, "transport session opened");
        Ok(generation)
    }

    /// Tear down the current session.  Events it still emits are stale.
    pub async fn disconnect(&mut self, reason: &str) {
        self.transport.close(reason).await;
        self.stop_forwarder();
        self.generation += 1;
    }

    pub async fn restart_pairing(&self) -> Result<(), TransportError> {
        self.transport.restart_pairing().await
    }

    pub fn has_stored_credentials(&self) -> bool {
        self.auth.as_ref().is_some_and(|a| a.has_credentials())
    }

    /// Owner JID recorded with the persisted credentials, if any.
    pub fn stored_owner(&self) -> Option<String> {
        let store = self.auth.as_ref()?;
        match store.load() {
            Ok(creds) => creds?.get("me")?.as_str().map(str::to_owned),
            Err(e) => {
                tracing::warn!(error = %e, "stored transport credentials unreadable");
                None
            }
        }
    }

    pub fn auth_path(&self) -> Option<String> {
        self.auth.as_ref().map(|a| a.path().display().to_string())
    }

    /// Wipe persisted transport credentials.  Returns whether a store is
    /// configured and the wipe succeeded.
    pub fn clear_stored_credentials(&self) -> bool {
        match &self.auth {
            Some(store) => match store.clear() {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "failed to clear transport credentials");
                    false
                }
            },
            None => false,
        }
    }

    fn stop_forwarder(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

/// Bounded send for callers holding a transport cloned out of the
/// controller task.
pub async fn send_with_timeout(
    transport: &dyn Transport,
    jid: &str,
    payload: &OutboundPayload,
    timeout: Duration,
) -> Result<String, TransportError> {
    tokio::time::timeout(timeout, transport.send(jid, payload))
        .await
        .map_err(|_| TransportError::Timeout)?
}

async fn forward(
    generation: u64,
    mut rx: mpsc::Receiver<TransportEvent>,
    out: mpsc::Sender<TaggedEvent>,
    auth: Option<Arc<AuthStore>>,
) {
    while let Some(event) = rx.recv().await {
        if let TransportEvent::CredentialsUpdated(creds) = &event {
            match &auth {
                Some(store) => {
                    if let Err(e) = store.save(creds) {
                        tracing::error!(generation, error = %e, "failed to persist transport credentials");
                    }
                }
                None => tracing::debug!(generation, "credential update ignored, no auth store"),
            }
            continue;
        }
        tracing::debug!(generation, event = event.kind(), "transport event");
        if out.send(TaggedEvent { generation, event }).await.is_err() {
            break;
        }
    }
}
