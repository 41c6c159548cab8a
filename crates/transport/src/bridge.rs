//! HTTP transport against an external WhatsApp Web bridge.
//!
//! The bridge (Evolution-API style) owns the WhatsApp Web protocol; this
//! transport only drives its REST surface:
//!
//! - `GET    /instance/connect/{instance}`          → `{ "code": "<raw pairing string>" }`
//! - `GET    /instance/connectionState/{instance}`  → `{ "instance": { "state": "open|connecting|close" } }`
//! - `POST   /instance/create`                      → creates the instance on first use
//! - `DELETE /instance/logout/{instance}`
//! - `POST   /message/sendText/{instance}`          → `{ "key": { "id": "..." } }`
//! - `POST   /message/sendMedia/{instance}`
//!
//! A poll task watches `connectionState` and turns transitions into
//! [`TransportEvent`]s.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use wb_domain::config::BridgeConfig;
use wb_domain::phone::USER_JID_SUFFIX;

use crate::types::{EventSink, OutboundPayload, Transport, TransportError, TransportEvent};

/// Consecutive failed polls before the session is reported closed.
const MAX_POLL_FAILURES: u32 = 3;

/// Remote connection state as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteState {
    Open,
    Connecting,
    Close,
}

impl RemoteState {
    fn parse(body: &Value) -> Option<Self> {
        let raw = body["instance"]["state"]
            .as_str()
            .or_else(|| body["state"].as_str())?;
        match raw {
            "open" | "connected" => Some(Self::Open),
            "connecting" => Some(Self::Connecting),
            "close" | "closed" => Some(Self::Close),
            _ => None,
        }
    }
}

struct ActiveSession {
    id: u64,
    events: EventSink,
    cancel: CancellationToken,
}

struct Shared {
    client: reqwest::Client,
    base_url: String,
    instance: String,
    api_key: Option<String>,
    poll_interval: Duration,
    session: Mutex<Option<ActiveSession>>,
    paired: AtomicBool,
    next_id: AtomicU64,
}

pub struct BridgeTransport {
    shared: Arc<Shared>,
}

impl BridgeTransport {
    pub fn from_config(config: &BridgeConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            shared: Arc::new(Shared {
                client,
                base_url: config.base_url.trim_end_matches('/').to_owned(),
                instance: config.instance.clone(),
                api_key: config.resolve_api_key(),
                poll_interval: config.poll_interval(),
                session: Mutex::new(None),
                paired: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        })
    }
}

impl Shared {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => req.header("apikey", key),
            None => req,
        }
    }

    async fn read_json(resp: reqwest::Response) -> Result<Value, TransportError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::LoggedOut);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Protocol(format!("bridge returned {status}: {body}")));
        }
        Ok(resp.json().await?)
    }

    /// Ask the bridge for the current pairing string, creating the instance
    /// if the bridge does not know it yet.  `None` means already paired.
    async fn fetch_challenge(&self) -> Result<Option<String>, TransportError> {
        let path = format!("instance/connect/{}", self.instance);
        let resp = self.request(reqwest::Method::GET, &path).send().await?;

        let body = if resp.status() == StatusCode::NOT_FOUND {
            tracing::info!(instance = %self.instance, "bridge instance missing, creating it");
            let created = self
                .request(reqwest::Method::POST, "instance/create")
                .json(&json!({
                    "instanceName": self.instance,
                    "qrcode": true,
                    "integration": "WHATSAPP-BAILEYS",
                }))
                .send()
                .await?;
            let created = Self::read_json(created).await?;
            if let Some(code) = extract_code(&created) {
                return Ok(Some(code));
            }
            let retry = self.request(reqwest::Method::GET, &path).send().await?;
            Self::read_json(retry).await?
        } else {
            Self::read_json(resp).await?
        };

        if RemoteState::parse(&body) == Some(RemoteState::Open) {
            return Ok(None);
        }
        extract_code(&body)
            .map(Some)
            .ok_or_else(|| TransportError::Protocol("connect response carried no pairing code".into()))
    }

    async fn fetch_state(&self) -> Result<RemoteState, TransportError> {
        let path = format!("instance/connectionState/{}", self.instance);
        let resp = self.request(reqwest::Method::GET, &path).send().await?;
        let body = Self::read_json(resp).await?;
        RemoteState::parse(&body)
            .ok_or_else(|| TransportError::Protocol(format!("unknown connection state: {body}")))
    }

    async fn fetch_owner(&self) -> Option<String> {
        let path = format!("instance/fetchInstances?instanceName={}", self.instance);
        let resp = self.request(reqwest::Method::GET, &path).send().await.ok()?;
        let body = Self::read_json(resp).await.ok()?;
        let first = body.as_array().and_then(|a| a.first()).unwrap_or(&body);
        first["ownerJid"]
            .as_str()
            .or_else(|| first["instance"]["owner"].as_str())
            .map(str::to_owned)
    }

    /// Clear the session slot if it still belongs to `session_id`.
    fn end_session(&self, session_id: u64) {
        let mut slot = self.session.lock();
        if slot.as_ref().map(|s| s.id) == Some(session_id) {
            *slot = None;
            self.paired.store(false, Ordering::Release);
        }
    }

    async fn poll(self: Arc<Self>, session_id: u64, events: EventSink, cancel: CancellationToken) {
        let mut failures: u32 = 0;
        let mut last = if self.paired.load(Ordering::Acquire) {
            RemoteState::Open
        } else {
            RemoteState::Connecting
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let state = match self.fetch_state().await {
                Ok(s) => {
                    failures = 0;
                    s
                }
                Err(TransportError::LoggedOut) => {
                    self.end_session(session_id);
                    let _ = events
                        .send(TransportEvent::Closed {
                            cause: "loggedOut".into(),
                            recoverable: false,
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "bridge state poll failed");
                    if failures < MAX_POLL_FAILURES {
                        continue;
                    }
                    self.end_session(session_id);
                    let _ = events
                        .send(TransportEvent::Closed {
                            cause: e.to_string(),
                            recoverable: true,
                        })
                        .await;
                    return;
                }
            };

            if state == last {
                continue;
            }
            tracing::debug!(from = ?last, to = ?state, "bridge connection state changed");

            match state {
                RemoteState::Open => {
                    self.paired.store(true, Ordering::Release);
                    let owner = self.fetch_owner().await;
                    let creds = json!({ "instance": self.instance, "me": owner });
                    if events.send(TransportEvent::CredentialsUpdated(creds)).await.is_err()
                        || events.send(TransportEvent::Opened).await.is_err()
                    {
                        return;
                    }
                }
                RemoteState::Close => {
                    let cause = if last == RemoteState::Open {
                        "connection closed"
                    } else {
                        "pairing window closed"
                    };
                    self.end_session(session_id);
                    let _ = events
                        .send(TransportEvent::Closed {
                            cause: cause.into(),
                            recoverable: true,
                        })
                        .await;
                    return;
                }
                RemoteState::Connecting => {
                    self.paired.store(false, Ordering::Release);
                }
            }
            last = state;
        }
    }
}

fn extract_code(body: &Value) -> Option<String> {
    body["code"]
        .as_str()
        .or_else(|| body["qrcode"]["code"].as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
}

#[async_trait]
impl Transport for BridgeTransport {
    fn name(&self) -> &'static str {
        "bridge"
    }

    async fn open(&self, events: EventSink) -> Result<(), TransportError> {
        if self.shared.session.lock().is_some() {
            return Ok(());
        }

        let challenge = self.shared.fetch_challenge().await?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut slot = self.shared.session.lock();
            if slot.is_some() {
                // Another open won the race while we were fetching.
                return Ok(());
            }
            *slot = Some(ActiveSession {
                id,
                events: events.clone(),
                cancel: cancel.clone(),
            });
        }
        self.shared.paired.store(challenge.is_none(), Ordering::Release);

        match challenge {
            Some(code) => {
                let _ = events.send(TransportEvent::PairingChallenge(code)).await;
            }
            None => {
                let _ = events.send(TransportEvent::Opened).await;
            }
        }

        tokio::spawn(self.shared.clone().poll(id, events, cancel));
        tracing::info!(instance = %self.shared.instance, session_id = id, "bridge session opened");
        Ok(())
    }

    async fn close(&self, reason: &str) {
        let session = self.shared.session.lock().take();
        self.shared.paired.store(false, Ordering::Release);
        if let Some(s) = session {
            s.cancel.cancel();
            tracing::info!(session_id = s.id, reason, "bridge session closed");
        }
    }

    async fn restart_pairing(&self) -> Result<(), TransportError> {
        let events = self
            .shared
            .session
            .lock()
            .as_ref()
            .map(|s| s.events.clone())
            .ok_or(TransportError::NotConnected)?;

        let path = format!("instance/logout/{}", self.shared.instance);
        match self.shared.request(reqwest::Method::DELETE, &path).send().await {
            Ok(resp) if !resp.status().is_success() => {
                // Not logged in yet is the common case for an unpaired session.
                tracing::debug!(status = %resp.status(), "bridge logout returned non-success");
            }
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        self.shared.paired.store(false, Ordering::Release);

        let code = self
            .shared
            .fetch_challenge()
            .await?
            .ok_or_else(|| TransportError::Protocol("bridge reports paired after logout".into()))?;
        events
            .send(TransportEvent::PairingChallenge(code))
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    async fn send(&self, jid: &str, payload: &OutboundPayload) -> Result<String, TransportError> {
        if !self.has_session() || !self.shared.paired.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        let number = jid.strip_suffix(USER_JID_SUFFIX).unwrap_or(jid);
        let (path, body) = match payload {
            OutboundPayload::Text { body } => (
                format!("message/sendText/{}", self.shared.instance),
                json!({ "number": number, "text": body }),
            ),
            OutboundPayload::Image { url, caption } => (
                format!("message/sendMedia/{}", self.shared.instance),
                json!({
                    "number": number,
                    "mediatype": "image",
                    "media": url,
                    "caption": caption.clone().unwrap_or_default(),
                }),
            ),
        };

        let resp = self
            .shared
            .request(reqwest::Method::POST, &path)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        let body = Shared::read_json(resp).await.map_err(|e| match e {
            TransportError::LoggedOut => TransportError::LoggedOut,
            other => TransportError::Send(other.to_string()),
        })?;

        body["key"]["id"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| TransportError::Send("bridge response carried no message id".into()))
    }

    fn has_session(&self) -> bool {
        self.shared.session.lock().is_some()
    }
}
