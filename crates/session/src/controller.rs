//! The session controller: a single task that owns every piece of session
//! state and applies transitions one at a time.
//!
//! Inputs arrive on three channels (caller commands, tagged transport
//! events, reconnect timer firings) plus an optional expiry sweep tick.  A
//! transport event from a torn-down session, or a timer from a cancelled
//! retry, carries a stale generation and is dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use wb_domain::config::SessionConfig;
use wb_domain::phone;
use wb_domain::templates::{self, TemplateKind, TemplateParams};
use wb_transport::{AuthStore, OutboundPayload, Transport, TransportEvent};

use crate::adapter::{self, TaggedEvent, TransportAdapter};
use crate::backoff::ReconnectBackoff;
use crate::clock::{Clock, SystemClock};
use crate::credential::{CredentialStore, CredentialView, SlotStatus};
use crate::error::SessionError;
use crate::rate_limit::{Decision, RateLimiter, RequesterStats};
use crate::render;
use crate::status::{Failure, SessionState, StatusPublisher, StatusSnapshot};

/// Requester recorded on credentials nobody asked for (the one issued on a
/// plain connect).
pub const SYSTEM_REQUESTER: &str = "system";

/// Requester id used when the caller did not identify itself.
pub const ANONYMOUS_REQUESTER: &str = "anonymous";

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;
const STATUS_BUFFER: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A message accepted by the transport.
#[derive(Debug, Clone, Serialize)]
pub struct SentMessage {
    pub message_id: String,
    pub destination: String,
    /// Template name, or `"image"`.
    pub kind: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QrStatus {
    pub state: SessionState,
    pub has_active_credential: bool,
    /// The last credential lapsed and nothing replaced it yet.
    pub expired: bool,
    pub time_remaining: u64,
    pub issued_for: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconnectionStatus {
    pub state: SessionState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_pending: bool,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_failure: Option<Failure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    /// Persisted transport credentials exist, so a connect can resume
    /// without a new scan.
    pub has_credentials: bool,
    /// Account the stored credentials were paired with.
    pub paired_as: Option<String>,
    pub connected: bool,
    pub store_path: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Reply<T> = oneshot::Sender<T>;
type QrWaiter = oneshot::Sender<Result<CredentialView, SessionError>>;
type QrReceiver = oneshot::Receiver<Result<CredentialView, SessionError>>;

enum Command {
    StartConnection(Reply<Result<SessionState, SessionError>>),
    RequestQr {
        requester: String,
        reply: Reply<Result<QrReceiver, SessionError>>,
    },
    Status(Reply<StatusSnapshot>),
    Credential(Reply<Option<CredentialView>>),
    QrStatus(Reply<QrStatus>),
    RequesterStats {
        requester: String,
        reply: Reply<RequesterStats>,
    },
    ForceExpire {
        reason: String,
        requester: Option<String>,
        reply: Reply<bool>,
    },
    SendPermit(Reply<Result<Arc<dyn Transport>, SessionError>>),
    Reset {
        clear_auth: bool,
        reply: Reply<()>,
    },
    ForceReconnect(Reply<Result<SessionState, SessionError>>),
    Reconnection(Reply<ReconnectionStatus>),
    Auth(Reply<AuthStatus>),
    Shutdown(Reply<()>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionHandle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cloneable front door to the controller task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
    status_tx: broadcast::Sender<StatusSnapshot>,
    qr_wait_timeout: Duration,
    send_timeout: Duration,
}

impl SessionHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Unavailable)?;
        rx.await.map_err(|_| SessionError::Unavailable)
    }

    /// Open the transport session unless one is already underway.
    pub async fn start_connection(&self) -> Result<SessionState, SessionError> {
        self.call(Command::StartConnection).await?
    }

    /// Ask for a fresh pairing QR on behalf of `requester` and wait for the
    /// transport to produce it.
    pub async fn request_new_qr(&self, requester: &str) -> Result<CredentialView, SessionError> {
        let waiter = self
            .call(|reply| Command::RequestQr {
                requester: requester.to_owned(),
                reply,
            })
            .await??;
        match tokio::time::timeout(self.qr_wait_timeout, waiter).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SessionError::Invalidated("controller stopped".into())),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    pub async fn get_status(&self) -> Result<StatusSnapshot, SessionError> {
        self.call(Command::Status).await
    }

    /// The live credential, if any.
    pub async fn get_credential(&self) -> Result<Option<CredentialView>, SessionError> {
        self.call(Command::Credential).await
    }

    pub async fn qr_status(&self) -> Result<QrStatus, SessionError> {
        self.call(Command::QrStatus).await
    }

    pub async fn requester_stats(&self, requester: &str) -> Result<RequesterStats, SessionError> {
        self.call(|reply| Command::RequesterStats {
            requester: requester.to_owned(),
            reply,
        })
        .await
    }

    /// Invalidate the credential slot regardless of state.  Returns whether
    /// a credential was cleared.
    pub async fn force_expire_qr(
        &self,
        reason: &str,
        requester: Option<&str>,
    ) -> Result<bool, SessionError> {
        self.call(|reply| Command::ForceExpire {
            reason: reason.to_owned(),
            requester: requester.map(str::to_owned),
            reply,
        })
        .await
    }

    /// Render `kind` with `params` and send it to `destination`.
    pub async fn send_message(
        &self,
        destination: &str,
        kind: TemplateKind,
        params: &TemplateParams,
    ) -> Result<SentMessage, SessionError> {
        let jid = normalize_destination(destination)?;
        let body = templates::render(kind, params);
        self.send(jid, OutboundPayload::Text { body }, kind.as_str())
            .await
    }

    pub async fn send_image(
        &self,
        destination: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<SentMessage, SessionError> {
        let jid = normalize_destination(destination)?;
        let payload = OutboundPayload::Image {
            url: url.to_owned(),
            caption: caption.map(str::to_owned),
        };
        self.send(jid, payload, "image").await
    }

    async fn send(
        &self,
        jid: String,
        payload: OutboundPayload,
        kind: &str,
    ) -> Result<SentMessage, SessionError> {
        // The send itself runs on the caller's task so a slow transport
        // never stalls the controller.
        let transport = self.call(Command::SendPermit).await??;
        let message_id =
            adapter::send_with_timeout(transport.as_ref(), &jid, &payload, self.send_timeout)
                .await?;
        tracing::info!(message_id = %message_id, destination = %jid, kind, "message sent");
        Ok(SentMessage {
            message_id,
            destination: jid,
            kind: kind.to_owned(),
            sent_at: Utc::now(),
        })
    }

    /// Drop the session and return to `Disconnected`.  With `clear_auth`
    /// the persisted transport credentials are wiped too.
    pub async fn reset(&self, clear_auth: bool) -> Result<(), SessionError> {
        self.call(|reply| Command::Reset { clear_auth, reply }).await
    }

    /// Tear down whatever exists and connect again immediately.
    pub async fn force_reconnect(&self) -> Result<SessionState, SessionError> {
        self.call(Command::ForceReconnect).await?
    }

    pub async fn reconnection_status(&self) -> Result<ReconnectionStatus, SessionError> {
        self.call(Command::Reconnection).await
    }

    pub async fn auth_status(&self) -> Result<AuthStatus, SessionError> {
        self.call(Command::Auth).await
    }

    /// Status changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Close the transport and stop the controller task.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.call(Command::Shutdown).await
    }
}

fn normalize_destination(destination: &str) -> Result<String, SessionError> {
    phone::to_user_jid(destination).map_err(|e| SessionError::InvalidDestination(e.to_string()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionController
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receiving ends the run loop selects over besides commands.
struct Inbox {
    events: mpsc::Receiver<TaggedEvent>,
    timers: mpsc::Receiver<u64>,
}

struct PendingRetry {
    generation: u64,
    due_at: DateTime<Utc>,
    timer: JoinHandle<()>,
}

pub struct SessionController {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    adapter: TransportAdapter,
    inbox: Option<Inbox>,
    credentials: CredentialStore,
    limiter: RateLimiter,
    backoff: ReconnectBackoff,
    publisher: StatusPublisher,

    state: SessionState,
    retry_count: u32,
    retry_generation: u64,
    pending_retry: Option<PendingRetry>,
    timer_tx: mpsc::Sender<u64>,
    last_failure: Option<Failure>,

    qr_waiters: Vec<QrWaiter>,
    pending_requester: Option<String>,
    /// The current transport session has emitted at least one challenge.
    challenge_issued: bool,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        auth_store: Option<AuthStore>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (timer_tx, timer_rx) = mpsc::channel(8);
        Self {
            adapter: TransportAdapter::new(
                transport,
                auth_store,
                events_tx,
                config.connect_timeout(),
            ),
            inbox: Some(Inbox {
                events: events_rx,
                timers: timer_rx,
            }),
            credentials: CredentialStore::new(config.qr_lifetime()),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            backoff: ReconnectBackoff::from(&config.reconnect),
            publisher: StatusPublisher::new(STATUS_BUFFER),
            clock: Arc::new(SystemClock),
            config,
            state: SessionState::Disconnected,
            retry_count: 0,
            retry_generation: 0,
            pending_retry: None,
            timer_tx,
            last_failure: None,
            qr_waiters: Vec::new(),
            pending_requester: None,
            challenge_issued: false,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Start the controller task.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = SessionHandle {
            tx,
            status_tx: self.publisher.sender(),
            qr_wait_timeout: self.config.qr_wait_timeout(),
            send_timeout: self.config.send_timeout(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let Some(mut inbox) = self.inbox.take() else {
            return;
        };
        let mut sweep = self.config.sweep_interval().map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        tracing::info!(
            transport = self.adapter.transport().name(),
            "session controller started"
        );
        self.publish();

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(tagged) = inbox.events.recv() => self.handle_event(tagged).await,
                Some(generation) = inbox.timers.recv() => self.handle_retry_timer(generation).await,
                _ = tick(&mut sweep) => self.sweep(),
            }
        }
        tracing::info!("session controller stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartConnection(reply) => {
                let result = self.start_connection(true).await;
                let _ = reply.send(result);
            }
            Command::RequestQr { requester, reply } => {
                let result = self.request_new_qr(&requester).await;
                let _ = reply.send(result);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.current_status());
            }
            Command::Credential(reply) => {
                let now = self.clock.now();
                let view = self.credentials.get_at(now).map(|c| c.view_at(now));
                self.publish();
                let _ = reply.send(view);
            }
            Command::QrStatus(reply) => {
                let _ = reply.send(self.qr_status());
            }
            Command::RequesterStats { requester, reply } => {
                let _ = reply.send(self.limiter.stats_at(&requester, self.clock.now()));
            }
            Command::ForceExpire {
                reason,
                requester,
                reply,
            } => {
                let _ = reply.send(self.force_expire_qr(&reason, requester.as_deref()));
            }
            Command::SendPermit(reply) => {
                let permit = if self.state == SessionState::Connected {
                    Ok(self.adapter.transport())
                } else {
                    Err(SessionError::NotConnected)
                };
                let _ = reply.send(permit);
            }
            Command::Reset { clear_auth, reply } => {
                self.reset(clear_auth).await;
                let _ = reply.send(());
            }
            Command::ForceReconnect(reply) => {
                tracing::info!(state = %self.state, "forced reconnect");
                self.teardown("forced reconnect").await;
                let result = self.start_connection(true).await;
                let _ = reply.send(result);
            }
            Command::Reconnection(reply) => {
                let _ = reply.send(ReconnectionStatus {
                    state: self.state,
                    retry_count: self.retry_count,
                    max_retries: self.backoff.max_retries,
                    retry_pending: self.pending_retry.is_some(),
                    next_attempt_at: self.pending_retry.as_ref().map(|p| p.due_at),
                    last_failure: self.last_failure.clone(),
                });
            }
            Command::Auth(reply) => {
                let _ = reply.send(AuthStatus {
                    has_credentials: self.adapter.has_stored_credentials(),
                    paired_as: self.adapter.stored_owner(),
                    connected: self.state == SessionState::Connected,
                    store_path: self.adapter.auth_path(),
                });
            }
            // Handled by the run loop.
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    // ── Transitions ────────────────────────────────────────────────

    /// `manual` is true for caller-initiated starts, which clear any
    /// exhausted retry budget.
    async fn start_connection(&mut self, manual: bool) -> Result<SessionState, SessionError> {
        if self.state != SessionState::Disconnected {
            return Ok(self.state);
        }
        self.cancel_retry();
        if manual {
            self.retry_count = 0;
            self.last_failure = None;
        }

        match self.adapter.connect().await {
            Ok(generation) => {
                self.state = SessionState::Connecting;
                self.challenge_issued = false;
                tracing::info!(generation, retry_count = self.retry_count, "connecting");
                self.publish();
                Ok(self.state)
            }
            Err(e) => {
                let err = SessionError::from(e);
                self.last_failure = Some(Failure::new(err.code(), err.to_string(), self.clock.now()));
                self.publish();
                Err(err)
            }
        }
    }

    async fn request_new_qr(&mut self, requester: &str) -> Result<QrReceiver, SessionError> {
        if self.state == SessionState::Connected {
            return Err(SessionError::AlreadyConnected);
        }

        // A regeneration already in flight will fill the slot, so it blocks
        // everyone except the requester it was dispatched for.
        self.qr_waiters.retain(|w| !w.is_closed());
        if !self.qr_waiters.is_empty() {
            if self.pending_requester.as_deref() == Some(requester) {
                tracing::debug!(requester, "QR request joined the pending regeneration");
                return Ok(self.add_waiter());
            }
            let retry_after = self.config.qr_wait_timeout_secs.max(1);
            tracing::info!(
                requester,
                pending_for = ?self.pending_requester,
                retry_after,
                "QR request denied, regeneration pending"
            );
            return Err(SessionError::CredentialActive { retry_after });
        }

        let now = self.clock.now();
        let active = self
            .credentials
            .get_at(now)
            .map(|c| c.time_remaining_at(now));
        if let Decision::Denied(denial) = self.limiter.check_at(requester, active, now) {
            tracing::info!(
                requester,
                reason = ?denial.reason,
                retry_after = denial.retry_after_secs,
                "QR request denied"
            );
            self.publish();
            return Err(denial.into());
        }

        if self.awaiting_first_challenge() {
            // The open already asked the transport for a challenge; a
            // restart now would replace it as soon as it lands.
            tracing::debug!(requester, "QR request waits for the opening challenge");
        } else {
            self.dispatch_regeneration().await?;
        }

        self.limiter.record_at(requester, self.clock.now());
        self.pending_requester = Some(requester.to_owned());
        tracing::info!(requester, state = %self.state, "QR requested");
        Ok(self.add_waiter())
    }

    fn add_waiter(&mut self) -> QrReceiver {
        let (tx, rx) = oneshot::channel();
        self.qr_waiters.push(tx);
        rx
    }

    /// The current session was opened but has not produced its first
    /// challenge yet.
    fn awaiting_first_challenge(&self) -> bool {
        self.state == SessionState::Connecting
            && !self.challenge_issued
            && self.adapter.has_session()
    }

    /// Make the transport produce a new pairing challenge.
    async fn dispatch_regeneration(&mut self) -> Result<(), SessionError> {
        if self.adapter.has_session() {
            match self.adapter.restart_pairing().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "pairing restart failed, opening a fresh session");
                    self.adapter.disconnect("pairing restart failed").await;
                }
            }
        }
        self.state = SessionState::Disconnected;
        self.start_connection(true).await.map(|_| ())
    }

    fn force_expire_qr(&mut self, reason: &str, requester: Option<&str>) -> bool {
        let cleared = self.credentials.invalidate(reason);
        self.pending_requester = None;
        self.fail_waiters(SessionError::Invalidated(reason.to_owned()));

        let counted = match requester {
            Some(r) if self.config.rate_limit.force_expire_counts && r != ANONYMOUS_REQUESTER => {
                self.limiter.record_at(r, self.clock.now());
                true
            }
            _ => false,
        };
        tracing::info!(reason, requester, cleared, counted, "QR force-expired");
        self.publish();
        cleared
    }

    async fn reset(&mut self, clear_auth: bool) {
        tracing::info!(state = %self.state, clear_auth, "session reset");
        self.teardown("reset").await;
        self.last_failure = None;
        if clear_auth {
            self.adapter.clear_stored_credentials();
        }
        self.publish();
    }

    /// Drop the transport session and every piece of per-session state.
    async fn teardown(&mut self, reason: &str) {
        self.cancel_retry();
        self.adapter.disconnect(reason).await;
        self.credentials.invalidate(reason);
        self.pending_requester = None;
        self.fail_waiters(SessionError::Invalidated(format!("session {reason}")));
        self.retry_count = 0;
        self.state = SessionState::Disconnected;
    }

    async fn shutdown(&mut self) {
        self.teardown("shutdown").await;
        self.publish();
    }

    // ── Transport events ───────────────────────────────────────────

    async fn handle_event(&mut self, tagged: TaggedEvent) {
        let current = self.adapter.generation();
        if tagged.generation != current {
            tracing::debug!(
                generation = tagged.generation,
                current,
                event = tagged.event.kind(),
                "stale transport event dropped"
            );
            return;
        }
        match tagged.event {
            TransportEvent::PairingChallenge(raw) => self.on_challenge(raw),
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Closed { cause, recoverable } => {
                self.on_closed(cause, recoverable).await
            }
            TransportEvent::FatalError(detail) => self.on_fatal(detail).await,
            // Persisted by the adapter.
            TransportEvent::CredentialsUpdated(_) => {}
        }
    }

    fn on_challenge(&mut self, raw: String) {
        if self.state == SessionState::Connected {
            tracing::debug!("pairing challenge while connected ignored");
            return;
        }
        let image = match render::qr_data_url(&raw) {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(error = %e, "pairing challenge could not be rendered");
                self.pending_requester = None;
                self.fail_waiters(SessionError::Transport(format!(
                    "unrenderable pairing challenge: {e}"
                )));
                return;
            }
        };

        // A rotated challenge nobody asked for stays with whoever holds the
        // live credential.
        let now = self.clock.now();
        let issued_for = self
            .pending_requester
            .take()
            .or_else(|| self.credentials.get_at(now).map(|c| c.issued_for.clone()))
            .unwrap_or_else(|| SYSTEM_REQUESTER.to_owned());
        self.challenge_issued = true;
        let view = self
            .credentials
            .put_at(image, raw, &issued_for, now)
            .view_at(now);
        self.state = SessionState::AwaitingScan;
        tracing::info!(issued_for = %issued_for, expires_at = %view.expires_at, "pairing QR issued");

        for waiter in self.qr_waiters.drain(..) {
            let _ = waiter.send(Ok(view.clone()));
        }
        self.publish();
    }

    fn on_opened(&mut self) {
        self.credentials.invalidate("connected");
        self.cancel_retry();
        self.retry_count = 0;
        self.last_failure = None;
        self.pending_requester = None;
        self.state = SessionState::Connected;
        self.fail_waiters(SessionError::AlreadyConnected);
        tracing::info!(generation = self.adapter.generation(), "WhatsApp connected");
        self.publish();
    }

    async fn on_closed(&mut self, cause: String, recoverable: bool) {
        self.adapter.disconnect("closed by transport").await;
        self.credentials.invalidate("transport closed");
        self.pending_requester = None;
        self.fail_waiters(SessionError::Invalidated(format!("transport closed: {cause}")));
        let now = self.clock.now();

        if !recoverable {
            tracing::warn!(cause = %cause, "logged out, persisted credentials cleared");
            self.cancel_retry();
            self.adapter.clear_stored_credentials();
            self.retry_count = 0;
            self.state = SessionState::Disconnected;
            self.last_failure = Some(Failure::new("LOGGED_OUT", cause, now));
            self.publish();
            return;
        }

        tracing::warn!(cause = %cause, retry_count = self.retry_count, "connection closed");
        self.last_failure = Some(Failure::new("CONNECTION_CLOSED", cause, now));
        self.on_recoverable_failure();
    }

    async fn on_fatal(&mut self, detail: String) {
        tracing::error!(detail = %detail, "fatal transport error");
        self.teardown("fatal transport error").await;
        self.last_failure = Some(Failure::new("FATAL_ERROR", detail, self.clock.now()));
        self.publish();
    }

    // ── Reconnection ───────────────────────────────────────────────

    /// Count one failed attempt and either schedule the next retry or give
    /// up.
    fn on_recoverable_failure(&mut self) {
        self.retry_count += 1;
        self.state = SessionState::Disconnected;

        if self.backoff.should_give_up(self.retry_count) {
            let err = SessionError::MaxRetriesExceeded;
            tracing::error!(
                retry_count = self.retry_count,
                max_retries = self.backoff.max_retries,
                "giving up on reconnection"
            );
            self.cancel_retry();
            self.last_failure = Some(Failure::new(err.code(), err.to_string(), self.clock.now()));
            self.publish();
            return;
        }

        let delay = self
            .backoff
            .delay_for_retry(self.retry_count, &mut rand::thread_rng());
        self.schedule_retry(delay);
        self.publish();
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry();
        let generation = self.retry_generation;
        let tx = self.timer_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(generation).await;
        });
        let due_at = self.clock.now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.pending_retry = Some(PendingRetry {
            generation,
            due_at,
            timer,
        });
        tracing::info!(
            retry_count = self.retry_count,
            delay_ms = delay.as_millis() as u64,
            generation,
            "reconnect scheduled"
        );
    }

    /// Invalidate any pending retry timer.  A timer that already fired and
    /// sits in the queue is dropped by its stale generation.
    fn cancel_retry(&mut self) {
        self.retry_generation += 1;
        if let Some(pending) = self.pending_retry.take() {
            pending.timer.abort();
            tracing::debug!(generation = pending.generation, "pending reconnect cancelled");
        }
    }

    async fn handle_retry_timer(&mut self, generation: u64) {
        match &self.pending_retry {
            Some(p) if p.generation == generation => {}
            _ => {
                tracing::debug!(generation, "stale reconnect timer ignored");
                return;
            }
        }
        self.pending_retry = None;
        if self.state != SessionState::Disconnected {
            return;
        }

        tracing::info!(retry_count = self.retry_count, "reconnecting");
        if let Err(e) = self.start_connection(false).await {
            tracing::warn!(error = %e, retry_count = self.retry_count, "reconnect attempt failed");
            self.on_recoverable_failure();
        }
    }

    // ── Observability ──────────────────────────────────────────────

    fn sweep(&mut self) {
        self.qr_waiters.retain(|w| !w.is_closed());
        if self.credentials.expire_at(self.clock.now()) {
            tracing::info!("pairing QR expired");
            self.publish();
        }
    }

    fn fail_waiters(&mut self, err: SessionError) {
        for waiter in self.qr_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    fn snapshot(&mut self) -> StatusSnapshot {
        let now = self.clock.now();
        let active = self.credentials.get_at(now).map(|c| (c.time_remaining_at(now), c.expires_at));
        StatusSnapshot {
            seq: self.publisher.seq(),
            state: self.state,
            connected: self.state == SessionState::Connected,
            has_active_credential: active.is_some(),
            credential_time_remaining: active.map_or(0, |(left, _)| left),
            credential_expires_at: active.map(|(_, at)| at),
            retry_count: self.retry_count,
            retry_pending: self.pending_retry.is_some(),
            last_failure: self.last_failure.clone(),
            at: now,
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.publisher.publish(snapshot);
    }

    fn current_status(&mut self) -> StatusSnapshot {
        // Publishing first lets a lazily detected expiry reach subscribers
        // and gives the returned snapshot the matching seq.
        self.publish();
        self.snapshot()
    }

    fn qr_status(&mut self) -> QrStatus {
        let now = self.clock.now();
        let slot = self.credentials.status_at(now);
        let live = self.credentials.get_at(now).cloned();
        self.publish();
        QrStatus {
            state: self.state,
            has_active_credential: live.is_some(),
            expired: matches!(slot, SlotStatus::Expired { .. }),
            time_remaining: match slot {
                SlotStatus::Active { time_remaining } => time_remaining,
                _ => 0,
            },
            issued_for: live.as_ref().map(|c| c.issued_for.clone()),
            expires_at: live.map(|c| c.expires_at),
        }
    }
}

async fn tick(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
