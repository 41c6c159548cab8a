//! Session state and the status fan-out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingScan,
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingScan => "awaiting_scan",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The most recent thing that went wrong with the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub code: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Failure {
    pub fn new(code: &'static str, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            code,
            message: message.into(),
            at,
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Increases by one per published change.  A subscriber never sees a
    /// lower `seq` after a higher one.
    pub seq: u64,
    pub state: SessionState,
    pub connected: bool,
    pub has_active_credential: bool,
    pub credential_time_remaining: u64,
    pub credential_expires_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub retry_pending: bool,
    pub last_failure: Option<Failure>,
    pub at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Fields that make two snapshots "different" for publishing purposes.
    /// The countdown alone does not; a replaced credential does.
    #[allow(clippy::type_complexity)]
    fn key(
        &self,
    ) -> (
        SessionState,
        Option<DateTime<Utc>>,
        u32,
        bool,
        Option<&'static str>,
    ) {
        (
            self.state,
            self.credential_expires_at,
            self.retry_count,
            self.retry_pending,
            self.last_failure.as_ref().map(|f| f.code),
        )
    }
}

/// Best-effort broadcast of status changes.
///
/// Slow subscribers lose the oldest snapshots (`RecvError::Lagged`) rather
/// than holding the controller back.
pub struct StatusPublisher {
    tx: broadcast::Sender<StatusSnapshot>,
    seq: u64,
    last: Option<StatusSnapshot>,
}

impl StatusPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: 0,
            last: None,
        }
    }

    pub fn sender(&self) -> broadcast::Sender<StatusSnapshot> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Publish `snapshot` if it differs from the last one sent.  The
    /// snapshot's `seq` is assigned here.  Returns whether it went out.
    pub fn publish(&mut self, mut snapshot: StatusSnapshot) -> bool {
        if self.last.as_ref().map(StatusSnapshot::key) == Some(snapshot.key()) {
            return false;
        }
        self.seq += 1;
        snapshot.seq = self.seq;
        tracing::debug!(
            seq = snapshot.seq,
            state = %snapshot.state,
            has_active_credential = snapshot.has_active_credential,
            retry_count = snapshot.retry_count,
            "status published"
        );
        // No subscribers is fine.
        let _ = self.tx.send(snapshot.clone());
        self.last = Some(snapshot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(state: SessionState, remaining: u64) -> StatusSnapshot {
        StatusSnapshot {
            seq: 0,
            state,
            connected: state == SessionState::Connected,
            has_active_credential: remaining > 0,
            credential_time_remaining: remaining,
            credential_expires_at: (remaining > 0).then(|| {
                DateTime::parse_from_rfc3339("2026-03-01T10:01:00Z")
                    .unwrap()
                    .with_timezone(&Utc)
            }),
            retry_count: 0,
            retry_pending: false,
            last_failure: None,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_see_increasing_seq() {
        let mut p = StatusPublisher::new(16);
        let mut rx = p.subscribe();

        assert!(p.publish(snap(SessionState::Connecting, 0)));
        assert!(p.publish(snap(SessionState::AwaitingScan, 60)));
        assert!(p.publish(snap(SessionState::Connected, 0)));

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        let c = rx.recv().await.unwrap();
        assert!(a.seq < b.seq && b.seq < c.seq);
        assert_eq!(c.state, SessionState::Connected);
    }

    #[test]
    fn countdown_alone_is_not_published() {
        let mut p = StatusPublisher::new(16);
        assert!(p.publish(snap(SessionState::AwaitingScan, 60)));
        assert!(!p.publish(snap(SessionState::AwaitingScan, 59)));
        assert_eq!(p.seq(), 1);
    }
}
