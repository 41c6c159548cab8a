use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use wb_domain::config::SessionConfig;
use wb_domain::templates::{TemplateKind, TemplateParams};
use wb_session::{
    Clock, ManualClock, SessionController, SessionError, SessionHandle, SessionState,
    StatusSnapshot,
};
use wb_transport::{AuthStore, LoopbackHandle, LoopbackTransport, TransportEvent};

struct Harness {
    session: SessionHandle,
    remote: LoopbackHandle,
    clock: ManualClock,
    dir: TempDir,
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn harness(config: SessionConfig) -> Harness {
    let (transport, remote) = LoopbackTransport::new();
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(t0());
    let (session, _task) = SessionController::new(
        config,
        Arc::new(transport),
        Some(AuthStore::new(dir.path())),
    )
    .with_clock(clock.clone())
    .spawn();
    Harness {
        session,
        remote,
        clock,
        dir,
    }
}

async fn wait_for(
    session: &SessionHandle,
    what: &str,
    mut pred: impl FnMut(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    for _ in 0..500 {
        let status = session.get_status().await.unwrap();
        if pred(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_state(session: &SessionHandle, state: SessionState) -> StatusSnapshot {
    wait_for(session, state.as_str(), |s| s.state == state).await
}

async fn wait_for_opens(remote: &LoopbackHandle, n: u32) {
    for _ in 0..1_000 {
        if remote.open_count() >= n && remote.has_session() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transport never reached {n} opens");
}

async fn wait_for_issuance(session: &SessionHandle, requester: &str, n: u64) {
    for _ in 0..500 {
        if session.requester_stats(requester).await.unwrap().total_issued >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{requester} never reached {n} issuances");
}

async fn connected(h: &Harness) {
    h.session.start_connection().await.unwrap();
    wait_for_state(&h.session, SessionState::AwaitingScan).await;
    assert!(h.remote.pair("51999999999@s.whatsapp.net").await);
    wait_for_state(&h.session, SessionState::Connected).await;
}

fn params() -> TemplateParams {
    TemplateParams {
        psychologist: "Dra. Ana Torres".into(),
        date: "12/03/2026".into(),
        time: "10:00".into(),
    }
}

// ── Connection lifecycle ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pairing_flow_issues_then_clears_credential() {
    let h = harness(SessionConfig::default());

    let state = h.session.start_connection().await.unwrap();
    assert_eq!(state, SessionState::Connecting);

    wait_for_state(&h.session, SessionState::AwaitingScan).await;
    let qr = h.session.get_credential().await.unwrap().unwrap();
    assert!(qr.image.starts_with("data:image/svg+xml;base64,"));
    assert_eq!(qr.time_remaining, 60);
    assert_eq!(qr.issued_for, "system");

    assert!(h.remote.pair("51999999999@s.whatsapp.net").await);
    let status = wait_for_state(&h.session, SessionState::Connected).await;
    assert!(status.connected);
    assert!(!status.has_active_credential);
    assert!(h.session.get_credential().await.unwrap().is_none());

    let auth = h.session.auth_status().await.unwrap();
    assert!(auth.has_credentials);
    assert_eq!(auth.paired_as.as_deref(), Some("51999999999@s.whatsapp.net"));
    assert!(h.dir.path().join("creds.json").exists());
}

#[tokio::test(start_paused = true)]
async fn repeated_start_opens_one_session() {
    let h = harness(SessionConfig::default());
    for _ in 0..3 {
        h.session.start_connection().await.unwrap();
    }
    wait_for_state(&h.session, SessionState::AwaitingScan).await;
    h.session.start_connection().await.unwrap();
    assert_eq!(h.remote.open_count(), 1);

    assert!(h.remote.pair("51999999999@s.whatsapp.net").await);
    wait_for_state(&h.session, SessionState::Connected).await;
    assert_eq!(
        h.session.start_connection().await.unwrap(),
        SessionState::Connected
    );
    assert_eq!(h.remote.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_failure_is_reported_and_not_retried() {
    let h = harness(SessionConfig::default());
    h.remote.fail_next_open("connection refused");

    let err = h.session.start_connection().await.unwrap_err();
    assert_eq!(err.code(), "TRANSPORT_ERROR");

    tokio::time::sleep(Duration::from_secs(120)).await;
    let status = h.session.get_status().await.unwrap();
    assert_eq!(status.state, SessionState::Disconnected);
    assert!(!status.retry_pending);
    assert_eq!(h.remote.open_count(), 0);
}

// ── Sending ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn send_requires_connected_session() {
    let h = harness(SessionConfig::default());

    let err = h
        .session
        .send_message("51987654321", TemplateKind::CitaGratis, &params())
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::NotConnected);

    connected(&h).await;
    let sent = h
        .session
        .send_message("+51 987 654 321", TemplateKind::CitaGratis, &params())
        .await
        .unwrap();
    assert!(sent.message_id.starts_with("LB"));
    assert_eq!(sent.destination, "51987654321@s.whatsapp.net");
    assert_eq!(sent.kind, "cita_gratis");
    assert_eq!(h.remote.sent()[0].jid, "51987654321@s.whatsapp.net");

    let img = h
        .session
        .send_image("51987654321", "https://example.com/a.png", Some("hola"))
        .await
        .unwrap();
    assert_eq!(img.kind, "image");

    // Logged out from the phone.
    assert!(h.remote.drop_connection("loggedOut", false).await);
    let status = wait_for_state(&h.session, SessionState::Disconnected).await;
    assert_eq!(status.last_failure.unwrap().code, "LOGGED_OUT");
    assert!(!status.retry_pending);

    let err = h
        .session
        .send_message("51987654321", TemplateKind::CitaGratis, &params())
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::NotConnected);
    assert!(!h.session.auth_status().await.unwrap().has_credentials);
}

#[tokio::test(start_paused = true)]
async fn short_destination_is_rejected() {
    let h = harness(SessionConfig::default());
    connected(&h).await;
    let err = h
        .session
        .send_message("12345", TemplateKind::CitaPagada, &params())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_DESTINATION");
    assert!(h.remote.sent().is_empty());
}

// ── QR requests ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn qr_request_while_credential_active_is_denied() {
    let h = harness(SessionConfig::default());
    h.session.start_connection().await.unwrap();
    wait_for_state(&h.session, SessionState::AwaitingScan).await;

    h.clock.advance(chrono::Duration::seconds(5));
    let err = h.session.request_new_qr("u1").await.unwrap_err();
    match err {
        SessionError::CredentialActive { retry_after } => assert!(retry_after <= 60 && retry_after > 0),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn qr_request_while_connected_is_always_denied() {
    let h = harness(SessionConfig::default());
    connected(&h).await;
    for requester in ["u1", "u2", "anonymous"] {
        assert_eq!(
            h.session.request_new_qr(requester).await.unwrap_err(),
            SessionError::AlreadyConnected
        );
    }
    assert_eq!(h.session.requester_stats("u1").await.unwrap().total_issued, 0);
}

#[tokio::test(start_paused = true)]
async fn qr_request_from_disconnected_connects_and_returns_credential() {
    let h = harness(SessionConfig::default());
    let qr = h.session.request_new_qr("u1").await.unwrap();
    assert_eq!(qr.issued_for, "u1");
    assert_eq!(h.remote.open_count(), 1);

    let stats = h.session.requester_stats("u1").await.unwrap();
    assert_eq!(stats.total_issued, 1);
    assert!(!stats.can_issue_now);
}

#[tokio::test(start_paused = true)]
async fn second_request_within_interval_is_too_frequent() {
    let h = harness(SessionConfig::default());
    h.session.start_connection().await.unwrap();
    wait_for_state(&h.session, SessionState::AwaitingScan).await;
    assert!(h.session.force_expire_qr("admin", None).await.unwrap());

    h.session.request_new_qr("u1").await.unwrap();
    h.clock.advance(chrono::Duration::seconds(10));
    assert!(h.session.force_expire_qr("admin", None).await.unwrap());

    assert_eq!(
        h.session.request_new_qr("u1").await.unwrap_err(),
        SessionError::TooFrequent { retry_after: 20 }
    );
    // Another requester is not affected by u1's spacing.
    h.session.request_new_qr("u2").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn eleventh_issuance_in_an_hour_is_denied() {
    let mut config = SessionConfig::default();
    config.rate_limit.min_interval_secs = 0;
    let h = harness(config);

    for _ in 0..10 {
        h.session.request_new_qr("u1").await.unwrap();
        h.session.force_expire_qr("test", None).await.unwrap();
        h.clock.advance(chrono::Duration::minutes(1));
    }
    match h.session.request_new_qr("u1").await.unwrap_err() {
        SessionError::HourlyLimitExceeded { retry_after } => {
            assert_eq!(retry_after, 50 * 60);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn credential_expires_after_lifetime() {
    let h = harness(SessionConfig::default());
    h.session.request_new_qr("u1").await.unwrap();

    let mut last = u64::MAX;
    for _ in 0..5 {
        let left = h.session.get_credential().await.unwrap().unwrap().time_remaining;
        assert!(left < last);
        last = left;
        h.clock.advance(chrono::Duration::seconds(11));
    }

    h.clock.advance(chrono::Duration::seconds(10));
    assert!(h.session.get_credential().await.unwrap().is_none());
    let qr = h.session.qr_status().await.unwrap();
    assert!(qr.expired);
    assert!(!qr.has_active_credential);
}

#[tokio::test(start_paused = true)]
async fn qr_request_right_after_connect_claims_the_opening_challenge() {
    let h = harness(SessionConfig::default());
    h.remote.set_manual_challenge(true);
    h.session.start_connection().await.unwrap();

    let session = h.session.clone();
    let pending = tokio::spawn(async move { session.request_new_qr("u1").await });
    wait_for_issuance(&h.session, "u1", 1).await;
    assert_eq!(h.remote.restart_count(), 0);

    // The challenge of the open lands after the request.
    assert!(h.remote.rotate_challenge().await);
    let qr = pending.await.unwrap().unwrap();
    assert_eq!(qr.issued_for, "u1");

    let live = h.session.get_credential().await.unwrap().unwrap();
    assert_eq!(live.image, qr.image);
    assert_eq!(live.issued_for, "u1");
    assert_eq!(h.remote.challenge_count(), 1);
    assert_eq!(h.remote.restart_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_and_qr_request_together_issue_one_challenge() {
    let h = harness(SessionConfig::default());
    let (started, qr) = tokio::join!(
        h.session.start_connection(),
        h.session.request_new_qr("u1")
    );
    started.unwrap();

    let live = h.session.get_credential().await.unwrap().unwrap();
    match qr {
        Ok(qr) => {
            assert_eq!(qr.issued_for, "u1");
            assert_eq!(live.image, qr.image);
            assert_eq!(live.issued_for, "u1");
        }
        Err(e) => assert!(matches!(e, SessionError::CredentialActive { .. }), "{e:?}"),
    }
    assert_eq!(h.remote.open_count(), 1);
    assert_eq!(h.remote.challenge_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn overlapping_qr_requests_share_one_regeneration() {
    let h = harness(SessionConfig::default());
    h.remote.set_manual_challenge(true);
    h.session.start_connection().await.unwrap();
    assert!(h.remote.rotate_challenge().await);
    wait_for_state(&h.session, SessionState::AwaitingScan).await;
    assert!(h.session.force_expire_qr("admin", None).await.unwrap());

    let session = h.session.clone();
    let first = tokio::spawn(async move { session.request_new_qr("u1").await });
    wait_for_issuance(&h.session, "u1", 1).await;
    assert_eq!(h.remote.restart_count(), 1);

    // u1 asking again joins the pending regeneration; anyone else waits.
    let (joined, other) = tokio::join!(h.session.request_new_qr("u1"), async {
        let denied = h.session.request_new_qr("u2").await;
        assert!(h.remote.rotate_challenge().await);
        denied
    });
    assert_eq!(
        other.unwrap_err(),
        SessionError::CredentialActive { retry_after: 25 }
    );
    let a = first.await.unwrap().unwrap();
    let b = joined.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.issued_for, "u1");

    let live = h.session.get_credential().await.unwrap().unwrap();
    assert_eq!(live.image, a.image);
    assert_eq!(live.issued_for, "u1");
    assert_eq!(h.remote.restart_count(), 1);
    assert_eq!(h.session.requester_stats("u1").await.unwrap().total_issued, 1);
    assert_eq!(h.session.requester_stats("u2").await.unwrap().total_issued, 0);
}

#[tokio::test(start_paused = true)]
async fn rotated_challenge_replaces_the_live_credential() {
    let h = harness(SessionConfig::default());
    let first = h.session.request_new_qr("u1").await.unwrap();

    h.clock.advance(chrono::Duration::seconds(20));
    assert!(h.remote.rotate_challenge().await);
    let rotated = {
        let mut found = None;
        for _ in 0..500 {
            let live = h.session.get_credential().await.unwrap().unwrap();
            if live.image != first.image {
                found = Some(live);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        found.expect("rotated credential never stored")
    };
    assert_eq!(rotated.issued_for, "u1");
    assert_eq!(rotated.time_remaining, 60);
    assert_eq!(h.remote.challenge_count(), 2);
    assert_eq!(h.session.requester_stats("u1").await.unwrap().total_issued, 1);
}

#[tokio::test(start_paused = true)]
async fn qr_wait_times_out_without_challenge() {
    let h = harness(SessionConfig::default());
    h.remote.set_manual_challenge(true);
    assert_eq!(
        h.session.request_new_qr("u1").await.unwrap_err(),
        SessionError::Timeout
    );
}

#[tokio::test(start_paused = true)]
async fn reset_invalidates_pending_request() {
    let h = harness(SessionConfig::default());
    h.remote.set_manual_challenge(true);

    let session = h.session.clone();
    let pending = tokio::spawn(async move { session.request_new_qr("u1").await });
    wait_for_opens(&h.remote, 1).await;

    h.session.reset(false).await.unwrap();
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.code(), "INVALIDATED");
    assert!(!h.remote.has_session());
    assert_eq!(
        h.session.get_status().await.unwrap().state,
        SessionState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn force_expire_counts_only_when_enabled() {
    let mut config = SessionConfig::default();
    config.rate_limit.force_expire_counts = true;
    let h = harness(config);

    h.session.request_new_qr("u1").await.unwrap();
    assert!(h.session.force_expire_qr("manual", Some("u1")).await.unwrap());
    assert_eq!(h.session.requester_stats("u1").await.unwrap().total_issued, 2);

    h.session.force_expire_qr("manual", Some("anonymous")).await.unwrap();
    assert_eq!(
        h.session.requester_stats("anonymous").await.unwrap().total_issued,
        0
    );

    let h = harness(SessionConfig::default());
    h.session.request_new_qr("u1").await.unwrap();
    h.session.force_expire_qr("manual", Some("u1")).await.unwrap();
    assert_eq!(h.session.requester_stats("u1").await.unwrap().total_issued, 1);
}

// ── Reconnection ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn recoverable_closes_back_off_then_give_up() {
    let h = harness(SessionConfig::default());
    connected(&h).await;

    for attempt in 1..=3u32 {
        assert!(h.remote.drop_connection("ETIMEDOUT", true).await);
        let status = wait_for(&h.session, "retry scheduled", |s| s.retry_count == attempt).await;
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(status.retry_pending);
        assert!(!status.has_active_credential);

        if attempt == 1 {
            let rs = h.session.reconnection_status().await.unwrap();
            let wait = rs.next_attempt_at.unwrap() - h.clock.now();
            assert!(wait >= chrono::Duration::milliseconds(1_600));
            assert!(wait <= chrono::Duration::milliseconds(2_400));
        }

        wait_for_opens(&h.remote, attempt + 1).await;
    }

    assert!(h.remote.drop_connection("ETIMEDOUT", true).await);
    let status = wait_for(&h.session, "give up", |s| s.retry_count == 4).await;
    assert_eq!(status.state, SessionState::Disconnected);
    assert!(!status.retry_pending);
    assert_eq!(status.last_failure.unwrap().code, "MAX_RETRIES_EXCEEDED");

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.remote.open_count(), 4);

    // An explicit start resumes.
    h.session.start_connection().await.unwrap();
    assert_eq!(h.remote.open_count(), 5);
    assert_eq!(h.session.get_status().await.unwrap().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn opened_resets_retry_count() {
    let h = harness(SessionConfig::default());
    connected(&h).await;

    assert!(h.remote.drop_connection("ETIMEDOUT", true).await);
    wait_for(&h.session, "retry", |s| s.retry_count == 1).await;
    wait_for_opens(&h.remote, 2).await;
    assert!(h.remote.pair("51999999999@s.whatsapp.net").await);

    let status = wait_for_state(&h.session, SessionState::Connected).await;
    assert_eq!(status.retry_count, 0);
    assert!(status.last_failure.is_none());
}

#[tokio::test(start_paused = true)]
async fn manual_start_cancels_pending_retry() {
    let h = harness(SessionConfig::default());
    connected(&h).await;

    assert!(h.remote.drop_connection("ETIMEDOUT", true).await);
    wait_for(&h.session, "retry", |s| s.retry_pending).await;

    h.session.start_connection().await.unwrap();
    assert_eq!(h.remote.open_count(), 2);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.remote.open_count(), 2);
    assert!(!h.session.get_status().await.unwrap().retry_pending);
}

#[tokio::test(start_paused = true)]
async fn fatal_error_stops_without_retry() {
    let h = harness(SessionConfig::default());
    connected(&h).await;

    assert!(
        h.remote
            .emit(TransportEvent::FatalError("bad session".into()))
            .await
    );
    let status = wait_for_state(&h.session, SessionState::Disconnected).await;
    assert_eq!(status.last_failure.unwrap().code, "FATAL_ERROR");

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.remote.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn force_reconnect_opens_fresh_session() {
    let h = harness(SessionConfig::default());
    connected(&h).await;

    assert_eq!(
        h.session.force_reconnect().await.unwrap(),
        SessionState::Connecting
    );
    assert_eq!(h.remote.open_count(), 2);
    wait_for_state(&h.session, SessionState::AwaitingScan).await;
}

#[tokio::test(start_paused = true)]
async fn reset_with_clear_auth_wipes_credentials() {
    let h = harness(SessionConfig::default());
    connected(&h).await;
    assert!(h.session.auth_status().await.unwrap().has_credentials);

    h.session.reset(true).await.unwrap();
    let auth = h.session.auth_status().await.unwrap();
    assert!(!auth.has_credentials);
    assert!(auth.paired_as.is_none());
    assert!(!auth.connected);
}

// ── Status fan-out ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn subscribers_observe_transitions_in_order() {
    let h = harness(SessionConfig::default());
    let mut rx = h.session.subscribe();

    connected(&h).await;

    let mut seen = Vec::new();
    let mut last_seq = 0;
    while let Ok(snapshot) = rx.try_recv() {
        assert!(snapshot.seq > last_seq);
        last_seq = snapshot.seq;
        // The initial snapshot may predate the subscription.
        if snapshot.state != SessionState::Disconnected && seen.last() != Some(&snapshot.state) {
            seen.push(snapshot.state);
        }
    }
    assert_eq!(
        seen,
        vec![
            SessionState::Connecting,
            SessionState::AwaitingScan,
            SessionState::Connected
        ]
    );
}
