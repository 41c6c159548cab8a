//! Connection lifecycle endpoints.

use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::auth::{AdminGuard, Requester};
use crate::api::error::ApiResult;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Liveness probe.  Answers even when the controller task has stopped,
/// so the orchestrator can tell "process up" from "session up".
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let session = state.session.get_status().await.ok();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "controller_running": session.is_some(),
        "state": session.map(|s| s.state.as_str()),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read-only status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let snapshot = state.session.get_status().await?;
    Ok(Json(json!({ "success": true, "status": snapshot })))
}

pub async fn auth_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let auth = state.session.auth_status().await?;
    Ok(Json(json!({ "success": true, "auth": auth })))
}

pub async fn reconnection_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let reconnection = state.session.reconnection_status().await?;
    Ok(Json(json!({ "success": true, "reconnection": reconnection })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn connect(
    _guard: AdminGuard,
    requester: Requester,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    tracing::info!(requester = %requester.0, "connect requested");
    let session_state = state.session.start_connection().await?;
    Ok(Json(json!({ "success": true, "state": session_state })))
}

#[derive(Debug, Deserialize)]
pub struct ResetBody {
    /// Also wipe the persisted transport credentials, forcing a new scan.
    #[serde(default = "d_clear_auth")]
    pub clear_auth: bool,
}

fn d_clear_auth() -> bool {
    true
}

pub async fn reset(
    _guard: AdminGuard,
    requester: Requester,
    State(state): State<AppState>,
    body: Option<Json<ResetBody>>,
) -> ApiResult<Json<Value>> {
    let clear_auth = body.map_or_else(d_clear_auth, |Json(b)| b.clear_auth);
    tracing::warn!(requester = %requester.0, clear_auth, "session reset requested");
    state.session.reset(clear_auth).await?;
    Ok(Json(json!({ "success": true, "cleared_auth": clear_auth })))
}

pub async fn force_reconnect(
    _guard: AdminGuard,
    requester: Requester,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    tracing::info!(requester = %requester.0, "forced reconnect requested");
    let session_state = state.session.force_reconnect().await?;
    Ok(Json(json!({ "success": true, "state": session_state })))
}
