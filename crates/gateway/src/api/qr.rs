//! Pairing QR endpoints.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::auth::{AdminGuard, Requester};
use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn qr_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let qr = state.session.qr_status().await?;
    Ok(Json(json!({ "success": true, "qr": qr })))
}

/// `POST /api/qr-request`: issue a fresh QR for the calling requester,
/// subject to the issuance limits.  Blocks until the transport produces
/// the challenge (bounded by `session.qr_wait_timeout_secs`).
pub async fn qr_request(
    _guard: AdminGuard,
    requester: Requester,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let credential = state.session.request_new_qr(&requester.0).await?;
    Ok(Json(json!({
        "success": true,
        "qr": credential.image,
        "expires_at": credential.expires_at,
        "time_remaining": credential.time_remaining,
        "issued_for": credential.issued_for,
    })))
}

/// `GET /api/qr-code`: the live QR, if any.  Never issues a new one.
pub async fn qr_code(_guard: AdminGuard, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let credential = state
        .session
        .get_credential()
        .await?
        .ok_or_else(|| ApiError::not_found("no active QR code"))?;
    Ok(Json(json!({
        "success": true,
        "qr": credential.image,
        "expires_at": credential.expires_at,
        "time_remaining": credential.time_remaining,
        "issued_for": credential.issued_for,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpireBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn qr_expire(
    _guard: AdminGuard,
    requester: Requester,
    State(state): State<AppState>,
    body: Option<Json<ExpireBody>>,
) -> ApiResult<Json<Value>> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "expired by operator".into());
    let by = (!requester.is_anonymous()).then_some(requester.0.as_str());
    let cleared = state.session.force_expire_qr(&reason, by).await?;
    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

pub async fn requester_stats(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let stats = state.session.requester_stats(&id).await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}
