//! Outbound message endpoints.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use wb_domain::templates::{TemplateKind, TemplateParams};
use wb_session::SentMessage;

use crate::api::auth::AdminGuard;
use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Accepts the booking frontend's payload as-is:
/// `{ phone, templateOption, psicologo, fecha, hora }`.
#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub phone: String,
    #[serde(alias = "templateOption")]
    pub template: String,
    #[serde(flatten)]
    pub params: TemplateParams,
}

pub async fn send_message(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<SendMessageBody>,
) -> ApiResult<Json<Value>> {
    let kind: TemplateKind = body
        .template
        .parse()
        .map_err(|e: wb_domain::Error| ApiError::bad_request(e.to_string()))?;
    let missing = body.params.missing_fields();
    if !missing.is_empty() {
        return Err(ApiError::bad_request(format!(
            "missing template fields: {}",
            missing.join(", ")
        )));
    }

    let sent = state
        .session
        .send_message(&body.phone, kind, &body.params)
        .await?;
    Ok(Json(record(&state, sent)))
}

#[derive(Debug, Deserialize)]
pub struct SendImageBody {
    pub phone: String,
    #[serde(alias = "imageUrl")]
    pub image_url: String,
    #[serde(default)]
    pub caption: Option<String>,
}

pub async fn send_image(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<SendImageBody>,
) -> ApiResult<Json<Value>> {
    let url = body.image_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::bad_request("image_url must be an http(s) URL"));
    }
    let sent = state
        .session
        .send_image(&body.phone, url, body.caption.as_deref())
        .await?;
    Ok(Json(record(&state, sent)))
}

fn record(state: &AppState, sent: SentMessage) -> Value {
    state.sent_log.record(&sent);
    json!({
        "success": true,
        "message_id": sent.message_id,
        "destination": sent.destination,
        "template": sent.kind,
        "sent_at": sent.sent_at,
    })
}

#[derive(Debug, Deserialize)]
pub struct SentQuery {
    #[serde(default = "d_limit")]
    pub limit: usize,
}

fn d_limit() -> usize {
    50
}

pub async fn sent_messages(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(q): Query<SentQuery>,
) -> Json<Value> {
    let messages = state.sent_log.recent(q.limit);
    Json(json!({
        "success": true,
        "count": messages.len(),
        "messages": messages,
    }))
}
