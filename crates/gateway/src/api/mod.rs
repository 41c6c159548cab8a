pub mod auth;
pub mod error;
pub mod events;
pub mod messages;
pub mod qr;
pub mod session;

use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::state::AppState;

/// Build the API router.
///
/// `/health` is public.  The read-only status routes sit behind
/// [`auth::require_api_token`]; every route that changes the session or
/// sends a message takes an [`auth::AdminGuard`] instead.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(session::health));

    let status = Router::new()
        .route("/api/status", get(session::status))
        .route("/api/qr-status", get(qr::qr_status))
        .route("/api/auth-status", get(session::auth_status))
        .route("/api/reconnection-status", get(session::reconnection_status))
        .route("/api/events", get(events::events))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    let admin = Router::new()
        .route("/api/connect", post(session::connect))
        .route("/api/qr-request", post(qr::qr_request))
        .route("/api/qr-code", get(qr::qr_code))
        .route("/api/qr-expire", post(qr::qr_expire))
        .route("/api/send-message", post(messages::send_message))
        .route("/api/send-image", post(messages::send_image))
        .route("/api/sent-messages", get(messages::sent_messages))
        .route("/api/requesters/:id/stats", get(qr::requester_stats))
        .route("/api/auth/reset", post(session::reset))
        .route("/api/force-reconnect", post(session::force_reconnect));

    public.merge(status).merge(admin)
}
