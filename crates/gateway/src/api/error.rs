//! JSON error responses.
//!
//! Every failure leaves the gateway as
//! `{ "success": false, "code", "message", "retry_after"? }`.  Rate-limit
//! denials also carry a `Retry-After` header.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use wb_session::SessionError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after: Option<u64>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }
}

fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::CredentialActive { .. } | SessionError::AlreadyConnected => {
            StatusCode::CONFLICT
        }
        SessionError::HourlyLimitExceeded { .. } | SessionError::TooFrequent { .. } => {
            StatusCode::TOO_MANY_REQUESTS
        }
        SessionError::NotConnected
        | SessionError::MaxRetriesExceeded
        | SessionError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        SessionError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
        SessionError::Transport(_) | SessionError::Fatal(_) => StatusCode::BAD_GATEWAY,
        SessionError::Invalidated(_) => StatusCode::GONE,
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self {
            status: status_for(&err),
            code: err.code(),
            retry_after: err.retry_after_secs(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "success": false,
            "code": self.code,
            "message": self.message,
        });
        if let Some(secs) = self.retry_after {
            body["retry_after"] = secs.into();
        }
        let mut response = (self.status, Json(body)).into_response();
        if self.status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(secs) = self.retry_after {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            }
        }
        response
    }
}
