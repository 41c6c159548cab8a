//! Bearer-token authentication.
//!
//! Tokens are read from the environment **once at startup** and only their
//! SHA-256 digests are kept in [`AppState`].  A missing token means dev
//! mode: the corresponding check lets everything through.
//!
//! - [`require_api_token`] guards the read-only status routes.
//! - [`AdminGuard`] guards the routes that change the session or send
//!   messages.  Without an admin token it falls back to the API token.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use wb_session::ANONYMOUS_REQUESTER;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Header the upstream auth layer uses to say who is asking.
pub const REQUESTER_HEADER: &str = "x-requester-id";

pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Compare the bearer token in `headers` against `expected` (a SHA-256
/// digest) in constant time.
fn bearer_matches(headers: &HeaderMap, expected: &[u8]) -> bool {
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    // Hashing first keeps the comparison fixed-length.
    let provided_hash = Sha256::digest(provided.as_bytes());
    bool::from(provided_hash.ct_eq(expected))
}

/// Axum middleware for the API-token routes.  Attach via
/// `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_token_hash else {
        return next.run(req).await;
    };
    if !bearer_matches(req.headers(), expected) {
        return ApiError::unauthorized("invalid or missing API token").into_response();
    }
    next.run(req).await
}

/// Extractor for admin routes.  Handlers opt in with `_guard: AdminGuard`.
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state
            .admin_token_hash
            .as_ref()
            .or(state.api_token_hash.as_ref());
        match expected {
            None => Ok(AdminGuard),
            Some(hash) if bearer_matches(&parts.headers, hash) => Ok(AdminGuard),
            Some(_) => Err(ApiError::unauthorized("invalid admin token")),
        }
    }
}

/// The requester id from `X-Requester-Id`, or `anonymous`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester(pub String);

impl Requester {
    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS_REQUESTER
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Requester {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(REQUESTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS_REQUESTER);
        Ok(Requester(id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_must_match_exactly() {
        let expected = hash_token("s3cret");
        let mut headers = HeaderMap::new();
        assert!(!bearer_matches(&headers, &expected));

        headers.insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        assert!(bearer_matches(&headers, &expected));

        headers.insert("authorization", HeaderValue::from_static("Bearer s3cre"));
        assert!(!bearer_matches(&headers, &expected));

        headers.insert("authorization", HeaderValue::from_static("s3cret"));
        assert!(!bearer_matches(&headers, &expected));
    }
}
