use std::sync::Arc;
use std::time::Instant;

use wb_domain::config::Config;
use wb_session::SessionHandle;

use crate::sent_log::SentLog;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    /// Front door to the session controller task.
    pub session: SessionHandle,
    /// Recently sent messages (process lifetime only).
    pub sent_log: Arc<SentLog>,
    pub started_at: Instant,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
    /// SHA-256 hash of the admin bearer token.  When `None`, admin routes
    /// fall back to the API token.
    pub admin_token_hash: Option<Vec<u8>>,
}
