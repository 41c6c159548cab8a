use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP façade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the REST façade listens and who may call it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    /// The booking backend has always reached the WhatsApp service on 5111.
    #[serde(default = "d_port")]
    pub port: u16,
    /// Env var holding the bearer token for status endpoints.  Unset or
    /// empty leaves them open.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Per-IP request throttling in front of every route.  Pairing QR
    /// throttling is separate (`session.rate_limit`).
    #[serde(default)]
    pub rate_limit: Option<HttpRateLimitConfig>,
    /// Lock file guarding against a second instance driving the same
    /// WhatsApp account.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_token_env: d_api_token_env(),
            cors: CorsConfig::default(),
            rate_limit: None,
            pid_file: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Origins of the booking frontend allowed to call the façade from a
/// browser.  `host:*` matches any port on that host; a lone `"*"` allows
/// everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

impl CorsConfig {
    pub fn is_wildcard(&self) -> bool {
        matches!(self.allowed_origins.as_slice(), [only] if only == "*")
    }
}

/// Token bucket per client IP.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HttpRateLimitConfig {
    #[serde(default = "d_requests_per_second")]
    pub requests_per_second: u64,
    #[serde(default = "d_burst_size")]
    pub burst_size: u32,
}

impl Default for HttpRateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: d_requests_per_second(),
            burst_size: d_burst_size(),
        }
    }
}

impl HttpRateLimitConfig {
    /// `(field, message)` for every value the governor would refuse.
    pub fn problems(&self) -> Vec<(&'static str, &'static str)> {
        let mut out = Vec::new();
        if self.requests_per_second == 0 {
            out.push((
                "server.rate_limit.requests_per_second",
                "must be greater than 0",
            ));
        }
        if self.burst_size == 0 {
            out.push(("server.rate_limit.burst_size", "must be greater than 0"));
        }
        out
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    5111
}
fn d_api_token_env() -> String {
    "WB_API_TOKEN".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_requests_per_second() -> u64 {
    5
}
fn d_burst_size() -> u32 {
    20
}
