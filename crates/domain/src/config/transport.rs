use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which transport implementation backs the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// External WhatsApp Web bridge reached over HTTP.
    #[default]
    Bridge,
    /// In-process transport that never leaves the host (development).
    Loopback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    /// Directory holding the persisted transport credentials.
    #[serde(default = "d_auth_dir")]
    pub auth_dir: PathBuf,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            auth_dir: d_auth_dir(),
            bridge: BridgeConfig::default(),
        }
    }
}

/// Connection settings for the HTTP WhatsApp Web bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Bridge-side instance name; one instance backs the single session.
    #[serde(default = "d_instance")]
    pub instance: String,
    /// Environment variable holding the bridge API key (sent as `apikey`).
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            instance: d_instance(),
            api_key_env: d_api_key_env(),
            poll_interval_ms: d_poll_interval(),
            request_timeout_secs: d_request_timeout(),
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolve the API key from the configured env var.  Empty counts as unset.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

fn d_auth_dir() -> PathBuf {
    PathBuf::from("./data/auth")
}
fn d_base_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn d_instance() -> String {
    "wabridge".into()
}
fn d_api_key_env() -> String {
    "WB_BRIDGE_API_KEY".into()
}
fn d_poll_interval() -> u64 {
    3_000
}
fn d_request_timeout() -> u64 {
    20
}
