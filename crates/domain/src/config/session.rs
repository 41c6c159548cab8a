use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tunables for the session controller: pairing credential lifetime,
/// bounded waits, credential-request throttling and reconnection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long an issued pairing QR stays valid.
    #[serde(default = "d_qr_lifetime")]
    pub qr_lifetime_secs: u64,
    /// How long `qr-request` waits for the transport to produce a challenge.
    #[serde(default = "d_qr_wait")]
    pub qr_wait_timeout_secs: u64,
    /// Upper bound on a single transport `connect()`.
    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound on a single outbound send.
    #[serde(default = "d_send_timeout")]
    pub send_timeout_secs: u64,
    /// Period of the expiry sweep that publishes a status change when a
    /// credential lapses.  `0` disables the sweep (expiry stays lazy).
    #[serde(default = "d_sweep")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub rate_limit: QrRateLimitConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            qr_lifetime_secs: d_qr_lifetime(),
            qr_wait_timeout_secs: d_qr_wait(),
            connect_timeout_secs: d_connect_timeout(),
            send_timeout_secs: d_send_timeout(),
            sweep_interval_secs: d_sweep(),
            rate_limit: QrRateLimitConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn qr_lifetime(&self) -> Duration {
        Duration::from_secs(self.qr_lifetime_secs)
    }

    pub fn qr_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.qr_wait_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

/// Per-requester throttling of pairing-credential issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrRateLimitConfig {
    /// Minimum spacing between two issuances for the same requester.
    #[serde(default = "d_min_interval")]
    pub min_interval_secs: u64,
    /// Ceiling on issuances per requester in any trailing 60 minutes.
    #[serde(default = "d_max_per_hour")]
    pub max_per_hour: u32,
    /// Hard cap on stored timestamps per requester (memory bound).
    #[serde(default = "d_history_cap")]
    pub history_cap: usize,
    /// Whether a force-expire issued by a named requester is appended to
    /// that requester's issuance history.  Anonymous callers never are.
    #[serde(default)]
    pub force_expire_counts: bool,
}

impl Default for QrRateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: d_min_interval(),
            max_per_hour: d_max_per_hour(),
            history_cap: d_history_cap(),
            force_expire_counts: false,
        }
    }
}

/// Automatic reconnection after a recoverable transport close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry; doubles on every further retry.
    #[serde(default = "d_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "d_max_delay")]
    pub max_delay_ms: u64,
    /// Consecutive recoverable closes tolerated before giving up.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    /// Relative jitter applied to every delay (`0.2` = ±20%).
    #[serde(default = "d_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: d_base_delay(),
            max_delay_ms: d_max_delay(),
            max_retries: d_max_retries(),
            jitter: d_jitter(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_qr_lifetime() -> u64 {
    60
}
fn d_qr_wait() -> u64 {
    25
}
fn d_connect_timeout() -> u64 {
    30
}
fn d_send_timeout() -> u64 {
    60
}
fn d_sweep() -> u64 {
    5
}
fn d_min_interval() -> u64 {
    30
}
fn d_max_per_hour() -> u32 {
    10
}
fn d_history_cap() -> usize {
    20
}
fn d_base_delay() -> u64 {
    2_000
}
fn d_max_delay() -> u64 {
    60_000
}
fn d_max_retries() -> u32 {
    3
}
fn d_jitter() -> f64 {
    0.2
}
