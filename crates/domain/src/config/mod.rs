mod observability;
mod server;
mod session;
mod transport;

pub use observability::*;
pub use server::*;
pub use session::*;
pub use transport::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Environment variable holding the admin bearer token.
    /// If the env var is unset, admin endpoints fall back to the API token check.
    #[serde(default = "d_admin_token_env")]
    pub token_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token_env: d_admin_token_env(),
        }
    }
}

fn d_admin_token_env() -> String {
    "WB_ADMIN_TOKEN".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            });
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty");
        }
        if let Some(rl) = &self.server.rate_limit {
            for (field, message) in rl.problems() {
                error(field, message);
            }
        }

        let s = &self.session;
        if s.qr_lifetime_secs == 0 {
            error("session.qr_lifetime_secs", "credential lifetime must be greater than 0");
        }
        if s.qr_wait_timeout_secs == 0 {
            error("session.qr_wait_timeout_secs", "must be greater than 0");
        }
        if s.connect_timeout_secs == 0 {
            error("session.connect_timeout_secs", "must be greater than 0");
        }
        if s.rate_limit.max_per_hour == 0 {
            error(
                "session.rate_limit.max_per_hour",
                "hourly ceiling of 0 would deny every request",
            );
        }
        if s.rate_limit.history_cap < s.rate_limit.max_per_hour as usize {
            error(
                "session.rate_limit.history_cap",
                "history cap must be at least max_per_hour",
            );
        }
        if !(0.0..1.0).contains(&s.reconnect.jitter) {
            error("session.reconnect.jitter", "jitter must be in [0, 1)");
        }
        if s.reconnect.base_delay_ms == 0 {
            error("session.reconnect.base_delay_ms", "must be greater than 0");
        }

        if self.transport.kind == TransportKind::Bridge && self.transport.bridge.base_url.is_empty()
        {
            error("transport.bridge.base_url", "base_url must not be empty");
        }
        if self.transport.kind == TransportKind::Bridge && self.transport.bridge.instance.is_empty()
        {
            error("transport.bridge.instance", "instance must not be empty");
        }

        if s.rate_limit.min_interval_secs > s.qr_lifetime_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "session.rate_limit.min_interval_secs".into(),
                message: "minimum spacing is longer than the credential lifetime".into(),
            });
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.is_wildcard() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        if self.transport.kind == TransportKind::Loopback {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "transport.kind".into(),
                message: "loopback transport never reaches WhatsApp".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_error(cfg: &Config, field: &str) -> bool {
        cfg.validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error && e.field == field)
    }

    #[test]
    fn default_config_has_no_errors() {
        let cfg = Config::default();
        assert!(!cfg
            .validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(has_error(&cfg, "server.port"));
    }

    #[test]
    fn zero_hourly_ceiling_is_an_error() {
        let mut cfg = Config::default();
        cfg.session.rate_limit.max_per_hour = 0;
        assert!(has_error(&cfg, "session.rate_limit.max_per_hour"));
    }

    #[test]
    fn bridge_without_url_is_an_error() {
        let mut cfg = Config::default();
        cfg.transport.kind = TransportKind::Bridge;
        cfg.transport.bridge.base_url.clear();
        assert!(has_error(&cfg, "transport.bridge.base_url"));
    }

    #[test]
    fn jitter_out_of_range_is_an_error() {
        let mut cfg = Config::default();
        cfg.session.reconnect.jitter = 1.5;
        assert!(has_error(&cfg, "session.reconnect.jitter"));
    }

    #[test]
    fn config_error_display_tags_severity() {
        let e = ConfigError {
            severity: ConfigSeverity::Warning,
            field: "x".into(),
            message: "y".into(),
        };
        assert_eq!(e.to_string(), "[WARN] x: y");
    }
}
