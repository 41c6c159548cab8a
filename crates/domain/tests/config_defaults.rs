use wb_domain::config::{Config, TransportKind};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 5111);
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config.server.cors.allowed_origins.contains(&"http://localhost:*".to_string()));
    assert!(config.server.cors.allowed_origins.contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn admin_token_env_default() {
    let config = Config::default();
    assert_eq!(config.admin.token_env, "WB_ADMIN_TOKEN");
}

#[test]
fn full_file_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080

[session]
qr_lifetime_secs = 45

[session.rate_limit]
min_interval_secs = 10
max_per_hour = 5

[session.reconnect]
max_retries = 5

[transport]
kind = "loopback"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.session.qr_lifetime_secs, 45);
    assert_eq!(config.session.rate_limit.min_interval_secs, 10);
    assert_eq!(config.session.rate_limit.max_per_hour, 5);
    assert_eq!(config.session.reconnect.max_retries, 5);
    assert_eq!(config.session.reconnect.base_delay_ms, 2_000);
    assert_eq!(config.transport.kind, TransportKind::Loopback);
}

#[test]
fn empty_file_is_valid() {
    let config: Config = toml::from_str("").unwrap();
    assert!(config
        .validate()
        .iter()
        .all(|i| i.severity != wb_domain::config::ConfigSeverity::Error));
}
