//! Process wiring: config validation, token hashing, transport selection and
//! the session controller task.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::task::JoinHandle;

use wb_domain::config::{Config, ConfigSeverity, TransportConfig, TransportKind};
use wb_session::SessionController;
use wb_transport::{AuthStore, BridgeTransport, LoopbackTransport, Transport};

use crate::api::auth::hash_token;
use crate::sent_log::SentLog;
use crate::state::AppState;

/// Validate config, build the transport and start the controller.  Returns
/// the shared state and the controller task handle.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<(AppState, JoinHandle<()>)> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── Tokens (read once, hashed for constant-time comparison) ─────
    let api_token_hash = token_hash_from_env(&config.server.api_token_env, "API");
    let admin_token_hash = token_hash_from_env(&config.admin.token_env, "admin");

    // ── Transport ────────────────────────────────────────────────────
    let transport = build_transport(&config.transport)?;
    let auth_store = AuthStore::new(&config.transport.auth_dir);
    tracing::info!(
        transport = transport.name(),
        auth_dir = %config.transport.auth_dir.display(),
        has_credentials = auth_store.has_credentials(),
        "transport ready"
    );

    Ok(assemble(
        config,
        transport,
        Some(auth_store),
        api_token_hash,
        admin_token_hash,
    ))
}

/// Spawn the controller over an already-built transport.  Shared by
/// [`build_app_state`] and tests.
pub fn assemble(
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    auth_store: Option<AuthStore>,
    api_token_hash: Option<Vec<u8>>,
    admin_token_hash: Option<Vec<u8>>,
) -> (AppState, JoinHandle<()>) {
    let (session, task) =
        SessionController::new(config.session.clone(), transport, auth_store).spawn();
    let state = AppState {
        config,
        session,
        sent_log: Arc::new(SentLog::default()),
        started_at: Instant::now(),
        api_token_hash,
        admin_token_hash,
    };
    (state, task)
}

fn build_transport(config: &TransportConfig) -> anyhow::Result<Arc<dyn Transport>> {
    match config.kind {
        TransportKind::Bridge => {
            let bridge =
                BridgeTransport::from_config(&config.bridge).context("building bridge transport")?;
            tracing::info!(
                base_url = %config.bridge.base_url,
                instance = %config.bridge.instance,
                "using WhatsApp bridge transport"
            );
            Ok(Arc::new(bridge))
        }
        TransportKind::Loopback => {
            // Nobody scripts the remote side in a served process; the
            // loopback still issues challenges and accepts sends.
            let (loopback, _remote) = LoopbackTransport::new();
            tracing::warn!("using loopback transport; nothing reaches WhatsApp");
            Ok(Arc::new(loopback))
        }
    }
}

fn token_hash_from_env(env_var: &str, label: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
        Some(token) => {
            tracing::info!(source = %format!("env:{env_var}"), "{label} bearer-token auth enabled");
            Some(hash_token(&token))
        }
        None => {
            tracing::warn!("{label} bearer-token auth DISABLED, set the {env_var} env var");
            None
        }
    }
}

/// Open the session once at boot.  Failures are logged; the reconnect
/// policy and the `/api/connect` route take it from there.
pub fn connect_on_boot(state: &AppState) {
    let session = state.session.clone();
    tokio::spawn(async move {
        match session.start_connection().await {
            Ok(s) => tracing::info!(state = %s, "initial connection started"),
            Err(e) => tracing::error!(error = %e, code = e.code(), "initial connection failed"),
        }
    });
}
