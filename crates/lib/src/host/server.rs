//! Host HTTP server (trigger + health) and process lifecycle.

use crate::config::Config;
use crate::host::protocol::{trigger_message, TriggerRequest};
use crate::host::timer;
use crate::session::SessionManager;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct HostState {
    pub config: Arc<Config>,
    pub session: Arc<SessionManager>,
}

impl HostState {
    pub fn new(config: Config, session: Arc<SessionManager>) -> Self {
        Self {
            config: Arc::new(config),
            session,
        }
    }
}

/// Routes: `GET /` health, `GET|POST /api/relay` trigger.
pub fn build_router(state: HostState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/api/relay", get(trigger_http).post(trigger_http))
        .with_state(state)
}

/// Run the host: keep-alive timer plus HTTP server on server.bind:server.port.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_host(config: Config) -> Result<()> {
    let session = Arc::new(SessionManager::from_config(&config));
    let every = Duration::from_secs(config.timer.interval_secs.max(1));
    let keepalive = timer::spawn_keepalive(session.clone(), every);
    log::info!("timer trigger scheduled every {}s", every.as_secs());

    let bind_addr = format!("{}:{}", config.server.bind.trim(), config.server.port);
    let app = build_router(HostState::new(config, session));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("host listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("host server exited")?;
    keepalive.abort();
    log::info!("host stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

/// GET|POST /api/relay — ensure the gateway session is started, then greet.
/// Startup failure is logged and answered with 503; the timer retries.
async fn trigger_http(
    State(state): State<HostState>,
    Query(query): Query<TriggerRequest>,
    body: Bytes,
) -> (StatusCode, String) {
    log::info!("http trigger: processing request");
    let name = TriggerRequest::resolve_name(query, &body);
    if let Err(e) = state.session.ensure_started().await {
        log::error!("http trigger: gateway session not started: {}", e);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("gateway session not started: {}", e),
        );
    }
    (StatusCode::OK, trigger_message(name.as_deref()))
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<HostState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "session": state.session.state(),
        "transportOpen": state.session.transport_open(),
        "port": state.config.server.port,
    }))
}
