//! Collaboratory refresh agent
//!
//! Stand-in host for the Collaboratory authenticator that:
//! 1. Loads OAuth and refresh settings from TOML + environment
//! 2. Keeps per-user auth states in a JSON file
//! 3. Refreshes every user each `auth_refresh_age` seconds, or once with `--once`
//! 4. Optionally serves `/health` and `/metrics`

mod agent;
mod config;
mod metrics;
mod store;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use authenticator::Refreshable;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use clb_auth::ClbAuthenticator;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::agent::CycleSummary;
use crate::config::Config;
use crate::store::AuthStateStore;

/// Exit status of `--once` when a user must log in again or a refresh errored
const EXIT_NEEDS_LOGIN: i32 = 2;

/// Shared state for the health and metrics handlers
#[derive(Clone)]
struct AppState {
    store: Arc<AuthStateStore>,
    last_cycle: Arc<RwLock<Option<CycleSummary>>>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Parsed command line.
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    config: Option<String>,
    once: bool,
    users: Vec<String>,
}

/// `--config <path>`, `--once`, and repeatable `--user <name>` (implies `--once`).
fn parse_args(args: &[String]) -> CliArgs {
    let mut cli = CliArgs::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => cli.config = iter.next().cloned(),
            "--once" => cli.once = true,
            "--user" => {
                if let Some(user) = iter.next() {
                    cli.users.push(user.clone());
                    cli.once = true;
                }
            }
            _ => {}
        }
    }
    cli
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args);

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        token_url = %config.oauth.token_url,
        userdata_url = %config.oauth.userdata_url,
        basic_auth = config.oauth.basic_auth,
        refresh_margin = config.refresh.refresh_margin,
        auth_refresh_age = config.refresh.auth_refresh_age,
        "configuration loaded"
    );

    let prometheus = metrics::install_recorder()?;

    let authenticator: Arc<dyn Refreshable> = Arc::new(
        ClbAuthenticator::from_settings(config.refresh.clone(), config.oauth.clone())
            .context("failed to set up authenticator")?,
    );

    let store = Arc::new(AuthStateStore::load(config.agent.auth_state_path.clone()).await?);
    metrics::set_auth_states(store.len().await);

    if cli.once {
        let users = (!cli.users.is_empty()).then_some(cli.users.as_slice());
        let summary = agent::refresh_cycle(authenticator.as_ref(), &store, users).await;
        println!("{}", serde_json::to_string(&summary)?);
        if summary.reauthenticate > 0 || summary.errors > 0 {
            std::process::exit(EXIT_NEEDS_LOGIN);
        }
        return Ok(());
    }

    let last_cycle = Arc::new(RwLock::new(None));
    let refresh_task =
        agent::spawn_refresh_task(authenticator.clone(), store.clone(), last_cycle.clone());
    info!(
        interval_secs = authenticator.auth_refresh_age().as_secs(),
        "refresh task started"
    );

    match config.agent.listen_addr {
        Some(addr) => {
            let state = AppState {
                store,
                last_cycle,
                started_at: Instant::now(),
                prometheus,
            };
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            info!(%addr, "serving /health and /metrics");
            axum::serve(listener, build_router(state))
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTP server failed")?;
        }
        None => shutdown_signal().await,
    }

    refresh_task.abort();
    info!("refresh agent stopped");
    Ok(())
}

/// Health endpoint: store size, uptime, and the last cycle's counts.
///
/// Reports 503 when the last cycle had errors (persistence or setup
/// failures); users needing a new login do not make the agent unhealthy.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let last_cycle = state.last_cycle.read().await.clone();
    let degraded = last_cycle.as_ref().is_some_and(|c| c.errors > 0);

    let status_code = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = serde_json::json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "users": state.store.len().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "last_cycle": last_cycle,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
