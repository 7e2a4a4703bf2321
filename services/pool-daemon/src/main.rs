//! Relay pool daemon
//!
//! Single-binary service that:
//! 1. Reads and decodes a relay subscription
//! 2. Starts and health-checks one local `sslocal` listener per endpoint
//! 3. Serves pool health, Prometheus metrics and location groups over HTTP
//! 4. Stops every relay process on SIGTERM/SIGINT

mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_pool::{IpApiProbe, Pool, SsLocal};
use std::sync::Arc;
use subscription::{UNKNOWN_GROUP, group_by_location};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    pool: Arc<Pool>,
    prometheus: PrometheusHandle,
}

/// Build the admin router.
///
/// The concurrency limit keeps a misbehaving scraper from piling up requests.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/groups", get(groups_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
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

    info!("starting relay-pool-daemon");

    // Install before the pool emits anything
    let prometheus_handle = metrics::install_recorder();
    metrics::describe();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        subscription = %config.subscription.path.display(),
        program = %config.node.program.display(),
        max_concurrent = config.pool.max_concurrent,
        listen_addr = %config.admin.listen_addr,
        "configuration loaded"
    );

    let blob = std::fs::read_to_string(&config.subscription.path).with_context(|| {
        format!(
            "failed to read subscription from {}",
            config.subscription.path.display()
        )
    })?;
    let ignore = config.ignore_list()?;
    let endpoints =
        subscription::decode(&blob, &ignore).context("failed to decode subscription")?;
    if endpoints.is_empty() {
        anyhow::bail!("subscription contains no relay endpoints");
    }

    for (location, members) in group_by_location(&endpoints, UNKNOWN_GROUP)? {
        info!(group = %location, nodes = members.len(), "location group");
    }

    let pool = Arc::new(Pool::new(
        endpoints,
        Arc::new(SsLocal::new(&config.node.program)),
        Arc::new(IpApiProbe::new(&config.pool.blocked_countries)),
        config.pool_config(),
    ));
    pool.start().await.context("relay pool failed to start")?;

    let app = build_router(
        AppState {
            pool: pool.clone(),
            prometheus: prometheus_handle,
        },
        config.admin.max_connections,
    );

    let listener = TcpListener::bind(config.admin.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.admin.listen_addr))?;
    info!(addr = %config.admin.listen_addr, "admin listener ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("admin server failed")?;

    pool.stop();
    info!("shutdown complete");
    Ok(())
}

/// Pool health as JSON. 503 when no node in rotation is usable.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.pool.health();
    let status_code = if body["status"] == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

/// Node names grouped by the location prefix of their label.
async fn groups_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = match group_by_location(state.pool.nodes(), UNKNOWN_GROUP) {
        Ok(groups) => {
            let groups: serde_json::Map<String, serde_json::Value> = groups
                .into_iter()
                .map(|(location, nodes)| {
                    let names = nodes.iter().map(|n| n.name()).collect::<Vec<_>>();
                    (location, serde_json::json!(names))
                })
                .collect();
            serde_json::Value::Object(groups)
        }
        Err(_) => serde_json::json!({}),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
