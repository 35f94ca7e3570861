use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::time::Duration;

use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::api;
use crate::security::rate_limit_middleware;

/// Effectively no timeout, without changing the router's layer types.
const DISABLED_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Assemble the HTTP router with all middleware applied.
pub fn build_app(state: AppState) -> Router {
    let resilience = &state.config.resilience;
    let timeout_duration = if resilience.timeout_disabled {
        DISABLED_TIMEOUT
    } else {
        Duration::from_secs(resilience.request_timeout_secs)
    };
    let body_limit = state.config.server.body_limit_bytes;

    Router::new()
        .route("/api/chat", post(api::chat::chat).get(api::chat::capabilities))
        .route("/api/generate/text", post(api::generate::text))
        .route(
            "/api/generate/image",
            post(api::generate::image).get(api::generate::image_options),
        )
        .route("/api/generate/video", post(api::generate::video))
        .route("/api/generate/audio", post(api::generate::audio))
        .route("/api/guardians", get(api::info::guardians))
        .route("/api/health", get(api::info::health))
        .route("/api/usage", get(api::info::usage))
        .layer(
            // Outermost first: trace, rate limit, timeout, body limit.
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    rate_limit_middleware,
                ))
                .layer(axum::middleware::from_fn(
                    move |req: Request, next: Next| async move {
                        match tokio::time::timeout(timeout_duration, next.run(req)).await {
                            Ok(res) => res,
                            Err(_) => {
                                (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                            }
                        }
                    },
                ))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// Startup work that must finish before traffic is accepted.
///
/// In production a missing required credential aborts startup. Connections
/// are attempted for every provider; failures are logged, not fatal.
pub async fn prepare(state: &AppState) -> anyhow::Result<()> {
    let config = &state.config;
    state
        .secrets
        .validate_required(config.server.is_production())?;

    let connected = state.connections.initialize().await;
    info!(
        name: "connections.initialized",
        connected,
        total = state.providers.all().count(),
        "provider connections initialized"
    );

    if config.health.enabled && config.health.interval_secs > 0 {
        state
            .connections
            .start_health_monitor(Duration::from_secs(config.health.interval_secs));
    }
    Ok(())
}

/// Serve until Ctrl-C, then stop the health monitor and close connections.
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let connections = std::sync::Arc::clone(&state.connections);
    let app = build_app(state);

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    connections.shutdown().await;
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(name: "server.signal.failed", error = %e, "failed to listen for shutdown signal");
    }
}
