//! Guardian Gateway server binary.

use std::sync::Arc;

use mimalloc::MiMalloc;

use guardian_gateway::AppState;
use guardian_gateway::config::AppConfig;
use guardian_gateway::llm::ClientRegistry;
use guardian_gateway::security::ProcessEnv;
use guardian_gateway::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before reading any configuration.
    let _ = dotenvy::dotenv();

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry);

    tracing::info!(
        name: "config.loaded",
        environment = %config.server.environment,
        rate_limit = config.resilience.rate_limit_enabled,
        health_interval_secs = config.health.interval_secs,
        "configuration loaded"
    );

    let state = AppState::build(config, Arc::new(ProcessEnv), ClientRegistry::with_defaults())?;
    server::prepare(&state).await?;
    server::start_server(state).await
}
