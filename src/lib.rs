//! Guardian Gateway
//!
//! A persona-aware request router in front of hosted text, image, video and
//! audio models. Requests pass a fixed-window rate limiter, are routed to a
//! provider (explicit model, persona preference, prompt keywords, complexity),
//! dispatched over a lazily established connection, optionally rewritten in
//! the persona's voice, and accounted for in a running cost total.
//!
//! # Modules
//!
//! - [`registry`]: static provider and persona tables
//! - [`security`]: credential store and rate limiter
//! - [`llm`]: provider clients behind the [`llm::ProviderClient`] trait
//! - [`connections`]: per-provider connections and health monitoring
//! - [`router`]: provider selection, dispatch and cost accounting
//! - [`api`]: HTTP handlers
//! - [`server`]: router assembly and the serve loop

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod api;
pub mod config;
pub mod connections;
pub mod error;
pub mod llm;
pub mod registry;
pub mod router;
pub mod security;
pub mod server;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::connections::ConnectionManager;
use crate::llm::ClientRegistry;
use crate::registry::{PersonaRegistry, ProviderRegistry};
use crate::router::RequestRouter;
use crate::security::{FixedWindowRateLimiter, SecretSource, SecretStore};

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Global configuration.
    pub config: Arc<AppConfig>,
    pub providers: Arc<ProviderRegistry>,
    pub personas: Arc<PersonaRegistry>,
    pub secrets: Arc<SecretStore>,
    /// Provider connections and the health monitor.
    pub connections: Arc<ConnectionManager>,
    pub router: Arc<RequestRouter>,
    /// Global rate limiter.
    pub rate_limiter: Arc<FixedWindowRateLimiter>,
}

impl AppState {
    /// Wire every service from configuration.
    ///
    /// Credentials come from `secrets`; provider clients from `clients`.
    /// Nothing connects yet; see [`server::prepare`].
    pub fn build(
        config: AppConfig,
        secrets: Arc<dyn SecretSource>,
        clients: ClientRegistry,
    ) -> anyhow::Result<Self> {
        let providers = Arc::new(
            ProviderRegistry::with_defaults()
                .with_pricing(&config.pricing)
                .with_endpoints(&config.endpoints)?,
        );
        let personas = Arc::new(PersonaRegistry::with_defaults());
        let secrets = Arc::new(SecretStore::with_default_rules(
            secrets,
            Arc::clone(&providers),
        )?);

        let http = llm::http_client(Duration::from_secs(config.resilience.upstream_timeout_secs))?;
        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&providers),
            Arc::clone(&secrets),
            clients,
            http,
        ));
        let router = Arc::new(RequestRouter::new(
            Arc::clone(&providers),
            Arc::clone(&personas),
            Arc::clone(&connections),
            config.routing.clone(),
        )?);
        let rate_limiter = Arc::new(FixedWindowRateLimiter::new(
            config.resilience.rate_limit.sweep_threshold,
        ));

        Ok(Self {
            config: Arc::new(config),
            providers,
            personas,
            secrets,
            connections,
            router,
            rate_limiter,
        })
    }
}
