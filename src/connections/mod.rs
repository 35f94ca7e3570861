//! Provider connections.
//!
//! The [`ConnectionManager`] builds at most one [`Connection`] per provider
//! id, lazily, using a credential from the [`SecretStore`] and a client from
//! the [`ClientRegistry`]. Each connection counts its requests and errors and
//! carries the result of its latest health probe.
//!
//! ```text
//! uninitialized ──connect──▶ connecting ──probe ok──▶ connected ──shutdown──▶ disconnected
//!                                       └─probe err─▶ error
//! ```

mod health;

pub use health::HealthMonitor;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::{GatewayError, Result};
use crate::llm::{ClientRegistry, GenerationRequest, NormalizedResponse, ProviderClient, TextStream};
use crate::registry::{Capability, ProviderConfig, ProviderKind, ProviderRegistry};
use crate::security::SecretStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Error,
    Disconnected,
}

#[derive(Debug)]
struct ConnectionState {
    status: ConnectionStatus,
    last_used_at: Option<DateTime<Utc>>,
    last_health_check_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// A live client for one provider.
pub struct Connection {
    provider: ProviderConfig,
    client: Arc<dyn ProviderClient>,
    state: RwLock<ConnectionState>,
    requests: AtomicU64,
    errors: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("provider", &self.provider.id)
            .field("client", &self.client)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Serializable view of a connection for the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub provider_id: String,
    pub kind: ProviderKind,
    pub status: ConnectionStatus,
    pub requests: u64,
    pub errors: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Connection {
    fn new(provider: ProviderConfig, client: Arc<dyn ProviderClient>) -> Self {
        Self {
            provider,
            client,
            state: RwLock::new(ConnectionState {
                status: ConnectionStatus::Connecting,
                last_used_at: None,
                last_health_check_at: None,
                last_error: None,
            }),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.state.read();
        ConnectionSnapshot {
            provider_id: self.provider.id.clone(),
            kind: self.provider.kind,
            status: state.status,
            requests: self.requests(),
            errors: self.errors(),
            last_used_at: state.last_used_at,
            last_health_check_at: state.last_health_check_at,
            last_error: state.last_error.clone(),
        }
    }

    /// Probe the provider and record the outcome. Returns whether it is healthy.
    async fn probe(&self) -> bool {
        let outcome = self.client.probe().await;
        let mut state = self.state.write();
        state.last_health_check_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                state.status = ConnectionStatus::Connected;
                state.last_error = None;
                true
            }
            Err(e) => {
                tracing::warn!(
                    name: "connection.probe.failed",
                    provider = %self.provider.id,
                    error = %e,
                    "health probe failed"
                );
                state.status = ConnectionStatus::Error;
                state.last_error = Some(e.to_string());
                false
            }
        }
    }

    fn begin(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.state.write().last_used_at = Some(Utc::now());
    }

    fn fail(&self, error: &GatewayError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            name: "connection.call.failed",
            provider = %self.provider.id,
            error = %error,
            "provider call failed"
        );
    }

    async fn generate(
        &self,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<NormalizedResponse> {
        self.begin();
        let result = self.client.generate(kind, request).await;
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }
}

/// A completed call together with the provider that served it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub provider: ProviderConfig,
    pub response: NormalizedResponse,
}

/// A streaming call together with the provider that serves it.
pub struct StreamCompletion {
    pub provider: ProviderConfig,
    pub stream: TextStream,
}

impl std::fmt::Debug for StreamCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCompletion")
            .field("provider", &self.provider.id)
            .finish_non_exhaustive()
    }
}

/// Result of one sweep of health probes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub checked: usize,
    pub unhealthy: usize,
    pub connections: Vec<ConnectionSnapshot>,
}

pub struct ConnectionManager {
    providers: Arc<ProviderRegistry>,
    secrets: Arc<SecretStore>,
    clients: ClientRegistry,
    http: reqwest::Client,
    connections: Mutex<HashMap<String, Arc<OnceCell<Arc<Connection>>>>>,
    monitor: Mutex<Option<HealthMonitor>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("clients", &self.clients)
            .field("connections", &self.connections().len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        secrets: Arc<SecretStore>,
        clients: ClientRegistry,
        http: reqwest::Client,
    ) -> Self {
        Self {
            providers,
            secrets,
            clients,
            http,
            connections: Mutex::new(HashMap::new()),
            monitor: Mutex::new(None),
        }
    }

    /// Connection for a provider, building it on first use.
    ///
    /// Concurrent callers for the same id share one build; every call
    /// returns the same `Arc`. A failed probe still registers the
    /// connection with status `error`.
    pub async fn connect(&self, provider_id: &str) -> Result<Arc<Connection>> {
        let provider = self.providers.get(provider_id)?;
        let cell = self
            .connections
            .lock()
            .entry(provider.id.clone())
            .or_default()
            .clone();
        let connection = cell.get_or_try_init(|| self.establish(provider)).await?;
        Ok(Arc::clone(connection))
    }

    async fn establish(&self, provider: &ProviderConfig) -> Result<Arc<Connection>> {
        let credential = self.secrets.credential(&provider.id)?;
        let client = self.clients.build(provider, credential, self.http.clone())?;
        let connection = Arc::new(Connection::new(provider.clone(), client));

        if connection.probe().await {
            tracing::info!(
                name: "connection.established",
                provider = %provider.id,
                family = %provider.family,
                "provider connected"
            );
        }
        Ok(connection)
    }

    /// Connect every provider whose credential resolves. Returns how many
    /// ended up `connected`.
    pub async fn initialize(&self) -> usize {
        let ids: Vec<String> = self.providers.all().map(|p| p.id.clone()).collect();
        let attempts = futures::future::join_all(ids.iter().map(|id| self.connect(id))).await;

        let mut connected = 0;
        for (id, attempt) in ids.iter().zip(attempts) {
            match attempt {
                Ok(c) if c.status() == ConnectionStatus::Connected => connected += 1,
                Ok(_) => {}
                Err(e) => tracing::debug!(
                    name: "connection.skipped",
                    provider = %id,
                    error = %e,
                    "provider not connected at startup"
                ),
            }
        }
        tracing::info!(
            name: "connection.initialized",
            connected,
            total = ids.len(),
            "connection manager initialized"
        );
        connected
    }

    /// Registered connections, ordered by provider id.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let map = self.connections.lock();
        let mut out: Vec<_> = map.values().filter_map(|cell| cell.get().cloned()).collect();
        out.sort_by(|a, b| a.provider.id.cmp(&b.provider.id));
        out
    }

    #[must_use]
    pub fn get(&self, provider_id: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .get(provider_id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Pick the connection serving `capability`.
    ///
    /// The requested provider wins if it advertises the capability and can be
    /// connected. Otherwise any `connected` provider advertising it is used.
    /// With neither, the result is `NoConnectionAvailable`; the requested
    /// provider's own failure is only logged.
    async fn resolve(
        &self,
        provider_id: Option<&str>,
        capability: Capability,
    ) -> Result<Arc<Connection>> {
        let mut requested_error = None;
        if let Some(id) = provider_id {
            match self.connect(id).await {
                Ok(conn) if conn.provider.has(capability) => return Ok(conn),
                Ok(_) => tracing::debug!(
                    name: "connection.capability.mismatch",
                    provider = %id,
                    capability = %capability,
                    "requested provider lacks capability"
                ),
                Err(e @ GatewayError::ConfigNotFound { .. }) => return Err(e),
                Err(e) => requested_error = Some(e),
            }
        }

        let fallback = self.connections().into_iter().find(|c| {
            c.status() == ConnectionStatus::Connected && c.provider.has(capability)
        });
        match fallback {
            Some(conn) => {
                if let Some(id) = provider_id {
                    tracing::info!(
                        name: "connection.fallback",
                        requested = %id,
                        provider = %conn.provider.id,
                        capability = %capability,
                        "falling back to another connected provider"
                    );
                }
                Ok(conn)
            }
            None => {
                if let (Some(id), Some(e)) = (provider_id, &requested_error) {
                    tracing::warn!(
                        name: "connection.unavailable",
                        provider = %id,
                        capability = %capability,
                        error = %e,
                        "requested provider unavailable and no fallback connected"
                    );
                }
                Err(GatewayError::NoConnectionAvailable(capability.to_string()))
            }
        }
    }

    async fn dispatch(
        &self,
        provider_id: Option<&str>,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<Completion> {
        let conn = self.resolve(provider_id, kind.capability()).await?;
        let response = conn.generate(kind, request).await?;
        Ok(Completion {
            provider: conn.provider.clone(),
            response,
        })
    }

    pub async fn generate_text(
        &self,
        provider_id: Option<&str>,
        request: &GenerationRequest,
    ) -> Result<Completion> {
        self.dispatch(provider_id, ProviderKind::Text, request).await
    }

    pub async fn generate_image(
        &self,
        provider_id: Option<&str>,
        request: &GenerationRequest,
    ) -> Result<Completion> {
        self.dispatch(provider_id, ProviderKind::Image, request).await
    }

    pub async fn generate_video(
        &self,
        provider_id: Option<&str>,
        request: &GenerationRequest,
    ) -> Result<Completion> {
        self.dispatch(provider_id, ProviderKind::Video, request).await
    }

    pub async fn generate_audio(
        &self,
        provider_id: Option<&str>,
        request: &GenerationRequest,
    ) -> Result<Completion> {
        self.dispatch(provider_id, ProviderKind::Audio, request).await
    }

    /// Streamed text completion. Chunk errors count against the connection.
    pub async fn stream_text(
        &self,
        provider_id: Option<&str>,
        request: &GenerationRequest,
    ) -> Result<StreamCompletion> {
        let conn = self.resolve(provider_id, Capability::Text).await?;
        conn.begin();
        let inner = match conn.client.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                conn.fail(&e);
                return Err(e);
            }
        };
        let counted = Arc::clone(&conn);
        let stream = inner.inspect(move |item| {
            if let Err(e) = item {
                counted.fail(e);
            }
        });
        Ok(StreamCompletion {
            provider: conn.provider.clone(),
            stream: Box::pin(stream),
        })
    }

    /// Probe every registered connection that is not shut down.
    pub async fn check_health(&self) -> HealthReport {
        let live: Vec<_> = self
            .connections()
            .into_iter()
            .filter(|c| c.status() != ConnectionStatus::Disconnected)
            .collect();
        let results = futures::future::join_all(live.iter().map(|c| c.probe())).await;
        let unhealthy = results.iter().filter(|ok| !**ok).count();

        if unhealthy > 0 {
            tracing::warn!(
                name: "health.check.unhealthy",
                unhealthy,
                checked = live.len(),
                "unhealthy provider connections"
            );
        } else {
            tracing::debug!(name: "health.check.ok", checked = live.len(), "all connections healthy");
        }

        HealthReport {
            checked: live.len(),
            unhealthy,
            connections: self.snapshot(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        self.connections().iter().map(|c| c.snapshot()).collect()
    }

    /// Start the background health monitor. Returns `false` if one is
    /// already running.
    pub fn start_health_monitor(self: &Arc<Self>, interval: Duration) -> bool {
        let mut slot = self.monitor.lock();
        if slot.as_ref().is_some_and(|m| !m.is_finished()) {
            return false;
        }
        *slot = Some(HealthMonitor::spawn(Arc::downgrade(self), interval));
        true
    }

    /// Stop the background health monitor and wait for it to exit.
    pub async fn stop_health_monitor(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
    }

    #[must_use]
    pub fn health_monitor_running(&self) -> bool {
        self.monitor.lock().as_ref().is_some_and(|m| !m.is_finished())
    }

    /// Stop monitoring and mark every connection `disconnected`.
    pub async fn shutdown(&self) {
        self.stop_health_monitor().await;
        let connections = self.connections();
        for conn in &connections {
            conn.state.write().status = ConnectionStatus::Disconnected;
        }
        tracing::info!(
            name: "connection.shutdown",
            connections = connections.len(),
            "connections closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ProviderFamily, Usage};
    use crate::security::StaticSecrets;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Default)]
    struct FakeClient {
        fail_generate: bool,
        healthy: AtomicBool,
        probes: AtomicU64,
    }

    #[async_trait::async_trait]
    impl ProviderClient for FakeClient {
        fn family(&self) -> ProviderFamily {
            ProviderFamily::OpenAi
        }

        async fn generate(
            &self,
            kind: ProviderKind,
            request: &GenerationRequest,
        ) -> Result<NormalizedResponse> {
            if self.fail_generate {
                return Err(GatewayError::GenerationFailed("boom".into()));
            }
            Ok(NormalizedResponse::text(
                format!("{kind}: {}", request.prompt),
                Usage::tokens(10, 5),
            ))
        }

        async fn probe(&self) -> Result<()> {
            self.probes.fetch_add(1, Ordering::Relaxed);
            if self.healthy.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(GatewayError::GenerationFailed("unreachable".into()))
            }
        }
    }

    fn manager_with(client: Arc<FakeClient>, secrets: StaticSecrets) -> Arc<ConnectionManager> {
        let providers = Arc::new(ProviderRegistry::with_defaults());
        let secrets = Arc::new(
            SecretStore::with_default_rules(Arc::new(secrets), Arc::clone(&providers)).unwrap(),
        );
        let builder = move |_: &ProviderConfig, _: String, _: reqwest::Client| {
            Arc::clone(&client) as Arc<dyn ProviderClient>
        };
        let clients = ClientRegistry::empty().register(ProviderFamily::OpenAi, Arc::new(builder));
        Arc::new(ConnectionManager::new(
            providers,
            secrets,
            clients,
            reqwest::Client::new(),
        ))
    }

    fn openai_secrets() -> StaticSecrets {
        StaticSecrets::new().with("OPENAI_API_KEY", "sk-test0123456789abcdefghij")
    }

    fn healthy() -> Arc<FakeClient> {
        Arc::new(FakeClient {
            healthy: AtomicBool::new(true),
            ..FakeClient::default()
        })
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let manager = manager_with(healthy(), openai_secrets());
        let a = manager.connect("gpt-4o").await.unwrap();
        let b = manager.connect("gpt-4o").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.status(), ConnectionStatus::Connected);
        assert_eq!(manager.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connect_builds_once() {
        let client = healthy();
        let manager = manager_with(Arc::clone(&client), openai_secrets());
        let (a, b) = tokio::join!(manager.connect("gpt-4o"), manager.connect("gpt-4o"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(client.probes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_connect_errors() {
        let manager = manager_with(healthy(), openai_secrets());
        assert!(matches!(
            manager.connect("gpt-9").await,
            Err(GatewayError::ConfigNotFound { .. })
        ));
        // No credential configured for Anthropic.
        assert!(matches!(
            manager.connect("claude-3-5-sonnet").await,
            Err(GatewayError::MissingCredential(id)) if id == "claude-3-5-sonnet"
        ));

        let secrets = openai_secrets().with("ANTHROPIC_API_KEY", "sk-ant-short");
        let manager = manager_with(healthy(), secrets);
        assert!(matches!(
            manager.connect("claude-3-5-sonnet").await,
            Err(GatewayError::InvalidCredentialFormat(id)) if id == "claude-3-5-sonnet"
        ));

        let secrets = openai_secrets().with("REPLICATE_API_TOKEN", "r8_abcdefghijklmnopqrstuvwxyz0123");
        let manager = manager_with(healthy(), secrets);
        assert!(matches!(
            manager.connect("stable-video").await,
            Err(GatewayError::UnsupportedProvider(family)) if family == "replicate"
        ));
    }

    #[tokio::test]
    async fn test_failed_probe_still_registers() {
        let manager = manager_with(Arc::new(FakeClient::default()), openai_secrets());
        let conn = manager.connect("gpt-4o").await.unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Error);
        assert!(conn.snapshot().last_error.is_some());
        assert!(manager.get("gpt-4o").is_some());
    }

    #[tokio::test]
    async fn test_dispatch_counts_requests_and_errors() {
        let failing = Arc::new(FakeClient {
            fail_generate: true,
            healthy: AtomicBool::new(true),
            ..FakeClient::default()
        });
        let manager = manager_with(failing, openai_secrets());
        let req = GenerationRequest::text("hi");
        assert!(manager.generate_text(Some("gpt-4o"), &req).await.is_err());
        let conn = manager.get("gpt-4o").unwrap();
        assert_eq!((conn.requests(), conn.errors()), (1, 1));

        let manager = manager_with(healthy(), openai_secrets());
        let done = manager.generate_image(Some("dall-e-3"), &req).await.unwrap();
        assert_eq!(done.provider.id, "dall-e-3");
        assert_eq!(done.response.content, "image: hi");
        let conn = manager.get("dall-e-3").unwrap();
        assert_eq!((conn.requests(), conn.errors()), (1, 0));
    }

    #[tokio::test]
    async fn test_dispatch_falls_back_to_connected_provider() {
        let manager = manager_with(healthy(), openai_secrets());
        manager.connect("gpt-4o-mini").await.unwrap();

        // Claude has no credential; gpt-4o-mini serves text instead.
        let req = GenerationRequest::text("hi");
        let done = manager.generate_text(Some("claude-3-5-sonnet"), &req).await.unwrap();
        assert_eq!(done.provider.id, "gpt-4o-mini");

        // Nothing connected can make video.
        assert!(matches!(
            manager.generate_video(None, &req).await,
            Err(GatewayError::NoConnectionAvailable(cap)) if cap == "video"
        ));
    }

    #[tokio::test]
    async fn test_unavailable_requested_provider_without_fallback() {
        let manager = manager_with(healthy(), openai_secrets());
        let req = GenerationRequest::text("hi");

        // Claude has no credential and nothing else is connected yet.
        assert!(matches!(
            manager.generate_text(Some("claude-3-5-sonnet"), &req).await,
            Err(GatewayError::NoConnectionAvailable(cap)) if cap == "text"
        ));
        // Unknown ids are still reported as such.
        assert!(matches!(
            manager.generate_text(Some("gpt-9"), &req).await,
            Err(GatewayError::ConfigNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_check_health_updates_status() {
        let client = healthy();
        let manager = manager_with(Arc::clone(&client), openai_secrets());
        manager.connect("gpt-4o").await.unwrap();

        client.healthy.store(false, Ordering::Relaxed);
        let report = manager.check_health().await;
        assert_eq!((report.checked, report.unhealthy), (1, 1));
        assert_eq!(manager.get("gpt-4o").unwrap().status(), ConnectionStatus::Error);

        client.healthy.store(true, Ordering::Relaxed);
        let report = manager.check_health().await;
        assert_eq!(report.unhealthy, 0);
        assert!(report.connections[0].last_health_check_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_probes_until_stopped() {
        let client = healthy();
        let manager = manager_with(Arc::clone(&client), openai_secrets());
        manager.connect("gpt-4o").await.unwrap();
        assert!(manager.start_health_monitor(Duration::from_secs(30)));
        assert!(!manager.start_health_monitor(Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(client.probes.load(Ordering::Relaxed), 3);

        manager.shutdown().await;
        assert!(!manager.health_monitor_running());
        assert_eq!(manager.get("gpt-4o").unwrap().status(), ConnectionStatus::Disconnected);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(client.probes.load(Ordering::Relaxed), 3);
    }
}
