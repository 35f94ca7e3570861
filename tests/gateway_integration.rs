use std::collections::HashSet;
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use parking_lot::Mutex;
use serde_json::{Value, json};

use guardian_gateway::AppState;
use guardian_gateway::config::{AppConfig, RouteLimit};
use guardian_gateway::error::{GatewayError, Result};
use guardian_gateway::llm::{
    ClientBuilder, ClientRegistry, GenerationRequest, NormalizedResponse, ProviderClient,
    ProviderFamily, TextStream, Usage,
};
use guardian_gateway::registry::{ProviderConfig, ProviderKind};
use guardian_gateway::security::StaticSecrets;
use guardian_gateway::server;

const OPENAI_KEY: &str = "sk-proj0123456789abcdefXYZ";
const ANTHROPIC_KEY: &str = "sk-ant-REDACTED";

#[derive(Debug, Clone)]
struct Call {
    provider: String,
    request: GenerationRequest,
}

type Calls = Arc<Mutex<Vec<Call>>>;

/// Answers `"{provider}: {prompt}"` unless `failing` holds its provider id or
/// a prefix of the prompt.
#[derive(Debug)]
struct MockClient {
    provider: ProviderConfig,
    calls: Calls,
    failing: Arc<HashSet<String>>,
}

#[async_trait::async_trait]
impl ProviderClient for MockClient {
    fn family(&self) -> ProviderFamily {
        self.provider.family
    }

    async fn generate(
        &self,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<NormalizedResponse> {
        self.calls.lock().push(Call {
            provider: self.provider.id.clone(),
            request: request.clone(),
        });
        if self.failing.contains(&self.provider.id)
            || self.failing.iter().any(|f| request.prompt.starts_with(f.as_str()))
        {
            return Err(GatewayError::GenerationFailed("upstream 503".into()));
        }
        Ok(match kind {
            ProviderKind::Text => NormalizedResponse::text(
                format!("{}: {}", self.provider.id, request.prompt),
                Usage::tokens(10, 20),
            ),
            _ => NormalizedResponse {
                content: format!("https://cdn.test/{}.bin", self.provider.id),
                mime_type: Some("image/png".into()),
                usage: Usage::assets(1),
            },
        })
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream> {
        self.calls.lock().push(Call {
            provider: self.provider.id.clone(),
            request: request.clone(),
        });
        let chunks = vec![Ok("The sea ".to_string()), Ok("is calm.".to_string())];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    server: TestServer,
    calls: Calls,
}

fn mock_clients(calls: &Calls, failing: &[&str]) -> ClientRegistry {
    let failing: Arc<HashSet<String>> = Arc::new(failing.iter().map(|s| (*s).to_string()).collect());
    let builder = |calls: Calls, failing: Arc<HashSet<String>>| -> ClientBuilder {
        Arc::new(move |cfg: &ProviderConfig, _key: String, _http: reqwest::Client| {
            Arc::new(MockClient {
                provider: cfg.clone(),
                calls: Arc::clone(&calls),
                failing: Arc::clone(&failing),
            }) as Arc<dyn ProviderClient>
        })
    };
    ClientRegistry::empty()
        .register(
            ProviderFamily::OpenAi,
            builder(Arc::clone(calls), Arc::clone(&failing)),
        )
        .register(
            ProviderFamily::Anthropic,
            builder(Arc::clone(calls), Arc::clone(&failing)),
        )
}

fn base_config() -> AppConfig {
    let mut config =
        AppConfig::load_from_args(["guardian-gateway"]).expect("default config should load");
    config.health.enabled = false;
    config
}

async fn harness_with(config: AppConfig, failing: &[&str]) -> Harness {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let secrets = StaticSecrets::new()
        .with("OPENAI_API_KEY", OPENAI_KEY)
        .with("ANTHROPIC_API_KEY", ANTHROPIC_KEY);
    let state = AppState::build(config, Arc::new(secrets), mock_clients(&calls, failing))
        .expect("state should build");
    server::prepare(&state).await.expect("prepare should succeed");

    Harness {
        server: TestServer::new(server::build_app(state)).unwrap(),
        calls,
    }
}

async fn harness(failing: &[&str]) -> Harness {
    harness_with(base_config(), failing).await
}

#[tokio::test]
async fn test_persona_routes_to_preferred_provider() {
    let h = harness(&[]).await;

    let response = h
        .server
        .post("/api/generate/text")
        .json(&json!({ "prompt": "write a poem about the sea", "guardianId": "leyla" }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["metadata"]["provider"], "claude-3-5-sonnet");
    assert_eq!(body["metadata"]["guardian"], "leyla");
    assert_eq!(body["metadata"]["element"], "water");
    assert_eq!(body["metadata"]["selection"]["reason"], "guardian");
    assert_eq!(body["usage"]["tokens"], 30);

    let calls = h.calls.lock();
    let call = calls
        .iter()
        .find(|c| c.provider == "claude-3-5-sonnet")
        .expect("claude should have been called");
    let system = call.request.system.as_deref().unwrap_or_default();
    assert!(system.contains("water"));
    assert!(system.contains("417"));
}

#[tokio::test]
async fn test_guardian_mode_rewrites_and_adds_insight() {
    let h = harness(&[]).await;

    let body: Value = h
        .server
        .post("/api/generate/text")
        .json(&json!({
            "prompt": "write a poem about the sea",
            "guardianId": "leyla",
            "guardianMode": true
        }))
        .await
        .json();

    assert_eq!(body["success"], true);
    assert_eq!(body["metadata"]["enhancements"], json!(["rewrite", "insight"]));
    assert_eq!(
        body["metadata"]["original"],
        "claude-3-5-sonnet: write a poem about the sea"
    );
    assert!(body["data"].as_str().unwrap().starts_with("gpt-4o-mini: "));
    assert!(body["metadata"]["insight"].is_string());
}

#[tokio::test]
async fn test_failed_rewrite_keeps_primary_answer() {
    let h = harness(&["gpt-4o-mini"]).await;

    let response = h
        .server
        .post("/api/generate/text")
        .json(&json!({
            "prompt": "write a poem about the sea",
            "guardianId": "leyla",
            "guardianMode": true
        }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], "claude-3-5-sonnet: write a poem about the sea");
    assert_eq!(body["metadata"]["enhancements"], json!([]));
    assert!(body["metadata"].get("original").is_none());
}

#[tokio::test]
async fn test_failed_rewrite_with_insight_reports_no_enhancements() {
    // Only the rewrite pass fails; the insight call still succeeds.
    let h = harness(&["Rewrite the following"]).await;

    let response = h
        .server
        .post("/api/generate/text")
        .json(&json!({
            "prompt": "write a poem about the sea",
            "guardianId": "leyla",
            "guardianMode": true
        }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], "claude-3-5-sonnet: write a poem about the sea");
    assert_eq!(body["metadata"]["enhancements"], json!([]));
    assert!(body["metadata"].get("original").is_none());
    assert!(body["metadata"]["insight"].is_string());
}

#[tokio::test]
async fn test_failed_primary_keeps_insight() {
    let h = harness(&["claude-3-5-sonnet"]).await;

    let response = h
        .server
        .post("/api/generate/text")
        .json(&json!({
            "prompt": "write a poem about the sea",
            "guardianId": "leyla",
            "guardianMode": true
        }))
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert!(body.get("data").is_none());
    assert!(
        body["metadata"]["insight"]
            .as_str()
            .unwrap()
            .starts_with("gpt-4o-mini: ")
    );
    assert_eq!(body["metadata"]["enhancements"], json!(["insight"]));
    assert!(
        h.calls
            .lock()
            .iter()
            .all(|c| !c.request.prompt.starts_with("Rewrite"))
    );
}

#[tokio::test]
async fn test_keyword_routing_without_persona() {
    let h = harness(&[]).await;

    let body: Value = h
        .server
        .post("/api/generate/text")
        .json(&json!({ "prompt": "debug this python function" }))
        .await
        .json();
    assert_eq!(body["metadata"]["provider"], "claude-3-5-sonnet");
    assert_eq!(
        body["metadata"]["selection"],
        json!({ "reason": "task", "value": "code" })
    );
    assert!(h.calls.lock().iter().all(|c| c.request.system.is_none()));
}

#[tokio::test]
async fn test_validation_errors_are_400() {
    let h = harness(&[]).await;

    let empty = h
        .server
        .post("/api/generate/text")
        .json(&json!({ "prompt": "   " }))
        .await;
    empty.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = empty.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "invalid request: prompt must not be empty");

    let missing = h
        .server
        .post("/api/generate/text")
        .json(&json!({ "temperature": 1.0 }))
        .await;
    missing.assert_status(StatusCode::BAD_REQUEST);

    let unknown = h
        .server
        .post("/api/generate/text")
        .json(&json!({ "prompt": "hi", "guardianId": "morgana" }))
        .await;
    unknown.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(unknown.json::<Value>()["success"], false);

    assert!(h.calls.lock().is_empty());
}

#[tokio::test]
async fn test_rate_limit_returns_429_with_retry_after() {
    let mut config = base_config();
    config.resilience.rate_limit.routes.insert(
        "/api/guardians".to_string(),
        RouteLimit {
            quota: 2,
            window_ms: 60_000,
        },
    );
    let h = harness_with(config, &[]).await;

    let first = h.server.get("/api/guardians").await;
    first.assert_status_ok();
    assert_eq!(first.header("x-ratelimit-remaining"), "1");
    h.server.get("/api/guardians").await.assert_status_ok();

    let denied = h.server.get("/api/guardians").await;
    denied.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = denied
        .header("retry-after")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(denied.json::<Value>()["success"], false);

    // Other routes keep their own window.
    h.server.get("/api/usage").await.assert_status_ok();
}

#[tokio::test]
async fn test_chat_streams_plain_text() {
    let h = harness(&[]).await;

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({ "message": "tell me about the tides", "guardianId": "leyla" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("x-provider-id"), "claude-3-5-sonnet");
    assert_eq!(response.header("x-guardian-id"), "leyla");
    assert!(
        response
            .header("content-type")
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(response.text(), "The sea is calm.");

    let usage: Value = h.server.get("/api/usage").await.json();
    assert_eq!(usage["byProvider"]["claude-3-5-sonnet"]["requests"], 1);
}

#[tokio::test]
async fn test_media_generation() {
    let h = harness(&[]).await;

    let image: Value = h
        .server
        .post("/api/generate/image")
        .json(&json!({ "prompt": "a fox", "guardianId": "draconia", "quality": "hd" }))
        .await
        .json();
    assert_eq!(image["success"], true);
    assert_eq!(image["data"]["url"], "https://cdn.test/dall-e-3.bin");
    assert!(image["data"]["prompt"].as_str().unwrap().contains("fire"));
    assert_eq!(image["usage"]["cost"], 0.04);

    // No Replicate credential and no other video provider.
    let video = h
        .server
        .post("/api/generate/video")
        .json(&json!({ "prompt": "waves at dusk" }))
        .await;
    video.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = video.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "The request could not be completed");
}

#[tokio::test]
async fn test_info_endpoints() {
    let h = harness(&[]).await;

    let guardians: Value = h.server.get("/api/guardians").await.json();
    assert_eq!(guardians.as_array().unwrap().len(), 5);
    assert!(
        guardians
            .as_array()
            .unwrap()
            .iter()
            .any(|g| g["id"] == "leyla" && g["frequencyHz"] == 417)
    );

    let options: Value = h.server.get("/api/generate/image").await.json();
    assert_eq!(options["styles"], json!(["vivid", "natural"]));
    assert!(
        options["providers"]
            .as_array()
            .unwrap()
            .contains(&json!("dall-e-3"))
    );

    let capabilities: Value = h.server.get("/api/chat").await.json();
    assert_eq!(capabilities["streaming"], true);

    let health: Value = h
        .server
        .get("/api/health")
        .add_query_param("probe", "true")
        .await
        .json();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["monitorRunning"], false);
    let connections = health["connections"].as_array().unwrap();
    assert!(
        connections
            .iter()
            .any(|c| c["providerId"] == "claude-3-5-sonnet" && c["status"] == "connected")
    );
    // Credential audit never carries values.
    let serialized = health["secrets"].to_string();
    assert!(!serialized.contains(OPENAI_KEY));
    assert!(serialized.contains("OPENAI_API_KEY"));

    let usage: Value = h.server.get("/api/usage").await.json();
    assert_eq!(usage["requests"], 0);
}
