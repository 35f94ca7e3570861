//! Replicate predictions client, used for video generation.
//!
//! Predictions are created with `Prefer: wait`; if the model is still running
//! when the server gives up waiting, the prediction URL is polled. The whole
//! prediction, creation included, runs under one time budget that ends before
//! the HTTP layer's request timeout.

use std::time::Duration;

use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::registry::{ProviderConfig, ProviderKind};

use super::{
    GenerationRequest, NormalizedResponse, ProviderClient, ProviderFamily, Usage, ensure_success,
    unsupported_kind,
};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Wall-clock limit for one prediction. Below the default 120s request timeout.
const PREDICTION_BUDGET: Duration = Duration::from_secs(100);

#[derive(Clone)]
pub struct ReplicateClient {
    http: reqwest::Client,
    provider: ProviderConfig,
    api_token: String,
    budget: Duration,
}

impl std::fmt::Debug for ReplicateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateClient")
            .field("provider", &self.provider.id)
            .finish_non_exhaustive()
    }
}

/// Outcome of reading a prediction object.
#[derive(Debug, PartialEq)]
enum PredictionState {
    Succeeded(String),
    Pending(Option<String>),
    Failed(String),
}

fn read_prediction(v: &Value) -> PredictionState {
    match v["status"].as_str().unwrap_or_default() {
        "succeeded" => {
            let output = match &v["output"] {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => items.iter().find_map(|i| i.as_str().map(String::from)),
                _ => None,
            };
            match output {
                Some(url) => PredictionState::Succeeded(url),
                None => PredictionState::Failed("prediction succeeded without output".into()),
            }
        }
        "failed" | "canceled" => PredictionState::Failed(
            v["error"]
                .as_str()
                .unwrap_or("prediction did not complete")
                .to_string(),
        ),
        _ => PredictionState::Pending(v["urls"]["get"].as_str().map(String::from)),
    }
}

impl ReplicateClient {
    #[must_use]
    pub fn new(provider: ProviderConfig, api_token: String, http: reqwest::Client) -> Self {
        Self {
            http,
            provider,
            api_token,
            budget: PREDICTION_BUDGET,
        }
    }

    /// Replace the per-prediction time budget.
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    fn base(&self) -> &str {
        self.provider.endpoint.trim_end_matches('/')
    }

    async fn poll(&self, mut url: String) -> Result<String> {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            let resp = self
                .http
                .get(&url)
                .bearer_auth(&self.api_token)
                .send()
                .await?;
            let v: Value = ensure_success(self.family(), resp).await?.json().await?;
            match read_prediction(&v) {
                PredictionState::Succeeded(out) => return Ok(out),
                PredictionState::Failed(reason) => {
                    return Err(GatewayError::GenerationFailed(format!("replicate: {reason}")));
                }
                PredictionState::Pending(next) => {
                    if let Some(next) = next {
                        url = next;
                    }
                }
            }
        }
    }

    async fn predict(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/v1/models/{}/predictions", self.base(), self.provider.model);
        let mut input = json!({ "prompt": request.prompt });
        if let Some(d) = request.media.duration_seconds {
            input["duration"] = json!(d);
        }
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&json!({ "input": input }))
            .send()
            .await?;
        let v: Value = ensure_success(self.family(), resp).await?.json().await?;

        match read_prediction(&v) {
            PredictionState::Succeeded(out) => Ok(out),
            PredictionState::Failed(reason) => {
                Err(GatewayError::GenerationFailed(format!("replicate: {reason}")))
            }
            PredictionState::Pending(Some(get_url)) => self.poll(get_url).await,
            PredictionState::Pending(None) => Err(GatewayError::GenerationFailed(
                "replicate prediction has no polling url".into(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for ReplicateClient {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Replicate
    }

    async fn generate(
        &self,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<NormalizedResponse> {
        if kind != ProviderKind::Video {
            return Err(unsupported_kind(self.family(), kind));
        }
        let content = tokio::time::timeout(self.budget, self.predict(request))
            .await
            .map_err(|_| {
                GatewayError::GenerationFailed(format!(
                    "replicate prediction did not finish within {}s",
                    self.budget.as_secs()
                ))
            })??;
        Ok(NormalizedResponse {
            content,
            mime_type: Some("video/mp4".to_string()),
            usage: Usage::assets(1),
        })
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/v1/account", self.base()))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        ensure_success(self.family(), resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_prediction_states() {
        assert_eq!(
            read_prediction(&json!({ "status": "succeeded", "output": "https://cdn/v.mp4" })),
            PredictionState::Succeeded("https://cdn/v.mp4".into())
        );
        assert_eq!(
            read_prediction(&json!({ "status": "succeeded", "output": ["https://cdn/a.mp4"] })),
            PredictionState::Succeeded("https://cdn/a.mp4".into())
        );
        assert_eq!(
            read_prediction(&json!({ "status": "processing", "urls": { "get": "https://api/p/1" } })),
            PredictionState::Pending(Some("https://api/p/1".into()))
        );
        assert!(matches!(
            read_prediction(&json!({ "status": "failed", "error": "nsfw" })),
            PredictionState::Failed(reason) if reason == "nsfw"
        ));
    }

    #[tokio::test]
    async fn test_prediction_stops_at_budget() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let registry = crate::registry::ProviderRegistry::with_defaults();
        let mut provider = registry.get("stable-video").unwrap().clone();
        provider.endpoint = format!("http://{addr}");
        let client = ReplicateClient::new(provider, "r8_test".into(), reqwest::Client::new())
            .with_budget(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = client
            .generate(ProviderKind::Video, &GenerationRequest::text("a calm sea"))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            err,
            GatewayError::GenerationFailed(msg) if msg.contains("did not finish")
        ));
    }
}
