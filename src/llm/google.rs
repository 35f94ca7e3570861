//! Google Gemini client (`generateContent`).

use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::registry::{ProviderConfig, ProviderKind};

use super::{
    GenerationRequest, NormalizedResponse, ProviderClient, ProviderFamily, Usage, ensure_success,
    unsupported_kind,
};

#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    provider: ProviderConfig,
    api_key: String,
}

impl std::fmt::Debug for GoogleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleClient")
            .field("provider", &self.provider.id)
            .finish_non_exhaustive()
    }
}

impl GoogleClient {
    #[must_use]
    pub fn new(provider: ProviderConfig, api_key: String, http: reqwest::Client) -> Self {
        Self {
            http,
            provider,
            api_key,
        }
    }

    fn base(&self) -> &str {
        self.provider.endpoint.trim_end_matches('/')
    }

    fn body(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        let mut generation = serde_json::Map::new();
        if let Some(max) = request.max_tokens.or(self.provider.max_tokens) {
            generation.insert("maxOutputTokens".into(), json!(max));
        }
        if let Some(t) = request.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }
}

fn collect_text(v: &Value) -> Option<String> {
    let parts = v["candidates"][0]["content"]["parts"].as_array()?;
    Some(parts.iter().filter_map(|p| p["text"].as_str()).collect())
}

#[async_trait::async_trait]
impl ProviderClient for GoogleClient {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Google
    }

    async fn generate(
        &self,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<NormalizedResponse> {
        if kind != ProviderKind::Text {
            return Err(unsupported_kind(self.family(), kind));
        }
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base(),
            self.provider.model
        );
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(request))
            .send()
            .await?;
        let v: Value = ensure_success(self.family(), resp).await?.json().await?;

        let content = collect_text(&v).ok_or_else(|| {
            let reason = v["promptFeedback"]["blockReason"]
                .as_str()
                .unwrap_or("no candidates");
            GatewayError::GenerationFailed(format!("gemini returned no content: {reason}"))
        })?;
        let meta = &v["usageMetadata"];
        let usage = Usage::tokens(
            meta["promptTokenCount"].as_u64().unwrap_or(0),
            meta["candidatesTokenCount"].as_u64().unwrap_or(0),
        );
        Ok(NormalizedResponse::text(content, usage))
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/v1beta/models", self.base());
        let resp = self
            .http
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        ensure_success(self.family(), resp).await?;
        Ok(())
    }
}
