//! Anthropic Messages API client (`/v1/messages`).

use futures::StreamExt;
use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::registry::{ProviderConfig, ProviderKind};

use super::{
    GenerationRequest, NormalizedResponse, ProviderClient, ProviderFamily, TextStream, Usage,
    ensure_success, sse, unsupported_kind,
};

const API_VERSION: &str = "2023-06-01";
/// The Messages API requires `max_tokens`.
const FALLBACK_MAX_TOKENS: u32 = 1024;

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    provider: ProviderConfig,
    api_key: String,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("provider", &self.provider.id)
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    #[must_use]
    pub fn new(provider: ProviderConfig, api_key: String, http: reqwest::Client) -> Self {
        Self {
            http,
            provider,
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.provider.endpoint.trim_end_matches('/'))
    }

    fn request(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let max_tokens = request
            .max_tokens
            .or(self.provider.max_tokens)
            .unwrap_or(FALLBACK_MAX_TOKENS);
        let mut body = json!({
            "model": self.provider.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if stream {
            body["stream"] = json!(true);
        }
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(t) = request.temperature {
            // Anthropic caps temperature at 1.0.
            body["temperature"] = json!(t.min(1.0));
        }
        body
    }
}

/// Concatenate the `text` blocks of a Messages API response.
fn collect_text(v: &Value) -> Option<String> {
    let blocks = v["content"].as_array()?;
    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    Some(text)
}

#[async_trait::async_trait]
impl ProviderClient for AnthropicClient {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    async fn generate(
        &self,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<NormalizedResponse> {
        if kind != ProviderKind::Text {
            return Err(unsupported_kind(self.family(), kind));
        }
        let resp = self
            .request(self.http.post(self.url("messages")))
            .json(&self.body(request, false))
            .send()
            .await?;
        let v: Value = ensure_success(self.family(), resp).await?.json().await?;

        let content = collect_text(&v)
            .ok_or_else(|| GatewayError::GenerationFailed("message has no content".into()))?;
        let usage = Usage::tokens(
            v["usage"]["input_tokens"].as_u64().unwrap_or(0),
            v["usage"]["output_tokens"].as_u64().unwrap_or(0),
        );
        Ok(NormalizedResponse::text(content, usage))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream> {
        let resp = self
            .request(self.http.post(self.url("messages")))
            .json(&self.body(request, true))
            .send()
            .await?;
        let resp = ensure_success(self.family(), resp).await?;
        let lines = sse::data_lines(resp.bytes_stream());

        let out = async_stream::try_stream! {
            futures::pin_mut!(lines);
            while let Some(data) = lines.next().await {
                let v: Value = serde_json::from_str(&data?)?;
                match v["type"].as_str() {
                    Some("content_block_delta") => {
                        if let Some(s) = v["delta"]["text"].as_str() {
                            if !s.is_empty() {
                                yield s.to_string();
                            }
                        }
                    }
                    Some("message_stop") => break,
                    Some("error") => {
                        let message = v["error"]["message"].as_str().unwrap_or("stream error");
                        Err::<(), _>(GatewayError::GenerationFailed(format!("anthropic: {message}")))?;
                    }
                    _ => {}
                }
            }
        };
        Ok(Box::pin(out))
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .request(self.http.get(self.url("models")))
            .send()
            .await?;
        ensure_success(self.family(), resp).await?;
        Ok(())
    }
}
