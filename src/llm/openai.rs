//! OpenAI-compatible client.
//!
//! Speaks `/v1/chat/completions` (single-shot and streaming),
//! `/v1/images/generations` and `/v1/audio/speech`. Azure and `OpenRouter`
//! path layouts are picked from the endpoint host.

use base64::{Engine, engine::general_purpose::STANDARD};
use futures::StreamExt;
use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::registry::{ProviderConfig, ProviderKind};

use super::{
    GenerationRequest, NormalizedResponse, OpenAiFlavor, OpenAiOperation, ProviderClient,
    ProviderFamily, TextStream, Usage, ensure_success, sse, unsupported_kind,
};

const DEFAULT_VOICE: &str = "alloy";
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

/// Client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    provider: ProviderConfig,
    flavor: OpenAiFlavor,
    api_key: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("provider", &self.provider.id)
            .field("flavor", &self.flavor)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    #[must_use]
    pub fn new(provider: ProviderConfig, api_key: String, http: reqwest::Client) -> Self {
        let flavor = OpenAiFlavor::for_endpoint(&provider.endpoint, &provider.model);
        Self {
            http,
            provider,
            flavor,
            api_key,
        }
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.post(url))
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.flavor.uses_api_key_header() {
            rb.header("api-key", &self.api_key)
        } else {
            rb.bearer_auth(&self.api_key)
        }
    }

    fn chat_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut body = json!({
            "model": self.provider.model,
            "stream": stream,
            "messages": messages,
        });
        if let Some(max) = request.max_tokens.or(self.provider.max_tokens) {
            body["max_tokens"] = json!(max);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        body
    }

    async fn chat(&self, request: &GenerationRequest) -> Result<NormalizedResponse> {
        let url = self.flavor.url(&self.provider.endpoint, OpenAiOperation::Chat);
        let resp = self.post(&url).json(&self.chat_body(request, false)).send().await?;
        let v: Value = ensure_success(ProviderFamily::OpenAi, resp).await?.json().await?;

        let content = v["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GatewayError::GenerationFailed("completion has no content".into()))?
            .to_string();
        let usage = &v["usage"];
        let usage = Usage::tokens(
            usage["prompt_tokens"].as_u64().unwrap_or(0),
            usage["completion_tokens"].as_u64().unwrap_or(0),
        );
        Ok(NormalizedResponse::text(content, usage))
    }

    async fn image(&self, request: &GenerationRequest) -> Result<NormalizedResponse> {
        let url = self.flavor.url(&self.provider.endpoint, OpenAiOperation::Images);
        let body = json!({
            "model": self.provider.model,
            "prompt": request.prompt,
            "n": 1,
            "size": request.media.size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE),
            "quality": request.media.quality.as_str(),
            "style": request.media.style.as_str(),
        });
        let resp = self.post(&url).json(&body).send().await?;
        let v: Value = ensure_success(ProviderFamily::OpenAi, resp).await?.json().await?;

        let image = &v["data"][0];
        let content = if let Some(u) = image["url"].as_str() {
            u.to_string()
        } else if let Some(b64) = image["b64_json"].as_str() {
            format!("data:image/png;base64,{b64}")
        } else {
            return Err(GatewayError::GenerationFailed(
                "image response has neither url nor b64_json".into(),
            ));
        };
        Ok(NormalizedResponse {
            content,
            mime_type: Some("image/png".to_string()),
            usage: Usage::assets(1),
        })
    }

    async fn speech(&self, request: &GenerationRequest) -> Result<NormalizedResponse> {
        let url = self.flavor.url(&self.provider.endpoint, OpenAiOperation::Speech);
        let body = json!({
            "model": self.provider.model,
            "input": request.prompt,
            "voice": request.media.voice.as_deref().unwrap_or(DEFAULT_VOICE),
            "response_format": "mp3",
        });
        let resp = self.post(&url).json(&body).send().await?;
        let bytes = ensure_success(ProviderFamily::OpenAi, resp).await?.bytes().await?;
        Ok(NormalizedResponse {
            content: format!("data:audio/mpeg;base64,{}", STANDARD.encode(&bytes)),
            mime_type: Some("audio/mpeg".to_string()),
            usage: Usage::assets(1),
        })
    }
}

#[async_trait::async_trait]
impl ProviderClient for OpenAiClient {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAi
    }

    async fn generate(
        &self,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<NormalizedResponse> {
        match kind {
            ProviderKind::Text => self.chat(request).await,
            ProviderKind::Image => self.image(request).await,
            ProviderKind::Audio => self.speech(request).await,
            ProviderKind::Video => Err(unsupported_kind(self.family(), kind)),
        }
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream> {
        let url = self.flavor.url(&self.provider.endpoint, OpenAiOperation::Chat);
        let resp = self.post(&url).json(&self.chat_body(request, true)).send().await?;
        let resp = ensure_success(ProviderFamily::OpenAi, resp).await?;
        let lines = sse::data_lines(resp.bytes_stream());

        let out = async_stream::try_stream! {
            futures::pin_mut!(lines);
            while let Some(data) = lines.next().await {
                let data = data?;
                if data == "[DONE]" {
                    break;
                }
                let v: Value = serde_json::from_str(&data)?;
                if let Some(s) = v["choices"][0]["delta"]["content"].as_str() {
                    if !s.is_empty() {
                        yield s.to_string();
                    }
                }
            }
        };
        Ok(Box::pin(out))
    }

    async fn probe(&self) -> Result<()> {
        let url = self.flavor.url(&self.provider.endpoint, OpenAiOperation::Models);
        let resp = self.authorize(self.http.get(&url)).send().await?;
        ensure_success(ProviderFamily::OpenAi, resp).await?;
        Ok(())
    }
}
