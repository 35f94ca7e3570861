//! `ElevenLabs` text-to-speech client.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::json;

use crate::error::Result;
use crate::registry::{ProviderConfig, ProviderKind};

use super::{
    GenerationRequest, NormalizedResponse, ProviderClient, ProviderFamily, Usage, ensure_success,
    unsupported_kind,
};

/// "Rachel", the stock narration voice.
const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

#[derive(Clone)]
pub struct ElevenLabsClient {
    http: reqwest::Client,
    provider: ProviderConfig,
    api_key: String,
}

impl std::fmt::Debug for ElevenLabsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsClient")
            .field("provider", &self.provider.id)
            .finish_non_exhaustive()
    }
}

impl ElevenLabsClient {
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
}

#[async_trait::async_trait]
impl ProviderClient for ElevenLabsClient {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::ElevenLabs
    }

    async fn generate(
        &self,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<NormalizedResponse> {
        if kind != ProviderKind::Audio {
            return Err(unsupported_kind(self.family(), kind));
        }
        let voice = request.media.voice.as_deref().unwrap_or(DEFAULT_VOICE_ID);
        let url = format!("{}/v1/text-to-speech/{voice}", self.base());
        let resp = self
            .http
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/mpeg")
            .json(&json!({ "text": request.prompt, "model_id": self.provider.model }))
            .send()
            .await?;
        let bytes = ensure_success(self.family(), resp).await?.bytes().await?;
        Ok(NormalizedResponse {
            content: format!("data:audio/mpeg;base64,{}", STANDARD.encode(&bytes)),
            mime_type: Some("audio/mpeg".to_string()),
            usage: Usage::assets(1),
        })
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/v1/user", self.base()))
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;
        ensure_success(self.family(), resp).await?;
        Ok(())
    }
}
