//! Provider clients and the normalized request/response shapes they share.
//!
//! Every upstream family implements [`ProviderClient`]. Clients are built
//! through a [`ClientRegistry`] that maps a [`ProviderFamily`] to a builder,
//! so adding a provider means implementing the trait and registering a
//! builder; the connection manager never branches on the family itself.
//!
//! # Clients
//!
//! - [`OpenAiClient`]: OpenAI-compatible chat completions, images and speech
//! - [`AnthropicClient`]: Anthropic Messages API
//! - [`GoogleClient`]: Gemini `generateContent`
//! - [`ReplicateClient`]: Replicate predictions (video)
//! - [`ElevenLabsClient`]: `ElevenLabs` text-to-speech

pub mod anthropic;
pub mod elevenlabs;
pub mod google;
pub mod openai;
pub mod provider;
pub mod replicate;
pub mod sse;
pub mod tokens;

pub use anthropic::AnthropicClient;
pub use elevenlabs::ElevenLabsClient;
pub use google::GoogleClient;
pub use openai::OpenAiClient;
pub use provider::{OpenAiFlavor, OpenAiOperation, ProviderFamily};
pub use replicate::ReplicateClient;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::registry::{ProviderConfig, ProviderKind};

/// Default connect/read timeout for upstream calls.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Image rendering style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    #[default]
    Vivid,
    Natural,
}

impl ImageStyle {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vivid => "vivid",
            Self::Natural => "natural",
        }
    }
}

/// Image rendering quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    #[default]
    Standard,
    Hd,
}

impl ImageQuality {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Hd => "hd",
        }
    }
}

/// Options that only apply to image, video or audio generation.
#[derive(Debug, Clone, Default)]
pub struct MediaOptions {
    pub style: ImageStyle,
    pub quality: ImageQuality,
    /// Image size such as `1024x1024`.
    pub size: Option<String>,
    /// Voice id or name for speech synthesis.
    pub voice: Option<String>,
    pub duration_seconds: Option<u32>,
}

/// A provider-agnostic generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    /// System message, if the caller speaks through a persona.
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub media: MediaOptions,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Usage reported by (or estimated for) a single provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Generated assets (images, clips, audio files).
    pub assets: u32,
}

impl Usage {
    #[must_use]
    pub fn tokens(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            assets: 0,
        }
    }

    #[must_use]
    pub fn assets(count: u32) -> Self {
        Self {
            assets: count,
            ..Self::default()
        }
    }
}

/// Normalized `{content, usage}` shape returned by every client.
///
/// For text the content is the completion. For media it is a URL or a
/// `data:` URL carrying the encoded asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub usage: Usage,
}

impl NormalizedResponse {
    pub fn text(content: impl Into<String>, usage: Usage) -> Self {
        Self {
            content: content.into(),
            mime_type: None,
            usage,
        }
    }
}

/// Stream of text chunks from a streaming completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A client for one upstream provider.
#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync + std::fmt::Debug {
    /// Family this client speaks.
    fn family(&self) -> ProviderFamily;

    /// Run one generation of the given kind.
    async fn generate(
        &self,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<NormalizedResponse>;

    /// Stream a text completion chunk by chunk.
    ///
    /// Clients without native streaming yield the whole completion as one
    /// chunk.
    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream> {
        let response = self.generate(ProviderKind::Text, request).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(response.content)
        })))
    }

    /// Lightweight reachability/auth check.
    async fn probe(&self) -> Result<()>;
}

/// Builds a client for a provider from its credential and the shared HTTP client.
pub type ClientBuilder =
    Arc<dyn Fn(&ProviderConfig, String, reqwest::Client) -> Arc<dyn ProviderClient> + Send + Sync>;

/// Family → builder table consulted by the connection manager.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    builders: HashMap<ProviderFamily, ClientBuilder>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut families: Vec<_> = self.builders.keys().map(|f| f.as_str()).collect();
        families.sort_unstable();
        f.debug_struct("ClientRegistry")
            .field("families", &families)
            .finish()
    }
}

impl ClientRegistry {
    /// A registry with no families; every build fails with `UnsupportedProvider`.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with the built-in HTTP clients for every family.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::empty()
            .register(
                ProviderFamily::OpenAi,
                Arc::new(|cfg: &ProviderConfig, key: String, http: reqwest::Client| {
                    Arc::new(OpenAiClient::new(cfg.clone(), key, http)) as Arc<dyn ProviderClient>
                }),
            )
            .register(
                ProviderFamily::Anthropic,
                Arc::new(|cfg: &ProviderConfig, key: String, http: reqwest::Client| {
                    Arc::new(AnthropicClient::new(cfg.clone(), key, http))
                        as Arc<dyn ProviderClient>
                }),
            )
            .register(
                ProviderFamily::Google,
                Arc::new(|cfg: &ProviderConfig, key: String, http: reqwest::Client| {
                    Arc::new(GoogleClient::new(cfg.clone(), key, http)) as Arc<dyn ProviderClient>
                }),
            )
            .register(
                ProviderFamily::Replicate,
                Arc::new(|cfg: &ProviderConfig, key: String, http: reqwest::Client| {
                    Arc::new(ReplicateClient::new(cfg.clone(), key, http))
                        as Arc<dyn ProviderClient>
                }),
            )
            .register(
                ProviderFamily::ElevenLabs,
                Arc::new(|cfg: &ProviderConfig, key: String, http: reqwest::Client| {
                    Arc::new(ElevenLabsClient::new(cfg.clone(), key, http))
                        as Arc<dyn ProviderClient>
                }),
            )
    }

    /// Register (or replace) the builder for a family.
    #[must_use]
    pub fn register(mut self, family: ProviderFamily, builder: ClientBuilder) -> Self {
        self.builders.insert(family, builder);
        self
    }

    pub fn build(
        &self,
        provider: &ProviderConfig,
        credential: String,
        http: reqwest::Client,
    ) -> Result<Arc<dyn ProviderClient>> {
        let builder = self
            .builders
            .get(&provider.family)
            .ok_or_else(|| GatewayError::UnsupportedProvider(provider.family.to_string()))?;
        Ok(builder(provider, credential, http))
    }
}

/// Shared HTTP client with the gateway's upstream timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(GatewayError::from)
}

/// Turn a non-success upstream response into a `GenerationFailed`.
///
/// Only the status and a truncated body are kept; request URLs and headers
/// never reach the error text.
pub(crate) async fn ensure_success(
    family: ProviderFamily,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(GatewayError::GenerationFailed(format!(
        "{family} returned {status}: {snippet}"
    )))
}

/// Error for a kind the family cannot produce.
pub(crate) fn unsupported_kind(family: ProviderFamily, kind: ProviderKind) -> GatewayError {
    GatewayError::GenerationFailed(format!("{family} clients do not generate {kind}"))
}
