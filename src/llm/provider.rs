//! Provider families and endpoint flavor detection.
//!
//! A [`ProviderFamily`] names the upstream API shape a client speaks. The
//! `openai` family covers every OpenAI-compatible endpoint; [`OpenAiFlavor`]
//! captures the differences between those endpoints (URL layout and auth
//! header).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upstream API families the gateway can build clients for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// `OpenAI` and OpenAI-compatible gateways (chat, images, speech).
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini `generateContent`.
    Google,
    /// Replicate predictions (video).
    Replicate,
    /// `ElevenLabs` text-to-speech.
    ElevenLabs,
}

impl ProviderFamily {
    pub const ALL: [Self; 5] = [
        Self::OpenAi,
        Self::Anthropic,
        Self::Google,
        Self::Replicate,
        Self::ElevenLabs,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Replicate => "replicate",
            Self::ElevenLabs => "elevenlabs",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown provider family: {s}"))
    }
}

const AZURE_API_VERSION: &str = "2024-08-01-preview";

/// Operations the `openai` family calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiOperation {
    Chat,
    Images,
    Speech,
    /// Model listing, used as the health probe.
    Models,
}

impl OpenAiOperation {
    fn path(self) -> &'static str {
        match self {
            Self::Chat => "chat/completions",
            Self::Images => "images/generations",
            Self::Speech => "audio/speech",
            Self::Models => "models",
        }
    }
}

/// How an OpenAI-compatible endpoint lays out paths and takes its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenAiFlavor {
    /// `{base}/v1/...` with a bearer token. `OpenAI`, Groq, Together and
    /// most self-hosted gateways.
    Standard,
    /// Azure deployments take an `api-key` header and versioned paths.
    Azure {
        deployment: String,
        api_version: String,
    },
    /// `OpenRouter` serves under `/api/v1`.
    OpenRouter,
}

impl OpenAiFlavor {
    /// Flavor for an endpoint, judged by its host. On Azure the model id
    /// doubles as the deployment name.
    ///
    /// ```rust
    /// use guardian_gateway::llm::OpenAiFlavor;
    ///
    /// let flavor = OpenAiFlavor::for_endpoint("https://api.openai.com", "gpt-4o");
    /// assert_eq!(flavor, OpenAiFlavor::Standard);
    /// ```
    #[must_use]
    pub fn for_endpoint(endpoint: &str, model: &str) -> Self {
        let host = url::Url::parse(endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default();

        if host.ends_with(".azure.com") {
            Self::Azure {
                deployment: model.to_string(),
                api_version: AZURE_API_VERSION.to_string(),
            }
        } else if host == "openrouter.ai" || host.ends_with(".openrouter.ai") {
            Self::OpenRouter
        } else {
            Self::Standard
        }
    }

    #[must_use]
    pub fn uses_api_key_header(&self) -> bool {
        matches!(self, Self::Azure { .. })
    }

    #[must_use]
    pub fn url(&self, endpoint: &str, operation: OpenAiOperation) -> String {
        let base = endpoint.trim_end_matches('/');
        let path = operation.path();
        match self {
            Self::Azure { api_version, .. } if operation == OpenAiOperation::Models => {
                format!("{base}/openai/models?api-version={api_version}")
            }
            Self::Azure {
                deployment,
                api_version,
            } => format!("{base}/openai/deployments/{deployment}/{path}?api-version={api_version}"),
            Self::OpenRouter if !base.ends_with("/api") => format!("{base}/api/v1/{path}"),
            _ => format!("{base}/v1/{path}"),
        }
    }
}
