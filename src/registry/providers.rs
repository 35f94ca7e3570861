//! Static provider table.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::llm::{ProviderFamily, Usage};

/// What a provider produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Text,
    Image,
    Video,
    Audio,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Capability a provider must advertise to serve this kind.
    #[must_use]
    pub fn capability(self) -> Capability {
        match self {
            Self::Text => Capability::Text,
            Self::Image => Capability::Image,
            Self::Video => Capability::Video,
            Self::Audio => Capability::Audio,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Code,
    Creative,
    Analysis,
    Multimodal,
    Streaming,
    Image,
    Video,
    Audio,
}

impl Capability {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Creative => "creative",
            Self::Analysis => "analysis",
            Self::Multimodal => "multimodal",
            Self::Streaming => "streaming",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor of one upstream model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    pub display_name: String,
    pub family: ProviderFamily,
    pub kind: ProviderKind,
    pub capabilities: BTreeSet<Capability>,
    pub endpoint: String,
    /// Upstream model name sent on the wire.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// USD per 1000 tokens for text providers, per asset otherwise.
    pub cost_per_unit: f64,
}

impl ProviderConfig {
    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Synthetic cost of one call.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost_for(&self, usage: &Usage) -> f64 {
        match self.kind {
            ProviderKind::Text => self.cost_per_unit * usage.total_tokens as f64 / 1000.0,
            _ => self.cost_per_unit * f64::from(usage.assets),
        }
    }
}

struct Entry {
    id: &'static str,
    display_name: &'static str,
    family: ProviderFamily,
    kind: ProviderKind,
    capabilities: &'static [Capability],
    model: &'static str,
    max_tokens: Option<u32>,
    cost_per_unit: f64,
}

const DEFAULTS: &[Entry] = &[
    Entry {
        id: "gpt-4o",
        display_name: "GPT-4o",
        family: ProviderFamily::OpenAi,
        kind: ProviderKind::Text,
        capabilities: &[
            Capability::Text,
            Capability::Code,
            Capability::Creative,
            Capability::Analysis,
            Capability::Multimodal,
            Capability::Streaming,
        ],
        model: "gpt-4o",
        max_tokens: Some(4096),
        cost_per_unit: 0.005,
    },
    Entry {
        id: "gpt-4o-mini",
        display_name: "GPT-4o mini",
        family: ProviderFamily::OpenAi,
        kind: ProviderKind::Text,
        capabilities: &[Capability::Text, Capability::Creative, Capability::Streaming],
        model: "gpt-4o-mini",
        max_tokens: Some(4096),
        cost_per_unit: 0.000_15,
    },
    Entry {
        id: "claude-3-5-sonnet",
        display_name: "Claude 3.5 Sonnet",
        family: ProviderFamily::Anthropic,
        kind: ProviderKind::Text,
        capabilities: &[
            Capability::Text,
            Capability::Code,
            Capability::Creative,
            Capability::Analysis,
            Capability::Streaming,
        ],
        model: "claude-3-5-sonnet-20241022",
        max_tokens: Some(8192),
        cost_per_unit: 0.003,
    },
    Entry {
        id: "gemini-1-5-pro",
        display_name: "Gemini 1.5 Pro",
        family: ProviderFamily::Google,
        kind: ProviderKind::Text,
        capabilities: &[Capability::Text, Capability::Multimodal, Capability::Analysis],
        model: "gemini-1.5-pro",
        max_tokens: Some(8192),
        cost_per_unit: 0.001_25,
    },
    Entry {
        id: "dall-e-3",
        display_name: "DALL-E 3",
        family: ProviderFamily::OpenAi,
        kind: ProviderKind::Image,
        capabilities: &[Capability::Image],
        model: "dall-e-3",
        max_tokens: None,
        cost_per_unit: 0.04,
    },
    Entry {
        id: "stable-video",
        display_name: "Video (Replicate)",
        family: ProviderFamily::Replicate,
        kind: ProviderKind::Video,
        capabilities: &[Capability::Video],
        model: "minimax/video-01",
        max_tokens: None,
        cost_per_unit: 0.5,
    },
    Entry {
        id: "eleven-multilingual-v2",
        display_name: "ElevenLabs Multilingual v2",
        family: ProviderFamily::ElevenLabs,
        kind: ProviderKind::Audio,
        capabilities: &[Capability::Audio],
        model: "eleven_multilingual_v2",
        max_tokens: None,
        cost_per_unit: 0.03,
    },
    Entry {
        id: "tts-1",
        display_name: "OpenAI TTS",
        family: ProviderFamily::OpenAi,
        kind: ProviderKind::Audio,
        capabilities: &[Capability::Audio],
        model: "tts-1",
        max_tokens: None,
        cost_per_unit: 0.015,
    },
];

fn default_endpoint(family: ProviderFamily) -> &'static str {
    match family {
        ProviderFamily::OpenAi => "https://api.openai.com",
        ProviderFamily::Anthropic => "https://api.anthropic.com",
        ProviderFamily::Google => "https://generativelanguage.googleapis.com",
        ProviderFamily::Replicate => "https://api.replicate.com",
        ProviderFamily::ElevenLabs => "https://api.elevenlabs.io",
    }
}

/// Read-only lookup from provider id to [`ProviderConfig`].
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(providers: impl IntoIterator<Item = ProviderConfig>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// The built-in provider table.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULTS.iter().map(|e| ProviderConfig {
            id: e.id.to_string(),
            display_name: e.display_name.to_string(),
            family: e.family,
            kind: e.kind,
            capabilities: e.capabilities.iter().copied().collect(),
            endpoint: default_endpoint(e.family).to_string(),
            model: e.model.to_string(),
            max_tokens: e.max_tokens,
            cost_per_unit: e.cost_per_unit,
        }))
    }

    /// Apply `cost_per_unit` overrides from configuration.
    ///
    /// Unknown ids are logged and ignored.
    #[must_use]
    pub fn with_pricing(mut self, pricing: &HashMap<String, f64>) -> Self {
        for (id, cost) in pricing {
            match self.providers.get_mut(id) {
                Some(p) => p.cost_per_unit = *cost,
                None => tracing::warn!(
                    name: "registry.pricing.unknown_provider",
                    provider = %id,
                    "pricing override names an unknown provider"
                ),
            }
        }
        self
    }

    /// Point providers at alternative base URLs (gateways, Azure deployments).
    pub fn with_endpoints(mut self, endpoints: &HashMap<String, String>) -> Result<Self> {
        for (id, endpoint) in endpoints {
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                GatewayError::Validation(format!("endpoint for {id} is not a valid URL: {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(GatewayError::Validation(format!(
                    "endpoint for {id} must be http(s)"
                )));
            }
            let provider = self
                .providers
                .get_mut(id)
                .ok_or_else(|| GatewayError::provider_not_found(id))?;
            provider.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(id)
            .ok_or_else(|| GatewayError::provider_not_found(id))
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values()
    }

    pub fn by_capability(&self, capability: Capability) -> impl Iterator<Item = &ProviderConfig> {
        self.all().filter(move |p| p.has(capability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_config_not_found() {
        let registry = ProviderRegistry::with_defaults();
        let err = registry.get("gpt-9").unwrap_err();
        assert!(matches!(err, GatewayError::ConfigNotFound { kind: "provider", ref id } if id == "gpt-9"));
    }

    #[test]
    fn test_every_default_advertises_its_kind() {
        let registry = ProviderRegistry::with_defaults();
        for p in registry.all() {
            assert!(p.has(p.kind.capability()), "{} lacks {}", p.id, p.kind);
            assert!(p.cost_per_unit > 0.0);
        }
    }

    #[test]
    fn test_text_cost_is_per_thousand_tokens() {
        let registry = ProviderRegistry::with_defaults();
        let sonnet = registry.get("claude-3-5-sonnet").unwrap();
        let cost = sonnet.cost_for(&Usage::tokens(1500, 500));
        assert!((cost - 0.006).abs() < 1e-9);

        let dalle = registry.get("dall-e-3").unwrap();
        assert!((dalle.cost_for(&Usage::assets(2)) - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_pricing_overrides() {
        let pricing = HashMap::from([("gpt-4o".to_string(), 0.01), ("nope".to_string(), 1.0)]);
        let registry = ProviderRegistry::with_defaults().with_pricing(&pricing);
        assert!((registry.get("gpt-4o").unwrap().cost_per_unit - 0.01).abs() < f64::EPSILON);
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_endpoint_overrides() {
        let ok = HashMap::from([(
            "gpt-4o".to_string(),
            "https://openrouter.ai/api/".to_string(),
        )]);
        let registry = ProviderRegistry::with_defaults().with_endpoints(&ok).unwrap();
        assert_eq!(registry.get("gpt-4o").unwrap().endpoint, "https://openrouter.ai/api");

        let bad = HashMap::from([("gpt-4o".to_string(), "ftp://example.com".to_string())]);
        assert!(ProviderRegistry::with_defaults().with_endpoints(&bad).is_err());
        let unknown = HashMap::from([("gpt-9".to_string(), "https://x.io".to_string())]);
        assert!(ProviderRegistry::with_defaults().with_endpoints(&unknown).is_err());
    }

    #[test]
    fn test_by_capability() {
        let registry = ProviderRegistry::with_defaults();
        let video: Vec<_> = registry.by_capability(Capability::Video).map(|p| p.id.as_str()).collect();
        assert_eq!(video, vec!["stable-video"]);
        assert!(registry.by_capability(Capability::Code).any(|p| p.id == "claude-3-5-sonnet"));
    }
}
