//! Request router: provider selection, dispatch, cost accounting and persona
//! enhancement.
//!
//! Selection order for text:
//!
//! 1. an explicit model named by the caller,
//! 2. the persona's preferred provider,
//! 3. the first matching task class (see [`classify`]),
//! 4. the complexity tier.
//!
//! Every public entry point returns a [`GenerationResult`]; errors never
//! escape as `Err`.

pub mod classify;
pub mod result;
pub mod usage;

pub use classify::{Complexity, PromptClassifier, TaskClass};
pub use result::{GenerationResult, MediaAsset, ResponseMetadata, Selection, UsageSummary};
pub use usage::{ProviderUsage, UsageAccumulator, UsageTotals};

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures::StreamExt;

use crate::config::RoutingConfig;
use crate::connections::{Completion, ConnectionManager};
use crate::error::{GatewayError, Result};
use crate::llm::{GenerationRequest, MediaOptions, TextStream, Usage, tokens};
use crate::registry::{PersonaConfig, PersonaRegistry, ProviderKind, ProviderRegistry};

/// Token cap for the insight side call.
const INSIGHT_MAX_TOKENS: u32 = 160;

/// Caller overrides for provider selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteOptions<'a> {
    pub guardian_id: Option<&'a str>,
    pub model: Option<&'a str>,
}

/// A resolved provider and the reason it was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub provider_id: String,
    pub selection: Selection,
}

#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub prompt: String,
    pub guardian_id: Option<String>,
    /// Rewrite the answer in the persona's voice and add an insight.
    pub guardian_mode: bool,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct MediaRequest {
    pub prompt: String,
    pub guardian_id: Option<String>,
    pub model: Option<String>,
    pub options: MediaOptions,
}

/// A chat stream plus what served it.
pub struct ChatStream {
    pub provider_id: String,
    pub guardian: Option<String>,
    pub stream: TextStream,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("provider_id", &self.provider_id)
            .field("guardian", &self.guardian)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct RequestRouter {
    providers: Arc<ProviderRegistry>,
    personas: Arc<PersonaRegistry>,
    connections: Arc<ConnectionManager>,
    classifier: PromptClassifier,
    routing: RoutingConfig,
    usage: UsageAccumulator,
}

fn elapsed_ms(started: Instant) -> Option<u64> {
    u64::try_from(started.elapsed().as_millis()).ok()
}

fn rejected<T>(
    error: &GatewayError,
    started: Instant,
    metadata: Option<ResponseMetadata>,
) -> GenerationResult<T> {
    tracing::debug!(name: "router.request.rejected", error = %error, "request rejected");
    let summary = UsageSummary {
        generation_time_ms: elapsed_ms(started),
        ..UsageSummary::default()
    };
    GenerationResult::failure(error, summary, metadata)
}

impl RequestRouter {
    /// Fails if a routing entry names an unknown provider.
    pub fn new(
        providers: Arc<ProviderRegistry>,
        personas: Arc<PersonaRegistry>,
        connections: Arc<ConnectionManager>,
        routing: RoutingConfig,
    ) -> anyhow::Result<Self> {
        for (setting, id) in routing.entries() {
            providers
                .get(id)
                .with_context(|| format!("routing.{setting} names an unknown provider"))?;
        }
        Ok(Self {
            providers,
            personas,
            connections,
            classifier: PromptClassifier::new()?,
            routing,
            usage: UsageAccumulator::new(),
        })
    }

    #[must_use]
    pub fn usage(&self) -> &UsageAccumulator {
        &self.usage
    }

    #[must_use]
    pub fn classifier(&self) -> &PromptClassifier {
        &self.classifier
    }

    fn task_route(&self, class: TaskClass) -> &str {
        match class {
            TaskClass::Code => &self.routing.code,
            TaskClass::Creative => &self.routing.creative,
            TaskClass::Multimodal => &self.routing.multimodal,
            TaskClass::Image => &self.routing.image,
            TaskClass::Video => &self.routing.video,
            TaskClass::Audio => &self.routing.audio,
        }
    }

    fn tier_route(&self, complexity: Complexity) -> &str {
        match complexity {
            Complexity::Simple => &self.routing.simple,
            Complexity::Medium => &self.routing.medium,
            Complexity::Complex => &self.routing.complex,
        }
    }

    fn kind_default(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Text => &self.routing.simple,
            ProviderKind::Image => &self.routing.image,
            ProviderKind::Video => &self.routing.video,
            ProviderKind::Audio => &self.routing.audio,
        }
    }

    /// Choose a provider for a prompt.
    pub fn route(&self, prompt: &str, options: RouteOptions<'_>) -> Result<Route> {
        let persona = options
            .guardian_id
            .map(|id| self.personas.get(id))
            .transpose()?;

        let route = |id: &str, selection| Route {
            provider_id: id.to_string(),
            selection,
        };
        let chosen = if let Some(model) = options.model {
            self.providers.get(model)?;
            route(model, Selection::Explicit)
        } else if let Some(persona) = persona {
            route(&persona.preferred_provider_id, Selection::Guardian)
        } else if let Some(class) = self.classifier.classify(prompt) {
            route(self.task_route(class), Selection::Task(class))
        } else {
            let complexity = self.classifier.complexity(prompt);
            route(self.tier_route(complexity), Selection::Complexity(complexity))
        };

        tracing::debug!(
            name: "router.provider.selected",
            provider = %chosen.provider_id,
            selection = ?chosen.selection,
            "provider selected"
        );
        Ok(chosen)
    }

    /// Provider id for a prompt; see [`RequestRouter::route`].
    pub fn select_provider(&self, prompt: &str, options: RouteOptions<'_>) -> Result<String> {
        self.route(prompt, options).map(|r| r.provider_id)
    }

    /// Route a text request, keeping the choice within text providers.
    ///
    /// A keyword match that lands on a media provider (e.g. "draw ...")
    /// falls back to the complexity tier.
    fn route_text(&self, prompt: &str, options: RouteOptions<'_>) -> Result<Route> {
        let route = self.route(prompt, options)?;
        let provider = self.providers.get(&route.provider_id)?;
        if provider.kind == ProviderKind::Text {
            return Ok(route);
        }
        if route.selection == Selection::Explicit {
            return Err(GatewayError::Validation(format!(
                "model {} does not generate text",
                provider.id
            )));
        }
        let complexity = self.classifier.complexity(prompt);
        Ok(Route {
            provider_id: self.tier_route(complexity).to_string(),
            selection: Selection::Complexity(complexity),
        })
    }

    fn route_media(&self, kind: ProviderKind, model: Option<&str>) -> Result<Route> {
        let Some(model) = model else {
            return Ok(Route {
                provider_id: self.kind_default(kind).to_string(),
                selection: Selection::KindDefault,
            });
        };
        let provider = self.providers.get(model)?;
        if provider.kind != kind {
            return Err(GatewayError::Validation(format!(
                "model {model} does not generate {kind}"
            )));
        }
        Ok(Route {
            provider_id: provider.id.clone(),
            selection: Selection::Explicit,
        })
    }

    fn persona(&self, id: Option<&str>) -> Result<Option<&PersonaConfig>> {
        id.map(|id| self.personas.get(id)).transpose()
    }

    fn account(&self, completion: &Completion, summary: &mut UsageSummary) {
        let cost = self.usage.record(&completion.provider, &completion.response.usage);
        summary.add(&completion.response.usage, cost);
    }

    fn metadata(&self, route: Option<&Route>, persona: Option<&PersonaConfig>) -> ResponseMetadata {
        let provider = route.and_then(|r| self.providers.get(&r.provider_id).ok());
        ResponseMetadata {
            request_id: uuid::Uuid::new_v4().to_string(),
            provider: route.map(|r| r.provider_id.clone()),
            model: provider.map(|p| p.model.clone()),
            selection: route.map(|r| r.selection),
            guardian: persona.map(|p| p.id.clone()),
            element: persona.map(|p| p.element.to_string()),
            ..ResponseMetadata::default()
        }
    }

    /// Text generation, optionally through a persona.
    pub async fn generate_text(&self, request: &TextRequest) -> GenerationResult<String> {
        let started = Instant::now();
        let mut summary = UsageSummary::default();

        let persona = match self.persona(request.guardian_id.as_deref()) {
            Ok(p) => p,
            Err(e) => return rejected(&e, started, None),
        };
        let options = RouteOptions {
            guardian_id: request.guardian_id.as_deref(),
            model: request.model.as_deref(),
        };
        let route = match self.route_text(&request.prompt, options) {
            Ok(r) => r,
            Err(e) => return rejected(&e, started, Some(self.metadata(None, persona))),
        };
        let mut metadata = self.metadata(Some(&route), persona);

        let upstream = GenerationRequest {
            prompt: request.prompt.clone(),
            system: persona.map(PersonaRegistry::resolve_system_message),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            media: MediaOptions::default(),
        };
        let enhance = persona.filter(|_| request.guardian_mode);

        // Primary and insight are independent; run them together.
        let primary = self
            .connections
            .generate_text(Some(&route.provider_id), &upstream);
        let (primary, insight) = match enhance {
            Some(persona) => {
                let (p, i) = tokio::join!(primary, self.insight(persona, &request.prompt));
                (p, i)
            }
            None => (primary.await, None),
        };

        if let Some(insight) = insight {
            self.account(&insight, &mut summary);
            metadata.insight = Some(insight.response.content);
            metadata.enhancements.push("insight".to_string());
        }

        let completion = match primary {
            Ok(c) => c,
            Err(e) => {
                summary.generation_time_ms = elapsed_ms(started);
                return GenerationResult::failure(&e, summary, Some(metadata));
            }
        };
        self.account(&completion, &mut summary);
        if completion.provider.id != route.provider_id {
            metadata.provider = Some(completion.provider.id.clone());
            metadata.model = Some(completion.provider.model.clone());
        }

        let mut text = completion.response.content;
        if let Some(persona) = enhance {
            match self.rewrite(persona, &request.prompt, &text).await {
                Some(rewrite) => {
                    self.account(&rewrite, &mut summary);
                    metadata.original =
                        Some(std::mem::replace(&mut text, rewrite.response.content));
                    metadata.enhancements.insert(0, "rewrite".to_string());
                }
                // An unrewritten answer is returned unenhanced; the insight
                // text stays in `metadata.insight`.
                None => metadata.enhancements.clear(),
            }
        }

        summary.generation_time_ms = elapsed_ms(started);
        tracing::info!(
            name: "router.text.completed",
            provider = %completion.provider.id,
            guardian = ?request.guardian_id,
            tokens = ?summary.tokens,
            cost = ?summary.cost,
            "text generation completed"
        );
        GenerationResult::success(text, summary, metadata)
    }

    /// Restyle `text` in the persona's voice. Failures are logged and dropped.
    async fn rewrite(&self, persona: &PersonaConfig, prompt: &str, text: &str) -> Option<Completion> {
        let request = GenerationRequest::text(format!(
            "Rewrite the following answer in your own voice. Keep every fact and \
             instruction intact.\n\nQuestion:\n{prompt}\n\nAnswer:\n{text}"
        ))
        .with_system(PersonaRegistry::resolve_system_message(persona));
        self.side_call("rewrite", persona, &request).await
    }

    /// One or two sentences from the persona about the request itself.
    async fn insight(&self, persona: &PersonaConfig, prompt: &str) -> Option<Completion> {
        let request = GenerationRequest {
            max_tokens: Some(INSIGHT_MAX_TOKENS),
            ..GenerationRequest::text(format!(
                "In one or two sentences, share a brief insight about this request:\n\n{prompt}"
            ))
            .with_system(PersonaRegistry::resolve_system_message(persona))
        };
        self.side_call("insight", persona, &request).await
    }

    async fn side_call(
        &self,
        pass: &'static str,
        persona: &PersonaConfig,
        request: &GenerationRequest,
    ) -> Option<Completion> {
        match self
            .connections
            .generate_text(Some(&self.routing.rewriter), request)
            .await
        {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(
                    name: "router.enhancement.failed",
                    pass,
                    guardian = %persona.id,
                    error = %e,
                    "persona enhancement skipped"
                );
                None
            }
        }
    }

    pub async fn generate_image(&self, request: &MediaRequest) -> GenerationResult<MediaAsset> {
        self.generate_media(ProviderKind::Image, request).await
    }

    pub async fn generate_video(&self, request: &MediaRequest) -> GenerationResult<MediaAsset> {
        self.generate_media(ProviderKind::Video, request).await
    }

    pub async fn generate_audio(&self, request: &MediaRequest) -> GenerationResult<MediaAsset> {
        self.generate_media(ProviderKind::Audio, request).await
    }

    async fn generate_media(
        &self,
        kind: ProviderKind,
        request: &MediaRequest,
    ) -> GenerationResult<MediaAsset> {
        let started = Instant::now();
        let mut summary = UsageSummary::default();

        let persona = match self.persona(request.guardian_id.as_deref()) {
            Ok(p) => p,
            Err(e) => return rejected(&e, started, None),
        };
        let route = match self.route_media(kind, request.model.as_deref()) {
            Ok(r) => r,
            Err(e) => return rejected(&e, started, Some(self.metadata(None, persona))),
        };
        let mut metadata = self.metadata(Some(&route), persona);

        // Personas only flavor image prompts; audio and video take the text verbatim.
        let prompt = match persona {
            Some(p) if kind == ProviderKind::Image => format!(
                "{}. Style inspired by the {} element, in the spirit of {}.",
                request.prompt.trim_end_matches('.'),
                p.element,
                p.display_name
            ),
            _ => request.prompt.clone(),
        };
        let upstream = GenerationRequest {
            prompt: prompt.clone(),
            media: request.options.clone(),
            ..GenerationRequest::default()
        };

        let id = Some(route.provider_id.as_str());
        let outcome = match kind {
            ProviderKind::Image => self.connections.generate_image(id, &upstream).await,
            ProviderKind::Video => self.connections.generate_video(id, &upstream).await,
            ProviderKind::Audio => self.connections.generate_audio(id, &upstream).await,
            ProviderKind::Text => self.connections.generate_text(id, &upstream).await,
        };
        let completion = match outcome {
            Ok(c) => c,
            Err(e) => {
                summary.generation_time_ms = elapsed_ms(started);
                return GenerationResult::failure(&e, summary, Some(metadata));
            }
        };
        self.account(&completion, &mut summary);
        metadata.provider = Some(completion.provider.id.clone());
        metadata.model = Some(completion.provider.model.clone());
        summary.generation_time_ms = elapsed_ms(started);

        tracing::info!(
            name: "router.media.completed",
            kind = %kind,
            provider = %completion.provider.id,
            cost = ?summary.cost,
            "media generation completed"
        );
        GenerationResult::success(
            MediaAsset {
                url: completion.response.content,
                mime_type: completion.response.mime_type,
                prompt,
            },
            summary,
            metadata,
        )
    }

    /// Streamed chat completion.
    ///
    /// Cost is recorded from estimated token counts once the stream ends. A
    /// stream dropped early (client disconnect) records nothing.
    pub async fn stream_text(&self, request: &TextRequest) -> Result<ChatStream> {
        let persona = self.persona(request.guardian_id.as_deref())?;
        let options = RouteOptions {
            guardian_id: request.guardian_id.as_deref(),
            model: request.model.as_deref(),
        };
        let route = self.route_text(&request.prompt, options)?;
        let system = persona.map(PersonaRegistry::resolve_system_message);
        let prompt_tokens = tokens::estimate_prompt(system.as_deref(), &request.prompt);

        let upstream = GenerationRequest {
            prompt: request.prompt.clone(),
            system,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            media: MediaOptions::default(),
        };
        let completion = self
            .connections
            .stream_text(Some(&route.provider_id), &upstream)
            .await?;

        let provider = completion.provider;
        let provider_id = provider.id.clone();
        let usage = self.usage.clone();
        let mut inner = completion.stream;
        let stream = async_stream::stream! {
            let mut produced = String::new();
            while let Some(item) = inner.next().await {
                if let Ok(chunk) = &item {
                    produced.push_str(chunk);
                }
                yield item;
            }
            let used = Usage::tokens(prompt_tokens, tokens::estimate(&produced));
            let cost = usage.record(&provider, &used);
            tracing::info!(
                name: "router.stream.completed",
                provider = %provider.id,
                tokens = used.total_tokens,
                cost,
                "chat stream completed"
            );
        };

        Ok(ChatStream {
            provider_id,
            guardian: persona.map(|p| p.id.clone()),
            stream: Box::pin(stream),
        })
    }
}
