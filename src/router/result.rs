//! The envelope returned by every router entry point.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::GatewayError;
use crate::llm::Usage;

use super::classify::{Complexity, TaskClass};

/// Why a provider was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "value", rename_all = "camelCase")]
pub enum Selection {
    /// The caller named a model.
    Explicit,
    /// The persona's preferred provider.
    Guardian,
    /// A task-class keyword matched.
    Task(TaskClass),
    /// No keyword matched; the complexity tier decided.
    Complexity(Complexity),
    /// Default provider for a media kind.
    KindDefault,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_time_ms: Option<u64>,
}

impl UsageSummary {
    pub(crate) fn add(&mut self, usage: &Usage, cost: f64) {
        if usage.total_tokens > 0 {
            *self.tokens.get_or_insert(0) += usage.total_tokens;
        }
        *self.cost.get_or_insert(0.0) += cost;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardian: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    /// Unmodified primary output when a persona rewrite replaced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<String>,
    /// Persona passes that succeeded: `rewrite`, `insight`.
    pub enhancements: Vec<String>,
}

/// Generated media reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    /// Remote URL or `data:` URL.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Prompt actually sent upstream.
    pub prompt: String,
}

/// `{success, data, usage, metadata, error}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub usage: UsageSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub status: StatusCode,
}

impl<T> GenerationResult<T> {
    pub(crate) fn success(data: T, usage: UsageSummary, metadata: ResponseMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            usage,
            metadata: Some(metadata),
            error: None,
            status: StatusCode::OK,
        }
    }

    /// Failed envelope. Only the sanitized message is kept.
    pub(crate) fn failure(
        error: &GatewayError,
        usage: UsageSummary,
        metadata: Option<ResponseMetadata>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            usage,
            metadata,
            error: Some(error.public_message()),
            status: error.status(),
        }
    }
}

impl<T: Serialize> IntoResponse for GenerationResult<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
