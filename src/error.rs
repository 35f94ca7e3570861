//! Error taxonomy shared by the registries, secret store, connection manager,
//! rate limiter and request router.
//!
//! Internal helpers return [`GatewayError`] through `?`. The router converts
//! every failure into a [`GenerationResult`](crate::router::GenerationResult)
//! envelope, and HTTP handlers turn the remaining errors into responses via
//! [`IntoResponse`].

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Gateway error type.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Unknown provider or persona id.
    #[error("{kind} not found: {id}")]
    ConfigNotFound {
        /// What was looked up ("provider", "persona").
        kind: &'static str,
        /// The id that did not resolve.
        id: String,
    },

    /// No usable credential is configured for the provider.
    #[error("missing credential for provider {0}")]
    MissingCredential(String),

    /// A credential is present but fails the provider's format rules.
    #[error("credential for provider {0} has an invalid format")]
    InvalidCredentialFormat(String),

    /// No client builder is registered for the provider's family.
    #[error("unsupported provider family: {0}")]
    UnsupportedProvider(String),

    /// No connected provider advertises the requested capability.
    #[error("no connection available for capability {0}")]
    NoConnectionAvailable(String),

    /// The caller exhausted its fixed-window quota.
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimitExceeded {
        /// Seconds until the current window resets.
        retry_after_secs: u64,
    },

    /// Request body failed validation.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The upstream provider call failed.
    #[error("generation failed: {0}")]
    GenerationFailed(String),
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn provider_not_found(id: impl Into<String>) -> Self {
        Self::ConfigNotFound {
            kind: "provider",
            id: id.into(),
        }
    }

    pub fn persona_not_found(id: impl Into<String>) -> Self {
        Self::ConfigNotFound {
            kind: "persona",
            id: id.into(),
        }
    }

    /// HTTP status the error maps to at the edge.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation(_) | Self::ConfigNotFound { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to a client.
    ///
    /// Server-side failures collapse to a generic string so upstream error
    /// bodies and configuration details never reach the response.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::RateLimitExceeded { .. } | Self::Validation(_) | Self::ConfigNotFound { .. } => {
                self.to_string()
            }
            _ => "The request could not be completed".to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL: some providers carry the key in the query string.
        Self::GenerationFailed(err.without_url().to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::GenerationFailed(format!("malformed provider response: {err}"))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(name: "gateway.request.failed", error = %self, "request failed");
        }
        let body = Json(ErrorBody {
            success: false,
            error: self.public_message(),
        });
        let mut response = (status, body).into_response();
        if let Self::RateLimitExceeded { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
