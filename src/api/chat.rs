use std::convert::Infallible;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Serialize;

use crate::AppState;
use crate::error::Result;
use crate::registry::Capability;
use crate::router::TextRequest;

use super::types::ChatBody;

/// `POST /api/chat`: plain-text streamed completion.
///
/// The chosen provider and persona travel in `x-provider-id` and
/// `x-guardian-id`. An upstream error mid-stream is logged and ends the body.
pub async fn chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response> {
    let request = TextRequest::try_from(super::body(payload)?)?;
    tracing::info!(
        name: "api.chat.received",
        guardian = ?request.guardian_id,
        model = ?request.model,
        chars = request.prompt.len(),
        "chat request received"
    );

    let chat = state.router.stream_text(&request).await?;
    let provider_id = chat.provider_id.clone();
    let mut inner = chat.stream;
    let stream = async_stream::stream! {
        while let Some(item) = inner.next().await {
            match item {
                Ok(chunk) => yield Ok::<_, Infallible>(Bytes::from(chunk)),
                Err(e) => {
                    tracing::warn!(
                        name: "api.chat.stream_failed",
                        provider = %provider_id,
                        error = %e,
                        "chat stream ended early"
                    );
                    break;
                }
            }
        }
    };

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Ok(v) = HeaderValue::from_str(&chat.provider_id) {
        headers.insert("x-provider-id", v);
    }
    if let Some(v) = chat
        .guardian
        .as_deref()
        .and_then(|g| HeaderValue::from_str(g).ok())
    {
        headers.insert("x-guardian-id", v);
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianSummary {
    pub id: String,
    pub display_name: String,
    pub element: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCapabilities {
    pub streaming: bool,
    pub providers: Vec<String>,
    pub guardians: Vec<GuardianSummary>,
}

/// `GET /api/chat`
pub async fn capabilities(State(state): State<AppState>) -> Json<ChatCapabilities> {
    Json(ChatCapabilities {
        streaming: true,
        providers: state
            .providers
            .by_capability(Capability::Text)
            .map(|p| p.id.clone())
            .collect(),
        guardians: state
            .personas
            .all()
            .map(|p| GuardianSummary {
                id: p.id.clone(),
                display_name: p.display_name.clone(),
                element: p.element.to_string(),
            })
            .collect(),
    })
}
