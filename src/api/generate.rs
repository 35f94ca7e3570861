use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Serialize;

use crate::AppState;
use crate::error::Result;
use crate::llm::{ImageQuality, ImageStyle};
use crate::registry::Capability;
use crate::router::{GenerationResult, MediaAsset, MediaRequest, TextRequest};

use super::types::{AudioBody, IMAGE_SIZES, ImageBody, TextBody, VideoBody};

type Payload<T> = std::result::Result<Json<T>, JsonRejection>;

/// `POST /api/generate/text`
pub async fn text(
    State(state): State<AppState>,
    payload: Payload<TextBody>,
) -> Result<GenerationResult<String>> {
    let request = TextRequest::try_from(super::body(payload)?)?;
    Ok(state.router.generate_text(&request).await)
}

/// `POST /api/generate/image`
pub async fn image(
    State(state): State<AppState>,
    payload: Payload<ImageBody>,
) -> Result<GenerationResult<MediaAsset>> {
    let request = MediaRequest::try_from(super::body(payload)?)?;
    Ok(state.router.generate_image(&request).await)
}

/// `POST /api/generate/video`
pub async fn video(
    State(state): State<AppState>,
    payload: Payload<VideoBody>,
) -> Result<GenerationResult<MediaAsset>> {
    let request = MediaRequest::try_from(super::body(payload)?)?;
    Ok(state.router.generate_video(&request).await)
}

/// `POST /api/generate/audio`
pub async fn audio(
    State(state): State<AppState>,
    payload: Payload<AudioBody>,
) -> Result<GenerationResult<MediaAsset>> {
    let request = MediaRequest::try_from(super::body(payload)?)?;
    Ok(state.router.generate_audio(&request).await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptions {
    pub styles: [&'static str; 2],
    pub qualities: [&'static str; 2],
    pub sizes: [&'static str; 3],
    pub providers: Vec<String>,
}

/// `GET /api/generate/image`: accepted options.
pub async fn image_options(State(state): State<AppState>) -> Json<ImageOptions> {
    Json(ImageOptions {
        styles: [ImageStyle::Vivid.as_str(), ImageStyle::Natural.as_str()],
        qualities: [ImageQuality::Standard.as_str(), ImageQuality::Hd.as_str()],
        sizes: IMAGE_SIZES,
        providers: state
            .providers
            .by_capability(Capability::Image)
            .map(|p| p.id.clone())
            .collect(),
    })
}
