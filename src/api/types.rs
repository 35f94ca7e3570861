//! Request bodies and their validation.

use serde::Deserialize;

use crate::error::{GatewayError, Result};
use crate::llm::{ImageQuality, ImageStyle, MediaOptions};
use crate::router::{MediaRequest, TextRequest};

pub const MAX_PROMPT_CHARS: usize = 16_000;
pub const MAX_OUTPUT_TOKENS: u32 = 32_768;
pub const MAX_VIDEO_SECONDS: u32 = 60;
pub const IMAGE_SIZES: [&str; 3] = ["1024x1024", "1792x1024", "1024x1792"];

fn prompt(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > MAX_PROMPT_CHARS {
        return Err(GatewayError::Validation(format!(
            "{field} exceeds {MAX_PROMPT_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Empty strings count as absent.
fn id(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn limits(max_tokens: Option<u32>, temperature: Option<f32>) -> Result<()> {
    if let Some(n) = max_tokens {
        if n == 0 || n > MAX_OUTPUT_TOKENS {
            return Err(GatewayError::Validation(format!(
                "maxTokens must be between 1 and {MAX_OUTPUT_TOKENS}"
            )));
        }
    }
    if let Some(t) = temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(GatewayError::Validation(
                "temperature must be between 0 and 2".into(),
            ));
        }
    }
    Ok(())
}

/// `POST /api/chat`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub guardian_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl TryFrom<ChatBody> for TextRequest {
    type Error = GatewayError;

    fn try_from(body: ChatBody) -> Result<Self> {
        limits(body.max_tokens, body.temperature)?;
        Ok(Self {
            prompt: prompt("message", &body.message)?,
            guardian_id: id(body.guardian_id),
            guardian_mode: false,
            model: id(body.model),
            max_tokens: body.max_tokens,
            temperature: body.temperature,
        })
    }
}

/// `POST /api/generate/text`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBody {
    pub prompt: String,
    #[serde(default)]
    pub guardian_id: Option<String>,
    #[serde(default)]
    pub guardian_mode: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl TryFrom<TextBody> for TextRequest {
    type Error = GatewayError;

    fn try_from(body: TextBody) -> Result<Self> {
        limits(body.max_tokens, body.temperature)?;
        let guardian_id = id(body.guardian_id);
        if body.guardian_mode && guardian_id.is_none() {
            return Err(GatewayError::Validation(
                "guardianMode requires guardianId".into(),
            ));
        }
        Ok(Self {
            prompt: prompt("prompt", &body.prompt)?,
            guardian_id,
            guardian_mode: body.guardian_mode,
            model: id(body.model),
            max_tokens: body.max_tokens,
            temperature: body.temperature,
        })
    }
}

/// `POST /api/generate/image`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBody {
    pub prompt: String,
    #[serde(default)]
    pub style: ImageStyle,
    #[serde(default)]
    pub quality: ImageQuality,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub guardian_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl TryFrom<ImageBody> for MediaRequest {
    type Error = GatewayError;

    fn try_from(body: ImageBody) -> Result<Self> {
        let size = id(body.size);
        if let Some(size) = &size {
            if !IMAGE_SIZES.contains(&size.as_str()) {
                return Err(GatewayError::Validation(format!(
                    "size must be one of {}",
                    IMAGE_SIZES.join(", ")
                )));
            }
        }
        Ok(Self {
            prompt: prompt("prompt", &body.prompt)?,
            guardian_id: id(body.guardian_id),
            model: id(body.model),
            options: MediaOptions {
                style: body.style,
                quality: body.quality,
                size,
                ..MediaOptions::default()
            },
        })
    }
}

/// `POST /api/generate/video`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoBody {
    pub prompt: String,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub model: Option<String>,
}

impl TryFrom<VideoBody> for MediaRequest {
    type Error = GatewayError;

    fn try_from(body: VideoBody) -> Result<Self> {
        if let Some(d) = body.duration_seconds {
            if d == 0 || d > MAX_VIDEO_SECONDS {
                return Err(GatewayError::Validation(format!(
                    "durationSeconds must be between 1 and {MAX_VIDEO_SECONDS}"
                )));
            }
        }
        Ok(Self {
            prompt: prompt("prompt", &body.prompt)?,
            guardian_id: None,
            model: id(body.model),
            options: MediaOptions {
                duration_seconds: body.duration_seconds,
                ..MediaOptions::default()
            },
        })
    }
}

/// `POST /api/generate/audio`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioBody {
    pub prompt: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl TryFrom<AudioBody> for MediaRequest {
    type Error = GatewayError;

    fn try_from(body: AudioBody) -> Result<Self> {
        Ok(Self {
            prompt: prompt("prompt", &body.prompt)?,
            guardian_id: None,
            model: id(body.model),
            options: MediaOptions {
                voice: id(body.voice),
                ..MediaOptions::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_body_camel_case() {
        let body: ChatBody = serde_json::from_value(json!({
            "message": "  write a poem about the sea ",
            "guardianId": "leyla"
        }))
        .unwrap();
        let req = TextRequest::try_from(body).unwrap();
        assert_eq!(req.prompt, "write a poem about the sea");
        assert_eq!(req.guardian_id.as_deref(), Some("leyla"));
        assert!(!req.guardian_mode);
    }

    #[test]
    fn test_rejects_empty_and_out_of_range() {
        let empty: TextBody = serde_json::from_value(json!({ "prompt": "   " })).unwrap();
        assert!(matches!(TextRequest::try_from(empty), Err(GatewayError::Validation(_))));

        let hot: TextBody =
            serde_json::from_value(json!({ "prompt": "hi", "temperature": 3.5 })).unwrap();
        assert!(TextRequest::try_from(hot).is_err());

        let orphan: TextBody =
            serde_json::from_value(json!({ "prompt": "hi", "guardianMode": true })).unwrap();
        assert!(TextRequest::try_from(orphan).is_err());

        let long: VideoBody =
            serde_json::from_value(json!({ "prompt": "waves", "durationSeconds": 600 })).unwrap();
        assert!(MediaRequest::try_from(long).is_err());
    }

    #[test]
    fn test_image_options() {
        let body: ImageBody = serde_json::from_value(json!({
            "prompt": "a fox",
            "style": "natural",
            "quality": "hd",
            "size": "1792x1024"
        }))
        .unwrap();
        let req = MediaRequest::try_from(body).unwrap();
        assert_eq!(req.options.style, ImageStyle::Natural);
        assert_eq!(req.options.quality, ImageQuality::Hd);
        assert_eq!(req.options.size.as_deref(), Some("1792x1024"));

        assert!(serde_json::from_value::<ImageBody>(json!({ "prompt": "x", "style": "neon" })).is_err());
        let odd: ImageBody =
            serde_json::from_value(json!({ "prompt": "x", "size": "10x10" })).unwrap();
        assert!(MediaRequest::try_from(odd).is_err());
    }
}
