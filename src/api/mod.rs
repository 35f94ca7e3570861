//! HTTP handlers.
//!
//! Bodies are camelCase JSON. Malformed bodies and failed validation answer
//! `400` with the same `{success: false, error}` shape as every other error.

pub mod chat;
pub mod generate;
pub mod info;
pub mod types;

use axum::{Json, extract::rejection::JsonRejection};

use crate::error::{GatewayError, Result};

/// Unwrap a JSON body, turning extractor rejections into validation errors.
pub(crate) fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| GatewayError::Validation(rejection.body_text()))
}
