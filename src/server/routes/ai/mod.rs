//! Inference surface: OpenAI-shaped routes
//!
//! Each handler extracts the control envelope (header first, then the
//! body-embedded `idk_config` field), parses the canonical body, and
//! hands the request to the pipeline.

pub mod audio;
pub mod chat;
pub mod completions;
pub mod embeddings;
pub mod files;
pub mod images;
pub mod models;
pub mod moderations;
pub mod responses;

use actix_web::{HttpMessage, HttpRequest};
use serde_json::Value;

use crate::core::types::RequestConfig;
use crate::utils::error::{GatewayError, Result};

/// Resolve the control envelope for a request
///
/// The injector middleware parses the `x-idk-config` header; a
/// body-embedded `idk_config` object is the fallback and is removed from
/// the body before canonical parsing.
pub fn extract_config(req: &HttpRequest, body: &mut Value) -> Result<RequestConfig> {
    if let Some(config) = req.extensions().get::<RequestConfig>() {
        return Ok(config.clone());
    }

    if let Some(embedded) = body.as_object_mut().and_then(|map| map.remove("idk_config")) {
        let config: RequestConfig = serde_json::from_value(embedded)
            .map_err(|e| GatewayError::bad_request(format!("invalid idk_config: {e}")))?;
        return Ok(config);
    }

    Err(GatewayError::bad_request(
        "missing x-idk-config header or idk_config body field",
    ))
}

/// Parse the canonical body for a handler, mapping serde errors to the
/// validation taxonomy
pub fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| GatewayError::invalid_request(e.to_string()))
}
