//! Google Vertex AI dialect
//!
//! Same wire shapes as the Gemini API, but routed through the regional
//! Vertex endpoint with project/location in the path and Bearer auth.

use serde_json::Value;
use std::collections::HashMap;
use url::Url;

use super::google::{gemini_chat_response, gemini_chat_table, gemini_error_body, gemini_stream_frame};
use super::{Dialect, StreamState, validate_base_url};
use crate::core::transformer::ParameterTable;
use crate::core::types::{
    CanonicalRequest, CanonicalResponse, ErrorBody, Event, FunctionName, Target,
};
use crate::utils::error::{GatewayError, Result};

pub struct Vertex;

impl Vertex {
    fn region(target: &Target) -> String {
        target
            .overrides
            .vertex_region
            .clone()
            .unwrap_or_else(|| "us-central1".to_string())
    }

    fn project(target: &Target) -> Result<String> {
        target.overrides.vertex_project_id.clone().ok_or_else(|| {
            GatewayError::Config("provider vertex requires overrides.vertex_project_id".into())
        })
    }
}

impl Dialect for Vertex {
    fn tag(&self) -> &'static str {
        "vertex"
    }

    fn custom_fields_schema(&self) -> &'static [&'static str] {
        &["vertex_project_id", "vertex_region"]
    }

    fn base_url(&self, target: &Target) -> Result<Url> {
        if let Some(host) = target.custom_host.as_deref() {
            return validate_base_url(host);
        }
        let region = Self::region(target);
        validate_base_url(&format!("https://{region}-aiplatform.googleapis.com"))
    }

    fn headers(
        &self,
        target: &Target,
        _function: FunctionName,
    ) -> Result<HashMap<String, String>> {
        let token = target.api_key.as_deref().ok_or_else(|| {
            GatewayError::Unauthorized("provider vertex requires an access token".into())
        })?;
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Ok(headers)
    }

    fn endpoint(&self, request: &CanonicalRequest, target: &Target) -> Result<String> {
        let project = Self::project(target)?;
        let region = Self::region(target);
        let model = self.rename_model(request.model().unwrap_or_default());
        let base =
            format!("/v1/projects/{project}/locations/{region}/publishers/google/models/{model}");
        match request.function_name() {
            FunctionName::ChatComplete | FunctionName::CreateModelResponse => {
                Ok(format!("{base}:generateContent"))
            }
            FunctionName::StreamChatComplete => {
                Ok(format!("{base}:streamGenerateContent?alt=sse"))
            }
            other => Err(GatewayError::bad_request(format!(
                "provider vertex does not serve {other}"
            ))),
        }
    }

    fn parameter_table(&self, function: FunctionName) -> Option<ParameterTable> {
        match function {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => Some(gemini_chat_table()),
            _ => None,
        }
    }

    fn rename_model(&self, requested: &str) -> String {
        requested
            .strip_prefix("vertex/")
            .unwrap_or(requested)
            .to_string()
    }

    fn transform_response(
        &self,
        body: &Value,
        _status: u16,
        strict: bool,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        gemini_chat_response(body, "vertex", request, strict)
    }

    fn transform_stream_chunk(
        &self,
        frame: &str,
        state: &mut StreamState,
        strict: bool,
    ) -> Result<Vec<Event>> {
        gemini_stream_frame(frame, state, "vertex", strict)
    }

    fn transform_error(&self, body: &Value) -> ErrorBody {
        gemini_error_body(body)
    }
}
