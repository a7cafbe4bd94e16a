//! Azure OpenAI dialect
//!
//! OpenAI wire shapes behind resource/deployment routing: the host is
//! derived from the resource name, the deployment replaces the model in
//! the path, and the credential travels in the `api-key` header.

use serde_json::Value;
use std::collections::HashMap;
use url::Url;

use super::openai::{normalize_chat_response, normalize_chat_stream_frame, normalize_completion_response, normalize_embedding_response, openai_error_body};
use super::{Dialect, StreamState, sse_data_payload, tables, validate_base_url};
use crate::core::transformer::ParameterTable;
use crate::core::types::{
    CanonicalRequest, CanonicalResponse, ErrorBody, Event, FunctionName, Target,
};
use crate::utils::error::{GatewayError, Result};

const DEFAULT_API_VERSION: &str = "2024-10-21";

pub struct AzureOpenAi;

impl AzureOpenAi {
    fn deployment<'a>(request: &'a CanonicalRequest, target: &'a Target) -> &'a str {
        target
            .overrides
            .azure_deployment_id
            .as_deref()
            .or(request.model())
            .unwrap_or_default()
    }

    fn api_version(target: &Target) -> String {
        target
            .overrides
            .azure_api_version
            .clone()
            .or(target.overrides.api_version.clone())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string())
    }
}

impl Dialect for AzureOpenAi {
    fn tag(&self) -> &'static str {
        "azure"
    }

    fn custom_fields_schema(&self) -> &'static [&'static str] {
        &["azure_resource_name", "azure_deployment_id", "azure_api_version"]
    }

    fn base_url(&self, target: &Target) -> Result<Url> {
        if let Some(host) = target.custom_host.as_deref() {
            return validate_base_url(host);
        }
        let resource = target.overrides.azure_resource_name.as_deref().ok_or_else(|| {
            GatewayError::Config(
                "provider azure requires overrides.azure_resource_name or a custom host".into(),
            )
        })?;
        validate_base_url(&format!("https://{resource}.openai.azure.com"))
    }

    fn headers(
        &self,
        target: &Target,
        _function: FunctionName,
    ) -> Result<HashMap<String, String>> {
        let key = target.api_key.as_deref().ok_or_else(|| {
            GatewayError::Unauthorized("provider azure requires an API key".into())
        })?;
        let mut headers = HashMap::new();
        headers.insert("api-key".to_string(), key.to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Ok(headers)
    }

    fn endpoint(&self, request: &CanonicalRequest, target: &Target) -> Result<String> {
        let deployment = Self::deployment(request, target);
        let api_version = Self::api_version(target);
        let operation = match request.function_name() {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => "chat/completions",
            FunctionName::Complete | FunctionName::StreamComplete => "completions",
            FunctionName::Embed => "embeddings",
            FunctionName::GenerateImage => "images/generations",
            FunctionName::CreateSpeech => "audio/speech",
            FunctionName::CreateTranscription => "audio/transcriptions",
            FunctionName::CreateTranslation => "audio/translations",
            other => {
                return Err(GatewayError::bad_request(format!(
                    "provider azure does not serve {other}"
                )));
            }
        };
        Ok(format!(
            "/openai/deployments/{deployment}/{operation}?api-version={api_version}"
        ))
    }

    fn parameter_table(&self, function: FunctionName) -> Option<ParameterTable> {
        match function {
            FunctionName::ChatComplete | FunctionName::StreamChatComplete => {
                Some(tables::openai_chat_table())
            }
            FunctionName::CreateModelResponse => Some(tables::responses_as_chat_table()),
            FunctionName::Complete | FunctionName::StreamComplete => {
                Some(tables::openai_completion_table())
            }
            FunctionName::Embed => Some(tables::openai_embedding_table()),
            FunctionName::GenerateImage => Some(tables::openai_image_table()),
            FunctionName::CreateSpeech => Some(tables::openai_speech_table()),
            FunctionName::CreateTranscription => Some(tables::openai_transcription_table()),
            FunctionName::CreateTranslation => Some(tables::openai_translation_table()),
            _ => None,
        }
    }

    fn transform_response(
        &self,
        body: &Value,
        _status: u16,
        strict: bool,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        let model = request.model().unwrap_or_default();
        match request.function_name() {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => {
                normalize_chat_response(body, "azure", model, strict)
            }
            FunctionName::Complete | FunctionName::StreamComplete => {
                normalize_completion_response(body, "azure", model, strict)
            }
            FunctionName::Embed => normalize_embedding_response(body, "azure", model),
            _ => Ok(CanonicalResponse::Passthrough(
                crate::core::types::PassthroughResponse {
                    provider: "azure".to_string(),
                    body: body.clone(),
                },
            )),
        }
    }

    fn transform_stream_chunk(
        &self,
        frame: &str,
        state: &mut StreamState,
        strict: bool,
    ) -> Result<Vec<Event>> {
        match sse_data_payload(frame) {
            Some(payload) => normalize_chat_stream_frame(payload, state, strict),
            None => Ok(Vec::new()),
        }
    }

    fn transform_error(&self, body: &Value) -> ErrorBody {
        openai_error_body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TargetOverrides;

    fn target() -> Target {
        Target {
            provider: "azure".into(),
            api_key: Some("azure-key".into()),
            api_key_id: None,
            custom_host: None,
            weight: None,
            retry: None,
            cache: None,
            overrides: TargetOverrides {
                azure_resource_name: Some("my-resource".into()),
                azure_deployment_id: Some("gpt-4o-deploy".into()),
                ..Default::default()
            },
            configuration: None,
        }
    }

    #[test]
    fn host_and_path_derive_from_overrides() {
        let url = AzureOpenAi.base_url(&target()).unwrap();
        assert_eq!(url.host_str(), Some("my-resource.openai.azure.com"));

        let request: CanonicalRequest = serde_json::from_value(serde_json::json!({
            "function": "CHAT_COMPLETE",
            "body": {"model": "gpt-4o", "messages": [{"role": "user", "content": "x"}]}
        }))
        .unwrap();
        let path = AzureOpenAi.endpoint(&request, &target()).unwrap();
        assert_eq!(
            path,
            "/openai/deployments/gpt-4o-deploy/chat/completions?api-version=2024-10-21"
        );
    }

    #[test]
    fn api_key_header_not_bearer() {
        let headers = AzureOpenAi
            .headers(&target(), FunctionName::ChatComplete)
            .unwrap();
        assert_eq!(headers["api-key"], "azure-key");
        assert!(!headers.contains_key("Authorization"));
    }
}
