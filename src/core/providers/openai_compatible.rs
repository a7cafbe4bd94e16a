//! The OpenAI-compatible provider family
//!
//! One dialect implementation parameterized per provider: tag, default
//! host, auth style, and the small table tweaks a member needs. Everything
//! else (endpoint routing, normalization, error extraction) is shared.

use serde_json::Value;
use std::collections::HashMap;
use url::Url;

use super::openai::{
    normalize_chat_response, normalize_chat_stream_frame, normalize_completion_response,
    normalize_embedding_response, normalize_image_response, normalize_moderation_response,
    openai_error_body,
};
use super::tables;
use super::{AuthStyle, Dialect, StreamState, sse_data_payload, validate_base_url};
use crate::core::transformer::ParameterTable;
use crate::core::types::{
    CanonicalRequest, CanonicalResponse, ErrorBody, Event, FunctionName, PassthroughResponse,
    Target,
};
use crate::utils::error::{GatewayError, Result};

/// One member of the OpenAI-compatible family
pub struct OpenAiCompatible {
    tag: &'static str,
    default_base: &'static str,
    auth: AuthStyle,
    api_key_required: bool,
    /// Whether the upstream accepts the `developer` role verbatim
    developer_role: bool,
}

impl OpenAiCompatible {
    const fn new(tag: &'static str, default_base: &'static str) -> Self {
        Self {
            tag,
            default_base,
            auth: AuthStyle::Bearer,
            api_key_required: true,
            developer_role: true,
        }
    }

    const fn local(tag: &'static str, default_base: &'static str) -> Self {
        Self {
            tag,
            default_base,
            auth: AuthStyle::Bearer,
            api_key_required: false,
            developer_role: false,
        }
    }

    const fn without_developer_role(mut self) -> Self {
        self.developer_role = false;
        self
    }
}

/// Every registered family member
pub fn family() -> Vec<OpenAiCompatible> {
    vec![
        OpenAiCompatible::new("openai", "https://api.openai.com/v1"),
        OpenAiCompatible::new("groq", "https://api.groq.com/openai/v1").without_developer_role(),
        OpenAiCompatible::new("mistral", "https://api.mistral.ai/v1").without_developer_role(),
        OpenAiCompatible::new("deepseek", "https://api.deepseek.com/v1").without_developer_role(),
        OpenAiCompatible::new("openrouter", "https://openrouter.ai/api/v1"),
        OpenAiCompatible::new("xai", "https://api.x.ai/v1"),
        OpenAiCompatible::new("moonshot", "https://api.moonshot.ai/v1").without_developer_role(),
        OpenAiCompatible::new("together", "https://api.together.xyz/v1").without_developer_role(),
        OpenAiCompatible::new("fireworks", "https://api.fireworks.ai/inference/v1")
            .without_developer_role(),
        OpenAiCompatible::new("perplexity", "https://api.perplexity.ai")
            .without_developer_role(),
        OpenAiCompatible::new("deepinfra", "https://api.deepinfra.com/v1/openai")
            .without_developer_role(),
        OpenAiCompatible::new("cerebras", "https://api.cerebras.ai/v1").without_developer_role(),
        OpenAiCompatible::new("nebius", "https://api.studio.nebius.ai/v1")
            .without_developer_role(),
        OpenAiCompatible::new("novita", "https://api.novita.ai/v3/openai")
            .without_developer_role(),
        OpenAiCompatible::new("hyperbolic", "https://api.hyperbolic.xyz/v1")
            .without_developer_role(),
        OpenAiCompatible::new("github", "https://models.inference.ai.azure.com"),
        OpenAiCompatible::new("cloudflare", "https://api.cloudflare.com/client/v4/accounts")
            .without_developer_role(),
        OpenAiCompatible::local("ollama", "http://localhost:11434/v1"),
        OpenAiCompatible::local("lmstudio", "http://localhost:1234/v1"),
        OpenAiCompatible::local("vllm", "http://localhost:8000/v1"),
    ]
}

impl Dialect for OpenAiCompatible {
    fn tag(&self) -> &'static str {
        self.tag
    }

    fn api_key_required(&self) -> bool {
        self.api_key_required
    }

    fn base_url(&self, target: &Target) -> Result<Url> {
        let raw = target.custom_host.as_deref().unwrap_or(self.default_base);
        validate_base_url(raw)
    }

    fn headers(
        &self,
        target: &Target,
        _function: FunctionName,
    ) -> Result<HashMap<String, String>> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        match (&self.auth, target.api_key.as_deref()) {
            (AuthStyle::Bearer, Some(key)) => {
                headers.insert("Authorization".to_string(), format!("Bearer {key}"));
            }
            (AuthStyle::Header(name), Some(key)) => {
                headers.insert((*name).to_string(), key.to_string());
            }
            (_, None) if self.api_key_required => {
                return Err(GatewayError::Unauthorized(format!(
                    "provider {} requires an API key",
                    self.tag
                )));
            }
            _ => {}
        }

        Ok(headers)
    }

    fn endpoint(&self, request: &CanonicalRequest, _target: &Target) -> Result<String> {
        let path = match request.function_name() {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => "/chat/completions",
            FunctionName::Complete | FunctionName::StreamComplete => "/completions",
            FunctionName::Embed => "/embeddings",
            FunctionName::GenerateImage => "/images/generations",
            FunctionName::Moderate => "/moderations",
            FunctionName::CreateSpeech => "/audio/speech",
            FunctionName::CreateTranscription => "/audio/transcriptions",
            FunctionName::CreateTranslation => "/audio/translations",
            FunctionName::UploadFile => "/files",
            FunctionName::Proxy => {
                if let CanonicalRequest::Proxy(proxy) = request {
                    return Ok(proxy.path.clone());
                }
                return Err(GatewayError::Internal("proxy request without path".into()));
            }
        };
        Ok(path.to_string())
    }

    fn parameter_table(&self, function: FunctionName) -> Option<ParameterTable> {
        let table = match function {
            FunctionName::ChatComplete | FunctionName::StreamChatComplete => {
                if self.developer_role {
                    tables::openai_chat_table()
                } else {
                    tables::openai_chat_table_no_developer_role()
                }
            }
            FunctionName::CreateModelResponse => tables::responses_as_chat_table(),
            FunctionName::Complete | FunctionName::StreamComplete => {
                tables::openai_completion_table()
            }
            FunctionName::Embed => tables::openai_embedding_table(),
            FunctionName::GenerateImage => tables::openai_image_table(),
            FunctionName::Moderate => tables::openai_moderation_table(),
            FunctionName::CreateSpeech => tables::openai_speech_table(),
            FunctionName::CreateTranscription => tables::openai_transcription_table(),
            FunctionName::CreateTranslation => tables::openai_translation_table(),
            FunctionName::UploadFile => tables::openai_file_upload_table(),
            FunctionName::Proxy => return None,
        };
        Some(table)
    }

    fn rename_model(&self, requested: &str) -> String {
        // "groq/llama-3.1-8b-instant" and friends carry a routing prefix
        requested
            .strip_prefix(&format!("{}/", self.tag))
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
        let model = request.model().unwrap_or_default();
        match request.function_name() {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => {
                normalize_chat_response(body, self.tag, model, strict)
            }
            FunctionName::Complete | FunctionName::StreamComplete => {
                normalize_completion_response(body, self.tag, model, strict)
            }
            FunctionName::Embed => normalize_embedding_response(body, self.tag, model),
            FunctionName::GenerateImage => normalize_image_response(body, self.tag),
            FunctionName::Moderate => normalize_moderation_response(body, self.tag, model),
            _ => Ok(CanonicalResponse::Passthrough(PassthroughResponse {
                provider: self.tag.to_string(),
                body: body.clone(),
            })),
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
