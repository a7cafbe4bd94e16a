//! Canonical request model
//!
//! A single tagged union covers every inference function the gateway
//! serves. Each variant carries a typed body shared across providers plus
//! a flattened `additional_params` map for long-tail fields. Dialects
//! never see raw inbound JSON, only these shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::message::{ChatMessage, MessageContent, MessageRole, Tool, ToolCall};
use crate::utils::error::{GatewayError, Result};

/// Function served by the gateway, tagged in logs and endpoint routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionName {
    #[serde(rename = "CHAT_COMPLETE")]
    ChatComplete,
    #[serde(rename = "STREAM_CHAT_COMPLETE")]
    StreamChatComplete,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "STREAM_COMPLETE")]
    StreamComplete,
    #[serde(rename = "CREATE_MODEL_RESPONSE")]
    CreateModelResponse,
    #[serde(rename = "EMBED")]
    Embed,
    #[serde(rename = "GENERATE_IMAGE")]
    GenerateImage,
    #[serde(rename = "MODERATE")]
    Moderate,
    #[serde(rename = "CREATE_SPEECH")]
    CreateSpeech,
    #[serde(rename = "CREATE_TRANSCRIPTION")]
    CreateTranscription,
    #[serde(rename = "CREATE_TRANSLATION")]
    CreateTranslation,
    #[serde(rename = "UPLOAD_FILE")]
    UploadFile,
    #[serde(rename = "PROXY")]
    Proxy,
}

impl FunctionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatComplete => "CHAT_COMPLETE",
            Self::StreamChatComplete => "STREAM_CHAT_COMPLETE",
            Self::Complete => "COMPLETE",
            Self::StreamComplete => "STREAM_COMPLETE",
            Self::CreateModelResponse => "CREATE_MODEL_RESPONSE",
            Self::Embed => "EMBED",
            Self::GenerateImage => "GENERATE_IMAGE",
            Self::Moderate => "MODERATE",
            Self::CreateSpeech => "CREATE_SPEECH",
            Self::CreateTranscription => "CREATE_TRANSCRIPTION",
            Self::CreateTranslation => "CREATE_TRANSLATION",
            Self::UploadFile => "UPLOAD_FILE",
            Self::Proxy => "PROXY",
        }
    }

    /// Functions whose payload carries a message history the optimizer can
    /// embed and the evaluators can judge
    pub fn supports_semantic_routing(&self) -> bool {
        matches!(
            self,
            Self::ChatComplete
                | Self::StreamChatComplete
                | Self::Complete
                | Self::StreamComplete
                | Self::CreateModelResponse
        )
    }
}

impl std::fmt::Display for FunctionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat completion request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model to use for completion
    pub model: String,
    /// Ordered message history
    pub messages: Vec<ChatMessage>,
    /// Temperature (0.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Top-p sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Number of completions to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    /// Whether to stream the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Presence penalty (-2.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Frequency penalty (-2.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Seed for deterministic outputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Reasoning effort for thinking-capable models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Tools for function calling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Tool choice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Response format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    /// User identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Long-tail provider-specific fields
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// Reasoning effort levels accepted on chat and responses bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Completion prompt: a bare string or a list of strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionPrompt {
    Text(String),
    List(Vec<String>),
}

impl CompletionPrompt {
    pub fn as_texts(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => vec![text.as_str()],
            Self::List(items) => items.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// Text completion request body (legacy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,
    /// Prompt text or list of prompts
    pub prompt: CompletionPrompt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// Responses API input: a bare string or a list of input items
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseInput {
    Text(String),
    Items(Vec<ResponseInputItem>),
}

/// One item of a Responses API input list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseInputItem {
    /// Chat-style message item
    #[serde(rename = "message")]
    Message {
        role: MessageRole,
        content: MessageContent,
    },
    /// Prior model tool invocation being replayed into context
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// Result of a prior tool invocation
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
    /// MCP tool invocation with inline result
    #[serde(rename = "mcp_call")]
    McpCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        #[serde(default)]
        arguments: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Responses API request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponseRequest {
    /// Model to use
    pub model: String,
    /// Input text or item list
    pub input: ResponseInput,
    /// System-level instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// Embedding request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    /// Input text or array of texts
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// Image generation request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// Moderation request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationRequest {
    /// Input text or array of texts
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// Speech synthesis request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// Audio transcription request body (multipart fields flattened)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    pub model: String,
    /// Base64-encoded audio payload
    pub file: String,
    /// Original filename, used for content-type sniffing upstream
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// Audio translation request body (multipart fields flattened)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub model: String,
    /// Base64-encoded audio payload
    pub file: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// File upload request body (multipart fields flattened)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadRequest {
    /// Base64-encoded file payload
    pub file: String,
    pub filename: String,
    pub purpose: String,
    #[serde(flatten)]
    pub additional_params: Map<String, Value>,
}

/// Raw proxy request: forwarded to the target with only auth rewriting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRequest {
    /// Upstream path to hit
    pub path: String,
    /// HTTP method
    pub method: String,
    /// Raw JSON body to forward
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Canonical request: the discriminated record the whole pipeline works on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "function", content = "body")]
pub enum CanonicalRequest {
    #[serde(rename = "CHAT_COMPLETE")]
    ChatCompletion(ChatCompletionRequest),
    #[serde(rename = "COMPLETE")]
    Completion(CompletionRequest),
    #[serde(rename = "CREATE_MODEL_RESPONSE")]
    ModelResponse(ModelResponseRequest),
    #[serde(rename = "EMBED")]
    Embedding(EmbeddingRequest),
    #[serde(rename = "GENERATE_IMAGE")]
    ImageGeneration(ImageGenerationRequest),
    #[serde(rename = "MODERATE")]
    Moderation(ModerationRequest),
    #[serde(rename = "CREATE_SPEECH")]
    Speech(SpeechRequest),
    #[serde(rename = "CREATE_TRANSCRIPTION")]
    Transcription(TranscriptionRequest),
    #[serde(rename = "CREATE_TRANSLATION")]
    Translation(TranslationRequest),
    #[serde(rename = "UPLOAD_FILE")]
    FileUpload(FileUploadRequest),
    #[serde(rename = "PROXY")]
    Proxy(ProxyRequest),
}

impl CanonicalRequest {
    /// Function tag, with streaming variants derived from the body flag
    pub fn function_name(&self) -> FunctionName {
        match self {
            Self::ChatCompletion(body) => {
                if body.stream.unwrap_or(false) {
                    FunctionName::StreamChatComplete
                } else {
                    FunctionName::ChatComplete
                }
            }
            Self::Completion(body) => {
                if body.stream.unwrap_or(false) {
                    FunctionName::StreamComplete
                } else {
                    FunctionName::Complete
                }
            }
            Self::ModelResponse(_) => FunctionName::CreateModelResponse,
            Self::Embedding(_) => FunctionName::Embed,
            Self::ImageGeneration(_) => FunctionName::GenerateImage,
            Self::Moderation(_) => FunctionName::Moderate,
            Self::Speech(_) => FunctionName::CreateSpeech,
            Self::Transcription(_) => FunctionName::CreateTranscription,
            Self::Translation(_) => FunctionName::CreateTranslation,
            Self::FileUpload(_) => FunctionName::UploadFile,
            Self::Proxy(_) => FunctionName::Proxy,
        }
    }

    /// Model named on the body, if the function carries one
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::ChatCompletion(b) => Some(&b.model),
            Self::Completion(b) => Some(&b.model),
            Self::ModelResponse(b) => Some(&b.model),
            Self::Embedding(b) => Some(&b.model),
            Self::ImageGeneration(b) => b.model.as_deref(),
            Self::Moderation(b) => b.model.as_deref(),
            Self::Speech(b) => Some(&b.model),
            Self::Transcription(b) => Some(&b.model),
            Self::Translation(b) => Some(&b.model),
            Self::FileUpload(_) | Self::Proxy(_) => None,
        }
    }

    /// Rewrite the model on the body
    pub fn set_model(&mut self, model: &str) {
        match self {
            Self::ChatCompletion(b) => b.model = model.to_string(),
            Self::Completion(b) => b.model = model.to_string(),
            Self::ModelResponse(b) => b.model = model.to_string(),
            Self::Embedding(b) => b.model = model.to_string(),
            Self::ImageGeneration(b) => b.model = Some(model.to_string()),
            Self::Moderation(b) => b.model = Some(model.to_string()),
            Self::Speech(b) => b.model = model.to_string(),
            Self::Transcription(b) => b.model = model.to_string(),
            Self::Translation(b) => b.model = model.to_string(),
            Self::FileUpload(_) | Self::Proxy(_) => {}
        }
    }

    /// Whether the client asked for a streamed response
    pub fn is_stream(&self) -> bool {
        match self {
            Self::ChatCompletion(b) => b.stream.unwrap_or(false),
            Self::Completion(b) => b.stream.unwrap_or(false),
            Self::ModelResponse(b) => b.stream.unwrap_or(false),
            _ => false,
        }
    }

    /// Force the stream flag on functions that support it
    pub fn set_stream(&mut self, stream: bool) {
        match self {
            Self::ChatCompletion(b) => b.stream = Some(stream),
            Self::Completion(b) => b.stream = Some(stream),
            Self::ModelResponse(b) => b.stream = Some(stream),
            _ => {}
        }
    }

    /// Rebuild the same variant from a (possibly hook-rewritten) body
    pub fn with_body(&self, body: Value) -> Result<CanonicalRequest> {
        let rebuilt = match self {
            Self::ChatCompletion(_) => Self::ChatCompletion(serde_json::from_value(body)?),
            Self::Completion(_) => Self::Completion(serde_json::from_value(body)?),
            Self::ModelResponse(_) => Self::ModelResponse(serde_json::from_value(body)?),
            Self::Embedding(_) => Self::Embedding(serde_json::from_value(body)?),
            Self::ImageGeneration(_) => Self::ImageGeneration(serde_json::from_value(body)?),
            Self::Moderation(_) => Self::Moderation(serde_json::from_value(body)?),
            Self::Speech(_) => Self::Speech(serde_json::from_value(body)?),
            Self::Transcription(_) => Self::Transcription(serde_json::from_value(body)?),
            Self::Translation(_) => Self::Translation(serde_json::from_value(body)?),
            Self::FileUpload(_) => Self::FileUpload(serde_json::from_value(body)?),
            Self::Proxy(_) => Self::Proxy(serde_json::from_value(body)?),
        };
        Ok(rebuilt)
    }

    /// The free-form parameter map, for variants that carry one
    pub fn additional_params_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match self {
            Self::ChatCompletion(b) => Some(&mut b.additional_params),
            Self::Completion(b) => Some(&mut b.additional_params),
            Self::ModelResponse(b) => Some(&mut b.additional_params),
            Self::Embedding(b) => Some(&mut b.additional_params),
            Self::ImageGeneration(b) => Some(&mut b.additional_params),
            Self::Moderation(b) => Some(&mut b.additional_params),
            Self::Speech(b) => Some(&mut b.additional_params),
            Self::Transcription(b) => Some(&mut b.additional_params),
            Self::Translation(b) => Some(&mut b.additional_params),
            Self::FileUpload(b) => Some(&mut b.additional_params),
            Self::Proxy(_) => None,
        }
    }

    /// The free-form parameter map, read-only
    pub fn additional_params(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::ChatCompletion(b) => Some(&b.additional_params),
            Self::Completion(b) => Some(&b.additional_params),
            Self::ModelResponse(b) => Some(&b.additional_params),
            Self::Embedding(b) => Some(&b.additional_params),
            Self::ImageGeneration(b) => Some(&b.additional_params),
            Self::Moderation(b) => Some(&b.additional_params),
            Self::Speech(b) => Some(&b.additional_params),
            Self::Transcription(b) => Some(&b.additional_params),
            Self::Translation(b) => Some(&b.additional_params),
            Self::Proxy(_) => None,
            Self::FileUpload(b) => Some(&b.additional_params),
        }
    }

    /// Serialize the body (without the function tag) for the transformer
    pub fn body_value(&self) -> Result<Value> {
        let value = match self {
            Self::ChatCompletion(b) => serde_json::to_value(b)?,
            Self::Completion(b) => serde_json::to_value(b)?,
            Self::ModelResponse(b) => serde_json::to_value(b)?,
            Self::Embedding(b) => serde_json::to_value(b)?,
            Self::ImageGeneration(b) => serde_json::to_value(b)?,
            Self::Moderation(b) => serde_json::to_value(b)?,
            Self::Speech(b) => serde_json::to_value(b)?,
            Self::Transcription(b) => serde_json::to_value(b)?,
            Self::Translation(b) => serde_json::to_value(b)?,
            Self::FileUpload(b) => serde_json::to_value(b)?,
            Self::Proxy(b) => serde_json::to_value(b)?,
        };
        Ok(value)
    }
}

/// Project any message-bearing request into the canonical chat convention
///
/// Chat bodies pass through. Completion prompts become user messages.
/// Responses API items map as follows: `function_call` becomes an
/// assistant message with a single tool call, `function_call_output`
/// becomes a tool message answering the matching call, and `mcp_call`
/// expands into both, with output `"success"` when the item carries
/// neither `output` nor `error`. Tool-call ids are remapped to fresh
/// nanoids, stable per `call_id` within one projection.
pub fn extract_messages(request: &CanonicalRequest) -> Result<Vec<ChatMessage>> {
    match request {
        CanonicalRequest::ChatCompletion(body) => {
            if body.messages.is_empty() {
                return Err(GatewayError::invalid_request("messages cannot be empty"));
            }
            Ok(body.messages.clone())
        }
        CanonicalRequest::Completion(body) => {
            let texts = body.prompt.as_texts();
            if texts.is_empty() {
                return Err(GatewayError::invalid_request("prompt cannot be empty"));
            }
            Ok(texts
                .into_iter()
                .map(|text| ChatMessage::text(MessageRole::User, text))
                .collect())
        }
        CanonicalRequest::ModelResponse(body) => {
            let mut messages = Vec::new();
            if let Some(instructions) = &body.instructions {
                messages.push(ChatMessage::text(MessageRole::System, instructions));
            }

            match &body.input {
                ResponseInput::Text(text) => {
                    messages.push(ChatMessage::text(MessageRole::User, text));
                }
                ResponseInput::Items(items) => {
                    if items.is_empty() {
                        return Err(GatewayError::invalid_request("input cannot be empty"));
                    }
                    let mut call_ids: HashMap<String, String> = HashMap::new();
                    for item in items {
                        project_input_item(item, &mut call_ids, &mut messages)?;
                    }
                }
            }

            if messages.is_empty() {
                return Err(GatewayError::invalid_request("input cannot be empty"));
            }
            Ok(messages)
        }
        other => Err(GatewayError::bad_request(format!(
            "function {} does not carry a message history",
            other.function_name()
        ))),
    }
}

fn project_input_item(
    item: &ResponseInputItem,
    call_ids: &mut HashMap<String, String>,
    messages: &mut Vec<ChatMessage>,
) -> Result<()> {
    match item {
        ResponseInputItem::Message { role, content } => {
            messages.push(ChatMessage {
                role: *role,
                content: Some(content.clone()),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            });
        }
        ResponseInputItem::FunctionCall {
            call_id,
            name,
            arguments,
        } => {
            if name.is_empty() {
                return Err(GatewayError::invalid_param(
                    "name",
                    "function_call requires a name",
                ));
            }
            let id = remap_call_id(call_ids, call_id);
            messages.push(ChatMessage::tool_call(ToolCall::function(
                id, name, arguments,
            )));
        }
        ResponseInputItem::FunctionCallOutput { call_id, output } => {
            let id = remap_call_id(call_ids, call_id);
            messages.push(ChatMessage::tool_result(id, output));
        }
        ResponseInputItem::McpCall {
            id,
            name,
            arguments,
            output,
            error,
        } => {
            if name.is_empty() {
                return Err(GatewayError::invalid_param(
                    "name",
                    "mcp_call requires a name",
                ));
            }
            let key = id.clone().unwrap_or_else(|| name.clone());
            let mapped = remap_call_id(call_ids, &key);
            messages.push(ChatMessage::tool_call(ToolCall::function(
                mapped.clone(),
                name,
                arguments,
            )));
            let result = match (output, error) {
                (Some(out), _) => out.clone(),
                (None, Some(err)) => err.clone(),
                (None, None) => "success".to_string(),
            };
            messages.push(ChatMessage::tool_result(mapped, result));
        }
    }
    Ok(())
}

fn remap_call_id(call_ids: &mut HashMap<String, String>, call_id: &str) -> String {
    call_ids
        .entry(call_id.to_string())
        .or_insert_with(|| format!("call_{}", nanoid::nanoid!(12)))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_request(stream: bool) -> CanonicalRequest {
        CanonicalRequest::ChatCompletion(ChatCompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::text(MessageRole::User, "ping")],
            temperature: None,
            top_p: None,
            max_tokens: None,
            n: None,
            stream: Some(stream),
            stop: None,
            presence_penalty: None,
            frequency_penalty: None,
            seed: None,
            reasoning_effort: None,
            tools: None,
            tool_choice: None,
            response_format: None,
            user: None,
            additional_params: Map::new(),
        })
    }

    #[test]
    fn stream_flag_drives_function_name() {
        assert_eq!(
            chat_request(false).function_name(),
            FunctionName::ChatComplete
        );
        assert_eq!(
            chat_request(true).function_name(),
            FunctionName::StreamChatComplete
        );
    }

    #[test]
    fn completion_prompt_projects_to_user_messages() {
        let request = CanonicalRequest::Completion(CompletionRequest {
            model: "gpt-3.5-turbo-instruct".into(),
            prompt: CompletionPrompt::List(vec!["one".into(), "two".into()]),
            temperature: None,
            top_p: None,
            max_tokens: None,
            n: None,
            stream: None,
            stop: None,
            presence_penalty: None,
            frequency_penalty: None,
            seed: None,
            user: None,
            additional_params: Map::new(),
        });
        let messages = extract_messages(&request).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].content_text(), "two");
    }

    #[test]
    fn function_call_pairs_share_remapped_id() {
        let request = CanonicalRequest::ModelResponse(ModelResponseRequest {
            model: "gpt-4o".into(),
            input: ResponseInput::Items(vec![
                ResponseInputItem::FunctionCall {
                    call_id: "abc".into(),
                    name: "lookup".into(),
                    arguments: "{}".into(),
                },
                ResponseInputItem::FunctionCallOutput {
                    call_id: "abc".into(),
                    output: "42".into(),
                },
            ]),
            instructions: None,
            temperature: None,
            top_p: None,
            max_output_tokens: None,
            stream: None,
            reasoning_effort: None,
            tools: None,
            additional_params: Map::new(),
        });

        let messages = extract_messages(&request).unwrap();
        assert_eq!(messages.len(), 2);
        let call_id = messages[0].tool_calls.as_ref().unwrap()[0].id.clone();
        assert!(call_id.starts_with("call_"));
        assert_eq!(messages[1].tool_call_id.as_deref(), Some(call_id.as_str()));
    }

    #[test]
    fn bare_mcp_call_yields_success_output() {
        let request = CanonicalRequest::ModelResponse(ModelResponseRequest {
            model: "gpt-4o".into(),
            input: ResponseInput::Items(vec![ResponseInputItem::McpCall {
                id: Some("m1".into()),
                name: "search".into(),
                arguments: "{\"q\":\"rust\"}".into(),
                output: None,
                error: None,
            }]),
            instructions: None,
            temperature: None,
            top_p: None,
            max_output_tokens: None,
            stream: None,
            reasoning_effort: None,
            tools: None,
            additional_params: Map::new(),
        });

        let messages = extract_messages(&request).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(messages[1].role, MessageRole::Tool);
        assert_eq!(messages[1].content_text(), "success");
    }

    #[test]
    fn additional_params_are_flattened() {
        let value = json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}],
            "logit_bias": {"50256": -100}
        });
        let body: ChatCompletionRequest = serde_json::from_value(value).unwrap();
        assert!(body.additional_params.contains_key("logit_bias"));
    }
}
