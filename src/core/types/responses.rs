//! Canonical response types
//!
//! One normalized form per function. Dialect response transforms produce
//! these; the pipeline serializes them back to the client unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{ChatMessage, MessageRole};

/// Canonical chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Unique identifier for the completion
    pub id: String,
    /// Object type (always "chat.completion")
    pub object: String,
    /// Unix timestamp of creation
    pub created: u64,
    /// Model that served the request, after provider rename rules
    pub model: String,
    /// Provider tag that served the request
    pub provider: String,
    /// Array of completion choices
    pub choices: Vec<ChatChoice>,
    /// Token usage, when the upstream reported it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// System fingerprint passed through from the upstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
}

impl ChatCompletionResponse {
    /// Content of the first choice, if any
    pub fn first_content(&self) -> Option<String> {
        self.choices
            .first()
            .map(|choice| choice.message.content_text())
    }
}

/// One choice of a chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Index of the choice
    pub index: u32,
    /// Assistant message
    pub message: ChatMessage,
    /// Why generation stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Log probabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Value>,
}

impl ChatChoice {
    /// Assistant text choice with a stop finish reason
    pub fn assistant(index: u32, content: impl Into<String>) -> Self {
        Self {
            index,
            message: ChatMessage::text(MessageRole::Assistant, content),
            finish_reason: Some("stop".to_string()),
            logprobs: None,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Canonical text completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    /// Object type (always "text_completion")
    pub object: String,
    pub created: u64,
    pub model: String,
    pub provider: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One choice of a text completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Value>,
}

/// Canonical embedding response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// Object type (always "list")
    pub object: String,
    pub model: String,
    pub provider: String,
    pub data: Vec<EmbeddingData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One embedding vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    /// Object type (always "embedding")
    pub object: String,
    pub index: u32,
    pub embedding: Vec<f32>,
}

/// Canonical image generation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationResponse {
    pub created: u64,
    pub provider: String,
    pub data: Vec<ImageData>,
}

/// One generated image, URL or base64 payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// Canonical moderation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationResponse {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub results: Vec<Value>,
}

/// Canonical response for functions whose payload is passed through
/// opaquely (speech bytes, file metadata, proxy bodies, Responses API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassthroughResponse {
    pub provider: String,
    pub body: Value,
}

/// Normalized response, one variant per function family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalResponse {
    Chat(ChatCompletionResponse),
    Completion(CompletionResponse),
    Embedding(EmbeddingResponse),
    Image(ImageGenerationResponse),
    Moderation(ModerationResponse),
    Passthrough(PassthroughResponse),
}

impl CanonicalResponse {
    /// Serialize to the body returned to the client
    pub fn to_client_body(&self) -> Value {
        match self {
            Self::Passthrough(resp) => resp.body.clone(),
            other => serde_json::to_value(other).unwrap_or(Value::Null),
        }
    }

    pub fn as_chat(&self) -> Option<&ChatCompletionResponse> {
        match self {
            Self::Chat(resp) => Some(resp),
            _ => None,
        }
    }
}

/// Outward error body: `error` mirrors the OpenAI envelope, `error_details`
/// preserves what the classifier saw
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

/// OpenAI-shaped error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

/// Preserved diagnostics for a classified error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Message exactly as the provider produced it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
    /// Raw provider body, when one was captured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_body: Option<Value>,
    /// Indicator family the classifier matched
    pub classification: String,
    /// Operator-facing remediation hint
    pub suggested_action: String,
}
