//! Google Gemini dialect (Generative Language API)
//!
//! Chat turns become `contents` with `user`/`model` roles, the system
//! prompt travels as `systemInstruction`, and sampling settings nest
//! under `generationConfig`. Vertex shares these transforms.

use serde_json::{Value, json};
use std::collections::HashMap;
use url::Url;

use super::{Dialect, StreamState, sse_data_payload, validate_base_url};
use crate::core::transformer::{ParamSpec, ParameterTable};
use crate::core::types::{
    CanonicalRequest, CanonicalResponse, ChatChoice, ChatCompletionChunk,
    ChatCompletionResponse, ChatMessage, ErrorBody, Event, FunctionName, MessageRole, Target,
    Usage,
};
use crate::utils::error::{GatewayError, Result};

const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com";

pub struct Google;

impl Dialect for Google {
    fn tag(&self) -> &'static str {
        "google"
    }

    fn base_url(&self, target: &Target) -> Result<Url> {
        let raw = target.custom_host.as_deref().unwrap_or(DEFAULT_BASE);
        validate_base_url(raw)
    }

    fn headers(
        &self,
        target: &Target,
        _function: FunctionName,
    ) -> Result<HashMap<String, String>> {
        let key = target.api_key.as_deref().ok_or_else(|| {
            GatewayError::Unauthorized("provider google requires an API key".into())
        })?;
        let mut headers = HashMap::new();
        headers.insert("x-goog-api-key".to_string(), key.to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Ok(headers)
    }

    fn endpoint(&self, request: &CanonicalRequest, _target: &Target) -> Result<String> {
        let model = self.rename_model(request.model().unwrap_or_default());
        match request.function_name() {
            FunctionName::ChatComplete | FunctionName::CreateModelResponse => {
                Ok(format!("/v1beta/models/{model}:generateContent"))
            }
            FunctionName::StreamChatComplete => Ok(format!(
                "/v1beta/models/{model}:streamGenerateContent?alt=sse"
            )),
            FunctionName::Embed => Ok(format!("/v1beta/models/{model}:embedContent")),
            other => Err(GatewayError::bad_request(format!(
                "provider google does not serve {other}"
            ))),
        }
    }

    fn parameter_table(&self, function: FunctionName) -> Option<ParameterTable> {
        match function {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => Some(gemini_chat_table()),
            FunctionName::Embed => Some(
                ParameterTable::new(vec![
                    ParamSpec::maps("input", "content.parts")
                        .required()
                        .with_transform(gemini_embed_parts),
                ])
                .without_passthrough(),
            ),
            _ => None,
        }
    }

    fn rename_model(&self, requested: &str) -> String {
        let trimmed = requested.strip_prefix("google/").unwrap_or(requested);
        trimmed.strip_prefix("models/").unwrap_or(trimmed).to_string()
    }

    fn transform_response(
        &self,
        body: &Value,
        _status: u16,
        strict: bool,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        gemini_chat_response(body, "google", request, strict)
    }

    fn transform_stream_chunk(
        &self,
        frame: &str,
        state: &mut StreamState,
        strict: bool,
    ) -> Result<Vec<Event>> {
        gemini_stream_frame(frame, state, "google", strict)
    }

    fn transform_error(&self, body: &Value) -> ErrorBody {
        gemini_error_body(body)
    }
}

/// Chat table shared by the Google and Vertex dialects
pub(super) fn gemini_chat_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("messages", "contents")
            .required()
            .with_transform(gemini_contents),
        ParamSpec::maps("messages", "systemInstruction").with_transform(gemini_system_instruction),
        ParamSpec::maps("temperature", "generationConfig.temperature").clamp(0.0, 2.0),
        ParamSpec::maps("top_p", "generationConfig.topP").clamp(0.0, 1.0),
        ParamSpec::maps("max_tokens", "generationConfig.maxOutputTokens"),
        ParamSpec::maps("stop", "generationConfig.stopSequences"),
        ParamSpec::maps("n", "generationConfig.candidateCount"),
        ParamSpec::maps("seed", "generationConfig.seed"),
    ])
    .without_passthrough()
}

/// Chat turns become Gemini contents; system turns are handled separately
fn gemini_contents(body: &Value) -> Option<Value> {
    let messages = body.get("messages")?.as_array()?;
    let contents: Vec<Value> = messages
        .iter()
        .filter(|message| {
            !matches!(
                message.get("role").and_then(Value::as_str),
                Some("system") | Some("developer")
            )
        })
        .map(|message| {
            let role = match message.get("role").and_then(Value::as_str) {
                Some("assistant") => "model",
                _ => "user",
            };
            let text = match message.get("content") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => String::new(),
            };
            json!({"role": role, "parts": [{"text": text}]})
        })
        .collect();
    Some(Value::Array(contents))
}

fn gemini_system_instruction(body: &Value) -> Option<Value> {
    let messages = body.get("messages")?.as_array()?;
    let system: Vec<&str> = messages
        .iter()
        .filter(|message| {
            matches!(
                message.get("role").and_then(Value::as_str),
                Some("system") | Some("developer")
            )
        })
        .filter_map(|message| message.get("content").and_then(Value::as_str))
        .collect();
    if system.is_empty() {
        None
    } else {
        Some(json!({"parts": [{"text": system.join("\n\n")}]}))
    }
}

fn gemini_embed_parts(body: &Value) -> Option<Value> {
    let input = body.get("input")?;
    let texts: Vec<Value> = match input {
        Value::String(text) => vec![json!({"text": text})],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|text| json!({"text": text}))
            .collect(),
        _ => return None,
    };
    Some(Value::Array(texts))
}

/// Normalize a generateContent body into the canonical chat response
pub(super) fn gemini_chat_response(
    body: &Value,
    provider: &str,
    request: &CanonicalRequest,
    strict: bool,
) -> Result<CanonicalResponse> {
    let candidates = body.get("candidates").and_then(Value::as_array);
    if candidates.is_none() && strict {
        return Err(GatewayError::upstream(provider, "response has no candidates"));
    }

    let choices: Vec<ChatChoice> = candidates
        .map(|candidates| {
            candidates
                .iter()
                .enumerate()
                .map(|(index, candidate)| ChatChoice {
                    index: index as u32,
                    message: ChatMessage::text(
                        MessageRole::Assistant,
                        candidate_text(candidate),
                    ),
                    finish_reason: Some(map_finish_reason(
                        candidate.get("finishReason").and_then(Value::as_str),
                    )),
                    logprobs: None,
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = body.get("usageMetadata").map(|meta| {
        let prompt = meta
            .get("promptTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let completion = meta
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: meta
                .get("totalTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or((prompt + completion) as u64) as u32,
        }
    });

    Ok(CanonicalResponse::Chat(ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: request.model().unwrap_or_default().to_string(),
        provider: provider.to_string(),
        choices,
        usage,
        system_fingerprint: None,
    }))
}

/// Normalize one streamGenerateContent SSE frame
///
/// Gemini streams end without a terminal marker; the pipeline appends the
/// `[DONE]` frame when the upstream closes.
pub(super) fn gemini_stream_frame(
    frame: &str,
    state: &mut StreamState,
    provider: &str,
    strict: bool,
) -> Result<Vec<Event>> {
    let Some(payload) = sse_data_payload(frame) else {
        return Ok(Vec::new());
    };
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) if strict => {
            return Err(GatewayError::upstream(
                provider,
                format!("malformed stream chunk: {e}"),
            ));
        }
        Err(_) => return Ok(Vec::new()),
    };

    let Some(candidate) = value
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    else {
        return Ok(Vec::new());
    };

    let mut events = Vec::new();
    let text = candidate_text(candidate);
    if !text.is_empty() {
        let chunk = ChatCompletionChunk::content_delta(
            &state.fallback_id,
            &state.model,
            provider,
            &text,
            state.first_chunk,
        );
        state.first_chunk = false;
        events.push(Event::data(serde_json::to_string(&chunk)?));
    }

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        let chunk = ChatCompletionChunk::finish(
            &state.fallback_id,
            &state.model,
            provider,
            &map_finish_reason(Some(reason)),
        );
        events.push(Event::data(serde_json::to_string(&chunk)?));
    }

    Ok(events)
}

pub(super) fn gemini_error_body(body: &Value) -> ErrorBody {
    let error = body.get("error").unwrap_or(body);
    ErrorBody {
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown google error")
            .to_string(),
        error_type: error
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("api_error")
            .to_string(),
        code: error.get("code").map(|code| code.to_string()),
        param: None,
    }
}

fn candidate_text(candidate: &Value) -> String {
    candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn map_finish_reason(reason: Option<&str>) -> String {
    match reason {
        Some("STOP") | None => "stop".to_string(),
        Some("MAX_TOKENS") => "length".to_string(),
        Some("SAFETY") | Some("RECITATION") => "content_filter".to_string(),
        Some(other) => other.to_lowercase(),
    }
}
