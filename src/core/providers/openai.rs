//! OpenAI response and stream normalization
//!
//! The OpenAI wire shape is the gateway's canonical shape, so these
//! helpers mostly validate, stamp the serving provider, and fill gaps.
//! The whole openai-compatible family and the Azure dialect reuse them.

use serde_json::{Value, json};

use super::StreamState;
use crate::core::types::{
    CanonicalResponse, ChatChoice, ChatCompletionChunk, ChatCompletionResponse, CompletionChoice,
    CompletionResponse, EmbeddingData, EmbeddingResponse, ErrorBody, Event,
    ImageGenerationResponse, ModerationResponse, Usage,
};
use crate::utils::error::{GatewayError, Result};

/// Normalize an OpenAI-shaped chat completion body
pub fn normalize_chat_response(
    body: &Value,
    provider: &str,
    requested_model: &str,
    strict: bool,
) -> Result<CanonicalResponse> {
    let choices: Vec<ChatChoice> = match body.get("choices") {
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
            GatewayError::upstream(provider, format!("malformed choices in response: {e}"))
        })?,
        None if strict => {
            return Err(GatewayError::upstream(provider, "response has no choices"));
        }
        None => Vec::new(),
    };

    let usage: Option<Usage> = body
        .get("usage")
        .and_then(|raw| serde_json::from_value(raw.clone()).ok());

    Ok(CanonicalResponse::Chat(ChatCompletionResponse {
        id: string_or(body, "id", || format!("chatcmpl-{}", uuid::Uuid::new_v4())),
        object: "chat.completion".to_string(),
        created: body
            .get("created")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| chrono::Utc::now().timestamp() as u64),
        model: string_or(body, "model", || requested_model.to_string()),
        provider: provider.to_string(),
        choices,
        usage,
        system_fingerprint: body
            .get("system_fingerprint")
            .and_then(Value::as_str)
            .map(str::to_string),
    }))
}

/// Normalize an OpenAI-shaped text completion body
pub fn normalize_completion_response(
    body: &Value,
    provider: &str,
    requested_model: &str,
    strict: bool,
) -> Result<CanonicalResponse> {
    let choices: Vec<CompletionChoice> = match body.get("choices") {
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
            GatewayError::upstream(provider, format!("malformed choices in response: {e}"))
        })?,
        None if strict => {
            return Err(GatewayError::upstream(provider, "response has no choices"));
        }
        None => Vec::new(),
    };

    Ok(CanonicalResponse::Completion(CompletionResponse {
        id: string_or(body, "id", || format!("cmpl-{}", uuid::Uuid::new_v4())),
        object: "text_completion".to_string(),
        created: body
            .get("created")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| chrono::Utc::now().timestamp() as u64),
        model: string_or(body, "model", || requested_model.to_string()),
        provider: provider.to_string(),
        choices,
        usage: body
            .get("usage")
            .and_then(|raw| serde_json::from_value(raw.clone()).ok()),
    }))
}

/// Normalize an OpenAI-shaped embedding body
pub fn normalize_embedding_response(
    body: &Value,
    provider: &str,
    requested_model: &str,
) -> Result<CanonicalResponse> {
    let data: Vec<EmbeddingData> = body
        .get("data")
        .map(|raw| {
            serde_json::from_value(raw.clone()).map_err(|e| {
                GatewayError::upstream(provider, format!("malformed embedding data: {e}"))
            })
        })
        .transpose()?
        .unwrap_or_default();

    Ok(CanonicalResponse::Embedding(EmbeddingResponse {
        object: "list".to_string(),
        model: string_or(body, "model", || requested_model.to_string()),
        provider: provider.to_string(),
        data,
        usage: body
            .get("usage")
            .and_then(|raw| serde_json::from_value(raw.clone()).ok()),
    }))
}

/// Normalize an OpenAI-shaped image generation body
pub fn normalize_image_response(body: &Value, provider: &str) -> Result<CanonicalResponse> {
    Ok(CanonicalResponse::Image(ImageGenerationResponse {
        created: body
            .get("created")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| chrono::Utc::now().timestamp() as u64),
        provider: provider.to_string(),
        data: body
            .get("data")
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
            .unwrap_or_default(),
    }))
}

/// Normalize an OpenAI-shaped moderation body
pub fn normalize_moderation_response(
    body: &Value,
    provider: &str,
    requested_model: &str,
) -> Result<CanonicalResponse> {
    Ok(CanonicalResponse::Moderation(ModerationResponse {
        id: string_or(body, "id", || format!("modr-{}", uuid::Uuid::new_v4())),
        model: string_or(body, "model", || requested_model.to_string()),
        provider: provider.to_string(),
        results: body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    }))
}

/// Normalize one de-framed OpenAI stream payload
///
/// `[DONE]` maps to the terminal frame. Unparseable payloads are skipped
/// in lenient mode and fail the stream in strict mode.
pub fn normalize_chat_stream_frame(
    payload: &str,
    state: &mut StreamState,
    strict: bool,
) -> Result<Vec<Event>> {
    if payload.trim() == "[DONE]" {
        state.emitted_done = true;
        return Ok(vec![Event::done()]);
    }

    let mut raw: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) if strict => {
            return Err(GatewayError::upstream(
                state.provider.clone(),
                format!("malformed stream chunk: {e}"),
            ));
        }
        Err(_) => return Ok(Vec::new()),
    };

    if let Some(map) = raw.as_object_mut() {
        map.entry("id")
            .or_insert_with(|| json!(state.fallback_id.clone()));
        map.insert("object".into(), json!("chat.completion.chunk"));
        map.entry("created")
            .or_insert_with(|| json!(chrono::Utc::now().timestamp()));
        map.entry("model").or_insert_with(|| json!(state.model.clone()));
        map.insert("provider".into(), json!(state.provider.clone()));
    }

    let chunk: ChatCompletionChunk = match serde_json::from_value(raw) {
        Ok(chunk) => chunk,
        Err(e) if strict => {
            return Err(GatewayError::upstream(
                state.provider.clone(),
                format!("stream chunk failed normalization: {e}"),
            ));
        }
        Err(_) => return Ok(Vec::new()),
    };

    state.first_chunk = false;
    Ok(vec![Event::data(serde_json::to_string(&chunk)?)])
}

/// Extract the OpenAI error envelope
pub fn openai_error_body(body: &Value) -> ErrorBody {
    let error = body.get("error").unwrap_or(body);
    ErrorBody {
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown upstream error")
            .to_string(),
        error_type: error
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("api_error")
            .to_string(),
        code: error
            .get("code")
            .map(|code| match code {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        param: error
            .get("param")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn string_or(body: &Value, key: &str, fallback: impl FnOnce() -> String) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_response_normalizes_with_provider_stamp() {
        let body = json!({
            "id": "chatcmpl-1",
            "created": 1700000000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "pong"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        });
        let response = normalize_chat_response(&body, "openai", "gpt-4o-mini", true).unwrap();
        let chat = response.as_chat().unwrap();
        assert_eq!(chat.provider, "openai");
        assert_eq!(chat.first_content().unwrap(), "pong");
        assert_eq!(chat.usage.as_ref().unwrap().total_tokens, 4);
    }

    #[test]
    fn strict_mode_rejects_choiceless_body() {
        let body = json!({"id": "x"});
        assert!(normalize_chat_response(&body, "openai", "m", true).is_err());
        assert!(normalize_chat_response(&body, "openai", "m", false).is_ok());
    }

    #[test]
    fn done_payload_terminates_stream() {
        let mut state = StreamState::new("chatcmpl-f", "m", "openai");
        let events = normalize_chat_stream_frame(" [DONE]", &mut state, false).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(&events[0].to_bytes()[..], b"data: [DONE]\n\n");
        assert!(state.emitted_done);
    }

    #[test]
    fn stream_frame_gains_fallback_identity() {
        let mut state = StreamState::new("chatcmpl-f", "gpt-4o", "groq");
        let events = normalize_chat_stream_frame(
            r#"{"choices":[{"index":0,"delta":{"content":"hi"}}]}"#,
            &mut state,
            true,
        )
        .unwrap();
        let chunk: ChatCompletionChunk =
            serde_json::from_str(&events[0].data).expect("canonical chunk");
        assert_eq!(chunk.id, "chatcmpl-f");
        assert_eq!(chunk.provider, "groq");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hi"));
    }

    #[test]
    fn error_body_extraction_handles_nested_and_flat() {
        let nested = json!({"error": {"message": "bad key", "type": "invalid_request_error", "code": "invalid_api_key"}});
        let body = openai_error_body(&nested);
        assert_eq!(body.message, "bad key");
        assert_eq!(body.code.as_deref(), Some("invalid_api_key"));

        let flat = json!({"message": "oops"});
        assert_eq!(openai_error_body(&flat).message, "oops");
    }
}
