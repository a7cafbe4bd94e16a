//! Anthropic dialect
//!
//! Messages API: system prompt travels as a top-level field, tool calls
//! are `tool_use` content blocks, tool results are `tool_result` blocks
//! inside user messages, and streams are event-typed SSE frames.

use serde_json::{Map, Value, json};
use std::collections::HashMap;
use url::Url;

use super::{Dialect, StreamState, sse_data_payload, validate_base_url};
use crate::core::transformer::{ParamSpec, ParameterTable};
use crate::core::types::{
    CanonicalRequest, CanonicalResponse, ChatChoice, ChatCompletionChunk,
    ChatCompletionResponse, ChatMessage, ChunkChoice, ChunkDelta, ErrorBody, Event,
    FunctionCallDelta, FunctionName, MessageRole, Target, ToolCall, ToolCallDelta, Usage,
};
use crate::utils::error::{GatewayError, Result};

const DEFAULT_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

pub struct Anthropic;

impl Dialect for Anthropic {
    fn tag(&self) -> &'static str {
        "anthropic"
    }

    fn custom_fields_schema(&self) -> &'static [&'static str] {
        &["api_version"]
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
            GatewayError::Unauthorized("provider anthropic requires an API key".into())
        })?;
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), key.to_string());
        headers.insert(
            "anthropic-version".to_string(),
            target
                .overrides
                .api_version
                .clone()
                .unwrap_or_else(|| API_VERSION.to_string()),
        );
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Ok(headers)
    }

    fn endpoint(&self, request: &CanonicalRequest, _target: &Target) -> Result<String> {
        match request.function_name() {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => Ok("/v1/messages".to_string()),
            other => Err(GatewayError::bad_request(format!(
                "provider anthropic does not serve {other}"
            ))),
        }
    }

    fn parameter_table(&self, function: FunctionName) -> Option<ParameterTable> {
        match function {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => Some(
                ParameterTable::new(vec![
                    ParamSpec::maps("model", "model").required(),
                    ParamSpec::maps("messages", "messages")
                        .required()
                        .with_transform(anthropic_messages),
                    ParamSpec::maps("messages", "system").with_transform(anthropic_system),
                    ParamSpec::maps("max_tokens", "max_tokens")
                        .default_value(json!(DEFAULT_MAX_TOKENS)),
                    ParamSpec::maps("temperature", "temperature").clamp(0.0, 1.0),
                    ParamSpec::maps("top_p", "top_p").clamp(0.0, 1.0),
                    ParamSpec::maps("stop", "stop_sequences"),
                    ParamSpec::maps("stream", "stream"),
                    ParamSpec::maps("tools", "tools").with_transform(anthropic_tools),
                ])
                .without_passthrough(),
            ),
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
        let empty = Vec::new();
        let content = match body.get("content").and_then(Value::as_array) {
            Some(blocks) => blocks,
            None if strict => {
                return Err(GatewayError::upstream(
                    "anthropic",
                    "response has no content blocks",
                ));
            }
            None => &empty,
        };

        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for block in content {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCall::function(
                        block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or("toolu_unknown"),
                        block.get("name").and_then(Value::as_str).unwrap_or(""),
                        block
                            .get("input")
                            .map(|input| input.to_string())
                            .unwrap_or_else(|| "{}".to_string()),
                    ));
                }
                _ => {}
            }
        }

        let mut message = ChatMessage::text(MessageRole::Assistant, text);
        if !tool_calls.is_empty() {
            message.tool_calls = Some(tool_calls);
        }

        let usage = body.get("usage").map(|usage| {
            let prompt = usage
                .get("input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            let completion = usage
                .get("output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        });

        Ok(CanonicalResponse::Chat(ChatCompletionResponse {
            id: body
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("msg_unknown")
                .to_string(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: body
                .get("model")
                .and_then(Value::as_str)
                .or(request.model())
                .unwrap_or_default()
                .to_string(),
            provider: "anthropic".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: Some(map_stop_reason(
                    body.get("stop_reason").and_then(Value::as_str),
                )),
                logprobs: None,
            }],
            usage,
            system_fingerprint: None,
        }))
    }

    fn transform_stream_chunk(
        &self,
        frame: &str,
        state: &mut StreamState,
        strict: bool,
    ) -> Result<Vec<Event>> {
        let Some(payload) = sse_data_payload(frame) else {
            return Ok(Vec::new());
        };
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) if strict => {
                return Err(GatewayError::upstream(
                    "anthropic",
                    format!("malformed stream event: {e}"),
                ));
            }
            Err(_) => return Ok(Vec::new()),
        };

        let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");
        let id = state
            .extras
            .get("message_id")
            .and_then(Value::as_str)
            .unwrap_or(&state.fallback_id)
            .to_string();
        let model = state.model.clone();

        match event_type {
            "message_start" => {
                if let Some(message_id) = value
                    .pointer("/message/id")
                    .and_then(Value::as_str)
                {
                    state
                        .extras
                        .insert("message_id".into(), json!(message_id));
                }
                Ok(Vec::new())
            }
            "content_block_start" => {
                let block = value.get("content_block");
                if block.and_then(|b| b.get("type")).and_then(Value::as_str) == Some("tool_use") {
                    let index = next_tool_index(&mut state.extras);
                    let chunk = tool_call_chunk(
                        &id,
                        &model,
                        index,
                        block,
                        state.first_chunk,
                    );
                    state.first_chunk = false;
                    return Ok(vec![Event::data(serde_json::to_string(&chunk)?)]);
                }
                Ok(Vec::new())
            }
            "content_block_delta" => {
                let delta = value.get("delta");
                match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                    Some("text_delta") => {
                        let text = delta
                            .and_then(|d| d.get("text"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        let chunk = ChatCompletionChunk::content_delta(
                            &id,
                            &model,
                            "anthropic",
                            text,
                            state.first_chunk,
                        );
                        state.first_chunk = false;
                        Ok(vec![Event::data(serde_json::to_string(&chunk)?)])
                    }
                    Some("input_json_delta") => {
                        let partial = delta
                            .and_then(|d| d.get("partial_json"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        let index = current_tool_index(&state.extras);
                        let mut chunk = ChatCompletionChunk::scaffold(&id, &model, "anthropic");
                        chunk.choices.push(ChunkChoice {
                            index: 0,
                            delta: ChunkDelta {
                                role: None,
                                content: None,
                                tool_calls: Some(vec![ToolCallDelta {
                                    index,
                                    id: None,
                                    call_type: None,
                                    function: Some(FunctionCallDelta {
                                        name: None,
                                        arguments: Some(partial.to_string()),
                                    }),
                                }]),
                            },
                            finish_reason: None,
                            logprobs: None,
                        });
                        Ok(vec![Event::data(serde_json::to_string(&chunk)?)])
                    }
                    _ => Ok(Vec::new()),
                }
            }
            "message_delta" => {
                let reason = map_stop_reason(
                    value
                        .pointer("/delta/stop_reason")
                        .and_then(Value::as_str),
                );
                let chunk = ChatCompletionChunk::finish(&id, &model, "anthropic", &reason);
                Ok(vec![Event::data(serde_json::to_string(&chunk)?)])
            }
            "message_stop" => {
                state.emitted_done = true;
                Ok(vec![Event::done()])
            }
            // ping, content_block_stop, error frames handled elsewhere
            _ => Ok(Vec::new()),
        }
    }

    fn transform_error(&self, body: &Value) -> ErrorBody {
        let error = body.get("error").unwrap_or(body);
        ErrorBody {
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown anthropic error")
                .to_string(),
            error_type: error
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("api_error")
                .to_string(),
            code: None,
            param: None,
        }
    }
}

fn tool_call_chunk(
    id: &str,
    model: &str,
    index: u32,
    block: Option<&Value>,
    first: bool,
) -> ChatCompletionChunk {
    let mut chunk = ChatCompletionChunk::scaffold(id, model, "anthropic");
    chunk.choices.push(ChunkChoice {
        index: 0,
        delta: ChunkDelta {
            role: first.then_some(MessageRole::Assistant),
            content: None,
            tool_calls: Some(vec![ToolCallDelta {
                index,
                id: block
                    .and_then(|b| b.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                call_type: Some("function".to_string()),
                function: Some(FunctionCallDelta {
                    name: block
                        .and_then(|b| b.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    arguments: None,
                }),
            }]),
        },
        finish_reason: None,
        logprobs: None,
    });
    chunk
}

fn next_tool_index(extras: &mut Map<String, Value>) -> u32 {
    let next = extras
        .get("tool_index")
        .and_then(Value::as_u64)
        .map(|current| current + 1)
        .unwrap_or(0);
    extras.insert("tool_index".into(), json!(next));
    next as u32
}

fn current_tool_index(extras: &Map<String, Value>) -> u32 {
    extras
        .get("tool_index")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32
}

fn map_stop_reason(reason: Option<&str>) -> String {
    match reason {
        Some("end_turn") | Some("stop_sequence") | None => "stop".to_string(),
        Some("max_tokens") => "length".to_string(),
        Some("tool_use") => "tool_calls".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Split system/developer messages out; the rest become Anthropic turns
fn anthropic_messages(body: &Value) -> Option<Value> {
    let messages = body.get("messages")?.as_array()?;
    let mut turns = Vec::new();

    for message in messages {
        let role = message.get("role").and_then(Value::as_str)?;
        match role {
            "system" | "developer" => continue,
            "tool" => {
                turns.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": message.get("tool_call_id").cloned().unwrap_or(Value::Null),
                        "content": message.get("content").cloned().unwrap_or(Value::Null),
                    }]
                }));
            }
            "assistant" => {
                let mut blocks = Vec::new();
                if let Some(text) = message.get("content").and_then(Value::as_str) {
                    if !text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text}));
                    }
                }
                if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
                    for call in calls {
                        let arguments = call
                            .pointer("/function/arguments")
                            .and_then(Value::as_str)
                            .unwrap_or("{}");
                        let input: Value =
                            serde_json::from_str(arguments).unwrap_or_else(|_| json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.get("id").cloned().unwrap_or(Value::Null),
                            "name": call.pointer("/function/name").cloned().unwrap_or(Value::Null),
                            "input": input,
                        }));
                    }
                }
                turns.push(json!({"role": "assistant", "content": blocks}));
            }
            _ => {
                turns.push(json!({
                    "role": "user",
                    "content": message.get("content").cloned().unwrap_or(Value::Null),
                }));
            }
        }
    }

    Some(Value::Array(turns))
}

/// Concatenate system and developer message contents into the top-level
/// system field
fn anthropic_system(body: &Value) -> Option<Value> {
    let messages = body.get("messages")?.as_array()?;
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| {
            matches!(
                m.get("role").and_then(Value::as_str),
                Some("system") | Some("developer")
            )
        })
        .filter_map(|m| m.get("content").and_then(Value::as_str))
        .collect();
    if system.is_empty() {
        None
    } else {
        Some(Value::String(system.join("\n\n")))
    }
}

/// OpenAI tool definitions become Anthropic tool declarations
fn anthropic_tools(body: &Value) -> Option<Value> {
    let tools = body.get("tools")?.as_array()?;
    let mapped: Vec<Value> = tools
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function")?;
            Some(json!({
                "name": function.get("name").cloned().unwrap_or(Value::Null),
                "description": function.get("description").cloned().unwrap_or(Value::Null),
                "input_schema": function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
            }))
        })
        .collect();
    Some(Value::Array(mapped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transformer::transform_body;

    fn chat_body() -> Value {
        json!({
            "model": "claude-sonnet-4-20250514",
            "messages": [
                {"role": "system", "content": "be helpful"},
                {"role": "user", "content": "hi"}
            ],
            "temperature": 1.8,
        })
    }

    #[test]
    fn system_messages_lift_to_top_level_field() {
        let table = Anthropic.parameter_table(FunctionName::ChatComplete).unwrap();
        let body = transform_body(&table, &chat_body(), None).unwrap();
        assert_eq!(body["system"], json!("be helpful"));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], json!("user"));
        // Anthropic's temperature tops out at 1
        assert_eq!(body["temperature"], json!(1.0));
        assert_eq!(body["max_tokens"], json!(4096));
    }

    #[test]
    fn tool_results_become_user_tool_result_blocks() {
        let body = json!({
            "messages": [
                {"role": "assistant", "content": "", "tool_calls": [
                    {"id": "toolu_1", "type": "function",
                     "function": {"name": "lookup", "arguments": "{\"q\":1}"}}
                ]},
                {"role": "tool", "tool_call_id": "toolu_1", "content": "42"}
            ]
        });
        let turns = anthropic_messages(&body).unwrap();
        assert_eq!(turns[0]["content"][0]["type"], json!("tool_use"));
        assert_eq!(turns[0]["content"][0]["input"]["q"], json!(1));
        assert_eq!(turns[1]["content"][0]["type"], json!("tool_result"));
        assert_eq!(turns[1]["content"][0]["tool_use_id"], json!("toolu_1"));
    }

    #[test]
    fn response_normalizes_to_chat_shape() {
        let body = json!({
            "id": "msg_01",
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "pong"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 2}
        });
        let request: CanonicalRequest = serde_json::from_value(json!({
            "function": "CHAT_COMPLETE",
            "body": {"model": "claude-sonnet-4-20250514",
                     "messages": [{"role": "user", "content": "ping"}]}
        }))
        .unwrap();
        let response = Anthropic
            .transform_response(&body, 200, true, &request)
            .unwrap();
        let chat = response.as_chat().unwrap();
        assert_eq!(chat.choices[0].message.role, MessageRole::Assistant);
        assert_eq!(chat.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(chat.usage.as_ref().unwrap().total_tokens, 12);
    }

    #[test]
    fn stream_events_normalize_and_terminate() {
        let mut state = StreamState::new("chatcmpl-f", "claude-sonnet-4-20250514", "anthropic");

        let events = Anthropic
            .transform_stream_chunk(
                "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_9\"}}",
                &mut state,
                true,
            )
            .unwrap();
        assert!(events.is_empty());

        let events = Anthropic
            .transform_stream_chunk(
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"po\"}}",
                &mut state,
                true,
            )
            .unwrap();
        let chunk: ChatCompletionChunk = serde_json::from_str(&events[0].data).unwrap();
        assert_eq!(chunk.id, "msg_9");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("po"));
        assert_eq!(chunk.choices[0].delta.role, Some(MessageRole::Assistant));

        let events = Anthropic
            .transform_stream_chunk(
                "event: message_stop\ndata: {\"type\":\"message_stop\"}",
                &mut state,
                true,
            )
            .unwrap();
        assert_eq!(&events[0].to_bytes()[..], b"data: [DONE]\n\n");
        assert!(state.emitted_done);
    }
}
