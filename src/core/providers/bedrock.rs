//! AWS Bedrock dialect (Converse API, API-key auth)
//!
//! Reached over Bedrock's Bearer API-key mode, which keeps the SigV4
//! stack out of the gateway. The binary event-stream encoding is not
//! spoken here, so streaming requests are synthesized by the pipeline
//! from the buffered converse response.

use serde_json::{Value, json};
use std::collections::HashMap;
use url::Url;

use super::{Dialect, StreamState, validate_base_url};
use crate::core::transformer::{ParamSpec, ParameterTable};
use crate::core::types::{
    CanonicalRequest, CanonicalResponse, ChatChoice, ChatCompletionResponse, ChatMessage,
    ErrorBody, Event, FunctionName, MessageRole, Target, Usage,
};
use crate::utils::error::{GatewayError, Result};

pub struct Bedrock;

impl Bedrock {
    fn region(target: &Target) -> String {
        target
            .overrides
            .aws_region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string())
    }
}

impl Dialect for Bedrock {
    fn tag(&self) -> &'static str {
        "bedrock"
    }

    fn supports_native_streaming(&self) -> bool {
        false
    }

    fn custom_fields_schema(&self) -> &'static [&'static str] {
        &["aws_region"]
    }

    fn base_url(&self, target: &Target) -> Result<Url> {
        if let Some(host) = target.custom_host.as_deref() {
            return validate_base_url(host);
        }
        let region = Self::region(target);
        validate_base_url(&format!("https://bedrock-runtime.{region}.amazonaws.com"))
    }

    fn headers(
        &self,
        target: &Target,
        _function: FunctionName,
    ) -> Result<HashMap<String, String>> {
        let key = target.api_key.as_deref().ok_or_else(|| {
            GatewayError::Unauthorized("provider bedrock requires an API key".into())
        })?;
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {key}"));
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Ok(headers)
    }

    fn endpoint(&self, request: &CanonicalRequest, _target: &Target) -> Result<String> {
        let model = self.rename_model(request.model().unwrap_or_default());
        match request.function_name() {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => Ok(format!("/model/{model}/converse")),
            other => Err(GatewayError::bad_request(format!(
                "provider bedrock does not serve {other}"
            ))),
        }
    }

    fn parameter_table(&self, function: FunctionName) -> Option<ParameterTable> {
        match function {
            FunctionName::ChatComplete
            | FunctionName::StreamChatComplete
            | FunctionName::CreateModelResponse => Some(
                ParameterTable::new(vec![
                    ParamSpec::maps("messages", "messages")
                        .required()
                        .with_transform(converse_messages),
                    ParamSpec::maps("messages", "system").with_transform(converse_system),
                    ParamSpec::maps("max_tokens", "inferenceConfig.maxTokens"),
                    ParamSpec::maps("temperature", "inferenceConfig.temperature").clamp(0.0, 1.0),
                    ParamSpec::maps("top_p", "inferenceConfig.topP").clamp(0.0, 1.0),
                    ParamSpec::maps("stop", "inferenceConfig.stopSequences"),
                ])
                .without_passthrough(),
            ),
            _ => None,
        }
    }

    fn rename_model(&self, requested: &str) -> String {
        requested
            .strip_prefix("bedrock/")
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
        let text = body
            .pointer("/output/message/content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            });

        let text = match text {
            Some(text) => text,
            None if strict => {
                return Err(GatewayError::upstream(
                    "bedrock",
                    "converse response has no output message",
                ));
            }
            None => String::new(),
        };

        let usage = body.get("usage").map(|usage| Usage {
            prompt_tokens: usage
                .get("inputTokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            completion_tokens: usage
                .get("outputTokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            total_tokens: usage
                .get("totalTokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
        });

        Ok(CanonicalResponse::Chat(ChatCompletionResponse {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: request.model().unwrap_or_default().to_string(),
            provider: "bedrock".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::text(MessageRole::Assistant, text),
                finish_reason: Some(map_stop_reason(
                    body.get("stopReason").and_then(Value::as_str),
                )),
                logprobs: None,
            }],
            usage,
            system_fingerprint: None,
        }))
    }

    fn transform_stream_chunk(
        &self,
        _frame: &str,
        _state: &mut StreamState,
        _strict: bool,
    ) -> Result<Vec<Event>> {
        Err(GatewayError::Internal(
            "bedrock streams are synthesized from buffered responses".into(),
        ))
    }

    fn transform_error(&self, body: &Value) -> ErrorBody {
        ErrorBody {
            message: body
                .get("message")
                .or_else(|| body.pointer("/error/message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown bedrock error")
                .to_string(),
            error_type: body
                .get("__type")
                .and_then(Value::as_str)
                .unwrap_or("api_error")
                .to_string(),
            code: None,
            param: None,
        }
    }
}

fn map_stop_reason(reason: Option<&str>) -> String {
    match reason {
        Some("end_turn") | Some("stop_sequence") | None => "stop".to_string(),
        Some("max_tokens") => "length".to_string(),
        Some("tool_use") => "tool_calls".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Chat turns become converse messages with text content blocks
fn converse_messages(body: &Value) -> Option<Value> {
    let messages = body.get("messages")?.as_array()?;
    let turns: Vec<Value> = messages
        .iter()
        .filter(|message| {
            !matches!(
                message.get("role").and_then(Value::as_str),
                Some("system") | Some("developer")
            )
        })
        .map(|message| {
            let role = match message.get("role").and_then(Value::as_str) {
                Some("assistant") => "assistant",
                _ => "user",
            };
            let text = message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            json!({"role": role, "content": [{"text": text}]})
        })
        .collect();
    Some(Value::Array(turns))
}

fn converse_system(body: &Value) -> Option<Value> {
    let messages = body.get("messages")?.as_array()?;
    let system: Vec<Value> = messages
        .iter()
        .filter(|message| {
            matches!(
                message.get("role").and_then(Value::as_str),
                Some("system") | Some("developer")
            )
        })
        .filter_map(|message| message.get("content").and_then(Value::as_str))
        .map(|text| json!({"text": text}))
        .collect();
    if system.is_empty() { None } else { Some(Value::Array(system)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transformer::transform_body;

    #[test]
    fn converse_body_shape() {
        let canonical = json!({
            "model": "anthropic.claude-3-haiku-20240307-v1:0",
            "messages": [
                {"role": "system", "content": "short answers"},
                {"role": "user", "content": "ping"}
            ],
            "max_tokens": 64,
            "temperature": 0.3
        });
        let table = Bedrock.parameter_table(FunctionName::ChatComplete).unwrap();
        let body = transform_body(&table, &canonical, None).unwrap();
        assert_eq!(body["system"][0]["text"], json!("short answers"));
        assert_eq!(body["messages"][0]["content"][0]["text"], json!("ping"));
        assert_eq!(body["inferenceConfig"]["maxTokens"], json!(64));
    }

    #[test]
    fn streaming_is_synthesized_not_native() {
        assert!(!Bedrock.supports_native_streaming());
    }

    #[test]
    fn converse_response_normalizes() {
        let body = json!({
            "output": {"message": {"role": "assistant", "content": [{"text": "pong"}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 4, "outputTokens": 1, "totalTokens": 5}
        });
        let request: CanonicalRequest = serde_json::from_value(json!({
            "function": "CHAT_COMPLETE",
            "body": {"model": "anthropic.claude-3-haiku-20240307-v1:0",
                     "messages": [{"role": "user", "content": "ping"}]}
        }))
        .unwrap();
        let response = Bedrock.transform_response(&body, 200, true, &request).unwrap();
        let chat = response.as_chat().unwrap();
        assert_eq!(chat.first_content().unwrap(), "pong");
        assert_eq!(chat.provider, "bedrock");
    }
}
