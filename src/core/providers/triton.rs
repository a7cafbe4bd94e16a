//! NVIDIA Triton dialect (KServe v2 inference protocol)
//!
//! Local inference servers speak the KServe shape: the prompt is wrapped
//! into an `inputs` tensor array and the completion comes back in
//! `outputs[0].data`. No credential, no native streaming.

use serde_json::{Value, json};
use std::collections::HashMap;
use url::Url;

use super::{Dialect, StreamState, validate_base_url};
use crate::core::transformer::{ParamSpec, ParameterTable};
use crate::core::types::{
    CanonicalRequest, CanonicalResponse, CompletionChoice, CompletionResponse, ErrorBody, Event,
    FunctionName, Target,
};
use crate::utils::error::{GatewayError, Result};

const DEFAULT_BASE: &str = "http://localhost:8000";

pub struct Triton;

impl Dialect for Triton {
    fn tag(&self) -> &'static str {
        "triton"
    }

    fn api_key_required(&self) -> bool {
        false
    }

    fn supports_native_streaming(&self) -> bool {
        false
    }

    fn base_url(&self, target: &Target) -> Result<Url> {
        let raw = target.custom_host.as_deref().unwrap_or(DEFAULT_BASE);
        validate_base_url(raw)
    }

    fn headers(
        &self,
        _target: &Target,
        _function: FunctionName,
    ) -> Result<HashMap<String, String>> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Ok(headers)
    }

    fn endpoint(&self, request: &CanonicalRequest, _target: &Target) -> Result<String> {
        let model = request.model().unwrap_or_default();
        match request.function_name() {
            FunctionName::Complete
            | FunctionName::StreamComplete
            | FunctionName::ChatComplete
            | FunctionName::StreamChatComplete => Ok(format!("/v2/models/{model}/infer")),
            other => Err(GatewayError::bad_request(format!(
                "provider triton does not serve {other}"
            ))),
        }
    }

    fn parameter_table(&self, function: FunctionName) -> Option<ParameterTable> {
        match function {
            FunctionName::Complete
            | FunctionName::StreamComplete
            | FunctionName::ChatComplete
            | FunctionName::StreamChatComplete => Some(
                ParameterTable::new(vec![
                    ParamSpec::maps("prompt", "inputs")
                        .required()
                        .with_transform(kserve_inputs),
                    ParamSpec::maps("temperature", "parameters.temperature").clamp(0.0, 2.0),
                    ParamSpec::maps("top_p", "parameters.top_p").clamp(0.0, 1.0),
                    ParamSpec::maps("max_tokens", "parameters.max_tokens"),
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
        let text = body
            .pointer("/outputs/0/data/0")
            .and_then(Value::as_str)
            .map(str::to_string);

        let text = match text {
            Some(text) => text,
            None if strict => {
                return Err(GatewayError::upstream(
                    "triton",
                    "infer response has no output tensor",
                ));
            }
            None => String::new(),
        };

        // Chat functions normalize to the chat shape
        if matches!(
            request.function_name(),
            FunctionName::ChatComplete | FunctionName::StreamChatComplete
        ) {
            return Ok(CanonicalResponse::Chat(
                crate::core::types::ChatCompletionResponse {
                    id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
                    object: "chat.completion".to_string(),
                    created: chrono::Utc::now().timestamp() as u64,
                    model: request.model().unwrap_or_default().to_string(),
                    provider: "triton".to_string(),
                    choices: vec![crate::core::types::ChatChoice::assistant(0, text)],
                    usage: None,
                    system_fingerprint: None,
                },
            ));
        }

        Ok(CanonicalResponse::Completion(CompletionResponse {
            id: format!("cmpl-{}", uuid::Uuid::new_v4()),
            object: "text_completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: request.model().unwrap_or_default().to_string(),
            provider: "triton".to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                text,
                finish_reason: Some("stop".to_string()),
                logprobs: None,
            }],
            usage: None,
        }))
    }

    fn transform_stream_chunk(
        &self,
        _frame: &str,
        _state: &mut StreamState,
        _strict: bool,
    ) -> Result<Vec<Event>> {
        Err(GatewayError::Internal(
            "triton streams are synthesized from buffered responses".into(),
        ))
    }

    fn transform_error(&self, body: &Value) -> ErrorBody {
        ErrorBody {
            message: body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown triton error")
                .to_string(),
            error_type: "api_error".to_string(),
            code: None,
            param: None,
        }
    }
}

/// Wrap the prompt (or flattened chat history) into a KServe inputs array
fn kserve_inputs(body: &Value) -> Option<Value> {
    let text = if let Some(prompt) = body.get("prompt") {
        match prompt {
            Value::String(text) => text.clone(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
            _ => return None,
        }
    } else if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        messages
            .iter()
            .filter_map(|message| {
                let role = message.get("role").and_then(Value::as_str)?;
                let content = message.get("content").and_then(Value::as_str)?;
                Some(format!("{role}: {content}"))
            })
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        return None;
    };

    Some(json!([{
        "name": "text_input",
        "shape": [1],
        "datatype": "BYTES",
        "data": [text],
    }]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transformer::transform_body;

    #[test]
    fn prompt_wraps_into_kserve_inputs() {
        let table = Triton.parameter_table(FunctionName::Complete).unwrap();
        let body = transform_body(
            &table,
            &json!({"model": "llama", "prompt": "hello", "temperature": 0.2}),
            None,
        )
        .unwrap();
        assert_eq!(body["inputs"][0]["name"], json!("text_input"));
        assert_eq!(body["inputs"][0]["data"][0], json!("hello"));
        assert_eq!(body["parameters"]["temperature"], json!(0.2));
    }

    #[test]
    fn chat_history_flattens_for_infer() {
        let value = kserve_inputs(&json!({
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        }))
        .unwrap();
        assert_eq!(value[0]["data"][0], json!("user: hi\nassistant: hello"));
    }

    #[test]
    fn no_credential_needed() {
        assert!(!Triton.api_key_required());
        let target = Target {
            provider: "triton".into(),
            api_key: None,
            api_key_id: None,
            custom_host: None,
            weight: None,
            retry: None,
            cache: None,
            overrides: Default::default(),
            configuration: None,
        };
        assert!(Triton.headers(&target, FunctionName::Complete).is_ok());
    }

    #[test]
    fn infer_output_normalizes_to_completion() {
        let body = json!({"outputs": [{"name": "text_output", "data": ["pong"]}]});
        let request: CanonicalRequest = serde_json::from_value(json!({
            "function": "COMPLETE",
            "body": {"model": "llama", "prompt": "ping"}
        }))
        .unwrap();
        let response = Triton.transform_response(&body, 200, true, &request).unwrap();
        match response {
            CanonicalResponse::Completion(completion) => {
                assert_eq!(completion.choices[0].text, "pong");
                assert_eq!(completion.provider, "triton");
            }
            _ => panic!("expected completion response"),
        }
    }
}
