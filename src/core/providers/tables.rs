//! Shared parameter tables for the OpenAI-compatible family
//!
//! Most upstreams speak the OpenAI dialect verbatim; their tables differ
//! only in the entries a specific provider tweaks. Distinct dialects
//! (Anthropic, Google, Bedrock, Triton) declare their own tables.

use serde_json::{Value, json};

use crate::core::transformer::{ParamSpec, ParameterTable};
use crate::core::types::{
    CanonicalRequest, MessageRole, ModelResponseRequest, extract_messages,
};

/// Chat completions table, OpenAI shape
pub fn openai_chat_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("model", "model").required(),
        ParamSpec::maps("messages", "messages").required(),
        ParamSpec::maps("temperature", "temperature").clamp(0.0, 2.0),
        ParamSpec::maps("top_p", "top_p").clamp(0.0, 1.0),
        ParamSpec::maps("max_tokens", "max_tokens"),
        ParamSpec::maps("n", "n"),
        ParamSpec::maps("stream", "stream"),
        ParamSpec::maps("stop", "stop"),
        ParamSpec::maps("presence_penalty", "presence_penalty").clamp(-2.0, 2.0),
        ParamSpec::maps("frequency_penalty", "frequency_penalty").clamp(-2.0, 2.0),
        ParamSpec::maps("seed", "seed"),
        ParamSpec::maps("reasoning_effort", "reasoning_effort"),
        ParamSpec::maps("tools", "tools"),
        ParamSpec::maps("tool_choice", "tool_choice"),
        ParamSpec::maps("response_format", "response_format"),
        ParamSpec::maps("user", "user"),
    ])
}

/// Chat table variant for dialects without the `developer` role
pub fn openai_chat_table_no_developer_role() -> ParameterTable {
    let mut table = openai_chat_table();
    for spec in &mut table.entries {
        if spec.canonical == "messages" {
            *spec = ParamSpec::maps("messages", "messages")
                .required()
                .with_transform(developer_roles_to_system);
        }
    }
    table
}

/// Rewrite `developer` roles to `system` in the messages array
pub fn developer_roles_to_system(body: &Value) -> Option<Value> {
    let mut messages = body.get("messages")?.clone();
    if let Some(items) = messages.as_array_mut() {
        for message in items {
            if message.get("role").and_then(Value::as_str) == Some("developer") {
                message["role"] = json!("system");
            }
        }
    }
    Some(messages)
}

/// Responses API served over the chat endpoint: `input` (plus
/// `instructions`) projects into a messages array
pub fn responses_as_chat_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("model", "model").required(),
        ParamSpec::maps("input", "messages")
            .required()
            .with_transform(response_input_to_messages),
        ParamSpec::maps("temperature", "temperature").clamp(0.0, 2.0),
        ParamSpec::maps("top_p", "top_p").clamp(0.0, 1.0),
        ParamSpec::maps("max_output_tokens", "max_tokens"),
        ParamSpec::maps("stream", "stream"),
        ParamSpec::maps("reasoning_effort", "reasoning_effort"),
        ParamSpec::maps("tools", "tools"),
    ])
}

/// Project a Responses API body into a chat messages array
pub fn response_input_to_messages(body: &Value) -> Option<Value> {
    let request: ModelResponseRequest = serde_json::from_value(body.clone()).ok()?;
    let messages = extract_messages(&CanonicalRequest::ModelResponse(request)).ok()?;
    serde_json::to_value(messages).ok()
}

/// Text completions table, OpenAI shape
pub fn openai_completion_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("model", "model").required(),
        ParamSpec::maps("prompt", "prompt").required(),
        ParamSpec::maps("temperature", "temperature").clamp(0.0, 2.0),
        ParamSpec::maps("top_p", "top_p").clamp(0.0, 1.0),
        ParamSpec::maps("max_tokens", "max_tokens"),
        ParamSpec::maps("n", "n"),
        ParamSpec::maps("stream", "stream"),
        ParamSpec::maps("stop", "stop"),
        ParamSpec::maps("presence_penalty", "presence_penalty").clamp(-2.0, 2.0),
        ParamSpec::maps("frequency_penalty", "frequency_penalty").clamp(-2.0, 2.0),
        ParamSpec::maps("seed", "seed"),
        ParamSpec::maps("user", "user"),
    ])
}

/// Embeddings table, OpenAI shape
pub fn openai_embedding_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("model", "model").required(),
        ParamSpec::maps("input", "input").required(),
        ParamSpec::maps("encoding_format", "encoding_format"),
        ParamSpec::maps("dimensions", "dimensions"),
        ParamSpec::maps("user", "user"),
    ])
}

/// Image generations table, OpenAI shape
pub fn openai_image_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("prompt", "prompt").required(),
        ParamSpec::maps("model", "model"),
        ParamSpec::maps("n", "n"),
        ParamSpec::maps("size", "size"),
        ParamSpec::maps("quality", "quality"),
        ParamSpec::maps("response_format", "response_format"),
        ParamSpec::maps("user", "user"),
    ])
}

/// Moderations table, OpenAI shape
pub fn openai_moderation_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("input", "input").required(),
        ParamSpec::maps("model", "model"),
    ])
}

/// Speech synthesis table, OpenAI shape
pub fn openai_speech_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("model", "model").required(),
        ParamSpec::maps("input", "input").required(),
        ParamSpec::maps("voice", "voice").required(),
        ParamSpec::maps("response_format", "response_format"),
        ParamSpec::maps("speed", "speed").clamp(0.25, 4.0),
    ])
}

/// Transcription table; the dispatcher renders this body as multipart
pub fn openai_transcription_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("model", "model").required(),
        ParamSpec::maps("file", "file").required(),
        ParamSpec::maps("filename", "filename").required(),
        ParamSpec::maps("language", "language"),
        ParamSpec::maps("prompt", "prompt"),
        ParamSpec::maps("response_format", "response_format"),
        ParamSpec::maps("temperature", "temperature").clamp(0.0, 2.0),
    ])
}

/// Translation table; the dispatcher renders this body as multipart
pub fn openai_translation_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("model", "model").required(),
        ParamSpec::maps("file", "file").required(),
        ParamSpec::maps("filename", "filename").required(),
        ParamSpec::maps("prompt", "prompt"),
        ParamSpec::maps("response_format", "response_format"),
    ])
}

/// File upload table; the dispatcher renders this body as multipart
pub fn openai_file_upload_table() -> ParameterTable {
    ParameterTable::new(vec![
        ParamSpec::maps("file", "file").required(),
        ParamSpec::maps("filename", "filename").required(),
        ParamSpec::maps("purpose", "purpose").required(),
    ])
}

/// Role guard used in tests and the Mistral dialect: whether any message
/// still carries the developer role
pub fn has_developer_role(messages: &Value) -> bool {
    messages
        .as_array()
        .map(|items| {
            items
                .iter()
                .any(|m| m.get("role").and_then(Value::as_str) == Some(MessageRole::Developer.as_str()))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn developer_roles_rewrite_to_system() {
        let body = json!({
            "messages": [
                {"role": "developer", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ]
        });
        let messages = developer_roles_to_system(&body).unwrap();
        assert_eq!(messages[0]["role"], json!("system"));
        assert_eq!(messages[1]["role"], json!("user"));
        assert!(!has_developer_role(&messages));
    }

    #[test]
    fn responses_input_projects_to_messages() {
        let body = json!({
            "model": "gpt-4o",
            "input": [
                {"type": "message", "role": "user", "content": "hello"},
                {"type": "function_call", "call_id": "c1", "name": "f", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "c1", "output": "ok"}
            ]
        });
        let messages = response_input_to_messages(&body).unwrap();
        let items = messages.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1]["role"], json!("assistant"));
        assert_eq!(items[2]["role"], json!("tool"));
    }
}
