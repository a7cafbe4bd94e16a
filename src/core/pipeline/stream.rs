//! Stream multiplexing: synthesis and accumulation
//!
//! Synthesis turns a buffered chat response into incremental chunks for
//! clients that asked for a stream against a non-streaming path: content
//! in four-character deltas, each tool call as a name chunk then an
//! arguments chunk, one finish chunk, then the terminal frame.
//! Accumulation is the inverse: normalized chunks fold back into a
//! complete response, for non-stream clients and for caching completed
//! streams.

use serde_json::Value;

use crate::core::types::{
    ChatChoice, ChatCompletionChunk, ChatCompletionResponse, ChatMessage, ChunkChoice,
    ChunkDelta, Event, FunctionCallDelta, MessageRole, ToolCall, ToolCallDelta, Usage,
};

const CONTENT_CHUNK_CHARS: usize = 4;

/// Synthesize a chunk stream from a buffered chat response
pub fn synthesize_chunks(response: &ChatCompletionResponse) -> Vec<Event> {
    let mut events = Vec::new();
    let mut first = true;

    if let Some(choice) = response.choices.first() {
        let content = choice.message.content_text();
        let chars: Vec<char> = content.chars().collect();
        for window in chars.chunks(CONTENT_CHUNK_CHARS) {
            let delta: String = window.iter().collect();
            let chunk = ChatCompletionChunk::content_delta(
                &response.id,
                &response.model,
                &response.provider,
                &delta,
                first,
            );
            first = false;
            if let Ok(data) = serde_json::to_string(&chunk) {
                events.push(Event::data(data));
            }
        }

        if let Some(tool_calls) = &choice.message.tool_calls {
            for (index, call) in tool_calls.iter().enumerate() {
                // Name chunk, then arguments chunk
                for arguments in [None, Some(call.function.arguments.clone())] {
                    let mut chunk = ChatCompletionChunk::scaffold(
                        &response.id,
                        &response.model,
                        &response.provider,
                    );
                    let opening = arguments.is_none();
                    chunk.choices.push(ChunkChoice {
                        index: 0,
                        delta: ChunkDelta {
                            role: (first && opening).then_some(MessageRole::Assistant),
                            content: None,
                            tool_calls: Some(vec![ToolCallDelta {
                                index: index as u32,
                                id: opening.then(|| call.id.clone()),
                                call_type: opening.then(|| call.call_type.clone()),
                                function: Some(FunctionCallDelta {
                                    name: opening.then(|| call.function.name.clone()),
                                    arguments,
                                }),
                            }]),
                        },
                        finish_reason: None,
                        logprobs: None,
                    });
                    first = false;
                    if let Ok(data) = serde_json::to_string(&chunk) {
                        events.push(Event::data(data));
                    }
                }
            }
        }

        let reason = choice.finish_reason.as_deref().unwrap_or("stop");
        let mut finish = ChatCompletionChunk::finish(
            &response.id,
            &response.model,
            &response.provider,
            reason,
        );
        finish.usage = response.usage.clone();
        if let Ok(data) = serde_json::to_string(&finish) {
            events.push(Event::data(data));
        }
    }

    events.push(Event::done());
    events
}

/// Folds normalized chunks back into a complete chat response
#[derive(Default)]
pub struct ChunkAccumulator {
    id: Option<String>,
    model: Option<String>,
    provider: Option<String>,
    created: Option<u64>,
    content: String,
    tool_names: Vec<String>,
    tool_ids: Vec<String>,
    tool_arguments: Vec<String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    saw_content: bool,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any content delta has arrived (drives first-token timing)
    pub fn has_content(&self) -> bool {
        self.saw_content
    }

    /// Fold one SSE event; `[DONE]` frames and unparseable data are
    /// ignored
    pub fn push_event(&mut self, event: &Event) {
        if event.data == "[DONE]" {
            return;
        }
        let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
            return;
        };
        self.push_chunk(&chunk);
    }

    pub fn push_chunk(&mut self, chunk: &ChatCompletionChunk) {
        self.id.get_or_insert_with(|| chunk.id.clone());
        self.model.get_or_insert_with(|| chunk.model.clone());
        self.provider.get_or_insert_with(|| chunk.provider.clone());
        self.created.get_or_insert(chunk.created);
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }

        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                self.content.push_str(content);
                self.saw_content = true;
            }
            if let Some(tool_calls) = &choice.delta.tool_calls {
                for delta in tool_calls {
                    let index = delta.index as usize;
                    while self.tool_names.len() <= index {
                        self.tool_names.push(String::new());
                        self.tool_ids.push(String::new());
                        self.tool_arguments.push(String::new());
                    }
                    if let Some(id) = &delta.id {
                        self.tool_ids[index] = id.clone();
                    }
                    if let Some(function) = &delta.function {
                        if let Some(name) = &function.name {
                            self.tool_names[index].push_str(name);
                        }
                        if let Some(arguments) = &function.arguments {
                            self.tool_arguments[index].push_str(arguments);
                        }
                    }
                }
            }
            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }
    }

    /// Assemble the complete response
    pub fn into_response(self, fallback_model: &str, provider: &str) -> ChatCompletionResponse {
        let tool_calls: Vec<ToolCall> = self
            .tool_names
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(index, name)| ToolCall {
                id: if self.tool_ids[index].is_empty() {
                    format!("call_{index}")
                } else {
                    self.tool_ids[index].clone()
                },
                call_type: "function".to_string(),
                function: crate::core::types::FunctionCall {
                    name: name.clone(),
                    arguments: self.tool_arguments[index].clone(),
                },
            })
            .collect();

        let mut message = ChatMessage::text(MessageRole::Assistant, self.content);
        if !tool_calls.is_empty() {
            message.tool_calls = Some(tool_calls);
        }

        ChatCompletionResponse {
            id: self
                .id
                .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4())),
            object: "chat.completion".to_string(),
            created: self
                .created
                .unwrap_or_else(|| chrono::Utc::now().timestamp() as u64),
            model: self.model.unwrap_or_else(|| fallback_model.to_string()),
            provider: self.provider.unwrap_or_else(|| provider.to_string()),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: self.finish_reason.or_else(|| Some("stop".to_string())),
                logprobs: None,
            }],
            usage: self.usage,
            system_fingerprint: None,
        }
    }
}

/// Parse a cached or buffered body back into a chat response for replay
pub fn chat_response_from_value(body: &Value) -> Option<ChatCompletionResponse> {
    serde_json::from_value(body.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_content(content: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-1".into(),
            object: "chat.completion".into(),
            created: 1_700_000_000,
            model: "gpt-4o-mini".into(),
            provider: "openai".into(),
            choices: vec![ChatChoice::assistant(0, content)],
            usage: Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5,
            }),
            system_fingerprint: None,
        }
    }

    #[test]
    fn synthesis_round_trips_through_accumulation() {
        let response = response_with_content("hello streaming world");
        let events = synthesize_chunks(&response);

        // Last frame is the terminal marker; everything before parses as
        // a canonical chunk
        assert_eq!(events.last().unwrap().data, "[DONE]");
        for event in &events[..events.len() - 1] {
            serde_json::from_str::<ChatCompletionChunk>(&event.data).expect("canonical chunk");
        }

        let mut accumulator = ChunkAccumulator::new();
        for event in &events {
            accumulator.push_event(event);
        }
        let rebuilt = accumulator.into_response("gpt-4o-mini", "openai");
        assert_eq!(rebuilt.first_content().unwrap(), "hello streaming world");
        assert_eq!(rebuilt.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(rebuilt.usage.as_ref().unwrap().total_tokens, 5);
    }

    #[test]
    fn content_deltas_are_four_chars() {
        let response = response_with_content("abcdefgh");
        let events = synthesize_chunks(&response);
        let first: ChatCompletionChunk = serde_json::from_str(&events[0].data).unwrap();
        assert_eq!(first.choices[0].delta.content.as_deref(), Some("abcd"));
        assert_eq!(first.choices[0].delta.role, Some(MessageRole::Assistant));
        let second: ChatCompletionChunk = serde_json::from_str(&events[1].data).unwrap();
        assert_eq!(second.choices[0].delta.content.as_deref(), Some("efgh"));
        assert!(second.choices[0].delta.role.is_none());
    }

    #[test]
    fn multibyte_content_chunks_on_char_boundaries() {
        let response = response_with_content("héllo wörld ✓");
        let events = synthesize_chunks(&response);
        let mut accumulator = ChunkAccumulator::new();
        for event in &events {
            accumulator.push_event(event);
        }
        let rebuilt = accumulator.into_response("m", "openai");
        assert_eq!(rebuilt.first_content().unwrap(), "héllo wörld ✓");
    }

    #[test]
    fn tool_calls_emit_name_then_arguments() {
        let mut response = response_with_content("");
        response.choices[0].message.tool_calls = Some(vec![ToolCall::function(
            "call_1",
            "lookup",
            "{\"q\":\"rust\"}",
        )]);
        response.choices[0].finish_reason = Some("tool_calls".into());

        let events = synthesize_chunks(&response);
        // name chunk, arguments chunk, finish chunk, [DONE]
        assert_eq!(events.len(), 4);
        let name_chunk: ChatCompletionChunk = serde_json::from_str(&events[0].data).unwrap();
        let delta = &name_chunk.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(delta.id.as_deref(), Some("call_1"));
        assert_eq!(
            delta.function.as_ref().unwrap().name.as_deref(),
            Some("lookup")
        );

        let mut accumulator = ChunkAccumulator::new();
        for event in &events {
            accumulator.push_event(event);
        }
        let rebuilt = accumulator.into_response("m", "openai");
        let calls = rebuilt.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, "{\"q\":\"rust\"}");
        assert_eq!(
            rebuilt.choices[0].finish_reason.as_deref(),
            Some("tool_calls")
        );
    }
}
