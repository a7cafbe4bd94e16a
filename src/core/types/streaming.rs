//! Streaming chunk types and the SSE event frame

use serde::{Deserialize, Serialize};

use super::message::MessageRole;
use super::responses::Usage;

/// SSE frame written to the client
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Event type
    pub event: Option<String>,
    /// Event data
    pub data: String,
}

impl Event {
    /// Data-only event
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Named event
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Terminal `[DONE]` frame
    pub fn done() -> Self {
        Self::data("[DONE]")
    }

    /// Serialize to wire bytes (`event: ...\n` optional, `data: ...\n\n`)
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut frame = String::with_capacity(self.data.len() + 16);
        if let Some(event) = &self.event {
            frame.push_str("event: ");
            frame.push_str(event);
            frame.push('\n');
        }
        frame.push_str("data: ");
        frame.push_str(&self.data);
        frame.push_str("\n\n");
        bytes::Bytes::from(frame)
    }
}

/// Normalized streaming chunk for chat completions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Unique identifier, stable across the stream
    pub id: String,
    /// Object type (always "chat.completion.chunk")
    pub object: String,
    /// Unix timestamp of creation
    pub created: u64,
    /// Model serving the stream
    pub model: String,
    /// Provider tag serving the stream
    pub provider: String,
    /// Array of chunk choices
    pub choices: Vec<ChunkChoice>,
    /// Usage statistics (only on the final chunk, when reported)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionChunk {
    /// Empty-choice chunk scaffold with the stream identity fields set
    pub fn scaffold(id: &str, model: &str, provider: &str) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: model.to_string(),
            provider: provider.to_string(),
            choices: Vec::new(),
            usage: None,
        }
    }

    /// Single-choice content delta
    pub fn content_delta(id: &str, model: &str, provider: &str, content: &str, first: bool) -> Self {
        let mut chunk = Self::scaffold(id, model, provider);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: first.then_some(MessageRole::Assistant),
                content: Some(content.to_string()),
                tool_calls: None,
            },
            finish_reason: None,
            logprobs: None,
        });
        chunk
    }

    /// Single-choice finish chunk
    pub fn finish(id: &str, model: &str, provider: &str, reason: &str) -> Self {
        let mut chunk = Self::scaffold(id, model, provider);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: None,
                content: None,
                tool_calls: None,
            },
            finish_reason: Some(reason.to_string()),
            logprobs: None,
        });
        chunk
    }
}

/// Choice within a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Index of the choice
    pub index: u32,
    /// Incremental delta
    pub delta: ChunkDelta,
    /// Finish reason (only on the final chunk of the choice)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Log probabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<serde_json::Value>,
}

/// Incremental content within a chunk choice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role (only on the first chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    /// Incremental content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool call fragments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Tool call fragment within a streaming delta
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Index of the tool call within the message
    pub index: u32,
    /// Tool call ID (only on the first fragment)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool type (only on the first fragment)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Function fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

/// Function fragment within a streaming tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    /// Function name (only on the first fragment)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Incremental JSON-encoded arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_frames_end_with_blank_line() {
        let event = Event::data("{\"x\":1}");
        let bytes = event.to_bytes();
        assert_eq!(&bytes[..], b"data: {\"x\":1}\n\n");

        let named = Event::named("message", "hello");
        assert_eq!(&named.to_bytes()[..], b"event: message\ndata: hello\n\n");
    }

    #[test]
    fn done_frame_is_terminal_marker() {
        assert_eq!(&Event::done().to_bytes()[..], b"data: [DONE]\n\n");
    }

    #[test]
    fn first_delta_carries_role() {
        let chunk = ChatCompletionChunk::content_delta("id", "m", "openai", "hi", true);
        assert_eq!(chunk.choices[0].delta.role, Some(MessageRole::Assistant));
        let chunk = ChatCompletionChunk::content_delta("id", "m", "openai", "hi", false);
        assert!(chunk.choices[0].delta.role.is_none());
    }
}
