//! Streaming: native forwarding, synthesis, and terminal framing

use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use idk_gateway::core::pipeline::PipelineContext;
use idk_gateway::core::types::ChatCompletionChunk;
use idk_gateway::storage::MemoryStorage;

use crate::common::fixtures::*;

fn sse_frame(value: serde_json::Value) -> String {
    format!("data: {value}\n\n")
}

#[tokio::test]
async fn native_stream_normalizes_and_terminates() {
    let mut body = String::new();
    body.push_str(&sse_frame(json!({
        "id": "chatcmpl-up",
        "object": "chat.completion.chunk",
        "created": 1700000000,
        "model": "gpt-4o-mini",
        "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hel"}}]
    })));
    body.push_str(&sse_frame(json!({
        "id": "chatcmpl-up",
        "choices": [{"index": 0, "delta": {"content": "lo"}}]
    })));
    body.push_str(&sse_frame(json!({
        "id": "chatcmpl-up",
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
    })));
    body.push_str("data: [DONE]\n\n");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));
    let config = single_target_config("openai", &format!("{}/v1", server.uri()));

    let output = pipeline
        .execute(
            chat_request("gpt-4o-mini", "ping", true),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let payloads = collect_sse(output).await;
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    // Every prior payload parses as a canonical chunk stamped with the
    // serving provider
    let mut content = String::new();
    for payload in &payloads[..payloads.len() - 1] {
        let chunk: ChatCompletionChunk =
            serde_json::from_str(payload).expect("canonical chunk");
        assert_eq!(chunk.provider, "openai");
        if let Some(delta) = chunk
            .choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
        {
            content.push_str(delta);
        }
    }
    assert_eq!(content, "Hello");
}

#[tokio::test]
async fn non_streaming_upstream_synthesizes_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/model/m1/converse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": {"message": {"role": "assistant",
                                    "content": [{"text": "streamed from bedrock"}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 4, "outputTokens": 3, "totalTokens": 7}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));
    let config = single_target_config("bedrock", &server.uri());

    let output = pipeline
        .execute(
            chat_request("m1", "ping", true),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let payloads = collect_sse(output).await;
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let mut content = String::new();
    let mut finish_reasons = Vec::new();
    for payload in &payloads[..payloads.len() - 1] {
        let chunk: ChatCompletionChunk =
            serde_json::from_str(payload).expect("canonical chunk");
        for choice in &chunk.choices {
            if let Some(delta) = choice.delta.content.as_deref() {
                content.push_str(delta);
            }
            if let Some(reason) = &choice.finish_reason {
                finish_reasons.push(reason.clone());
            }
        }
    }

    // Concatenated deltas equal the buffered content; exactly one finish
    assert_eq!(content, "streamed from bedrock");
    assert_eq!(finish_reasons, vec!["stop".to_string()]);
}

#[tokio::test]
async fn anthropic_stream_normalizes_event_frames() {
    let mut body = String::new();
    body.push_str("event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_7\"}}\n\n");
    body.push_str("event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"hi \"}}\n\n");
    body.push_str("event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"there\"}}\n\n");
    body.push_str("event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n");
    body.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));
    let config = single_target_config("anthropic", &server.uri());

    let output = pipeline
        .execute(
            chat_request("claude-3-5-haiku", "ping", true),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let payloads = collect_sse(output).await;
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let first: ChatCompletionChunk = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(first.id, "msg_7");
    assert_eq!(first.provider, "anthropic");

    let content: String = payloads[..payloads.len() - 1]
        .iter()
        .filter_map(|payload| serde_json::from_str::<ChatCompletionChunk>(payload).ok())
        .filter_map(|chunk| {
            chunk
                .choices
                .first()
                .and_then(|choice| choice.delta.content.clone())
        })
        .collect();
    assert_eq!(content, "hi there");
}
