//! Pipeline behavior against stubbed upstreams

use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use idk_gateway::core::pipeline::PipelineContext;
use idk_gateway::core::types::{
    CacheMode, CacheStatus, HookSpec, RetryPolicy, StrategyMode,
};
use idk_gateway::storage::{MemoryStorage, StorageConnector};

use crate::common::fixtures::*;

#[tokio::test]
async fn chat_round_trip_single_target() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(
            "gpt-4o-mini",
            "pong",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage.clone(), Arc::new(BrokenEmbeddings));

    let mut config = single_target_config("openai", &format!("{}/v1", server.uri()));
    config.cache.mode = CacheMode::Simple;

    let output = pipeline
        .execute(
            chat_request("gpt-4o-mini", "ping", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let (status, body) = expect_json(output);
    assert_eq!(status, 200);
    // Round trip: requested model comes back, first choice is an
    // assistant message with content
    assert_eq!(body["model"], json!("gpt-4o-mini"));
    assert_eq!(body["provider"], json!("openai"));
    assert_eq!(body["choices"][0]["message"]["role"], json!("assistant"));
    assert_eq!(body["choices"][0]["message"]["content"], json!("pong"));

    // The log recorded a cache miss
    let logs = storage.get_logs(None, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].cache_status, CacheStatus::Miss);
    assert_eq!(logs[0].status, 200);
    assert_eq!(logs[0].function_name, "CHAT_COMPLETE");
}

#[tokio::test]
async fn fallback_advances_to_second_target() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({"error": {"message": "engine overloaded"}})),
        )
        .expect(1)
        .mount(&failing)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(
            "gpt-4o-mini",
            "recovered",
        )))
        .expect(1)
        .mount(&healthy)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage.clone(), Arc::new(BrokenEmbeddings));

    let mut config = single_target_config("openai", &format!("{}/v1", failing.uri()));
    config
        .targets
        .push(mock_target("openai", &format!("{}/v1", healthy.uri())));
    config.strategy.mode = StrategyMode::Fallback;

    let output = pipeline
        .execute(
            chat_request("gpt-4o-mini", "ping", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let (status, body) = expect_json(output);
    assert_eq!(status, 200);
    assert_eq!(body["choices"][0]["message"]["content"], json!("recovered"));

    // Both attempts are on the log
    let logs = storage.get_logs(None, 10).await.unwrap();
    let attempts = logs[0].metadata["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["status"], json!(503));
    assert_eq!(attempts[1]["status"], json!(200));
}

#[tokio::test]
async fn non_gated_status_does_not_fall_back() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"error": {"message": "model gpt-9 does not exist"}})),
        )
        .expect(1)
        .mount(&failing)
        .await;

    let never_called = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&never_called)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));

    let mut config = single_target_config("openai", &format!("{}/v1", failing.uri()));
    config
        .targets
        .push(mock_target("openai", &format!("{}/v1", never_called.uri())));
    config.strategy.mode = StrategyMode::Fallback;

    let output = pipeline
        .execute(
            chat_request("gpt-9", "ping", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let (status, body) = expect_json(output);
    assert_eq!(status, 404);
    // Client errors pass the provider message through, prefixed
    assert_eq!(
        body["error"]["message"],
        json!("openai error: model gpt-9 does not exist")
    );
    assert_eq!(
        body["error_details"]["classification"],
        json!("not_found")
    );
}

#[tokio::test]
async fn per_target_retry_recovers_within_the_target() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({"error": {"message": "rate limit exceeded"}})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(
            "gpt-4o-mini",
            "after retry",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));

    let mut config = single_target_config("openai", &format!("{}/v1", server.uri()));
    config.targets[0].retry = Some(RetryPolicy {
        attempts: 2,
        on_status_codes: vec![429],
        use_retry_after_header: false,
    });

    let output = pipeline
        .execute(
            chat_request("gpt-4o-mini", "ping", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let (status, body) = expect_json(output);
    assert_eq!(status, 200);
    assert_eq!(
        body["choices"][0]["message"]["content"],
        json!("after retry")
    );
}

#[tokio::test]
async fn input_hook_denial_is_446_and_skips_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage.clone(), Arc::new(BrokenEmbeddings));

    let mut config = single_target_config("openai", &format!("{}/v1", server.uri()));
    config.input_hooks = vec![HookSpec {
        id: "policy-gate".into(),
        url: None,
        headers: Default::default(),
        timeout_ms: None,
        params: json!({"deny_request": true, "annotations": {"rule": "no-pii"}})
            .as_object()
            .cloned()
            .unwrap(),
    }];

    let output = pipeline
        .execute(
            chat_request("gpt-4o-mini", "ping", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let (status, body) = expect_json(output);
    assert_eq!(status, 446);
    assert_eq!(
        body["hook_results"]["input_hooks"][0]["deny_request"],
        json!(true)
    );

    // The denial is on the log too
    let logs = storage.get_logs(None, 10).await.unwrap();
    assert_eq!(logs[0].status, 446);
    assert!(logs[0].input_hooks[0].deny_request);
}

#[tokio::test]
async fn conditional_strategy_routes_by_model() {
    let claude_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "model": "claude-3-5-haiku",
            "content": [{"type": "text", "text": "from anthropic"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&claude_server)
        .await;

    let openai_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&openai_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));

    let mut config =
        single_target_config("openai", &format!("{}/v1", openai_server.uri()));
    config
        .targets
        .push(mock_target("anthropic", &claude_server.uri()));
    config.strategy.mode = StrategyMode::Conditional;
    config.strategy.conditions = vec![idk_gateway::core::types::ConditionalRoute {
        query: json!({"model": {"$contains": "claude"}})
            .as_object()
            .cloned()
            .unwrap(),
        target: 1,
    }];
    config.strategy.default = Some(0);

    let output = pipeline
        .execute(
            chat_request("claude-3-5-haiku", "ping", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let (status, body) = expect_json(output);
    assert_eq!(status, 200);
    assert_eq!(body["provider"], json!("anthropic"));
    assert_eq!(
        body["choices"][0]["message"]["content"],
        json!("from anthropic")
    );
}

#[tokio::test]
async fn unknown_provider_tag_is_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));

    let config = single_target_config("not-a-provider", "http://localhost:1");
    let output = pipeline
        .execute(
            chat_request("gpt-4o-mini", "ping", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;

    let (status, body) = expect_json(output);
    assert_eq!(status, 400);
    assert_eq!(body["error"]["type"], json!("invalid_provider_error"));
}
