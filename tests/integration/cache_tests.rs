//! Cache behavior through the pipeline

use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use idk_gateway::core::pipeline::PipelineContext;
use idk_gateway::core::types::{CacheMode, CacheStatus};
use idk_gateway::storage::{MemoryStorage, StorageConnector};

use crate::common::fixtures::*;

#[tokio::test]
async fn concurrent_identical_requests_make_one_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(openai_chat_body("gpt-4o-mini", "single flight"))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));

    let mut config = single_target_config("openai", &format!("{}/v1", server.uri()));
    config.cache.mode = CacheMode::Simple;
    config.cache.ttl_secs = Some(60);

    let calls = (0..6).map(|_| {
        let pipeline = pipeline.clone();
        let config = config.clone();
        async move {
            pipeline
                .execute(
                    chat_request("gpt-4o-mini", "ping", false),
                    config,
                    PipelineContext::new("POST"),
                )
                .await
        }
    });

    for output in join_all(calls).await {
        let (status, body) = expect_json(output);
        assert_eq!(status, 200);
        assert_eq!(
            body["choices"][0]["message"]["content"],
            json!("single flight")
        );
    }
    // wiremock verifies expect(1) on drop
}

#[tokio::test]
async fn semantic_mode_collapses_near_duplicates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(
            "gpt-4o-mini",
            "cached answer",
        )))
        .expect(1)
        .mount(&server)
        .await;

    // Two phrasings with cosine similarity above the threshold
    let embeddings = FixedEmbeddings::new(3)
        .with("what is rust", vec![1.0, 0.0, 0.1])
        .with("what's rust?", vec![0.98, 0.05, 0.12]);

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage.clone(), Arc::new(embeddings));

    let mut config = single_target_config("openai", &format!("{}/v1", server.uri()));
    config.cache.mode = CacheMode::Semantic;
    config.cache.ttl_secs = Some(60);
    config.cache.similarity_threshold = 0.95;

    let first = pipeline
        .execute(
            chat_request("gpt-4o-mini", "what is rust", false),
            config.clone(),
            PipelineContext::new("POST"),
        )
        .await;
    let (status, first_body) = expect_json(first);
    assert_eq!(status, 200);

    let second = pipeline
        .execute(
            chat_request("gpt-4o-mini", "what's rust?", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;
    let (status, second_body) = expect_json(second);
    assert_eq!(status, 200);
    assert_eq!(first_body, second_body);

    // First logged a miss, second a hit
    let logs = storage.get_logs(None, 10).await.unwrap();
    let mut statuses: Vec<CacheStatus> = logs.iter().map(|log| log.cache_status).collect();
    statuses.sort_by_key(|status| *status == CacheStatus::Miss);
    assert_eq!(statuses, vec![CacheStatus::Hit, CacheStatus::Miss]);
}

#[tokio::test]
async fn force_refresh_bypasses_lookup_but_writes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(
            "gpt-4o-mini",
            "fresh",
        )))
        .expect(2)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));

    let mut config = single_target_config("openai", &format!("{}/v1", server.uri()));
    config.cache.mode = CacheMode::Simple;
    config.cache.ttl_secs = Some(60);
    config.force_refresh = true;

    // Both calls go upstream despite identical fingerprints
    for _ in 0..2 {
        let (status, _) = expect_json(
            pipeline
                .execute(
                    chat_request("gpt-4o-mini", "ping", false),
                    config.clone(),
                    PipelineContext::new("POST"),
                )
                .await,
        );
        assert_eq!(status, 200);
    }

    // A non-refresh call now hits the entry the refreshes wrote
    config.force_refresh = false;
    let (status, body) = expect_json(
        pipeline
            .execute(
                chat_request("gpt-4o-mini", "ping", false),
                config,
                PipelineContext::new("POST"),
            )
            .await,
    );
    assert_eq!(status, 200);
    assert_eq!(body["choices"][0]["message"]["content"], json!("fresh"));
}

#[tokio::test]
async fn disabled_cache_reports_not_applicable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(
            "gpt-4o-mini",
            "uncached",
        )))
        .expect(2)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage.clone(), Arc::new(BrokenEmbeddings));
    let config = single_target_config("openai", &format!("{}/v1", server.uri()));

    for _ in 0..2 {
        let (status, _) = expect_json(
            pipeline
                .execute(
                    chat_request("gpt-4o-mini", "ping", false),
                    config.clone(),
                    PipelineContext::new("POST"),
                )
                .await,
        );
        assert_eq!(status, 200);
    }

    let logs = storage.get_logs(None, 10).await.unwrap();
    assert!(logs
        .iter()
        .all(|log| log.cache_status == CacheStatus::NotApplicable));
}
