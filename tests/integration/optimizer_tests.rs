//! Optimizer loop through the pipeline

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use idk_gateway::core::pipeline::PipelineContext;
use idk_gateway::core::types::{Agent, Skill};
use idk_gateway::storage::{MemoryStorage, StorageConnector};

use crate::common::fixtures::*;

async fn seed_optimizing_skill(storage: &MemoryStorage, optimize: bool) -> (Agent, Skill) {
    let agent = Agent::new("support-bot");
    storage.create_agent(agent.clone()).await.unwrap();

    let mut skill = Skill::new(agent.id, "summarize");
    skill.optimize = optimize;
    skill.configuration_count = 2;
    skill.models = vec!["gpt-4o-mini".to_string()];
    skill.evaluation_methods = vec!["latency".to_string()];
    storage.create_skill(skill.clone()).await.unwrap();
    (agent, skill)
}

#[tokio::test]
async fn optimized_request_records_cluster_and_arm() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(
            "gpt-4o-mini",
            "optimized answer",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let (_, skill) = seed_optimizing_skill(&storage, true).await;
    let pipeline = test_pipeline(storage.clone(), Arc::new(FixedEmbeddings::new(4)));

    let mut config = single_target_config("openai", &format!("{}/v1", server.uri()));
    config.agent = Some("support-bot".to_string());
    config.skill = Some("summarize".to_string());

    let output = pipeline
        .execute(
            chat_request("gpt-4o-mini", "summarize this document", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;
    let (status, _) = expect_json(output);
    assert_eq!(status, 200);

    // Exactly one cluster and one arm recorded on the log
    let logs = storage.get_logs(Some(skill.id), 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert!(log.cluster_id.is_some());
    assert!(log.arm_id.is_some());
    assert!(log.embedding.is_some());

    // The async evaluation eventually rewards the pulled arm
    let arm_id = log.arm_id.unwrap();
    let cluster_id = log.cluster_id.unwrap();
    let mut rewarded = false;
    for _ in 0..40 {
        let arms = storage
            .get_skill_optimization_arms(cluster_id)
            .await
            .unwrap();
        let arm = arms.iter().find(|arm| arm.id == arm_id).unwrap();
        if arm.stats.n > 0 {
            assert!(arm.stats.mean >= 0.0 && arm.stats.mean <= 1.0);
            assert!(arm.stats.total_reward <= arm.stats.n as f64);
            rewarded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(rewarded, "arm never received a reward");

    // The evaluated log carries the latency record
    let evaluated = storage.get_log(log.id).await.unwrap();
    assert_eq!(evaluated.evaluations.len(), 1);
    assert_eq!(evaluated.evaluations[0].method, "latency");
    assert!(evaluated.avg_eval_score.is_some());
}

#[tokio::test]
async fn embedding_failure_falls_back_to_caller_supplied_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(
            "gpt-4o-mini",
            "fallback answer",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let (_, skill) = seed_optimizing_skill(&storage, true).await;
    let pipeline = test_pipeline(storage.clone(), Arc::new(BrokenEmbeddings));

    let mut config = single_target_config("openai", &format!("{}/v1", server.uri()));
    config.agent = Some("support-bot".to_string());
    config.skill = Some("summarize".to_string());

    let output = pipeline
        .execute(
            chat_request("gpt-4o-mini", "summarize this", false),
            config,
            PipelineContext::new("POST"),
        )
        .await;
    let (status, body) = expect_json(output);
    assert_eq!(status, 200);
    assert_eq!(body["model"], json!("gpt-4o-mini"));

    // No arm was bound and no embedding stored
    let logs = storage.get_logs(Some(skill.id), 10).await.unwrap();
    assert!(logs[0].arm_id.is_none());
    assert!(logs[0].embedding.is_none());
}

#[tokio::test]
async fn unoptimized_skills_never_touch_the_bandit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_chat_body(
            "gpt-4o-mini",
            "plain answer",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let (_, skill) = seed_optimizing_skill(&storage, false).await;
    let pipeline = test_pipeline(storage.clone(), Arc::new(FixedEmbeddings::new(4)));

    let mut config = single_target_config("openai", &format!("{}/v1", server.uri()));
    config.agent = Some("support-bot".to_string());
    config.skill = Some("summarize".to_string());

    let (status, _) = expect_json(
        pipeline
            .execute(
                chat_request("gpt-4o-mini", "summarize", false),
                config,
                PipelineContext::new("POST"),
            )
            .await,
    );
    assert_eq!(status, 200);

    let clusters = storage
        .get_skill_optimization_clusters(skill.id)
        .await
        .unwrap();
    assert!(clusters.is_empty());
}

#[tokio::test]
async fn unknown_agent_is_not_found() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = test_pipeline(storage, Arc::new(BrokenEmbeddings));

    let mut config = single_target_config("openai", "http://localhost:1/v1");
    config.agent = Some("nobody".to_string());

    let (status, body) = expect_json(
        pipeline
            .execute(
                chat_request("gpt-4o-mini", "hello", false),
                config,
                PipelineContext::new("POST"),
            )
            .await,
    );
    assert_eq!(status, 404);
    assert_eq!(body["error"]["type"], json!("not_found_error"));
}
