//! Test fixtures and factories

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use idk_gateway::core::cache::ResponseCache;
use idk_gateway::core::embeddings::EmbeddingProvider;
use idk_gateway::core::observability::EventBroadcaster;
use idk_gateway::core::optimizer::{DefaultArmGenerator, Optimizer};
use idk_gateway::core::pipeline::{PipelineOutput, RequestPipeline};
use idk_gateway::core::types::{CanonicalRequest, RequestConfig, Target};
use idk_gateway::storage::MemoryStorage;
use idk_gateway::utils::error::GatewayError;

/// Embedding stub: fixed vectors per text, unit-x for anything else
pub struct FixedEmbeddings {
    pub vectors: HashMap<String, Vec<f32>>,
    pub dimension: usize,
}

impl FixedEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dimension,
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        if let Some(vector) = self.vectors.get(text) {
            return Ok(vector.clone());
        }
        let mut vector = vec![0.0f32; self.dimension];
        vector[0] = 1.0;
        Ok(vector)
    }
}

/// Failing embedding stub: exercises the unoptimized fallback
pub struct BrokenEmbeddings;

#[async_trait]
impl EmbeddingProvider for BrokenEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GatewayError> {
        Err(GatewayError::Unavailable("embeddings down".into()))
    }
}

/// Pipeline over in-memory storage with the given embedding stub
pub fn test_pipeline(
    storage: Arc<MemoryStorage>,
    embeddings: Arc<dyn EmbeddingProvider>,
) -> Arc<RequestPipeline> {
    let optimizer = Arc::new(Optimizer::new(storage.clone(), Arc::new(DefaultArmGenerator)));
    Arc::new(RequestPipeline::new(
        storage,
        Arc::new(ResponseCache::new()),
        optimizer,
        embeddings,
        Arc::new(EventBroadcaster::default()),
        reqwest::Client::new(),
        None,
    ))
}

/// Target pointed at a wiremock server, OpenAI dialect by default
pub fn mock_target(provider: &str, base_url: &str) -> Target {
    Target {
        provider: provider.to_string(),
        api_key: Some("sk-test".to_string()),
        api_key_id: None,
        custom_host: Some(base_url.to_string()),
        weight: None,
        retry: None,
        cache: None,
        overrides: Default::default(),
        configuration: None,
    }
}

/// Single-target config for a wiremock upstream
pub fn single_target_config(provider: &str, base_url: &str) -> RequestConfig {
    RequestConfig {
        targets: vec![mock_target(provider, base_url)],
        ..Default::default()
    }
}

/// Canonical chat request with one user message
pub fn chat_request(model: &str, content: &str, stream: bool) -> CanonicalRequest {
    CanonicalRequest::ChatCompletion(serde_json::from_value(json!({
        "model": model,
        "messages": [{"role": "user", "content": content}],
        "stream": stream,
    })).expect("chat request fixture"))
}

/// OpenAI-shaped chat completion body for wiremock responses
pub fn openai_chat_body(model: &str, content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1700000000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
    })
}

/// Collect an SSE output into its data payloads
pub async fn collect_sse(output: PipelineOutput) -> Vec<String> {
    match output {
        PipelineOutput::Sse(stream) => {
            let raw: Vec<bytes::Bytes> = stream.collect().await;
            let text = raw
                .iter()
                .map(|chunk| String::from_utf8_lossy(chunk).to_string())
                .collect::<String>();
            text.split("\n\n")
                .filter(|frame| !frame.trim().is_empty())
                .filter_map(|frame| {
                    frame
                        .lines()
                        .find_map(|line| line.strip_prefix("data: "))
                        .map(str::to_string)
                })
                .collect()
        }
        PipelineOutput::Json { status, body } => {
            panic!("expected SSE output, got {status}: {body}")
        }
    }
}

/// Unwrap a JSON output
pub fn expect_json(output: PipelineOutput) -> (u16, Value) {
    match output {
        PipelineOutput::Json { status, body } => (status, body),
        PipelineOutput::Sse(_) => panic!("expected JSON output, got a stream"),
    }
}

