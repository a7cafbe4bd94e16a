//! Embedding provider interface
//!
//! The gateway treats the vector dimension as opaque; it only requires
//! that every vector seen for one skill agrees. Embedding failure is
//! never fatal: the caller falls back to the unoptimized path.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::utils::error::{GatewayError, Result};

/// Produces fixed-dimension embeddings for request text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Embeddings over an OpenAI-shaped `/embeddings` endpoint
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEmbeddingProvider {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut request = self.client.post(&self.url).json(&json!({
            "model": self.model,
            "input": text,
        }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::upstream(
                "embeddings",
                format!("embedding endpoint returned {}", response.status()),
            ));
        }

        let body: Value = response.json().await?;
        let vector = body
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                GatewayError::upstream("embeddings", "embedding response has no vector")
            })?;

        Ok(vector
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect())
    }
}

/// Disabled embeddings: semantic routing and caching degrade gracefully
pub struct DisabledEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for DisabledEmbeddingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(GatewayError::Unavailable(
            "no embedding provider configured".into(),
        ))
    }
}
