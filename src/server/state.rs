//! Application state shared across HTTP handlers

use std::sync::Arc;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::core::cache::ResponseCache;
use crate::core::embeddings::{
    DisabledEmbeddingProvider, EmbeddingProvider, HttpEmbeddingProvider,
};
use crate::core::observability::EventBroadcaster;
use crate::core::optimizer::{DefaultArmGenerator, Optimizer};
use crate::core::pipeline::RequestPipeline;
use crate::core::types::Target;
use crate::storage::StorageConnector;
use crate::utils::error::Result;

/// HTTP server state shared across handlers
///
/// All fields are wrapped in Arc for cheap sharing across workers; the
/// registries inside are read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub storage: Arc<dyn StorageConnector>,
    pub pipeline: Arc<RequestPipeline>,
    pub broadcaster: Arc<EventBroadcaster>,
}

impl AppState {
    /// Wire the pipeline and its collaborators from the bootstrap config
    pub fn new(config: GatewayConfig, storage: Arc<dyn StorageConnector>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let embeddings: Arc<dyn EmbeddingProvider> = match &config.embeddings {
            Some(settings) => Arc::new(HttpEmbeddingProvider::new(
                client.clone(),
                settings.url.clone(),
                settings.api_key.clone(),
                settings.model.clone(),
            )),
            None => Arc::new(DisabledEmbeddingProvider),
        };

        let judge_target = config.judge.as_ref().map(|judge| Target {
            provider: judge.provider.clone(),
            api_key: judge.api_key.clone(),
            api_key_id: None,
            custom_host: judge.custom_host.clone(),
            weight: None,
            retry: None,
            cache: None,
            overrides: Default::default(),
            configuration: None,
        });

        let broadcaster = Arc::new(EventBroadcaster::default());
        let optimizer = Arc::new(Optimizer::new(
            storage.clone(),
            Arc::new(DefaultArmGenerator),
        ));

        let mut pipeline = RequestPipeline::new(
            storage.clone(),
            Arc::new(ResponseCache::new()),
            optimizer,
            embeddings,
            broadcaster.clone(),
            client,
            judge_target,
        );
        pipeline.default_timeout = Duration::from_millis(config.request_timeout_ms);

        Ok(Self {
            config: Arc::new(config),
            storage,
            pipeline: Arc::new(pipeline),
            broadcaster,
        })
    }
}
