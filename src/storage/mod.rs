//! Storage connector contract
//!
//! All persisted state (agents, skills, clusters, arms, logs, evaluation
//! runs, datasets) sits behind [`StorageConnector`]. SQL and KV backends
//! are external adapters implementing this trait; the crate ships an
//! in-memory adapter used by the default binary and the test suite.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::core::types::{
    Agent, Arm, ArmStats, Cluster, Dataset, EvaluationRun, LogOutput, ModelEntry, ProviderApiKey,
    RequestLog, Skill,
};

/// Storage operation failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<StorageError> for crate::utils::error::GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::Unavailable(msg) => Self::Unavailable(msg),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Contract every storage adapter implements
///
/// Referential integrity among agent → skill → cluster → arm and
/// skill → log → evaluation is the adapter's responsibility; deleting a
/// skill cascades to its clusters, arms, and evaluations. Arm stat
/// updates are serialized per arm id.
#[async_trait]
pub trait StorageConnector: Send + Sync {
    // Agents and skills
    async fn get_agents(&self) -> StorageResult<Vec<Agent>>;
    async fn get_agent_by_name(&self, name: &str) -> StorageResult<Agent>;
    async fn create_agent(&self, agent: Agent) -> StorageResult<Agent>;
    async fn delete_agent(&self, agent_id: Uuid) -> StorageResult<()>;

    async fn get_skills(&self, agent_id: Uuid) -> StorageResult<Vec<Skill>>;
    async fn get_skill_by_name(&self, agent_id: Uuid, name: &str) -> StorageResult<Skill>;
    async fn create_skill(&self, skill: Skill) -> StorageResult<Skill>;
    async fn update_skill(&self, skill: Skill) -> StorageResult<Skill>;
    async fn delete_skill(&self, skill_id: Uuid) -> StorageResult<()>;

    // Models and credentials
    async fn get_models(&self) -> StorageResult<Vec<ModelEntry>>;
    async fn create_model(&self, model: ModelEntry) -> StorageResult<ModelEntry>;
    async fn get_ai_provider_api_keys(&self) -> StorageResult<Vec<ProviderApiKey>>;
    async fn get_ai_provider_api_key_by_id(&self, id: Uuid) -> StorageResult<ProviderApiKey>;
    async fn create_ai_provider_api_key(&self, key: ProviderApiKey)
    -> StorageResult<ProviderApiKey>;

    // Optimization state
    async fn get_skill_optimization_clusters(&self, skill_id: Uuid)
    -> StorageResult<Vec<Cluster>>;
    async fn create_skill_optimization_clusters(
        &self,
        clusters: Vec<Cluster>,
    ) -> StorageResult<Vec<Cluster>>;
    async fn update_skill_optimization_cluster(&self, cluster: Cluster) -> StorageResult<Cluster>;
    async fn get_skill_optimization_arms(&self, cluster_id: Uuid) -> StorageResult<Vec<Arm>>;
    async fn create_skill_optimization_arms(&self, arms: Vec<Arm>) -> StorageResult<Vec<Arm>>;
    /// Fold one reward into the arm's stats; atomic per arm id
    async fn update_skill_optimization_arm_stats(
        &self,
        arm_id: Uuid,
        reward: f64,
    ) -> StorageResult<ArmStats>;
    /// Move an arm to another cluster during re-partitioning
    async fn reassign_skill_optimization_arm(
        &self,
        arm_id: Uuid,
        cluster_id: Uuid,
    ) -> StorageResult<()>;

    // Logs
    async fn create_log(&self, log: RequestLog) -> StorageResult<RequestLog>;
    async fn update_log(&self, log: RequestLog) -> StorageResult<RequestLog>;
    async fn get_log(&self, log_id: Uuid) -> StorageResult<RequestLog>;
    async fn get_logs(&self, skill_id: Option<Uuid>, limit: usize)
    -> StorageResult<Vec<RequestLog>>;
    /// Merge metadata keys into a log without replacing the record
    async fn annotate_log(
        &self,
        log_id: Uuid,
        metadata: Map<String, Value>,
    ) -> StorageResult<()>;
    async fn get_log_outputs(&self, log_id: Uuid) -> StorageResult<Vec<LogOutput>>;
    async fn create_log_output(&self, output: LogOutput) -> StorageResult<LogOutput>;

    // Evaluation runs and datasets
    async fn get_evaluation_runs(&self) -> StorageResult<Vec<EvaluationRun>>;
    async fn create_evaluation_run(&self, run: EvaluationRun) -> StorageResult<EvaluationRun>;
    async fn update_evaluation_run(&self, run: EvaluationRun) -> StorageResult<EvaluationRun>;
    async fn get_datasets(&self) -> StorageResult<Vec<Dataset>>;
    async fn get_dataset_logs(&self, dataset_id: Uuid) -> StorageResult<Vec<RequestLog>>;
}
