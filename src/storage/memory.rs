//! In-memory storage adapter
//!
//! Backs the default binary and the test suite. Everything lives in
//! concurrent maps; arm stat updates take the arm's map entry exclusively,
//! which serializes updates per arm id.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{StorageConnector, StorageError, StorageResult};
use crate::core::types::{
    Agent, Arm, ArmStats, Cluster, Dataset, EvaluationRun, LogOutput, ModelEntry, ProviderApiKey,
    RequestLog, Skill,
};

/// DashMap-backed storage adapter
#[derive(Default)]
pub struct MemoryStorage {
    agents: DashMap<Uuid, Agent>,
    skills: DashMap<Uuid, Skill>,
    models: DashMap<Uuid, ModelEntry>,
    api_keys: DashMap<Uuid, ProviderApiKey>,
    clusters: DashMap<Uuid, Cluster>,
    arms: DashMap<Uuid, Arm>,
    logs: DashMap<Uuid, RequestLog>,
    log_outputs: DashMap<Uuid, Vec<LogOutput>>,
    evaluation_runs: DashMap<Uuid, EvaluationRun>,
    datasets: DashMap<Uuid, Dataset>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageConnector for MemoryStorage {
    async fn get_agents(&self) -> StorageResult<Vec<Agent>> {
        Ok(self.agents.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn get_agent_by_name(&self, name: &str) -> StorageResult<Agent> {
        self.agents
            .iter()
            .find(|entry| entry.value().name == name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(format!("agent {name}")))
    }

    async fn create_agent(&self, agent: Agent) -> StorageResult<Agent> {
        if self
            .agents
            .iter()
            .any(|entry| entry.value().name == agent.name)
        {
            return Err(StorageError::Conflict(format!(
                "agent {} already exists",
                agent.name
            )));
        }
        self.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn delete_agent(&self, agent_id: Uuid) -> StorageResult<()> {
        self.agents
            .remove(&agent_id)
            .ok_or_else(|| StorageError::NotFound(format!("agent {agent_id}")))?;
        let skill_ids: Vec<Uuid> = self
            .skills
            .iter()
            .filter(|entry| entry.value().agent_id == agent_id)
            .map(|entry| *entry.key())
            .collect();
        for skill_id in skill_ids {
            self.delete_skill(skill_id).await?;
        }
        Ok(())
    }

    async fn get_skills(&self, agent_id: Uuid) -> StorageResult<Vec<Skill>> {
        Ok(self
            .skills
            .iter()
            .filter(|entry| entry.value().agent_id == agent_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_skill_by_name(&self, agent_id: Uuid, name: &str) -> StorageResult<Skill> {
        self.skills
            .iter()
            .find(|entry| entry.value().agent_id == agent_id && entry.value().name == name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(format!("skill {name}")))
    }

    async fn create_skill(&self, skill: Skill) -> StorageResult<Skill> {
        if !self.agents.contains_key(&skill.agent_id) {
            return Err(StorageError::NotFound(format!(
                "agent {}",
                skill.agent_id
            )));
        }
        if self
            .skills
            .iter()
            .any(|entry| entry.value().agent_id == skill.agent_id && entry.value().name == skill.name)
        {
            return Err(StorageError::Conflict(format!(
                "skill {} already exists",
                skill.name
            )));
        }
        self.skills.insert(skill.id, skill.clone());
        Ok(skill)
    }

    async fn update_skill(&self, skill: Skill) -> StorageResult<Skill> {
        if !self.skills.contains_key(&skill.id) {
            return Err(StorageError::NotFound(format!("skill {}", skill.id)));
        }
        self.skills.insert(skill.id, skill.clone());
        Ok(skill)
    }

    async fn delete_skill(&self, skill_id: Uuid) -> StorageResult<()> {
        self.skills
            .remove(&skill_id)
            .ok_or_else(|| StorageError::NotFound(format!("skill {skill_id}")))?;

        // Cascade: clusters, their arms, and evaluation state
        let cluster_ids: Vec<Uuid> = self
            .clusters
            .iter()
            .filter(|entry| entry.value().skill_id == skill_id)
            .map(|entry| *entry.key())
            .collect();
        for cluster_id in &cluster_ids {
            self.clusters.remove(cluster_id);
        }
        self.arms
            .retain(|_, arm| !cluster_ids.contains(&arm.cluster_id));
        self.evaluation_runs
            .retain(|_, run| run.skill_id != Some(skill_id));
        Ok(())
    }

    async fn get_models(&self) -> StorageResult<Vec<ModelEntry>> {
        Ok(self.models.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn create_model(&self, model: ModelEntry) -> StorageResult<ModelEntry> {
        self.models.insert(model.id, model.clone());
        Ok(model)
    }

    async fn get_ai_provider_api_keys(&self) -> StorageResult<Vec<ProviderApiKey>> {
        Ok(self
            .api_keys
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_ai_provider_api_key_by_id(&self, id: Uuid) -> StorageResult<ProviderApiKey> {
        self.api_keys
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(format!("api key {id}")))
    }

    async fn create_ai_provider_api_key(
        &self,
        key: ProviderApiKey,
    ) -> StorageResult<ProviderApiKey> {
        self.api_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn get_skill_optimization_clusters(
        &self,
        skill_id: Uuid,
    ) -> StorageResult<Vec<Cluster>> {
        Ok(self
            .clusters
            .iter()
            .filter(|entry| entry.value().skill_id == skill_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create_skill_optimization_clusters(
        &self,
        clusters: Vec<Cluster>,
    ) -> StorageResult<Vec<Cluster>> {
        for cluster in &clusters {
            if !self.skills.contains_key(&cluster.skill_id) {
                return Err(StorageError::NotFound(format!(
                    "skill {}",
                    cluster.skill_id
                )));
            }
            self.clusters.insert(cluster.id, cluster.clone());
        }
        Ok(clusters)
    }

    async fn update_skill_optimization_cluster(&self, cluster: Cluster) -> StorageResult<Cluster> {
        if !self.clusters.contains_key(&cluster.id) {
            return Err(StorageError::NotFound(format!("cluster {}", cluster.id)));
        }
        self.clusters.insert(cluster.id, cluster.clone());
        Ok(cluster)
    }

    async fn get_skill_optimization_arms(&self, cluster_id: Uuid) -> StorageResult<Vec<Arm>> {
        Ok(self
            .arms
            .iter()
            .filter(|entry| entry.value().cluster_id == cluster_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create_skill_optimization_arms(&self, arms: Vec<Arm>) -> StorageResult<Vec<Arm>> {
        for arm in &arms {
            if !self.clusters.contains_key(&arm.cluster_id) {
                return Err(StorageError::NotFound(format!(
                    "cluster {}",
                    arm.cluster_id
                )));
            }
            self.arms.insert(arm.id, arm.clone());
        }
        Ok(arms)
    }

    async fn update_skill_optimization_arm_stats(
        &self,
        arm_id: Uuid,
        reward: f64,
    ) -> StorageResult<ArmStats> {
        // get_mut holds the shard lock for the arm, serializing updates
        let mut arm = self
            .arms
            .get_mut(&arm_id)
            .ok_or_else(|| StorageError::NotFound(format!("arm {arm_id}")))?;
        arm.stats.record(reward);
        Ok(arm.stats)
    }

    async fn reassign_skill_optimization_arm(
        &self,
        arm_id: Uuid,
        cluster_id: Uuid,
    ) -> StorageResult<()> {
        if !self.clusters.contains_key(&cluster_id) {
            return Err(StorageError::NotFound(format!("cluster {cluster_id}")));
        }
        let mut arm = self
            .arms
            .get_mut(&arm_id)
            .ok_or_else(|| StorageError::NotFound(format!("arm {arm_id}")))?;
        arm.cluster_id = cluster_id;
        Ok(())
    }

    async fn create_log(&self, log: RequestLog) -> StorageResult<RequestLog> {
        self.logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn update_log(&self, log: RequestLog) -> StorageResult<RequestLog> {
        if !self.logs.contains_key(&log.id) {
            return Err(StorageError::NotFound(format!("log {}", log.id)));
        }
        self.logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn get_log(&self, log_id: Uuid) -> StorageResult<RequestLog> {
        self.logs
            .get(&log_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(format!("log {log_id}")))
    }

    async fn get_logs(
        &self,
        skill_id: Option<Uuid>,
        limit: usize,
    ) -> StorageResult<Vec<RequestLog>> {
        let mut logs: Vec<RequestLog> = self
            .logs
            .iter()
            .filter(|entry| skill_id.is_none() || entry.value().skill_id == skill_id)
            .map(|entry| entry.value().clone())
            .collect();
        logs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        logs.truncate(limit);
        Ok(logs)
    }

    async fn annotate_log(
        &self,
        log_id: Uuid,
        metadata: Map<String, Value>,
    ) -> StorageResult<()> {
        let mut log = self
            .logs
            .get_mut(&log_id)
            .ok_or_else(|| StorageError::NotFound(format!("log {log_id}")))?;
        for (key, value) in metadata {
            log.metadata.insert(key, value);
        }
        Ok(())
    }

    async fn get_log_outputs(&self, log_id: Uuid) -> StorageResult<Vec<LogOutput>> {
        Ok(self
            .log_outputs
            .get(&log_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn create_log_output(&self, output: LogOutput) -> StorageResult<LogOutput> {
        self.log_outputs
            .entry(output.log_id)
            .or_default()
            .push(output.clone());
        Ok(output)
    }

    async fn get_evaluation_runs(&self) -> StorageResult<Vec<EvaluationRun>> {
        Ok(self
            .evaluation_runs
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create_evaluation_run(&self, run: EvaluationRun) -> StorageResult<EvaluationRun> {
        self.evaluation_runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn update_evaluation_run(&self, run: EvaluationRun) -> StorageResult<EvaluationRun> {
        if !self.evaluation_runs.contains_key(&run.id) {
            return Err(StorageError::NotFound(format!("evaluation run {}", run.id)));
        }
        self.evaluation_runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_datasets(&self) -> StorageResult<Vec<Dataset>> {
        Ok(self
            .datasets
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_dataset_logs(&self, dataset_id: Uuid) -> StorageResult<Vec<RequestLog>> {
        let dataset = self
            .datasets
            .get(&dataset_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(format!("dataset {dataset_id}")))?;
        Ok(dataset
            .log_ids
            .iter()
            .filter_map(|log_id| self.logs.get(log_id).map(|entry| entry.value().clone()))
            .collect())
    }
}
