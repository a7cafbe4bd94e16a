//! Adaptive optimizer
//!
//! Embedding-clustered multi-armed bandit per skill: requests land in the
//! nearest partition, Thompson Sampling picks an arm, and the arm's
//! ranges materialize into a concrete target configuration. Evaluator
//! rewards flow back into the arm stats.

mod clusters;
mod generator;
mod prompts;
mod thompson;

pub use clusters::{initial_centroids, kmeans_step, nearest_cluster};
pub use generator::{ArmGenerator, DefaultArmGenerator};
pub use prompts::render_prompt;
pub use thompson::{sample_posterior, select_arm, shaped_beta_params};

use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::types::{
    Arm, ArmParams, ArmStats, Cluster, ReasoningEffort, Skill, TargetConfiguration,
};
use crate::storage::StorageConnector;
use crate::utils::error::Result;

/// Reasoning-effort buckets: a uniform draw over the arm's thinking range
/// maps through ten equal bins
const EFFORT_BUCKETS: [Option<ReasoningEffort>; 10] = [
    None,
    None,
    Some(ReasoningEffort::Minimal),
    Some(ReasoningEffort::Minimal),
    Some(ReasoningEffort::Low),
    Some(ReasoningEffort::Low),
    Some(ReasoningEffort::Medium),
    Some(ReasoningEffort::Medium),
    Some(ReasoningEffort::High),
    Some(ReasoningEffort::High),
];

/// The arm chosen for one request
#[derive(Debug, Clone)]
pub struct ArmSelection {
    pub cluster_id: Uuid,
    pub arm_id: Uuid,
    pub configuration: TargetConfiguration,
}

/// Per-skill bandit orchestration over the storage connector
pub struct Optimizer {
    storage: Arc<dyn StorageConnector>,
    generator: Arc<dyn ArmGenerator>,
}

impl Optimizer {
    pub fn new(storage: Arc<dyn StorageConnector>, generator: Arc<dyn ArmGenerator>) -> Self {
        Self { storage, generator }
    }

    /// Pick cluster and arm for a request, materializing the arm's ranges
    ///
    /// Returns `None` whenever optimization cannot proceed (disabled
    /// skill, zero configuration count, dimension mismatch, generation
    /// failure); the pipeline then falls back to the caller-supplied
    /// provider and model.
    pub async fn select(
        &self,
        skill: &Skill,
        embedding: &[f32],
        prompt_variables: &HashMap<String, String>,
        allowed_variables: Option<&[String]>,
    ) -> Result<Option<ArmSelection>> {
        if !skill.optimize || skill.configuration_count == 0 || embedding.is_empty() {
            return Ok(None);
        }

        let clusters = self.ensure_clusters(skill, embedding.len()).await?;
        if clusters
            .iter()
            .any(|cluster| cluster.centroid.len() != embedding.len())
        {
            warn!(
                skill = %skill.name,
                "embedding dimension changed; skipping optimization"
            );
            return Ok(None);
        }

        let Some(cluster) = nearest_cluster(&clusters, embedding) else {
            return Ok(None);
        };

        let arms = match self.ensure_arms(skill, cluster).await? {
            Some(arms) => arms,
            None => return Ok(None),
        };

        let selection = {
            let mut rng = rand::thread_rng();
            let Some(arm) = select_arm(&arms, skill.exploration_temperature, &mut rng) else {
                return Ok(None);
            };
            debug!(skill = %skill.name, cluster = %cluster.name, arm = %arm.id, "arm selected");

            let configuration = materialize_configuration(
                &arm.params,
                prompt_variables,
                allowed_variables,
                &mut rng,
            );

            ArmSelection {
                cluster_id: cluster.id,
                arm_id: arm.id,
                configuration,
            }
        };

        self.record_pull(skill, cluster, &clusters).await?;
        Ok(Some(selection))
    }

    /// Fold one evaluator reward into an arm; atomic per arm id
    pub async fn record_reward(&self, arm_id: Uuid, reward: f64) -> Result<ArmStats> {
        let stats = self
            .storage
            .update_skill_optimization_arm_stats(arm_id, reward)
            .await?;
        debug!(%arm_id, reward, n = stats.n, mean = stats.mean, "arm reward recorded");
        Ok(stats)
    }

    /// Existing clusters, or freshly seeded ones on first use
    async fn ensure_clusters(&self, skill: &Skill, dimension: usize) -> Result<Vec<Cluster>> {
        let existing = self
            .storage
            .get_skill_optimization_clusters(skill.id)
            .await?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let centroids = initial_centroids(skill.configuration_count as usize, dimension);
        let clusters: Vec<Cluster> = centroids
            .into_iter()
            .enumerate()
            .map(|(index, centroid)| Cluster {
                id: Uuid::new_v4(),
                skill_id: skill.id,
                name: format!("partition-{index}"),
                centroid,
                total_steps: 0,
            })
            .collect();
        info!(skill = %skill.name, count = clusters.len(), "seeded optimization clusters");
        Ok(self
            .storage
            .create_skill_optimization_clusters(clusters)
            .await?)
    }

    /// Existing arms, or generated ones on a cluster's first use
    ///
    /// `None` when generation failed; the skill stays unoptimized until
    /// the next attempt.
    async fn ensure_arms(&self, skill: &Skill, cluster: &Cluster) -> Result<Option<Vec<Arm>>> {
        let existing = self
            .storage
            .get_skill_optimization_arms(cluster.id)
            .await?;
        if !existing.is_empty() {
            return Ok(Some(existing));
        }

        let params = match self.generator.generate(skill, cluster).await {
            Ok(params) => params,
            Err(e) => {
                warn!(skill = %skill.name, error = %e, "arm generation failed");
                return Ok(None);
            }
        };

        let arms: Vec<Arm> = params
            .into_iter()
            .filter(|params| params.is_valid())
            .take(skill.configuration_count as usize)
            .map(|params| Arm {
                id: Uuid::new_v4(),
                cluster_id: cluster.id,
                params,
                stats: ArmStats::default(),
            })
            .collect();

        if arms.is_empty() {
            warn!(skill = %skill.name, "arm generator proposed no valid arms");
            return Ok(None);
        }

        info!(skill = %skill.name, cluster = %cluster.name, count = arms.len(), "arms generated");
        Ok(Some(
            self.storage.create_skill_optimization_arms(arms).await?,
        ))
    }

    /// Count the pull and re-cluster on the configured interval
    async fn record_pull(
        &self,
        skill: &Skill,
        cluster: &Cluster,
        clusters: &[Cluster],
    ) -> Result<()> {
        let mut updated = cluster.clone();
        updated.total_steps += 1;
        let steps = updated.total_steps;
        self.storage
            .update_skill_optimization_cluster(updated)
            .await?;

        if skill.clustering_interval > 0 && steps % skill.clustering_interval == 0 {
            self.recluster(skill, clusters).await?;
        }
        Ok(())
    }

    /// One streaming k-means step over recent request embeddings, with
    /// arms reassigned to the nearest updated centroid
    async fn recluster(&self, skill: &Skill, clusters: &[Cluster]) -> Result<()> {
        let logs = self.storage.get_logs(Some(skill.id), 200).await?;
        let embeddings: Vec<Vec<f32>> = logs
            .into_iter()
            .filter_map(|log| log.embedding)
            .collect();
        if embeddings.is_empty() {
            return Ok(());
        }

        let old_centroids: Vec<Vec<f32>> =
            clusters.iter().map(|c| c.centroid.clone()).collect();
        let new_centroids = kmeans_step(&old_centroids, &embeddings);

        for (cluster, centroid) in clusters.iter().zip(new_centroids.iter()) {
            let mut updated = cluster.clone();
            updated.centroid = centroid.clone();
            self.storage
                .update_skill_optimization_cluster(updated)
                .await?;
        }

        // Arms follow their population: each old cluster's arms move to
        // the cluster whose new centroid sits nearest the old one
        for (index, cluster) in clusters.iter().enumerate() {
            let nearest = new_centroids
                .iter()
                .enumerate()
                .map(|(candidate, centroid)| {
                    (
                        candidate,
                        crate::core::cache::cosine_similarity(centroid, &old_centroids[index]),
                    )
                })
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(candidate, _)| candidate)
                .unwrap_or(index);

            if nearest != index {
                let arms = self
                    .storage
                    .get_skill_optimization_arms(cluster.id)
                    .await?;
                for arm in arms {
                    self.storage
                        .reassign_skill_optimization_arm(arm.id, clusters[nearest].id)
                        .await?;
                }
            }
        }

        info!(skill = %skill.name, "re-clustered optimization partitions");
        Ok(())
    }
}

/// Draw a concrete configuration from an arm's parameter ranges
pub fn materialize_configuration<R: Rng + ?Sized>(
    params: &ArmParams,
    prompt_variables: &HashMap<String, String>,
    allowed_variables: Option<&[String]>,
    rng: &mut R,
) -> TargetConfiguration {
    let mut configuration = TargetConfiguration {
        model: Some(params.model_id.clone()),
        system_prompt: params.system_prompt.as_ref().map(|template| {
            render_prompt(template, prompt_variables, allowed_variables)
        }),
        temperature: Some(draw(rng, params.temperature_min, params.temperature_max)),
        top_p: Some(draw(rng, params.top_p_min, params.top_p_max)),
        frequency_penalty: Some(draw(
            rng,
            params.frequency_penalty_min,
            params.frequency_penalty_max,
        )),
        presence_penalty: Some(draw(
            rng,
            params.presence_penalty_min,
            params.presence_penalty_max,
        )),
        reasoning_effort: effort_from_range(rng, params.thinking_min, params.thinking_max),
        ..Default::default()
    };

    if params.top_k_max > 0.0 {
        let top_k = draw(rng, params.top_k_min, params.top_k_max).round() as u64;
        configuration
            .additional_params
            .insert("top_k".to_string(), json!(top_k));
    }

    configuration
}

fn draw<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    if max > min {
        rng.gen_range(min..=max)
    } else {
        min
    }
}

/// Map a uniform draw over `[min, max] ⊆ [0, 1]` through the ten effort
/// bins
fn effort_from_range<R: Rng + ?Sized>(
    rng: &mut R,
    min: f64,
    max: f64,
) -> Option<ReasoningEffort> {
    let value = draw(rng, min.clamp(0.0, 1.0), max.clamp(0.0, 1.0));
    let bin = ((value * 10.0).floor() as usize).min(EFFORT_BUCKETS.len() - 1);
    EFFORT_BUCKETS[bin]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Agent;
    use crate::storage::MemoryStorage;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ranged_params() -> ArmParams {
        ArmParams {
            model_id: "gpt-4o-mini".into(),
            system_prompt: Some("Help the {{ team }} team.".into()),
            temperature_min: 0.2,
            temperature_max: 0.8,
            top_p_min: 0.9,
            top_p_max: 1.0,
            top_k_min: 10.0,
            top_k_max: 40.0,
            frequency_penalty_min: 0.0,
            frequency_penalty_max: 0.0,
            presence_penalty_min: 0.0,
            presence_penalty_max: 0.0,
            thinking_min: 0.0,
            thinking_max: 1.0,
        }
    }

    #[test]
    fn materialization_stays_inside_ranges() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut variables = HashMap::new();
        variables.insert("team".to_string(), "billing".to_string());

        for _ in 0..200 {
            let configuration =
                materialize_configuration(&ranged_params(), &variables, None, &mut rng);
            let temperature = configuration.temperature.unwrap();
            assert!((0.2..=0.8).contains(&temperature));
            let top_p = configuration.top_p.unwrap();
            assert!((0.9..=1.0).contains(&top_p));
            let top_k = configuration.additional_params["top_k"].as_u64().unwrap();
            assert!((10..=40).contains(&top_k));
            assert_eq!(
                configuration.system_prompt.as_deref(),
                Some("Help the billing team.")
            );
        }
    }

    #[test]
    fn effort_bins_cover_the_ladder() {
        let mut rng = StdRng::seed_from_u64(9);
        // Degenerate ranges pin the draw and thus the bin
        assert_eq!(effort_from_range(&mut rng, 0.0, 0.0), None);
        assert_eq!(
            effort_from_range(&mut rng, 0.25, 0.25),
            Some(ReasoningEffort::Minimal)
        );
        assert_eq!(
            effort_from_range(&mut rng, 0.45, 0.45),
            Some(ReasoningEffort::Low)
        );
        assert_eq!(
            effort_from_range(&mut rng, 0.65, 0.65),
            Some(ReasoningEffort::Medium)
        );
        assert_eq!(
            effort_from_range(&mut rng, 0.95, 0.95),
            Some(ReasoningEffort::High)
        );
        // The top edge folds into the last bin
        assert_eq!(
            effort_from_range(&mut rng, 1.0, 1.0),
            Some(ReasoningEffort::High)
        );
    }

    async fn optimizing_skill(storage: &MemoryStorage) -> Skill {
        let agent = Agent::new("agent");
        storage.create_agent(agent.clone()).await.unwrap();
        let mut skill = Skill::new(agent.id, "draft");
        skill.optimize = true;
        skill.configuration_count = 3;
        skill.models = vec!["gpt-4o-mini".into()];
        storage.create_skill(skill.clone()).await.unwrap()
    }

    #[tokio::test]
    async fn first_request_seeds_clusters_and_arms() {
        let storage = Arc::new(MemoryStorage::new());
        let skill = optimizing_skill(&storage).await;
        let optimizer = Optimizer::new(storage.clone(), Arc::new(DefaultArmGenerator));

        let embedding = vec![0.6f32, 0.8];
        let selection = optimizer
            .select(&skill, &embedding, &HashMap::new(), None)
            .await
            .unwrap()
            .expect("selection");

        let clusters = storage
            .get_skill_optimization_clusters(skill.id)
            .await
            .unwrap();
        assert_eq!(clusters.len(), 3);
        let arms = storage
            .get_skill_optimization_arms(selection.cluster_id)
            .await
            .unwrap();
        assert_eq!(arms.len(), 3);
        assert!(selection.configuration.model.is_some());

        // The pull was counted on the serving cluster
        let served = clusters
            .iter()
            .find(|cluster| cluster.id == selection.cluster_id)
            .unwrap();
        assert_eq!(served.total_steps, 1);
    }

    #[tokio::test]
    async fn zero_configuration_count_disables_optimization() {
        let storage = Arc::new(MemoryStorage::new());
        let mut skill = optimizing_skill(&storage).await;
        skill.configuration_count = 0;
        let optimizer = Optimizer::new(storage, Arc::new(DefaultArmGenerator));
        let selection = optimizer
            .select(&skill, &[1.0, 0.0], &HashMap::new(), None)
            .await
            .unwrap();
        assert!(selection.is_none());
    }

    #[tokio::test]
    async fn generation_failure_falls_back_cleanly() {
        let storage = Arc::new(MemoryStorage::new());
        let mut skill = optimizing_skill(&storage).await;
        skill.models.clear();
        storage.update_skill(skill.clone()).await.unwrap();
        let optimizer = Optimizer::new(storage, Arc::new(DefaultArmGenerator));
        let selection = optimizer
            .select(&skill, &[1.0, 0.0], &HashMap::new(), None)
            .await
            .unwrap();
        assert!(selection.is_none());
    }

    #[tokio::test]
    async fn rewards_update_arm_stats() {
        let storage = Arc::new(MemoryStorage::new());
        let skill = optimizing_skill(&storage).await;
        let optimizer = Optimizer::new(storage.clone(), Arc::new(DefaultArmGenerator));
        let selection = optimizer
            .select(&skill, &[0.0, 1.0], &HashMap::new(), None)
            .await
            .unwrap()
            .unwrap();

        let stats = optimizer.record_reward(selection.arm_id, 0.9).await.unwrap();
        assert_eq!(stats.n, 1);
        assert!((stats.mean - 0.9).abs() < 1e-9);
    }
}
