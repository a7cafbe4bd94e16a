//! Arm generation
//!
//! The arm generator is a collaborator: given a skill and a cluster it
//! proposes up to `configuration_count` parameter-range bundles. The
//! in-crate default fans the skill's model pool into staggered ranges
//! with a small set of prompt templates. Generation failure is
//! recoverable: the skill stays unoptimized until the next attempt.

use async_trait::async_trait;

use crate::core::types::{ArmParams, Cluster, Skill};
use crate::utils::error::{GatewayError, Result};

/// Proposes arms for a cluster
#[async_trait]
pub trait ArmGenerator: Send + Sync {
    async fn generate(&self, skill: &Skill, cluster: &Cluster) -> Result<Vec<ArmParams>>;
}

/// Default generator: staggered sampling bands over the model pool
pub struct DefaultArmGenerator;

const PROMPT_TEMPLATES: &[&str] = &[
    "You are a precise assistant for the {{ team }} team. Answer directly and cite your sources when asked.",
    "You are a helpful assistant. Keep answers short, concrete, and free of speculation.",
    "You are an expert assistant. Think through the request carefully before answering, then answer concisely.",
    "You are a friendly assistant for {{ team }}. Prefer plain language over jargon.",
];

#[async_trait]
impl ArmGenerator for DefaultArmGenerator {
    async fn generate(&self, skill: &Skill, _cluster: &Cluster) -> Result<Vec<ArmParams>> {
        if skill.models.is_empty() {
            return Err(GatewayError::Config(format!(
                "skill {} has no model pool to generate arms from",
                skill.name
            )));
        }

        let count = skill.configuration_count.max(1) as usize;
        let prompt_count = (skill.system_prompt_count.max(1) as usize).min(PROMPT_TEMPLATES.len());

        let arms = (0..count)
            .map(|index| {
                // Stagger temperature bands across arms so early rewards
                // separate the ranges, not just the models
                let band = index as f64 / count as f64;
                let temperature_min = (band * 1.2).min(1.2);
                let temperature_max = (temperature_min + 0.6).min(2.0);

                ArmParams {
                    model_id: skill.models[index % skill.models.len()].clone(),
                    system_prompt: Some(
                        PROMPT_TEMPLATES[index % prompt_count].to_string(),
                    ),
                    temperature_min,
                    temperature_max,
                    top_p_min: 0.7,
                    top_p_max: 1.0,
                    top_k_min: 0.0,
                    top_k_max: 0.0,
                    frequency_penalty_min: 0.0,
                    frequency_penalty_max: 0.5,
                    presence_penalty_min: 0.0,
                    presence_penalty_max: 0.5,
                    thinking_min: 0.0,
                    thinking_max: if index % 2 == 0 { 0.0 } else { 1.0 },
                }
            })
            .collect();

        Ok(arms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn skill(models: Vec<&str>, configuration_count: u32) -> Skill {
        let mut skill = Skill::new(Uuid::new_v4(), "draft");
        skill.models = models.into_iter().map(str::to_string).collect();
        skill.configuration_count = configuration_count;
        skill
    }

    fn cluster(skill: &Skill) -> Cluster {
        Cluster {
            id: Uuid::new_v4(),
            skill_id: skill.id,
            name: "partition-0".into(),
            centroid: vec![1.0, 0.0],
            total_steps: 0,
        }
    }

    #[tokio::test]
    async fn generates_valid_arms_up_to_configuration_count() {
        let skill = skill(vec!["gpt-4o-mini", "claude-3-5-haiku"], 4);
        let arms = DefaultArmGenerator
            .generate(&skill, &cluster(&skill))
            .await
            .unwrap();
        assert_eq!(arms.len(), 4);
        for arm in &arms {
            assert!(arm.is_valid(), "invalid arm: {arm:?}");
        }
        // Model pool cycles
        assert_eq!(arms[0].model_id, "gpt-4o-mini");
        assert_eq!(arms[1].model_id, "claude-3-5-haiku");
    }

    #[tokio::test]
    async fn empty_model_pool_is_a_recoverable_failure() {
        let skill = skill(vec![], 4);
        assert!(
            DefaultArmGenerator
                .generate(&skill, &cluster(&skill))
                .await
                .is_err()
        );
    }
}
