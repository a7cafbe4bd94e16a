//! Optimization and observability domain model
//!
//! Agents own skills; optimized skills own clusters; clusters own arms.
//! Every served request produces one log record, which later collects
//! evaluation results that feed arm rewards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Named owner of skills
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    /// Unique per tenant
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }
}

/// An AI-addressable capability belonging to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub name: String,
    /// Whether the optimizer runs for this skill
    #[serde(default)]
    pub optimize: bool,
    /// Max arms per partition; zero disables optimization
    #[serde(default = "Skill::default_configuration_count")]
    pub configuration_count: u32,
    /// Distinct prompts generated per arm family
    #[serde(default = "Skill::default_system_prompt_count")]
    pub system_prompt_count: u32,
    /// Requests between re-cluster attempts
    #[serde(default = "Skill::default_clustering_interval")]
    pub clustering_interval: u64,
    /// Thompson Sampling shaping; 1.0 leaves the posterior unshaped
    #[serde(default = "Skill::default_exploration_temperature")]
    pub exploration_temperature: f64,
    /// Pulls required before an arm is eligible for ranking
    #[serde(default)]
    pub reflection_min_requests_per_arm: u64,
    /// Model pool the arm generator draws from
    #[serde(default)]
    pub models: Vec<String>,
    /// Evaluator methods attached to this skill
    #[serde(default)]
    pub evaluation_methods: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Skill {
    fn default_configuration_count() -> u32 {
        4
    }

    fn default_system_prompt_count() -> u32 {
        2
    }

    fn default_clustering_interval() -> u64 {
        100
    }

    fn default_exploration_temperature() -> f64 {
        1.0
    }

    pub fn new(agent_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            name: name.into(),
            optimize: false,
            configuration_count: Self::default_configuration_count(),
            system_prompt_count: Self::default_system_prompt_count(),
            clustering_interval: Self::default_clustering_interval(),
            exploration_temperature: Self::default_exploration_temperature(),
            reflection_min_requests_per_arm: 0,
            models: Vec::new(),
            evaluation_methods: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Semantic partition of a skill's request population
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub skill_id: Uuid,
    pub name: String,
    /// Fixed-dimension centroid on the unit sphere
    pub centroid: Vec<f32>,
    /// Pulls recorded against this cluster
    pub total_steps: u64,
}

/// Candidate parameter bundle scored by reward updates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm {
    pub id: Uuid,
    pub cluster_id: Uuid,
    pub params: ArmParams,
    pub stats: ArmStats,
}

/// Parameter ranges an arm draws from at materialization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArmParams {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub top_p_min: f64,
    pub top_p_max: f64,
    #[serde(default)]
    pub top_k_min: f64,
    #[serde(default)]
    pub top_k_max: f64,
    pub frequency_penalty_min: f64,
    pub frequency_penalty_max: f64,
    pub presence_penalty_min: f64,
    pub presence_penalty_max: f64,
    /// Reasoning-effort range in [0, 1], mapped to effort buckets
    #[serde(default)]
    pub thinking_min: f64,
    #[serde(default)]
    pub thinking_max: f64,
}

impl ArmParams {
    /// Range sanity: every min at or below its max, bounded fields within
    /// their canonical ranges
    pub fn is_valid(&self) -> bool {
        let ordered = self.temperature_min <= self.temperature_max
            && self.top_p_min <= self.top_p_max
            && self.top_k_min <= self.top_k_max
            && self.frequency_penalty_min <= self.frequency_penalty_max
            && self.presence_penalty_min <= self.presence_penalty_max
            && self.thinking_min <= self.thinking_max;
        let bounded = (0.0..=2.0).contains(&self.temperature_min)
            && self.temperature_max <= 2.0
            && (0.0..=1.0).contains(&self.top_p_min)
            && self.top_p_max <= 1.0
            && (-2.0..=2.0).contains(&self.frequency_penalty_min)
            && self.frequency_penalty_max <= 2.0
            && (-2.0..=2.0).contains(&self.presence_penalty_min)
            && self.presence_penalty_max <= 2.0
            && (0.0..=1.0).contains(&self.thinking_min)
            && self.thinking_max <= 1.0;
        ordered && bounded && !self.model_id.is_empty()
    }
}

/// Running reward statistics for one arm
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ArmStats {
    /// Pull count
    pub n: u64,
    /// Mean reward, total_reward / n
    pub mean: f64,
    /// Running sum of squared rewards, for variance
    pub n2: f64,
    /// Sum of rewards; never exceeds n for rewards in [0, 1]
    pub total_reward: f64,
}

impl ArmStats {
    /// Fold one reward in [0, 1] into the stats
    pub fn record(&mut self, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        self.n += 1;
        self.total_reward += reward;
        self.mean = self.total_reward / self.n as f64;
        self.n2 += reward * reward;
    }

    /// Sample variance of observed rewards; zero below two pulls
    pub fn variance(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        let n = self.n as f64;
        ((self.n2 - n * self.mean * self.mean) / (n - 1.0)).max(0.0)
    }
}

/// Cache outcome reported on the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStatus {
    #[serde(rename = "HIT")]
    Hit,
    #[serde(rename = "MISS")]
    Miss,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl Default for CacheStatus {
    fn default() -> Self {
        Self::NotApplicable
    }
}

/// Outcome of one hook execution, in order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRecord {
    /// Hook identifier from the envelope
    pub id: String,
    /// Whether the hook denied the request
    pub deny_request: bool,
    /// Whether the hook rewrote the body it saw
    pub rewrote_body: bool,
    /// Hook-supplied annotations copied onto the log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    /// Hook failure, when the call itself errored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Result of one evaluator method against one log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Method tag
    pub method: String,
    /// Reward in [0, 1]
    pub score: f64,
    /// Structured extras the method produced
    #[serde(default)]
    pub extras: Map<String, Value>,
    /// Judge model, for LLM-judged methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_model: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One record per served request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arm_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub function_name: String,
    pub method: String,
    /// Canonical request body as served
    pub request_body: Value,
    /// Normalized response body, or the error envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
    pub status: u16,
    pub start_time: DateTime<Utc>,
    /// First streamed token, when the response streamed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_token_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub cache_status: CacheStatus,
    /// Request embedding, when one was computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub input_hooks: Vec<HookRecord>,
    #[serde(default)]
    pub output_hooks: Vec<HookRecord>,
    /// Uniform mean over evaluation scores, once evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_eval_score: Option<f64>,
    #[serde(default)]
    pub evaluations: Vec<EvaluationRecord>,
    /// Pipeline events: dropped parameters, retries, cancellation marker
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Streamed output payload captured for a log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogOutput {
    pub id: Uuid,
    pub log_id: Uuid,
    pub body: Value,
    pub created_at: DateTime<Utc>,
}

/// Control-plane model registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Stored provider credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderApiKey {
    pub id: Uuid,
    pub provider: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Batch evaluation run over a dataset of logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_id: Option<Uuid>,
    pub method: String,
    pub status: EvaluationRunStatus,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub results: Vec<EvaluationRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle of an evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Named set of logs used by batch evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub log_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_mean_within_unit_interval() {
        let mut stats = ArmStats::default();
        stats.record(0.7);
        stats.record(1.0);
        stats.record(0.0);
        assert_eq!(stats.n, 3);
        assert!((stats.mean - 1.7 / 3.0).abs() < 1e-9);
        assert!(stats.mean >= 0.0 && stats.mean <= 1.0);
        assert!(stats.total_reward <= stats.n as f64);
    }

    #[test]
    fn record_bounds_mean_shift_by_reciprocal_n() {
        let mut stats = ArmStats::default();
        for _ in 0..10 {
            stats.record(0.5);
        }
        let before = stats.mean;
        stats.record(1.0);
        let bound = 1.0 / stats.n as f64;
        assert!((stats.mean - before).abs() <= bound + 1e-12);
    }

    #[test]
    fn out_of_range_rewards_clamp() {
        let mut stats = ArmStats::default();
        stats.record(7.0);
        assert_eq!(stats.mean, 1.0);
        assert_eq!(stats.total_reward, 1.0);
    }

    #[test]
    fn cache_status_serializes_to_wire_tags() {
        assert_eq!(serde_json::to_string(&CacheStatus::Hit).unwrap(), "\"HIT\"");
        assert_eq!(
            serde_json::to_string(&CacheStatus::NotApplicable).unwrap(),
            "\"N/A\""
        );
    }

    #[test]
    fn arm_params_validity() {
        let params = ArmParams {
            model_id: "gpt-4o-mini".into(),
            temperature_min: 0.2,
            temperature_max: 0.9,
            top_p_min: 0.5,
            top_p_max: 1.0,
            frequency_penalty_min: 0.0,
            frequency_penalty_max: 0.0,
            presence_penalty_min: 0.0,
            presence_penalty_max: 0.0,
            thinking_min: 0.0,
            thinking_max: 1.0,
            ..Default::default()
        };
        assert!(params.is_valid());

        let inverted = ArmParams {
            temperature_min: 1.5,
            temperature_max: 0.5,
            ..params.clone()
        };
        assert!(!inverted.is_valid());
    }
}
