//! Evaluator registry
//!
//! Pluggable reward functions over completed logs. Each method exposes
//! static details, a validated parameter set, and `evaluate_log`; the
//! resulting scores average uniformly into the arm reward. LLM-judged
//! methods call back through the gateway via [`JudgeClient`].

mod judge;
mod latency;

pub use judge::{JUDGE_METHODS, LlmJudge, parse_judge_envelope};
pub use latency::LatencyEvaluator;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::core::types::{EvaluationRecord, RequestLog};
use crate::utils::error::{GatewayError, Result};

/// Static identity of an evaluator method
#[derive(Debug, Clone, Serialize)]
pub struct MethodDetails {
    pub tag: &'static str,
    pub label: &'static str,
    pub description: &'static str,
}

/// Validated evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationParams {
    /// Passing score threshold
    #[serde(default = "EvaluationParams::default_threshold")]
    pub threshold: f64,
    /// Judge model for LLM-judged methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_model: Option<String>,
    /// Judge sampling temperature
    #[serde(default)]
    pub temperature: f64,
    /// Attach reasoning and prompts to the extras
    #[serde(default)]
    pub verbose: bool,
    /// Collapse partial credit: any score below 1 becomes 0
    #[serde(default)]
    pub strict_mode: bool,
    /// Latency at or under this scores 1.0
    #[serde(default = "EvaluationParams::default_target_latency_ms")]
    pub target_latency_ms: u64,
    /// Latency at or over this scores 0.0
    #[serde(default = "EvaluationParams::default_max_latency_ms")]
    pub max_latency_ms: u64,
}

impl EvaluationParams {
    fn default_threshold() -> f64 {
        0.5
    }

    fn default_target_latency_ms() -> u64 {
        1_000
    }

    fn default_max_latency_ms() -> u64 {
        10_000
    }

    /// Parse and validate a raw parameter map
    pub fn parse(raw: &Map<String, Value>) -> Result<Self> {
        let params: Self = serde_json::from_value(Value::Object(raw.clone()))?;
        if !(0.0..=1.0).contains(&params.threshold) {
            return Err(GatewayError::invalid_param(
                "threshold",
                "threshold must be between 0 and 1",
            ));
        }
        if params.max_latency_ms <= params.target_latency_ms {
            return Err(GatewayError::invalid_param(
                "max_latency_ms",
                "max_latency_ms must exceed target_latency_ms",
            ));
        }
        Ok(params)
    }
}

impl Default for EvaluationParams {
    fn default() -> Self {
        Self {
            threshold: Self::default_threshold(),
            judge_model: None,
            temperature: 0.0,
            verbose: false,
            strict_mode: false,
            target_latency_ms: Self::default_target_latency_ms(),
            max_latency_ms: Self::default_max_latency_ms(),
        }
    }
}

/// What one evaluation produced
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    /// Reward in [0, 1]
    pub score: f64,
    /// Structured method output
    pub extras: Map<String, Value>,
    /// Human-readable summary lines
    pub display_info: Vec<String>,
    /// Judge model, when one was consulted
    pub judge_model: Option<String>,
}

/// Reentrant path back into the gateway for LLM-judged methods
#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Run one judge completion and return the assistant text
    async fn complete(&self, judge_model: &str, system: &str, user: &str) -> Result<String>;
}

/// One evaluator method
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn details(&self) -> MethodDetails;

    /// Score a completed log; pure with respect to the log
    async fn evaluate_log(
        &self,
        params: &EvaluationParams,
        log: &RequestLog,
        judge: &dyn JudgeClient,
    ) -> Result<EvaluationOutcome>;
}

/// Process-wide evaluator registry, read-only after startup
pub struct EvaluatorRegistry {
    methods: HashMap<&'static str, Arc<dyn Evaluator>>,
}

impl EvaluatorRegistry {
    fn build() -> Self {
        let mut methods: HashMap<&'static str, Arc<dyn Evaluator>> = HashMap::new();
        methods.insert("latency", Arc::new(LatencyEvaluator));
        for method in JUDGE_METHODS {
            methods.insert(method.details.tag, Arc::new(method.clone()));
        }
        Self { methods }
    }

    /// Resolve a method tag
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn Evaluator>> {
        self.methods
            .get(tag)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidMethod(tag.to_string()))
    }

    /// Registered method tags, sorted
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = self.methods.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Method details for the control plane listing
    pub fn details(&self) -> Vec<MethodDetails> {
        let mut details: Vec<MethodDetails> =
            self.methods.values().map(|method| method.details()).collect();
        details.sort_by_key(|d| d.tag);
        details
    }
}

static REGISTRY: Lazy<EvaluatorRegistry> = Lazy::new(EvaluatorRegistry::build);

/// The process-wide registry
pub fn registry() -> &'static EvaluatorRegistry {
    &REGISTRY
}

/// Run the named methods over a log, collecting records
///
/// Method failures are logged and skipped; the reward is the uniform
/// mean over the scores that completed.
pub async fn evaluate_log_with_methods(
    methods: &[String],
    params: &EvaluationParams,
    log: &RequestLog,
    judge: &dyn JudgeClient,
) -> Vec<EvaluationRecord> {
    let mut records = Vec::with_capacity(methods.len());
    for tag in methods {
        let evaluator = match registry().resolve(tag) {
            Ok(evaluator) => evaluator,
            Err(e) => {
                warn!(method = %tag, error = %e, "unknown evaluation method");
                continue;
            }
        };
        match evaluator.evaluate_log(params, log, judge).await {
            Ok(outcome) => records.push(EvaluationRecord {
                method: tag.clone(),
                score: outcome.score.clamp(0.0, 1.0),
                extras: outcome.extras,
                judge_model: outcome.judge_model,
                created_at: Utc::now(),
            }),
            Err(e) => {
                warn!(method = %tag, error = %e, "evaluation failed");
            }
        }
    }
    records
}

/// Uniform mean over evaluation scores; `None` when empty
pub fn average_score(records: &[EvaluationRecord]) -> Option<f64> {
    if records.is_empty() {
        return None;
    }
    Some(records.iter().map(|record| record.score).sum::<f64>() / records.len() as f64)
}
