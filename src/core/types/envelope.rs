//! Per-request control envelope
//!
//! Parsed from the `x-idk-config` header (or the body-embedded
//! `idk_config` field) by the configuration injector middleware. The
//! envelope names the targets, the strategy walking them, hooks, cache
//! behavior, and optimization bindings for one request.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::requests::ReasoningEffort;
use crate::utils::error::{GatewayError, Result};

/// The per-request control envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Agent name the request binds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Skill name within the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    /// Ordered provider bindings
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Policy for walking the targets
    #[serde(default)]
    pub strategy: Strategy,
    /// Hooks run against the inbound body, in order
    #[serde(default)]
    pub input_hooks: Vec<HookSpec>,
    /// Hooks run against the outbound body, in order
    #[serde(default)]
    pub output_hooks: Vec<HookSpec>,
    /// Trace identifier propagated onto the log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Span identifier propagated onto the log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// Free-form parameter overrides applied after materialization
    #[serde(default)]
    pub override_params: Map<String, Value>,
    /// Bypass cache lookup but still write the entry
    #[serde(default)]
    pub force_refresh: bool,
    /// Reject, rather than drop, parameters the target cannot express
    #[serde(default)]
    pub strict_compliance: bool,
    /// Cache behavior for this request (per-target settings take priority)
    #[serde(default)]
    pub cache: CacheSettings,
    /// Upstream deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    /// Values substituted into optimizer prompt templates
    #[serde(default)]
    pub system_prompt_variables: HashMap<String, String>,
    /// When set, only these variables may be substituted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_prompt_variables: Option<Vec<String>>,
    /// Caller metadata copied onto the log
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RequestConfig {
    /// Validate strategy and per-target constraints
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(GatewayError::bad_request(
                "config requires at least one target",
            ));
        }

        match self.strategy.mode {
            StrategyMode::Conditional => {
                if self.strategy.conditions.is_empty() {
                    return Err(GatewayError::bad_request(
                        "conditional strategy requires conditions",
                    ));
                }
                for condition in &self.strategy.conditions {
                    if condition.target >= self.targets.len() {
                        return Err(GatewayError::bad_request(format!(
                            "condition targets index {} but only {} targets are configured",
                            condition.target,
                            self.targets.len()
                        )));
                    }
                }
                if let Some(default) = self.strategy.default {
                    if default >= self.targets.len() {
                        return Err(GatewayError::bad_request(
                            "conditional default target out of range",
                        ));
                    }
                }
            }
            StrategyMode::Loadbalance => {
                let weighted = self
                    .targets
                    .iter()
                    .any(|t| t.weight.unwrap_or(0.0) > 0.0);
                if !weighted {
                    return Err(GatewayError::bad_request(
                        "loadbalance strategy requires at least one weighted target",
                    ));
                }
            }
            StrategyMode::Single | StrategyMode::Fallback => {}
        }

        for (index, target) in self.targets.iter().enumerate() {
            if target.provider.is_empty() {
                return Err(GatewayError::bad_request(format!(
                    "target {index} is missing a provider tag"
                )));
            }
            if let Some(configuration) = &target.configuration {
                configuration.validate()?;
            }
        }

        Ok(())
    }
}

/// One provider binding attempted by the strategy engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Provider tag, resolved against the dialect registry
    pub provider: String,
    /// Credential for the upstream; some dialects run without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Stored credential reference, resolved through the connector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,
    /// Custom upstream host replacing the dialect default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_host: Option<String>,
    /// Weight for the loadbalance strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Per-target retry policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Per-target cache override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSettings>,
    /// Provider-specific routing overrides
    #[serde(default)]
    pub overrides: TargetOverrides,
    /// Resolved parameter bundle for this attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<TargetConfiguration>,
}

/// Provider-specific routing overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_resource_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_deployment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Resolved parameter bundle used against one upstream for one attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfiguration {
    /// Provider tag the bundle was resolved for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt prepended to the history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Temperature in [0, 2]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Top-p in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Frequency penalty in [-2, 2]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Presence penalty in [-2, 2]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Additional free-form params written into the body
    #[serde(default)]
    pub additional_params: Map<String, Value>,
}

impl TargetConfiguration {
    /// Range-check every bounded field
    pub fn validate(&self) -> Result<()> {
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(GatewayError::invalid_param(
                    "temperature",
                    "temperature must be between 0 and 2",
                ));
            }
        }
        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(GatewayError::invalid_param(
                    "top_p",
                    "top_p must be between 0 and 1",
                ));
            }
        }
        for (name, value) in [
            ("frequency_penalty", self.frequency_penalty),
            ("presence_penalty", self.presence_penalty),
        ] {
            if let Some(penalty) = value {
                if !(-2.0..=2.0).contains(&penalty) {
                    return Err(GatewayError::invalid_param(
                        name,
                        format!("{name} must be between -2 and 2"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Strategy for walking targets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Strategy {
    /// Walk mode
    #[serde(default)]
    pub mode: StrategyMode,
    /// Statuses that advance the walk; defaults to 408, 429 and 5xx
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_status_codes: Option<Vec<u16>>,
    /// Ordered predicates for the conditional mode
    #[serde(default)]
    pub conditions: Vec<ConditionalRoute>,
    /// Target used when no condition matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<usize>,
}

impl Strategy {
    /// Whether the given status advances the strategy walk
    pub fn should_advance(&self, status: u16) -> bool {
        match &self.on_status_codes {
            Some(codes) => codes.contains(&status),
            None => status == 408 || status == 429 || (500..=599).contains(&status),
        }
    }
}

/// Strategy walk modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    /// First target only, no fallback
    #[default]
    Single,
    /// Targets in order while the last status gates
    Fallback,
    /// Weighted draw, redraw excluding tried targets on failure
    Loadbalance,
    /// Declarative predicate routing over the request body
    Conditional,
}

/// One conditional route: dotted-path predicates against the body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalRoute {
    /// Map of dotted path to expected value (or `$eq`/`$in`/`$contains`
    /// operator object); all entries must match
    pub query: Map<String, Value>,
    /// Index into the target list
    pub target: usize,
}

/// Per-target retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry attempts after the initial call
    #[serde(default)]
    pub attempts: u32,
    /// Statuses that re-enter the retry loop
    #[serde(default = "RetryPolicy::default_status_codes")]
    pub on_status_codes: Vec<u16>,
    /// Honor the upstream `Retry-After` header when present
    #[serde(default)]
    pub use_retry_after_header: bool,
}

impl RetryPolicy {
    fn default_status_codes() -> Vec<u16> {
        vec![408, 429, 500, 502, 503, 504]
    }

    pub fn retries_on(&self, status: u16) -> bool {
        self.on_status_codes.contains(&status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            on_status_codes: Self::default_status_codes(),
            use_retry_after_header: false,
        }
    }
}

/// Cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Cache mode
    #[serde(default)]
    pub mode: CacheMode,
    /// Entry time-to-live in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// Reject entries older than this many seconds even within TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
    /// Cosine similarity threshold for the semantic mode
    #[serde(default = "CacheSettings::default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl CacheSettings {
    fn default_similarity_threshold() -> f32 {
        0.95
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            mode: CacheMode::Disabled,
            ttl_secs: None,
            max_age_secs: None,
            similarity_threshold: Self::default_similarity_threshold(),
        }
    }
}

/// Cache modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Bypass the cache entirely
    #[default]
    Disabled,
    /// Exact fingerprint match
    Simple,
    /// Embedding bucket plus exact fingerprint
    Semantic,
}

/// Declarative hook reference in the envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSpec {
    /// Hook identifier reported in the hook log
    pub id: String,
    /// Webhook URL; absent for built-in hooks resolved by id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra headers sent with the webhook call
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Hook call timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Free-form hook parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}
