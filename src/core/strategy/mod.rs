//! Strategy engine
//!
//! Turns the envelope's target list and strategy mode into an attempt
//! sequence. Fallback and loadbalance advance on gated statuses; the
//! conditional mode routes once by declarative predicate. Per-target
//! retries are a separate loop inside each attempt (see [`retry`]).

mod conditions;
pub mod retry;

pub use conditions::query_matches;

use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::core::types::{RequestConfig, StrategyMode};
use crate::utils::error::{GatewayError, Result};

/// Stateful walk over the configured targets for one request
pub struct TargetWalk {
    mode: StrategyMode,
    target_count: usize,
    weights: Vec<f64>,
    tried: Vec<usize>,
    /// Conditional mode resolves to exactly one target
    resolved: Option<usize>,
    started: bool,
    advance_codes: AdvanceCodes,
}

enum AdvanceCodes {
    Default,
    Explicit(Vec<u16>),
}

impl AdvanceCodes {
    fn gates(&self, status: u16) -> bool {
        match self {
            Self::Default => status == 408 || status == 429 || (500..=599).contains(&status),
            Self::Explicit(codes) => codes.contains(&status),
        }
    }
}

/// Build the walk for a request
///
/// The conditional mode evaluates its predicates against the canonical
/// body here; the first matching condition wins, else the declared
/// default, else the first target.
pub fn plan(config: &RequestConfig, canonical_body: &Value) -> Result<TargetWalk> {
    if config.targets.is_empty() {
        return Err(GatewayError::bad_request(
            "config requires at least one target",
        ));
    }

    let resolved = match config.strategy.mode {
        StrategyMode::Conditional => {
            let index = config
                .strategy
                .conditions
                .iter()
                .find(|condition| query_matches(&condition.query, canonical_body))
                .map(|condition| condition.target)
                .or(config.strategy.default)
                .unwrap_or(0);
            if index >= config.targets.len() {
                return Err(GatewayError::bad_request(
                    "conditional route targets an index out of range",
                ));
            }
            debug!(target = index, "conditional strategy resolved");
            Some(index)
        }
        _ => None,
    };

    Ok(TargetWalk {
        mode: config.strategy.mode,
        target_count: config.targets.len(),
        weights: config
            .targets
            .iter()
            .map(|target| target.weight.unwrap_or(0.0))
            .collect(),
        tried: Vec::new(),
        resolved,
        started: false,
        advance_codes: match &config.strategy.on_status_codes {
            Some(codes) => AdvanceCodes::Explicit(codes.clone()),
            None => AdvanceCodes::Default,
        },
    })
}

impl TargetWalk {
    /// Next target index to attempt
    ///
    /// `last_status` is the final status of the previous attempt (after
    /// its own retries); `None` on the first call. Returns `None` when
    /// the walk is exhausted or the last status does not gate.
    pub fn next_target(&mut self, last_status: Option<u16>) -> Option<usize> {
        if self.started {
            let status = last_status?;
            if !self.advance_codes.gates(status) {
                return None;
            }
        }
        self.started = true;

        let next = match self.mode {
            StrategyMode::Single | StrategyMode::Conditional => {
                if self.tried.is_empty() {
                    Some(self.resolved.unwrap_or(0))
                } else {
                    None
                }
            }
            StrategyMode::Fallback => {
                let next = self.tried.len();
                (next < self.target_count).then_some(next)
            }
            StrategyMode::Loadbalance => self.weighted_draw(),
        };

        if let Some(index) = next {
            self.tried.push(index);
        }
        next
    }

    /// Targets attempted so far, in order
    pub fn attempted(&self) -> &[usize] {
        &self.tried
    }

    /// Fair weighted draw over untried, positively weighted targets
    fn weighted_draw(&self) -> Option<usize> {
        let candidates: Vec<usize> = (0..self.target_count)
            .filter(|index| !self.tried.contains(index) && self.weights[*index] > 0.0)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let total: f64 = candidates.iter().map(|&index| self.weights[index]).sum();
        let mut draw = rand::thread_rng().gen_range(0.0..total);
        for &index in &candidates {
            draw -= self.weights[index];
            if draw <= 0.0 {
                return Some(index);
            }
        }
        candidates.last().copied()
    }
}
