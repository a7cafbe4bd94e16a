//! Latency evaluator
//!
//! Streaming responses score on time-to-first-token, buffered responses
//! on total duration. The score maps linearly: at or under the target
//! latency scores 1.0, at or over the maximum scores 0.0. Missing or
//! inconsistent timing yields a neutral 0.5 with an error note.

use async_trait::async_trait;
use serde_json::{Map, json};

use super::{EvaluationOutcome, EvaluationParams, Evaluator, JudgeClient, MethodDetails};
use crate::core::types::RequestLog;
use crate::utils::error::Result;

pub struct LatencyEvaluator;

#[async_trait]
impl Evaluator for LatencyEvaluator {
    fn details(&self) -> MethodDetails {
        MethodDetails {
            tag: "latency",
            label: "Latency",
            description: "Scores time-to-first-token (or total duration) against a target window",
        }
    }

    async fn evaluate_log(
        &self,
        params: &EvaluationParams,
        log: &RequestLog,
        _judge: &dyn JudgeClient,
    ) -> Result<EvaluationOutcome> {
        let mut extras = Map::new();

        let measured_ms = match log.first_token_time {
            Some(first_token) => {
                let ttft = first_token - log.start_time;
                extras.insert("measure".into(), json!("ttft"));
                ttft.num_milliseconds()
            }
            None => {
                extras.insert("measure".into(), json!("duration"));
                log.duration_ms as i64
            }
        };

        if measured_ms < 0 || log.end_time < log.start_time {
            extras.insert("error".into(), json!("inconsistent timing on log"));
            return Ok(EvaluationOutcome {
                score: 0.5,
                extras,
                display_info: vec!["latency: timing missing, neutral 0.5".to_string()],
                judge_model: None,
            });
        }

        let score = linear_score(
            measured_ms as u64,
            params.target_latency_ms,
            params.max_latency_ms,
        );
        extras.insert("measured_ms".into(), json!(measured_ms));
        extras.insert("target_latency_ms".into(), json!(params.target_latency_ms));
        extras.insert("max_latency_ms".into(), json!(params.max_latency_ms));

        Ok(EvaluationOutcome {
            score,
            display_info: vec![format!("latency: {measured_ms}ms scored {score:.3}")],
            extras,
            judge_model: None,
        })
    }
}

/// 1.0 at or under target, 0.0 at or over max, linear in between
fn linear_score(measured_ms: u64, target_ms: u64, max_ms: u64) -> f64 {
    if measured_ms <= target_ms {
        return 1.0;
    }
    if measured_ms >= max_ms {
        return 0.0;
    }
    1.0 - (measured_ms - target_ms) as f64 / (max_ms - target_ms) as f64
}
