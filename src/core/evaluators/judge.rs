//! LLM-as-judge evaluator methods
//!
//! Every judge method shares one implementation parameterized by its
//! criteria. The judge model is consulted through the gateway itself (a
//! reentrant call guarded upstream); its answer is a JSON envelope
//! `{criteria, score, reasoning?, overall_success?}`.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{EvaluationOutcome, EvaluationParams, Evaluator, JudgeClient, MethodDetails};
use crate::core::types::RequestLog;
use crate::utils::error::{GatewayError, Result};

const DEFAULT_JUDGE_MODEL: &str = "gpt-4o-mini";

/// One judge method: shared machinery, distinct criteria
#[derive(Clone)]
pub struct LlmJudge {
    pub details: MethodDetails,
    criteria: &'static str,
}

/// The specified judge method set
pub const JUDGE_METHODS: &[LlmJudge] = &[
    LlmJudge {
        details: MethodDetails {
            tag: "faithfulness",
            label: "Faithfulness",
            description: "Whether the answer sticks to the context and invents nothing",
        },
        criteria: "Judge whether the assistant's answer is faithful to the information \
                   available in the conversation. Penalize fabricated facts, invented \
                   citations, and claims that contradict the provided context.",
    },
    LlmJudge {
        details: MethodDetails {
            tag: "role_adherence",
            label: "Role adherence",
            description: "Whether the assistant stayed within its assigned role",
        },
        criteria: "Judge whether the assistant stayed within the role and constraints set \
                   by the system prompt. Penalize persona breaks, refused responsibilities, \
                   and behavior the role forbids.",
    },
    LlmJudge {
        details: MethodDetails {
            tag: "conversation_completeness",
            label: "Conversation completeness",
            description: "Whether every user request in the conversation was addressed",
        },
        criteria: "Judge whether the assistant addressed every question and request the \
                   user raised across the conversation. Penalize ignored questions and \
                   partially handled multi-part requests.",
    },
    LlmJudge {
        details: MethodDetails {
            tag: "task_completion",
            label: "Task completion",
            description: "Whether the user's task was actually accomplished",
        },
        criteria: "Judge whether the assistant accomplished the task the user asked for, \
                   not merely discussed it. Penalize answers that describe how the task \
                   could be done without doing it.",
    },
    LlmJudge {
        details: MethodDetails {
            tag: "argument_correctness",
            label: "Argument correctness",
            description: "Whether tool call arguments were correct for the request",
        },
        criteria: "Judge whether the tool calls the assistant made carry correct, complete \
                   arguments for the user's request. Penalize wrong parameter values, \
                   missing required arguments, and calls to the wrong tool.",
    },
];

#[async_trait]
impl Evaluator for LlmJudge {
    fn details(&self) -> MethodDetails {
        self.details.clone()
    }

    async fn evaluate_log(
        &self,
        params: &EvaluationParams,
        log: &RequestLog,
        judge: &dyn JudgeClient,
    ) -> Result<EvaluationOutcome> {
        let conversation = render_conversation(log)?;
        let judge_model = params
            .judge_model
            .clone()
            .unwrap_or_else(|| DEFAULT_JUDGE_MODEL.to_string());

        let system = format!(
            "You are an impartial evaluation judge. {criteria}\n\
             Respond with a single JSON object and nothing else:\n\
             {{\"criteria\": \"<short restatement>\", \"score\": <0.0-1.0>, \
             \"reasoning\": \"<one paragraph>\", \"overall_success\": <true|false>}}",
            criteria = self.criteria
        );
        let user = format!(
            "Evaluate the final assistant response in this exchange.\n\n{conversation}"
        );

        let answer = judge.complete(&judge_model, &system, &user).await?;
        let envelope = parse_judge_envelope(&answer)?;

        let raw_score = envelope
            .get("score")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                GatewayError::upstream("judge", "judge envelope is missing a numeric score")
            })?
            .clamp(0.0, 1.0);

        // Strict mode: partial credit collapses and the bar moves to 1.0
        let (score, threshold) = if params.strict_mode {
            (if raw_score < 1.0 { 0.0 } else { 1.0 }, 1.0)
        } else {
            (raw_score, params.threshold)
        };

        let mut extras = Map::new();
        extras.insert(
            "criteria".into(),
            envelope
                .get("criteria")
                .cloned()
                .unwrap_or_else(|| json!(self.details.tag)),
        );
        extras.insert("raw_score".into(), json!(raw_score));
        extras.insert("threshold".into(), json!(threshold));
        extras.insert("passed".into(), json!(score >= threshold));
        if let Some(success) = envelope.get("overall_success") {
            extras.insert("overall_success".into(), success.clone());
        }
        if params.verbose {
            if let Some(reasoning) = envelope.get("reasoning") {
                extras.insert("reasoning".into(), reasoning.clone());
            }
        }

        Ok(EvaluationOutcome {
            score,
            display_info: vec![format!(
                "{}: {score:.2} (threshold {threshold:.2})",
                self.details.tag
            )],
            extras,
            judge_model: Some(judge_model),
        })
    }
}

/// Parse the judge's JSON envelope, tolerating code fences
pub fn parse_judge_envelope(answer: &str) -> Result<Value> {
    let trimmed = answer.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(body).map_err(|e| {
        GatewayError::upstream("judge", format!("judge answer is not a JSON envelope: {e}"))
    })
}

/// Render the logged exchange as a transcript for the judge prompt
fn render_conversation(log: &RequestLog) -> Result<String> {
    let mut lines = Vec::new();

    if let Some(messages) = log.request_body.get("messages").and_then(Value::as_array) {
        for message in messages {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            lines.push(format!("[{role}] {content}"));
        }
    } else if let Some(prompt) = log.request_body.get("prompt").and_then(Value::as_str) {
        lines.push(format!("[user] {prompt}"));
    }

    let response = log
        .response_body
        .as_ref()
        .and_then(|body| body.pointer("/choices/0/message/content"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::bad_request("log has no assistant response to evaluate")
        })?;
    lines.push(format!("[assistant] {response}"));

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    struct ScriptedJudge {
        answer: &'static str,
    }

    #[async_trait]
    impl JudgeClient for ScriptedJudge {
        async fn complete(&self, _model: &str, _system: &str, _user: &str) -> Result<String> {
            Ok(self.answer.to_string())
        }
    }

    fn log_with_response() -> RequestLog {
        RequestLog {
            id: Uuid::new_v4(),
            trace_id: None,
            span_id: None,
            agent_id: None,
            skill_id: None,
            cluster_id: None,
            arm_id: None,
            provider: Some("openai".into()),
            model: Some("gpt-4o-mini".into()),
            function_name: "CHAT_COMPLETE".into(),
            method: "POST".into(),
            request_body: json!({
                "messages": [{"role": "user", "content": "What is 2+2?"}]
            }),
            response_body: Some(json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "4"}}]
            })),
            status: 200,
            start_time: Utc::now(),
            first_token_time: None,
            end_time: Utc::now(),
            duration_ms: 100,
            cache_status: Default::default(),
            embedding: None,
            input_hooks: vec![],
            output_hooks: vec![],
            avg_eval_score: None,
            evaluations: vec![],
            metadata: Map::new(),
        }
    }

    fn faithfulness() -> LlmJudge {
        JUDGE_METHODS
            .iter()
            .find(|method| method.details.tag == "faithfulness")
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn parses_envelope_and_scores() {
        let judge = ScriptedJudge {
            answer: r#"{"criteria": "faithful", "score": 0.8, "reasoning": "grounded", "overall_success": true}"#,
        };
        let outcome = faithfulness()
            .evaluate_log(&EvaluationParams::default(), &log_with_response(), &judge)
            .await
            .unwrap();
        assert!((outcome.score - 0.8).abs() < 1e-9);
        assert_eq!(outcome.extras["passed"], json!(true));
        assert_eq!(outcome.judge_model.as_deref(), Some("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn strict_mode_collapses_partial_credit() {
        let judge = ScriptedJudge {
            answer: r#"{"criteria": "faithful", "score": 0.95}"#,
        };
        let params = EvaluationParams {
            strict_mode: true,
            ..Default::default()
        };
        let outcome = faithfulness()
            .evaluate_log(&params, &log_with_response(), &judge)
            .await
            .unwrap();
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.extras["threshold"], json!(1.0));
    }

    #[tokio::test]
    async fn code_fenced_envelopes_parse() {
        let envelope =
            parse_judge_envelope("```json\n{\"criteria\": \"x\", \"score\": 1.0}\n```").unwrap();
        assert_eq!(envelope["score"], json!(1.0));
        assert!(parse_judge_envelope("the answer is fine").is_err());
    }

    #[tokio::test]
    async fn missing_response_is_an_error() {
        let mut log = log_with_response();
        log.response_body = None;
        let judge = ScriptedJudge {
            answer: r#"{"score": 1.0}"#,
        };
        assert!(
            faithfulness()
                .evaluate_log(&EvaluationParams::default(), &log, &judge)
                .await
                .is_err()
        );
    }
}
