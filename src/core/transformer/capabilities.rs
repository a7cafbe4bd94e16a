//! Per-model parameter capability overrides
//!
//! Some models reject canonical parameters outright (reasoning models and
//! temperature) or expect a legacy name. The override runs on the
//! canonical body before the parameter table; dropped parameters are not
//! an error, but each drop is reported so the pipeline can attach it to
//! the log's metadata.

use serde_json::Value;

use crate::core::types::FunctionName;

/// One applied adjustment, reported on the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityAdjustment {
    /// Parameter unsupported for the (provider, model, function) triple
    Dropped(String),
    /// Parameter renamed to a legacy or successor name
    Renamed { from: String, to: String },
}

/// Rule: which canonical fields a model family cannot take, or takes
/// under another name
struct CapabilityRule {
    provider: &'static str,
    /// Substring match against the model name
    model_contains: &'static str,
    drop: &'static [&'static str],
    rename: &'static [(&'static str, &'static str)],
}

/// Static rule set, walked in order; every matching rule applies
const RULES: &[CapabilityRule] = &[
    // OpenAI reasoning models fix sampling server-side and renamed the
    // token cap
    CapabilityRule {
        provider: "openai",
        model_contains: "o1",
        drop: &["temperature", "top_p", "presence_penalty", "frequency_penalty"],
        rename: &[("max_tokens", "max_completion_tokens")],
    },
    CapabilityRule {
        provider: "openai",
        model_contains: "o3",
        drop: &["temperature", "top_p", "presence_penalty", "frequency_penalty"],
        rename: &[("max_tokens", "max_completion_tokens")],
    },
    CapabilityRule {
        provider: "openai",
        model_contains: "gpt-5",
        drop: &["temperature", "top_p"],
        rename: &[("max_tokens", "max_completion_tokens")],
    },
    // Anthropic rejects OpenAI penalty knobs and seeds
    CapabilityRule {
        provider: "anthropic",
        model_contains: "",
        drop: &["presence_penalty", "frequency_penalty", "seed", "logit_bias"],
        rename: &[],
    },
    // Gemini has no penalty parameters on the REST surface
    CapabilityRule {
        provider: "google",
        model_contains: "",
        drop: &["presence_penalty", "frequency_penalty", "logit_bias"],
        rename: &[],
    },
    CapabilityRule {
        provider: "vertex",
        model_contains: "",
        drop: &["presence_penalty", "frequency_penalty", "logit_bias"],
        rename: &[],
    },
    // Bedrock's converse API takes only the core sampling trio
    CapabilityRule {
        provider: "bedrock",
        model_contains: "",
        drop: &["presence_penalty", "frequency_penalty", "seed", "logit_bias", "n"],
        rename: &[],
    },
    // Groq rejects logit_bias and logprobs on all models
    CapabilityRule {
        provider: "groq",
        model_contains: "",
        drop: &["logit_bias", "logprobs"],
        rename: &[],
    },
];

/// Apply capability rules to a canonical body in place
///
/// Returns the adjustments made, in rule order, for log metadata.
pub fn adjust_for_capabilities(
    provider: &str,
    model: &str,
    _function: FunctionName,
    body: &mut Value,
) -> Vec<CapabilityAdjustment> {
    let mut adjustments = Vec::new();
    let Some(map) = body.as_object_mut() else {
        return adjustments;
    };

    for rule in RULES {
        if rule.provider != provider || !model.contains(rule.model_contains) {
            continue;
        }
        for field in rule.drop {
            if map.remove(*field).is_some() {
                adjustments.push(CapabilityAdjustment::Dropped((*field).to_string()));
            }
        }
        for (from, to) in rule.rename {
            if let Some(value) = map.remove(*from) {
                map.insert((*to).to_string(), value);
                adjustments.push(CapabilityAdjustment::Renamed {
                    from: (*from).to_string(),
                    to: (*to).to_string(),
                });
            }
        }
    }

    adjustments
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reasoning_models_lose_sampling_params() {
        let mut body = json!({
            "model": "o1-mini",
            "temperature": 0.5,
            "max_tokens": 100,
        });
        let adjustments = adjust_for_capabilities(
            "openai",
            "o1-mini",
            FunctionName::ChatComplete,
            &mut body,
        );
        assert!(body.get("temperature").is_none());
        assert_eq!(body["max_completion_tokens"], json!(100));
        assert!(adjustments.contains(&CapabilityAdjustment::Dropped("temperature".into())));
        assert!(adjustments.iter().any(|a| matches!(
            a,
            CapabilityAdjustment::Renamed { from, .. } if from == "max_tokens"
        )));
    }

    #[test]
    fn unrelated_providers_are_untouched() {
        let mut body = json!({"model": "gpt-4o", "temperature": 0.5});
        let adjustments =
            adjust_for_capabilities("mistral", "gpt-4o", FunctionName::ChatComplete, &mut body);
        assert!(adjustments.is_empty());
        assert_eq!(body["temperature"], json!(0.5));
    }

    #[test]
    fn anthropic_drops_penalties() {
        let mut body = json!({"model": "claude-sonnet-4", "presence_penalty": 0.1});
        let adjustments = adjust_for_capabilities(
            "anthropic",
            "claude-sonnet-4",
            FunctionName::ChatComplete,
            &mut body,
        );
        assert_eq!(
            adjustments,
            vec![CapabilityAdjustment::Dropped("presence_penalty".into())]
        );
    }
}
