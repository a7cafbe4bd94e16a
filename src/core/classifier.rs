//! Error classifier
//!
//! Maps any upstream error payload to a canonical status, taxonomy tag,
//! and safe outward message. Walks the payload's string leaves (bounded
//! depth) and matches indicator keyword families. Server-class errors get
//! a generic outward message; client-class errors pass the provider's
//! message through, prefixed once with the provider tag. Applying the
//! classifier to its own output changes nothing.

use serde_json::{Value, json};

use crate::core::types::{ErrorBody, ErrorDetails, ErrorEnvelope};

const MAX_WALK_DEPTH: usize = 10;

/// One indicator family
struct Family {
    tag: &'static str,
    status: u16,
    keywords: &'static [&'static str],
    generic_message: &'static str,
    suggested_action: &'static str,
}

/// Families in priority order; the first with a keyword hit wins
const FAMILIES: &[Family] = &[
    Family {
        tag: "authentication",
        status: 401,
        keywords: &[
            "api key",
            "api_key",
            "unauthorized",
            "unauthenticated",
            "authentication",
            "invalid key",
            "invalid token",
            "expired token",
        ],
        generic_message: "Authentication with the upstream provider failed",
        suggested_action: "Verify the provider credential configured for this target",
    },
    Family {
        tag: "rate_limit",
        status: 429,
        keywords: &[
            "rate limit",
            "rate_limit",
            "quota",
            "too many requests",
            "requests per minute",
            "tokens per minute",
        ],
        generic_message: "The upstream provider rate limited this request",
        suggested_action: "Reduce request volume or add fallback targets",
    },
    Family {
        tag: "timeout",
        status: 408,
        keywords: &["timeout", "timed out", "deadline exceeded", "deadline_exceeded"],
        generic_message: "The upstream call timed out",
        suggested_action: "Raise request_timeout_ms or retry",
    },
    Family {
        tag: "permission",
        status: 403,
        keywords: &["permission", "forbidden", "access denied", "not authorized for"],
        generic_message: "The upstream provider denied access",
        suggested_action: "Check the credential's entitlements for this model",
    },
    Family {
        tag: "not_found",
        status: 404,
        keywords: &[
            "not found",
            "not_found",
            "does not exist",
            "no such model",
            "unknown model",
        ],
        generic_message: "The requested resource was not found upstream",
        suggested_action: "Check the model name and provider tag",
    },
    Family {
        tag: "validation",
        status: 422,
        keywords: &[
            "validation",
            "invalid",
            "missing",
            "required",
            "unprocessable",
            "malformed",
        ],
        generic_message: "The request failed upstream validation",
        suggested_action: "Inspect error_details.original_error for the failing field",
    },
    Family {
        tag: "unavailable",
        status: 503,
        keywords: &[
            "unavailable",
            "overloaded",
            "maintenance",
            "capacity",
            "service_unavailable",
        ],
        generic_message: "The upstream provider is temporarily unavailable",
        suggested_action: "Retry later or add fallback targets",
    },
    Family {
        tag: "upstream",
        status: 502,
        keywords: &["bad gateway", "bad_gateway", "upstream", "internal server error"],
        generic_message: "The upstream provider returned an invalid response",
        suggested_action: "Retry; persistent failures indicate a provider incident",
    },
];

/// A classified upstream error, ready for the outward envelope
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub status: u16,
    pub envelope: ErrorEnvelope,
}

impl ClassifiedError {
    pub fn to_body(&self) -> Value {
        serde_json::to_value(&self.envelope).unwrap_or_else(|_| json!({}))
    }
}

/// Classify an upstream error payload
///
/// `upstream_status` is the HTTP status the provider answered with, when
/// one exists; it settles the class when no indicator matches.
pub fn classify(provider: &str, raw: &Value, upstream_status: Option<u16>) -> ClassifiedError {
    let mut leaves = Vec::new();
    collect_string_leaves(raw, 0, &mut leaves);
    let haystack = leaves.join(" ").to_lowercase();

    let family = FAMILIES
        .iter()
        .find(|family| family.keywords.iter().any(|needle| haystack.contains(needle)));

    let (status, tag, generic_message, suggested_action) = match family {
        Some(family) => (
            family.status,
            family.tag,
            family.generic_message,
            family.suggested_action,
        ),
        None => match upstream_status {
            Some(status) if (400..500).contains(&status) => (
                400,
                "client_error",
                "The request was rejected upstream",
                "Inspect error_details.original_error",
            ),
            _ => (
                500,
                "server_error",
                "The upstream provider failed to serve the request",
                "Retry; persistent failures indicate a provider incident",
            ),
        },
    };

    let original_message = extract_message(raw);
    let message = if status >= 500 {
        generic_message.to_string()
    } else {
        let prefix = format!("{provider} error: ");
        let base = original_message
            .clone()
            .unwrap_or_else(|| generic_message.to_string());
        if base.starts_with(&prefix) {
            base
        } else {
            format!("{prefix}{base}")
        }
    };

    ClassifiedError {
        status,
        envelope: ErrorEnvelope {
            error: ErrorBody {
                message,
                error_type: tag.to_string(),
                code: None,
                param: None,
            },
            error_details: Some(ErrorDetails {
                original_error: original_message,
                original_body: Some(raw.clone()),
                classification: tag.to_string(),
                suggested_action: suggested_action.to_string(),
            }),
        },
    }
}

/// Collect every string leaf down to the depth bound
fn collect_string_leaves<'a>(value: &'a Value, depth: usize, out: &mut Vec<&'a str>) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    match value {
        Value::String(text) => out.push(text),
        Value::Array(items) => {
            for item in items {
                collect_string_leaves(item, depth + 1, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                out.push(key);
                collect_string_leaves(item, depth + 1, out);
            }
        }
        _ => {}
    }
}

/// Best-effort human message from the payload
fn extract_message(raw: &Value) -> Option<String> {
    for pointer in ["/error/message", "/message", "/error_details/original_error"] {
        if let Some(message) = raw.pointer(pointer).and_then(Value::as_str) {
            return Some(message.to_string());
        }
    }
    raw.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_families_map_to_statuses() {
        let cases = [
            (json!({"error": {"message": "Invalid API key provided"}}), 401),
            (json!({"error": {"message": "Rate limit exceeded, retry soon"}}), 429),
            (json!({"error": {"message": "model gpt-9 does not exist"}}), 404),
            (json!({"error": {"message": "missing required field: messages"}}), 422),
            (json!({"error": {"message": "access denied: forbidden"}}), 403),
            (json!({"error": {"message": "request timed out after 30s"}}), 408),
            (json!({"error": {"message": "502 bad gateway"}}), 502),
            (json!({"error": {"message": "engine overloaded"}}), 503),
        ];
        for (body, expected) in cases {
            let classified = classify("openai", &body, None);
            assert_eq!(classified.status, expected, "body {body}");
        }
    }

    #[test]
    fn unmatched_errors_fall_back_by_status_class() {
        let classified = classify("openai", &json!({"error": {"message": "???"}}), Some(418));
        assert_eq!(classified.status, 400);
        let classified = classify("openai", &json!({"error": {"message": "???"}}), Some(500));
        assert_eq!(classified.status, 500);
        let classified = classify("openai", &json!({"error": {"message": "???"}}), None);
        assert_eq!(classified.status, 500);
    }

    #[test]
    fn client_errors_carry_prefixed_provider_message() {
        let classified = classify(
            "anthropic",
            &json!({"error": {"message": "model claude-9 does not exist"}}),
            Some(404),
        );
        assert_eq!(
            classified.envelope.error.message,
            "anthropic error: model claude-9 does not exist"
        );
        let details = classified.envelope.error_details.as_ref().unwrap();
        assert_eq!(
            details.original_error.as_deref(),
            Some("model claude-9 does not exist")
        );
    }

    #[test]
    fn server_errors_hide_the_original_message() {
        let classified = classify(
            "openai",
            &json!({"error": {"message": "engine overloaded: shard 7 oom"}}),
            Some(503),
        );
        assert_eq!(classified.status, 503);
        assert!(!classified.envelope.error.message.contains("shard"));
        assert_eq!(
            classified
                .envelope
                .error_details
                .as_ref()
                .unwrap()
                .original_error
                .as_deref(),
            Some("engine overloaded: shard 7 oom")
        );
    }

    #[test]
    fn classification_is_idempotent() {
        let first = classify(
            "openai",
            &json!({"error": {"message": "model gpt-9 does not exist"}}),
            Some(404),
        );
        let second = classify("openai", &first.to_body(), Some(first.status));
        assert_eq!(second.status, first.status);
        assert_eq!(
            second.envelope.error_details.as_ref().unwrap().classification,
            first.envelope.error_details.as_ref().unwrap().classification
        );
        assert_eq!(second.envelope.error.message, first.envelope.error.message);
    }

    #[test]
    fn depth_bound_ignores_deeply_nested_indicators() {
        // Bury a keyword beyond the walk depth
        let mut value = json!("rate limit");
        for _ in 0..12 {
            value = json!({ "w": value });
        }
        let classified = classify("openai", &value, Some(500));
        assert_eq!(classified.status, 500);
    }
}
