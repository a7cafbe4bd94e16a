//! Hook engine
//!
//! Ordered input/output hooks from the request envelope. Hooks see the
//! latest body (overrides thread through), the first deny short-circuits
//! with status 446, and output hooks also receive the response status.
//! Hook call failures are recorded but never deny on their own.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Instant;
use tracing::warn;

use crate::core::types::{HookRecord, HookSpec};
use crate::utils::error::{GatewayError, Result};

/// Direction a hook runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDirection {
    Input,
    Output,
}

impl HookDirection {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// What one hook returned
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HookOutcome {
    #[serde(default)]
    pub deny_request: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body_override: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_body_override: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

/// A resolved, callable hook
#[async_trait]
pub trait Hook: Send + Sync {
    fn id(&self) -> &str;

    async fn call(
        &self,
        direction: HookDirection,
        body: &Value,
        response_status: Option<u16>,
    ) -> Result<HookOutcome>;
}

/// Hook backed by an external webhook endpoint
pub struct WebhookHook {
    spec: HookSpec,
    url: String,
    client: reqwest::Client,
}

#[async_trait]
impl Hook for WebhookHook {
    fn id(&self) -> &str {
        &self.spec.id
    }

    async fn call(
        &self,
        direction: HookDirection,
        body: &Value,
        response_status: Option<u16>,
    ) -> Result<HookOutcome> {
        let payload = json!({
            "hook_id": self.spec.id,
            "direction": direction.as_str(),
            "body": body,
            "response_status": response_status,
            "params": self.spec.params,
        });

        let mut request = self.client.post(&self.url).json(&payload);
        for (name, value) in &self.spec.headers {
            request = request.header(name, value);
        }
        if let Some(timeout_ms) = self.spec.timeout_ms {
            request = request.timeout(std::time::Duration::from_millis(timeout_ms));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::upstream(
                "hook",
                format!("hook {} returned {}", self.spec.id, response.status()),
            ));
        }
        Ok(response.json::<HookOutcome>().await?)
    }
}

/// Built-in hook that replays the outcome declared in its params; used
/// for policy toggles and in tests
pub struct StaticHook {
    spec: HookSpec,
}

#[async_trait]
impl Hook for StaticHook {
    fn id(&self) -> &str {
        &self.spec.id
    }

    async fn call(
        &self,
        _direction: HookDirection,
        _body: &Value,
        _response_status: Option<u16>,
    ) -> Result<HookOutcome> {
        Ok(serde_json::from_value(Value::Object(self.spec.params.clone()))
            .unwrap_or_default())
    }
}

/// Resolve an envelope hook spec into a callable hook
pub fn resolve_hook(spec: &HookSpec, client: &reqwest::Client) -> Box<dyn Hook> {
    match &spec.url {
        Some(url) => Box::new(WebhookHook {
            spec: spec.clone(),
            url: url.clone(),
            client: client.clone(),
        }),
        None => Box::new(StaticHook { spec: spec.clone() }),
    }
}

/// Result of running one hook list
#[derive(Debug, Clone)]
pub struct HookRunResult {
    /// Ordered outcomes, one per executed hook
    pub records: Vec<HookRecord>,
    /// Body after overrides threaded through
    pub body: Value,
    /// Whether a hook denied the request
    pub denied: bool,
}

impl HookRunResult {
    /// Hook log in the envelope shape surfaced on denials
    pub fn to_log_value(&self) -> Value {
        json!(self
            .records
            .iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "deny_request": record.deny_request,
                    "rewrote_body": record.rewrote_body,
                    "annotations": record.annotations,
                    "error": record.error,
                    "duration_ms": record.duration_ms,
                })
            })
            .collect::<Vec<_>>())
    }
}

/// Run a hook list sequentially against a body
pub async fn run_hooks(
    specs: &[HookSpec],
    client: &reqwest::Client,
    direction: HookDirection,
    body: Value,
    response_status: Option<u16>,
) -> HookRunResult {
    let mut records = Vec::with_capacity(specs.len());
    let mut current = body;

    for spec in specs {
        let hook = resolve_hook(spec, client);
        let started = Instant::now();
        match hook.call(direction, &current, response_status).await {
            Ok(outcome) => {
                let override_body = match direction {
                    HookDirection::Input => outcome.request_body_override,
                    HookDirection::Output => outcome.output_body_override,
                };
                let rewrote = override_body.is_some();
                if let Some(replacement) = override_body {
                    current = replacement;
                }
                records.push(HookRecord {
                    id: spec.id.clone(),
                    deny_request: outcome.deny_request,
                    rewrote_body: rewrote,
                    annotations: outcome.annotations,
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                if outcome.deny_request {
                    return HookRunResult {
                        records,
                        body: current,
                        denied: true,
                    };
                }
            }
            Err(e) => {
                warn!(hook = %spec.id, error = %e, "hook call failed");
                records.push(HookRecord {
                    id: spec.id.clone(),
                    deny_request: false,
                    rewrote_body: false,
                    annotations: None,
                    error: Some(e.to_string()),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
    }

    HookRunResult {
        records,
        body: current,
        denied: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn static_spec(id: &str, params: Value) -> HookSpec {
        HookSpec {
            id: id.to_string(),
            url: None,
            headers: Default::default(),
            timeout_ms: None,
            params: params.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    #[tokio::test]
    async fn first_deny_short_circuits() {
        let specs = vec![
            static_spec("allow", json!({})),
            static_spec("deny", json!({"deny_request": true, "annotations": {"reason": "policy"}})),
            static_spec("never-runs", json!({})),
        ];
        let client = reqwest::Client::new();
        let result = run_hooks(
            &specs,
            &client,
            HookDirection::Input,
            json!({"x": 1}),
            None,
        )
        .await;

        assert!(result.denied);
        assert_eq!(result.records.len(), 2);
        assert!(result.records[1].deny_request);
    }

    #[tokio::test]
    async fn overrides_thread_through_hooks() {
        let specs = vec![
            static_spec("rewrite", json!({"request_body_override": {"x": 2}})),
            static_spec("observe", json!({})),
        ];
        let client = reqwest::Client::new();
        let result = run_hooks(
            &specs,
            &client,
            HookDirection::Input,
            json!({"x": 1}),
            None,
        )
        .await;

        assert!(!result.denied);
        assert_eq!(result.body, json!({"x": 2}));
        assert!(result.records[0].rewrote_body);
    }

    #[tokio::test]
    async fn output_direction_uses_output_override() {
        let specs = vec![static_spec(
            "mask",
            json!({"output_body_override": {"masked": true}}),
        )];
        let client = reqwest::Client::new();
        let result = run_hooks(
            &specs,
            &client,
            HookDirection::Output,
            json!({"secret": "value"}),
            Some(200),
        )
        .await;
        assert_eq!(result.body, json!({"masked": true}));
    }
}
