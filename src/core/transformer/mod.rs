//! Parameter-table transformer
//!
//! Dialects declare their request mapping as data: a table of
//! [`ParamSpec`] entries keyed by canonical field. One engine reads the
//! table against a canonical body and produces the upstream body. Field
//! order is the table order; out-of-range numerics clamp silently;
//! missing required fields fail.

mod capabilities;

pub use capabilities::{CapabilityAdjustment, adjust_for_capabilities};

use serde_json::{Map, Value};

use crate::utils::error::{GatewayError, Result};

/// Transform hook: receives the whole canonical body, returns the value to
/// write (or `None` to treat the field as absent)
pub type TransformFn = fn(&Value) -> Option<Value>;

/// One table entry: canonical field to upstream field with policy
#[derive(Clone)]
pub struct ParamSpec {
    /// Canonical field key, dotted for nested reads
    pub canonical: &'static str,
    /// Upstream field path, dotted for nested writes
    pub param: &'static str,
    /// Substituted when the canonical value is absent
    pub default: Option<Value>,
    /// Fail with `MissingParameter` when absent and no default applies
    pub required: bool,
    /// Lower clamp for numeric values
    pub min: Option<f64>,
    /// Upper clamp for numeric values
    pub max: Option<f64>,
    /// Rewrites the value instead of the plain field read
    pub transform: Option<TransformFn>,
}

impl ParamSpec {
    /// Plain rename with no policy
    pub fn maps(canonical: &'static str, param: &'static str) -> Self {
        Self {
            canonical,
            param,
            default: None,
            required: false,
            min: None,
            max: None,
            transform: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn clamp(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_transform(mut self, transform: TransformFn) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Ordered parameter table for one `(provider, function)` pair
#[derive(Clone, Default)]
pub struct ParameterTable {
    pub entries: Vec<ParamSpec>,
    /// Copy unrecognized `additional_params` keys through verbatim
    pub passthrough_additional_params: bool,
}

impl ParameterTable {
    pub fn new(entries: Vec<ParamSpec>) -> Self {
        Self {
            entries,
            passthrough_additional_params: true,
        }
    }

    pub fn without_passthrough(mut self) -> Self {
        self.passthrough_additional_params = false;
        self
    }
}

/// Apply a parameter table to a canonical body
///
/// `additional` carries the request's free-form parameter map, passed
/// separately because it is flattened on the wire. Returns the upstream
/// body. Table order is preserved in the output map so fingerprints stay
/// stable across runs.
pub fn transform_body(
    table: &ParameterTable,
    canonical: &Value,
    additional: Option<&Map<String, Value>>,
) -> Result<Value> {
    let mut output = Value::Object(Map::new());

    for spec in &table.entries {
        let mut value = match spec.transform {
            Some(transform) => transform(canonical),
            None => get_path(canonical, spec.canonical).cloned(),
        };

        if value.is_none() || matches!(value, Some(Value::Null)) {
            if let Some(default) = &spec.default {
                value = Some(default.clone());
            } else if spec.required {
                return Err(GatewayError::MissingParameter(spec.canonical.to_string()));
            } else {
                continue;
            }
        }

        let mut value = value.unwrap_or(Value::Null);
        if let (Some(min), Some(max)) = (spec.min, spec.max) {
            value = clamp_numeric(value, min, max);
        }

        set_path(&mut output, spec.param, value)?;
    }

    if table.passthrough_additional_params {
        if let Some(extra) = additional {
            for (key, value) in extra {
                if get_path(&output, key).is_none() {
                    set_path(&mut output, key, value.clone())?;
                }
            }
        }
    }

    Ok(output)
}

fn clamp_numeric(value: Value, min: f64, max: f64) -> Value {
    match value.as_f64() {
        Some(number) => {
            let clamped = number.clamp(min, max);
            if (clamped - number).abs() < f64::EPSILON {
                value
            } else {
                serde_json::Number::from_f64(clamped)
                    .map(Value::Number)
                    .unwrap_or(value)
            }
        }
        None => value,
    }
}

/// Read a dotted path out of a JSON value
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Write a dotted path into a JSON object, creating intermediate maps
pub fn set_path(value: &mut Value, path: &str, new_value: Value) -> Result<()> {
    let mut current = value;
    let segments: Vec<&str> = path.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        let map = current.as_object_mut().ok_or_else(|| {
            GatewayError::Internal(format!("cannot write {path}: {segment} is not an object"))
        })?;
        if index == segments.len() - 1 {
            map.insert(segment.to_string(), new_value);
            return Ok(());
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> ParameterTable {
        ParameterTable::new(vec![
            ParamSpec::maps("model", "model").required(),
            ParamSpec::maps("temperature", "temperature").clamp(0.0, 2.0),
            ParamSpec::maps("top_p", "parameters.top_p").clamp(0.0, 1.0),
            ParamSpec::maps("max_tokens", "max_tokens").default_value(json!(1024)),
        ])
    }

    #[test]
    fn missing_required_field_fails() {
        let err = transform_body(&table(), &json!({"temperature": 0.5}), None).unwrap_err();
        assert!(matches!(err, GatewayError::MissingParameter(_)));
    }

    #[test]
    fn defaults_fill_absent_fields() {
        let body = transform_body(&table(), &json!({"model": "m"}), None).unwrap();
        assert_eq!(body["max_tokens"], json!(1024));
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn out_of_range_values_clamp_silently() {
        let body = transform_body(
            &table(),
            &json!({"model": "m", "temperature": 9.5, "top_p": -0.2}),
            None,
        )
        .unwrap();
        assert_eq!(body["temperature"], json!(2.0));
        assert_eq!(body["parameters"]["top_p"], json!(0.0));
    }

    #[test]
    fn dotted_paths_create_intermediate_maps() {
        let body = transform_body(&table(), &json!({"model": "m", "top_p": 0.9}), None).unwrap();
        assert_eq!(body["parameters"]["top_p"], json!(0.9));
    }

    #[test]
    fn transform_overrides_field_read() {
        fn upper_model(body: &Value) -> Option<Value> {
            body.get("model")
                .and_then(Value::as_str)
                .map(|m| Value::String(m.to_uppercase()))
        }
        let table = ParameterTable::new(vec![
            ParamSpec::maps("model", "model")
                .required()
                .with_transform(upper_model),
        ]);
        let body = transform_body(&table, &json!({"model": "gpt"}), None).unwrap();
        assert_eq!(body["model"], json!("GPT"));
    }

    #[test]
    fn additional_params_pass_through_without_clobbering() {
        let mut extra = serde_json::Map::new();
        extra.insert("logit_bias".into(), json!({"1": 2}));
        extra.insert("model".into(), json!("x"));
        let body = transform_body(&table(), &json!({"model": "m"}), Some(&extra)).unwrap();
        assert_eq!(body["logit_bias"]["1"], json!(2));
        // Mapped fields win over passthrough duplicates
        assert_eq!(body["model"], json!("m"));
    }
}
