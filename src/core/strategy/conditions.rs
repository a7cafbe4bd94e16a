//! Declarative predicates for conditional routing
//!
//! Queries are maps of dotted path to expectation. An expectation is a
//! bare value (equality; membership when the actual value is an array),
//! or an operator object: `$eq`, `$in`, `$contains`. No code execution.

use serde_json::{Map, Value};

use crate::core::transformer::get_path;

/// Whether every entry of the query matches the body
pub fn query_matches(query: &Map<String, Value>, body: &Value) -> bool {
    query.iter().all(|(path, expectation)| {
        let actual = get_path(body, path);
        expectation_matches(expectation, actual)
    })
}

fn expectation_matches(expectation: &Value, actual: Option<&Value>) -> bool {
    if let Some(operators) = operator_object(expectation) {
        return operators.iter().all(|(op, operand)| {
            match (op.as_str(), actual) {
                ("$eq", Some(actual)) => actual == operand,
                ("$in", Some(actual)) => operand
                    .as_array()
                    .map(|candidates| candidates.contains(actual))
                    .unwrap_or(false),
                ("$contains", Some(actual)) => contains(actual, operand),
                _ => false,
            }
        });
    }

    match actual {
        Some(actual) if actual == expectation => true,
        Some(Value::Array(items)) => items.contains(expectation),
        _ => false,
    }
}

/// A map whose keys all start with `$` is an operator object
fn operator_object(expectation: &Value) -> Option<&Map<String, Value>> {
    let map = expectation.as_object()?;
    if !map.is_empty() && map.keys().all(|key| key.starts_with('$')) {
        Some(map)
    } else {
        None
    }
}

fn contains(actual: &Value, operand: &Value) -> bool {
    match actual {
        Value::Array(items) => items.contains(operand),
        Value::String(text) => operand
            .as_str()
            .map(|needle| text.contains(needle))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn bare_values_match_by_equality() {
        let body = json!({"model": "gpt-4o", "metadata": {"tier": "pro"}});
        assert!(query_matches(&query(json!({"model": "gpt-4o"})), &body));
        assert!(query_matches(&query(json!({"metadata.tier": "pro"})), &body));
        assert!(!query_matches(&query(json!({"model": "gpt-4"})), &body));
    }

    #[test]
    fn arrays_match_by_membership() {
        let body = json!({"tags": ["beta", "internal"]});
        assert!(query_matches(&query(json!({"tags": "beta"})), &body));
        assert!(!query_matches(&query(json!({"tags": "public"})), &body));
    }

    #[test]
    fn operator_objects() {
        let body = json!({"model": "gpt-4o-mini", "n": 2});
        assert!(query_matches(
            &query(json!({"model": {"$contains": "mini"}})),
            &body
        ));
        assert!(query_matches(
            &query(json!({"n": {"$in": [1, 2, 3]}})),
            &body
        ));
        assert!(query_matches(&query(json!({"n": {"$eq": 2}})), &body));
        assert!(!query_matches(
            &query(json!({"model": {"$in": ["gpt-4o"]}})),
            &body
        ));
    }

    #[test]
    fn missing_paths_never_match() {
        let body = json!({"model": "gpt-4o"});
        assert!(!query_matches(&query(json!({"absent.path": "x"})), &body));
    }
}
