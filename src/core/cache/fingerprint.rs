//! Request fingerprinting

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Stable fingerprint over the request identity
///
/// Covers provider, model, function, the canonical body, and the
/// strict-compliance flag. Key order is deterministic (serde_json sorts
/// object keys), so equal requests always collide.
pub fn fingerprint(
    provider: &str,
    model: &str,
    function: &str,
    body: &Value,
    strict: bool,
) -> String {
    let identity = json!([provider, model, function, body, strict]);
    digest(&identity.to_string())
}

/// Semantic fingerprint: the body is replaced by the embedding bucket so
/// near-duplicate requests collapse onto one entry
pub fn semantic_fingerprint(
    provider: &str,
    model: &str,
    function: &str,
    bucket: u64,
    strict: bool,
) -> String {
    let identity = json!([provider, model, function, {"bucket": bucket}, strict]);
    digest(&identity.to_string())
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cosine similarity between two embeddings; zero when dimensions differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
