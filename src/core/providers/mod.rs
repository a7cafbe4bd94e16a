//! Provider dialect registry
//!
//! A [`Dialect`] translates between the gateway's canonical wire format
//! and one upstream's request/response/stream-chunk format. The registry
//! is populated once at startup; unknown tags fail with
//! `InvalidProvider` at resolution time.

mod anthropic;
mod azure;
mod bedrock;
mod google;
mod openai;
mod openai_compatible;
mod tables;
mod triton;
mod vertex;

pub use openai::{
    normalize_chat_response, normalize_chat_stream_frame, normalize_completion_response,
    normalize_embedding_response, openai_error_body,
};
pub use tables::{openai_chat_table, openai_completion_table, openai_embedding_table};

use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::core::transformer::ParameterTable;
use crate::core::types::{
    CanonicalRequest, CanonicalResponse, ErrorBody, Event, FunctionName, Target,
};
use crate::utils::error::{GatewayError, Result};

/// How a dialect authenticates against its upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Key sent under a custom header name
    Header(&'static str),
    /// No credential
    None,
}

/// Mutable state threaded through one stream's chunk transforms
pub struct StreamState {
    /// Chunk id used when the upstream does not supply one
    pub fallback_id: String,
    /// Model requested by the client
    pub model: String,
    /// Provider tag serving the stream
    pub provider: String,
    /// Whether the next content delta is the first of the stream
    pub first_chunk: bool,
    /// Whether the terminal `[DONE]` frame was already emitted
    pub emitted_done: bool,
    /// Dialect-private state (content block types, tool call indexes)
    pub extras: Map<String, Value>,
}

impl StreamState {
    pub fn new(fallback_id: &str, model: &str, provider: &str) -> Self {
        Self {
            fallback_id: fallback_id.to_string(),
            model: model.to_string(),
            provider: provider.to_string(),
            first_chunk: true,
            emitted_done: false,
            extras: Map::new(),
        }
    }
}

/// Per-provider translation and transport behavior
pub trait Dialect: Send + Sync {
    /// Provider tag this dialect registers under
    fn tag(&self) -> &'static str;

    /// Whether a missing credential is a configuration error
    fn api_key_required(&self) -> bool {
        true
    }

    /// Whether the upstream can stream this dialect's responses natively;
    /// when false the pipeline synthesizes chunks from the buffered body
    fn supports_native_streaming(&self) -> bool {
        true
    }

    /// Frame delimiter of the upstream's stream encoding
    fn stream_delimiter(&self) -> &'static str {
        "\n\n"
    }

    /// Extra credential/override field names this dialect understands
    fn custom_fields_schema(&self) -> &'static [&'static str] {
        &[]
    }

    /// Resolve the upstream base URL for the target
    fn base_url(&self, target: &Target) -> Result<Url>;

    /// Request headers, including authorization
    fn headers(&self, target: &Target, function: FunctionName)
    -> Result<HashMap<String, String>>;

    /// Upstream path for the function
    fn endpoint(&self, request: &CanonicalRequest, target: &Target) -> Result<String>;

    /// Parameter table for the function, when the dialect serves it
    fn parameter_table(&self, function: FunctionName) -> Option<ParameterTable>;

    /// Model name as sent upstream (rename rules)
    fn rename_model(&self, requested: &str) -> String {
        requested.to_string()
    }

    /// Normalize a 2xx upstream body into the canonical response
    fn transform_response(
        &self,
        body: &Value,
        status: u16,
        strict: bool,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse>;

    /// Normalize one de-framed stream frame into zero or more events
    ///
    /// The final frame of a healthy stream must yield the terminal
    /// `[DONE]` event; implementations mark `state.emitted_done`.
    fn transform_stream_chunk(
        &self,
        frame: &str,
        state: &mut StreamState,
        strict: bool,
    ) -> Result<Vec<Event>>;

    /// Extract the canonical error body from a provider error payload
    fn transform_error(&self, body: &Value) -> ErrorBody;
}

/// Process-wide dialect registry, read-only after startup
pub struct ProviderRegistry {
    dialects: HashMap<&'static str, Arc<dyn Dialect>>,
}

impl ProviderRegistry {
    fn build() -> Self {
        let mut dialects: HashMap<&'static str, Arc<dyn Dialect>> = HashMap::new();
        let mut register = |dialect: Arc<dyn Dialect>| {
            dialects.insert(dialect.tag(), dialect);
        };

        for compatible in openai_compatible::family() {
            register(Arc::new(compatible));
        }
        register(Arc::new(anthropic::Anthropic));
        register(Arc::new(google::Google));
        register(Arc::new(vertex::Vertex));
        register(Arc::new(azure::AzureOpenAi));
        register(Arc::new(bedrock::Bedrock));
        register(Arc::new(triton::Triton));

        Self { dialects }
    }

    /// Resolve a provider tag
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn Dialect>> {
        self.dialects
            .get(tag)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidProvider(tag.to_string()))
    }

    /// Registered provider tags, sorted
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = self.dialects.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

static REGISTRY: Lazy<ProviderRegistry> = Lazy::new(ProviderRegistry::build);

/// The process-wide registry
pub fn registry() -> &'static ProviderRegistry {
    &REGISTRY
}

/// Validate and parse an upstream base URL
///
/// Rejects non-http(s) schemes, empty hosts, and path traversal.
pub fn validate_base_url(raw: &str) -> Result<Url> {
    // The parser resolves dot segments, so traversal is checked on the
    // raw input
    if raw.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(GatewayError::Config(format!(
            "upstream URL {raw} contains path traversal"
        )));
    }
    let url = Url::parse(raw)
        .map_err(|e| GatewayError::Config(format!("invalid upstream URL {raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::Config(format!(
            "upstream URL {raw} must use http or https"
        )));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(GatewayError::Config(format!(
            "upstream URL {raw} has no host"
        )));
    }
    Ok(url)
}

/// Pull the `data:` payload out of an SSE frame, ignoring other lines
pub fn sse_data_payload(frame: &str) -> Option<&str> {
    frame.lines().find_map(|line| {
        line.strip_prefix("data:")
            .map(|payload| payload.trim_start())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_tags() {
        for tag in ["openai", "anthropic", "mistral", "groq", "triton", "azure"] {
            assert!(registry().resolve(tag).is_ok(), "tag {tag}");
        }
    }

    #[test]
    fn unknown_tag_is_invalid_provider() {
        assert!(matches!(
            registry().resolve("definitely-not-a-provider"),
            Err(GatewayError::InvalidProvider(_))
        ));
    }

    #[test]
    fn base_url_validation_rejects_bad_inputs() {
        assert!(validate_base_url("ftp://example.com").is_err());
        assert!(validate_base_url("https://example.com/v1/../secrets").is_err());
        assert!(validate_base_url("https://example.com:99999").is_err());
        assert!(validate_base_url("https://api.openai.com/v1").is_ok());
        assert!(validate_base_url("http://localhost:11434").is_ok());
    }

    #[test]
    fn sse_payload_extraction() {
        assert_eq!(
            sse_data_payload("event: message\ndata: {\"x\":1}"),
            Some("{\"x\":1}")
        );
        assert_eq!(sse_data_payload(": keepalive"), None);
        assert_eq!(sse_data_payload("data: [DONE]"), Some("[DONE]"));
    }
}
