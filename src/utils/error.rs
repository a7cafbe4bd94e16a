//! Error types for the gateway

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
///
/// Variants map one-to-one onto the outward error taxonomy; see
/// [`GatewayError::to_http_status`] for the status mapping.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Request body failed validation against the canonical wire model
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        param: Option<String>,
        /// Schema-level failures surface as 422, other validation as 400
        schema_violation: bool,
    },

    /// A required upstream parameter was absent and had no default
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// Unknown provider tag at resolution time
    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    /// Unknown evaluator method tag
    #[error("Invalid evaluation method: {0}")]
    InvalidMethod(String),

    /// Missing or invalid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Policy denied the request
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Agent, skill, model, or resource unknown
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicting write against stored state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream quota or rate limit
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    /// Deadline hit locally or signalled by the upstream
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Bad gateway from the provider
    #[error("Upstream error ({provider}): {message}")]
    Upstream { provider: String, message: String },

    /// Provider overloaded or in maintenance
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Denied by an input or output hook; carries the ordered hook log
    #[error("Request denied by hook")]
    HookDenied { hook_results: serde_json::Value },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache operation errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Validation failure against the canonical schema (422)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            param: None,
            schema_violation: true,
        }
    }

    /// Validation failure on a named parameter (422)
    pub fn invalid_param(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            param: Some(param.into()),
            schema_violation: true,
        }
    }

    /// Non-schema request problem (400)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            param: None,
            schema_violation: false,
        }
    }

    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// HTTP status code for the outward response
    pub fn to_http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest {
                schema_violation, ..
            } => {
                if *schema_violation {
                    422
                } else {
                    400
                }
            }
            Self::MissingParameter(_) => 422,
            Self::InvalidProvider(_) | Self::InvalidMethod(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::RateLimited { .. } => 429,
            Self::Timeout(_) => 408,
            Self::HookDenied { .. } => 446,
            Self::Upstream { .. } => 502,
            Self::Unavailable(_) => 503,
            Self::Config(_) => 400,
            Self::Cache(_)
            | Self::Serialization(_)
            | Self::HttpClient(_)
            | Self::Io(_)
            | Self::Yaml(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Whether the retry loop may re-enter on this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Upstream { .. }
                | Self::Unavailable(_)
                | Self::HttpClient(_)
        )
    }

    /// Error type tag used in the outward JSON envelope
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } | Self::MissingParameter(_) => "invalid_request_error",
            Self::InvalidProvider(_) => "invalid_provider_error",
            Self::InvalidMethod(_) => "invalid_method_error",
            Self::Unauthorized(_) => "authentication_error",
            Self::Forbidden(_) => "permission_error",
            Self::NotFound(_) => "not_found_error",
            Self::Conflict(_) => "conflict_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::Timeout(_) => "timeout_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Unavailable(_) => "service_unavailable_error",
            Self::HookDenied { .. } => "hook_denied_error",
            Self::Config(_) => "configuration_error",
            _ => "internal_error",
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            Self::HookDenied { hook_results } => json!({
                "error": {
                    "message": "Request denied by hook",
                    "type": self.error_type(),
                },
                "hook_results": hook_results,
            }),
            Self::InvalidRequest { message, param, .. } => json!({
                "error": {
                    "message": message,
                    "type": self.error_type(),
                    "param": param,
                }
            }),
            other => json!({
                "error": {
                    "message": other.to_string(),
                    "type": other.error_type(),
                }
            }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_violations_are_422() {
        assert_eq!(GatewayError::invalid_request("bad").to_http_status(), 422);
        assert_eq!(GatewayError::bad_request("bad").to_http_status(), 400);
    }

    #[test]
    fn hook_denial_is_446() {
        let err = GatewayError::HookDenied {
            hook_results: json!({"input_hooks": []}),
        };
        assert_eq!(err.to_http_status(), 446);
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryable_classes() {
        assert!(GatewayError::Timeout("t".into()).is_retryable());
        assert!(GatewayError::rate_limited("q", None).is_retryable());
        assert!(GatewayError::upstream("openai", "boom").is_retryable());
        assert!(!GatewayError::NotFound("skill".into()).is_retryable());
    }
}
