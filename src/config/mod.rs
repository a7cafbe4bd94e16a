//! Gateway bootstrap configuration
//!
//! Layered from an optional YAML file and `IDK_GATEWAY_*` environment
//! overrides. This is process-level configuration only; per-request
//! behavior arrives in the `x-idk-config` envelope.

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::utils::error::{GatewayError, Result};

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Embedding endpoint for semantic routing and the semantic cache
    #[serde(default)]
    pub embeddings: Option<EmbeddingsConfig>,
    /// Upstream used for reentrant LLM-judge calls
    #[serde(default)]
    pub judge: Option<JudgeConfig>,
    /// Default upstream deadline when the envelope does not set one
    #[serde(default = "GatewayConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl GatewayConfig {
    fn default_request_timeout_ms() -> u64 {
        120_000
    }

    /// Load from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            let raw = path.to_str().ok_or_else(|| {
                GatewayError::Config("config path is not valid UTF-8".into())
            })?;
            builder = builder.add_source(File::new(raw, FileFormat::Yaml));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("IDK_GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation; fails fast on nonsense
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(GatewayError::Config("server.port must be non-zero".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(GatewayError::Config(
                "request_timeout_ms must be non-zero".into(),
            ));
        }
        if let Some(judge) = &self.judge {
            if judge.provider.is_empty() {
                return Err(GatewayError::Config("judge.provider is required".into()));
            }
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            embeddings: None,
            judge: None,
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// HTTP server binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    /// Worker threads; zero means one per core
    #[serde(default)]
    pub workers: usize,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8787
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            workers: 0,
        }
    }
}

/// Logging setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

/// Embedding endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "EmbeddingsConfig::default_model")]
    pub model: String,
}

impl EmbeddingsConfig {
    fn default_model() -> String {
        "text-embedding-3-small".to_string()
    }
}

/// Judge upstream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub custom_host: Option<String>,
    #[serde(default = "JudgeConfig::default_model")]
    pub model: String,
}

impl JudgeConfig {
    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  host: 127.0.0.1\n  port: 9090\nlogging:\n  level: debug\njudge:\n  provider: openai\n  api_key: sk-test"
        )
        .unwrap();
        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.judge.as_ref().unwrap().provider, "openai");
    }

    #[test]
    fn rejects_empty_judge_provider() {
        let config = GatewayConfig {
            judge: Some(JudgeConfig {
                provider: String::new(),
                api_key: None,
                custom_host: None,
                model: "gpt-4o-mini".into(),
            }),
            server: ServerConfig::default(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
