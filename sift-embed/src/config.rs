//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default endpoint for OpenAI-compatible embedding services.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for an OpenAI-compatible embedding service.
///
/// Every field has a default, so a partially filled TOML table (or the builder
/// with only a couple of setters) yields a usable configuration.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(default)]
pub struct EmbedConfig {
    /// Base URL of the service; `/embeddings` is appended to it
    #[builder(default = r#"DEFAULT_BASE_URL.to_string()"#)]
    pub base_url: String,
    /// Name of the embedding model to request
    #[builder(default = r#""text-embedding-3-small".to_string()"#)]
    pub model_name: String,
    /// Dimension every returned vector must have
    #[builder(default = "1536")]
    pub dimension: usize,
    /// Maximum number of texts sent in one request
    #[builder(default = "100")]
    pub batch_size: usize,
    /// Environment variable holding the API key
    #[builder(default = r#""OPENAI_API_KEY".to_string()"#)]
    pub api_key_env: String,
    /// Per-request timeout in seconds
    #[builder(default = "30")]
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    #[builder(default = "2")]
    pub max_retries: u32,
    /// Whether to L2-normalize vectors before returning them
    #[builder(default = "false")]
    pub normalize: bool,
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Create a configuration for `model_name` producing `dimension`-sized vectors
    pub fn new(model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_name: model_name.into(),
            dimension,
            ..Self::default()
        }
    }

    /// Set the base URL (builder style)
    pub fn with_base_url<S: Into<String>>(self, base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..self
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    /// Set the environment variable the API key is read from (builder style)
    pub fn with_api_key_env<S: Into<String>>(self, api_key_env: S) -> Self {
        Self {
            api_key_env: api_key_env.into(),
            ..self
        }
    }

    /// Full URL of the embeddings endpoint
    pub fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the configuration values
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(EmbedError::invalid_config("base_url must not be empty"));
        }
        if self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("model_name must not be empty"));
        }
        if self.dimension == 0 {
            return Err(EmbedError::invalid_config("dimension must be positive"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be positive"));
        }
        Ok(())
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model_name: "text-embedding-3-small".to_string(),
            dimension: 1536,
            batch_size: 100,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            normalize: false,
        }
    }
}
