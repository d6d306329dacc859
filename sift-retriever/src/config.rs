//! Configuration file support.
//!
//! A single TOML file configures every component. All tables and fields are
//! optional:
//!
//! ```toml
//! database_path = "data/chunks.db"
//!
//! [search.fusion]
//! rrf_k = 60.0
//!
//! [search.keyword]
//! ranker_timeout_ms = 15000
//!
//! [embedding]
//! model_name = "text-embedding-3-small"
//! dimension = 1536
//! ```

use crate::llm::LlmConfig;
use crate::retrieval::{IndexerConfig, SearchConfig};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sift_embed::EmbedConfig;
use std::path::{Path, PathBuf};

/// Environment variable that overrides [`SiftConfig::database_path`].
pub const DATABASE_PATH_ENV: &str = "SIFT_DATABASE_PATH";

/// Database location used when neither the file nor the environment set one.
pub const DEFAULT_DATABASE_PATH: &str = ".sift/chunks.db";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    pub database_path: PathBuf,
    pub search: SearchConfig,
    pub indexer: IndexerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbedConfig,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            search: SearchConfig::default(),
            indexer: IndexerConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbedConfig::default(),
        }
    }
}

impl SiftConfig {
    /// Read a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config.with_env_overrides())
    }

    /// Parse and validate TOML text. Environment overrides are not applied.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_database_override(std::env::var(DATABASE_PATH_ENV).ok())
    }

    fn with_database_override(self, value: Option<String>) -> Self {
        match value {
            Some(path) if !path.trim().is_empty() => self.with_database_path(path),
            _ => self,
        }
    }

    /// Set the database path (builder style)
    pub fn with_database_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: path.into(),
            ..self
        }
    }

    /// Set the search configuration (builder style)
    pub fn with_search(self, search: SearchConfig) -> Self {
        Self { search, ..self }
    }

    /// Set the embedding configuration (builder style)
    pub fn with_embedding(self, embedding: EmbedConfig) -> Self {
        Self { embedding, ..self }
    }

    /// Set the language-model configuration (builder style)
    pub fn with_llm(self, llm: LlmConfig) -> Self {
        Self { llm, ..self }
    }

    /// Check values that would otherwise fail late or silently misbehave.
    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;

        let fusion = &self.search.fusion;
        if !fusion.rrf_k.is_finite() || fusion.rrf_k < 0.0 {
            bail!("search.fusion.rrf_k must be a non-negative number, got {}", fusion.rrf_k);
        }
        if self.search.tier_fetch_multiplier == 0 {
            bail!("search.tier_fetch_multiplier must be at least 1");
        }
        if self.search.keyword.estimated_tokens_per_candidate == 0 {
            bail!("search.keyword.estimated_tokens_per_candidate must be positive");
        }
        if self.indexer.embed_batch_size == 0 {
            bail!("indexer.embed_batch_size must be positive");
        }
        if self.indexer.keyword_concurrency == 0 {
            bail!("indexer.keyword_concurrency must be positive");
        }
        Ok(())
    }
}
