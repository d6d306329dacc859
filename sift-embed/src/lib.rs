//! # sift-embed
//!
//! Text embeddings for the sift retrieval engine. The crate defines the
//! [`EmbeddingProvider`] trait the rest of the workspace programs against and
//! ships one implementation, [`HttpEmbeddingProvider`], which talks to any
//! OpenAI-compatible `/embeddings` endpoint (OpenAI itself, Ollama, vLLM, LM
//! Studio and similar).
//!
//! ## Features
//!
//! - **Async-First Design**: Full async/await support with tokio integration
//! - **Batching**: Large inputs are split into configurable request batches
//! - **Retry with Backoff**: Rate limits and server errors are retried
//! - **Half-Precision**: Vectors are returned as `f16` to halve storage size
//! - **Contract Checks**: Wrong vector counts or dimensions surface as errors
//!
//! ## Quick Start
//!
//! ```no_run
//! use sift_embed::{EmbedConfig, EmbeddingProvider, HttpEmbeddingProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = HttpEmbeddingProvider::new(
//!     EmbedConfig::new("text-embedding-3-small", 1536),
//! )?;
//!
//! let texts = vec!["Hello world".to_string(), "How are you?".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}",
//!          result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`]: Provider configuration
//! - [`provider`]: The provider trait and the HTTP implementation
//! - [`error`]: Error types and result handling

pub mod config;
pub mod error;
pub mod provider;

pub use config::{EmbedConfig, EmbedConfigBuilder};
pub use error::{EmbedError, Result};
pub use provider::{
    EmbeddingProvider, EmbeddingResult, HttpEmbeddingProvider, MAX_BACKOFF, backoff_delay,
};
