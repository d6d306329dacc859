//! sift-retriever: hybrid retrieval over keyword-tagged, embedded chunks
//!
//! Search combines two independent tiers:
//!
//! - **Vector tier**: the query is embedded and compared to stored chunk
//!   embeddings by cosine similarity.
//! - **Keyword tier**: query terms are matched against each chunk's keyword
//!   tags, and the matching chunks are ranked by a language model.
//!
//! The tiers are merged with Reciprocal Rank Fusion. The keyword tier is best
//! effort: if the model is slow, down, or answers nonsense, search returns
//! the vector results alone instead of failing.
//!
//! Indexing is incremental. [`retrieval::IncrementalIndexer`] compares fresh
//! chunks with stored ones by content hash and only embeds and tags what
//! changed.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Hybrid search, fusion, and the incremental indexer
//! - **[`storage`]**: Chunk store abstraction with a SQLite implementation
//! - **[`llm`]**: Language-model backend used for keywords and ranking
//! - **[`config`]**: TOML configuration for all of the above
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sift_embed::{EmbedConfig, HttpEmbeddingProvider};
//! use sift_retriever::llm::{LlmConfig, OpenAiChatBackend};
//! use sift_retriever::retrieval::{
//!     HybridSearchEngine, HybridSearchOptions, LlmKeywordRanker, QueryKeywordExtractor,
//!     SearchConfig,
//! };
//! use sift_retriever::storage::sqlite_store::SqliteStore;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open(Path::new(".sift/chunks.db")).await?);
//! let embedder = Arc::new(HttpEmbeddingProvider::new(EmbedConfig::default())?);
//! let llm = Arc::new(OpenAiChatBackend::new(LlmConfig::default())?);
//!
//! let engine = HybridSearchEngine::new(
//!     store,
//!     embedder,
//!     QueryKeywordExtractor::new(llm.clone()),
//!     Arc::new(LlmKeywordRanker::new(llm)),
//!     SearchConfig::default(),
//! );
//! let response = engine
//!     .hybrid_search("tax penalties for late filing", 5, HybridSearchOptions::default())
//!     .await?;
//! for result in response.results {
//!     println!("{:.3} {}", result.score, result.chunk.id);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! query ─┬─ embed ──────────────── nearest chunks ─────┐
//!        └─ extract terms ─ filter corpus ─ LLM rank ──┴─ RRF ─ results
//!
//! fresh chunks ─ hash diff ─ embed + tag changed ─ upsert / delete
//! ```

pub mod config;
pub mod error;
pub mod llm;
pub mod retrieval;
pub mod storage;

pub use error::{Result, RetrievalError};
