//! Hybrid retrieval and incremental indexing.
//!
//! Query path (read-only): [`hybrid::HybridSearchEngine`] runs
//! [`vector_search`] and [`keyword_search`] and merges them with [`fusion`].
//!
//! Write path: [`indexer::IncrementalIndexer`] reconciles fresh chunks into
//! the store.

pub mod chunk_keywords;
pub mod corpus;
pub mod fusion;
pub mod hybrid;
pub mod indexer;
pub mod keyword_ranker;
pub mod keyword_search;
pub mod query_keywords;
pub mod types;
pub mod vector_search;

#[cfg(test)]
mod test_support;

pub use chunk_keywords::{ChunkKeywordGenerator, LlmChunkKeywordGenerator};
pub use corpus::CorpusCache;
pub use fusion::{FusionConfig, combine_weighted, combine_with_rrf, fuse};
pub use hybrid::{
    HybridSearchEngine, HybridSearchOptions, HybridSearchResponse, SearchBreakdown, SearchConfig,
};
pub use indexer::{IncrementalIndexer, IndexerConfig, ReconcileOptions, ReconcileStats};
pub use keyword_ranker::{CandidateSummary, KeywordRanker, LlmKeywordRanker, RawRanking};
pub use keyword_search::{KeywordSearchConfig, KeywordSearchOutcome, KeywordTierStatus};
pub use query_keywords::{ExtractedTerms, QueryKeywordExtractor, TermSource};
pub use types::{SearchMethod, SearchResult};
