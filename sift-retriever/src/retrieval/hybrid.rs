//! Hybrid search facade: vector tier plus keyword tier, fused.

use super::corpus::CorpusCache;
use super::fusion::{FusionConfig, fuse};
use super::keyword_ranker::KeywordRanker;
use super::keyword_search::{
    KeywordSearchConfig, KeywordSearchOutcome, KeywordTierStatus, rank_with_terms,
};
use super::query_keywords::{QueryKeywordExtractor, TermSource};
use super::types::SearchResult;
use super::vector_search::vector_search;
use crate::error::Result;
use crate::storage::CombinedStore;
use serde::{Deserialize, Serialize};
use sift_embed::EmbeddingProvider;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for [`HybridSearchEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub keyword: KeywordSearchConfig,
    pub fusion: FusionConfig,
    /// Each tier is asked for `top_k * tier_fetch_multiplier` results
    pub tier_fetch_multiplier: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keyword: KeywordSearchConfig::default(),
            fusion: FusionConfig::default(),
            tier_fetch_multiplier: 2,
        }
    }
}

impl SearchConfig {
    /// Set the keyword tier configuration (builder style)
    pub fn with_keyword(self, keyword: KeywordSearchConfig) -> Self {
        Self { keyword, ..self }
    }

    /// Set the fusion configuration (builder style)
    pub fn with_fusion(self, fusion: FusionConfig) -> Self {
        Self { fusion, ..self }
    }

    fn tier_limit(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.tier_fetch_multiplier.max(1))
    }
}

/// Per-call options for [`HybridSearchEngine::hybrid_search`].
#[derive(Debug, Clone, Default)]
pub struct HybridSearchOptions {
    /// Restrict both tiers to one collection
    pub collection_filter: Option<String>,
    /// Include the per-tier lists in the response
    pub verbose: bool,
}

impl HybridSearchOptions {
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            collection_filter: Some(collection_id.into()),
            ..Self::default()
        }
    }

    pub fn with_verbose(self, verbose: bool) -> Self {
        Self { verbose, ..self }
    }
}

/// Per-tier view of a hybrid search, for diagnostics and tuning only.
#[derive(Debug, Clone, Serialize)]
pub struct SearchBreakdown {
    pub query_terms: Vec<String>,
    pub term_source: TermSource,
    pub vector_results: Vec<SearchResult>,
    pub keyword_results: Vec<SearchResult>,
    pub keyword_status: KeywordTierStatus,
    pub corpus_size: usize,
}

/// Fused results, plus the breakdown when the call was verbose.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HybridSearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<SearchBreakdown>,
}

/// Read-only search over a chunk store.
///
/// Holds no per-query state. Every call loads its own [`CorpusCache`], so
/// concurrent searches never observe each other and never see a partially
/// applied reconciliation.
pub struct HybridSearchEngine {
    store: Arc<dyn CombinedStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: QueryKeywordExtractor,
    ranker: Arc<dyn KeywordRanker>,
    config: SearchConfig,
}

impl HybridSearchEngine {
    pub fn new(
        store: Arc<dyn CombinedStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: QueryKeywordExtractor,
        ranker: Arc<dyn KeywordRanker>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            ranker,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search both tiers and fuse them into at most `top_k` results.
    ///
    /// Fails only when the vector tier or the chunk store fails. Any keyword
    /// tier problem leaves that tier empty, and the fused list is then the
    /// vector list re-scored.
    pub async fn hybrid_search(
        &self,
        query: &str,
        top_k: usize,
        options: HybridSearchOptions,
    ) -> Result<HybridSearchResponse> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            debug!("Empty query or top_k of zero, skipping search");
            return Ok(HybridSearchResponse::default());
        }

        let collection = options.collection_filter.as_deref();
        let tier_limit = self.config.tier_limit(top_k);

        let (vector, keyword) = tokio::join!(
            vector_search(
                self.store.as_ref(),
                self.embedder.as_ref(),
                query,
                tier_limit,
                collection,
            ),
            self.keyword_tier(query, tier_limit, collection),
        );
        let vector_results = vector?;
        let (keyword, corpus_size) = keyword?;

        let mut results = fuse(&vector_results, &keyword.results, &self.config.fusion);
        results.truncate(top_k);

        info!(
            "Hybrid search returned {} results ({} vector, {} keyword, keyword tier {:?})",
            results.len(),
            vector_results.len(),
            keyword.results.len(),
            keyword.status
        );

        let breakdown = options.verbose.then(|| SearchBreakdown {
            query_terms: keyword.terms.terms,
            term_source: keyword.terms.source,
            vector_results,
            keyword_results: keyword.results,
            keyword_status: keyword.status,
            corpus_size,
        });

        Ok(HybridSearchResponse { results, breakdown })
    }

    /// Vector tier on its own.
    pub async fn vector_search(
        &self,
        query: &str,
        top_k: usize,
        collection_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        vector_search(
            self.store.as_ref(),
            self.embedder.as_ref(),
            query,
            top_k,
            collection_filter,
        )
        .await
    }

    /// Keyword tier on its own, over a freshly loaded corpus.
    pub async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        collection_filter: Option<&str>,
    ) -> Result<KeywordSearchOutcome> {
        let (outcome, _) = self.keyword_tier(query, top_k, collection_filter).await?;
        Ok(outcome)
    }

    async fn keyword_tier(
        &self,
        query: &str,
        top_k: usize,
        collection_filter: Option<&str>,
    ) -> Result<(KeywordSearchOutcome, usize)> {
        let (corpus, terms) = tokio::join!(
            CorpusCache::load(self.store.as_ref(), collection_filter),
            self.extractor
                .extract_within(query, self.config.keyword.extractor_timeout()),
        );
        let corpus = corpus?;
        let outcome = rank_with_terms(
            query,
            terms,
            &corpus,
            top_k,
            self.ranker.as_ref(),
            &self.config.keyword,
        )
        .await;
        Ok((outcome, corpus.len()))
    }
}
