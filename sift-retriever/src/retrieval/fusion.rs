//! Fusion of the vector and keyword tiers.
//!
//! The default is Reciprocal Rank Fusion: each result contributes
//! `1 / (k + rank)` for its 1-based rank in its tier, and a chunk present in
//! both tiers gets the sum. Only list position matters, so cosine similarities
//! and model-assigned relevance never need to share a scale.
//!
//! The older weighted-score fusion is kept behind [`FusionConfig::use_rrf`].
//! It is the only mode that applies [`FusionConfig::min_score`].
//!
//! Both modes are deterministic: a chunk's position among equal fused scores
//! is its first appearance, walking the vector list and then the keyword
//! list.

use super::types::{SearchMethod, SearchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fusion settings.
///
/// `rrf_k` defaults to 1, which favours top-ranked items strongly. The
/// literature value of 60 flattens the curve so that deeper ranks matter more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub use_rrf: bool,
    pub rrf_k: f32,
    /// Floor for weighted fusion; ignored by RRF
    pub min_score: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            use_rrf: true,
            rrf_k: 1.0,
            min_score: 0.05,
            vector_weight: 0.5,
            keyword_weight: 0.5,
        }
    }
}

impl FusionConfig {
    /// Set the RRF constant (builder style)
    pub fn with_rrf_k(self, rrf_k: f32) -> Self {
        Self { rrf_k, ..self }
    }

    /// Use weighted-score fusion instead of RRF (builder style)
    pub fn weighted(self, vector_weight: f32, keyword_weight: f32) -> Self {
        Self {
            use_rrf: false,
            vector_weight,
            keyword_weight,
            ..self
        }
    }
}

/// Fuse with whichever mode `config` selects.
pub fn fuse(
    vector_results: &[SearchResult],
    keyword_results: &[SearchResult],
    config: &FusionConfig,
) -> Vec<SearchResult> {
    if config.use_rrf {
        combine_with_rrf(vector_results, keyword_results, config.rrf_k)
    } else {
        combine_weighted(vector_results, keyword_results, config)
    }
}

/// Per-chunk accumulator, kept in first-appearance order.
struct Fused {
    entries: Vec<SearchResult>,
    positions: HashMap<String, usize>,
}

impl Fused {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
        }
    }

    fn entry(&mut self, result: &SearchResult) -> &mut SearchResult {
        let index = match self.positions.get(&result.chunk.id) {
            Some(&index) => index,
            None => {
                self.entries.push(SearchResult {
                    chunk: result.chunk.clone(),
                    score: 0.0,
                    vector_score: None,
                    keyword_score: None,
                    combined_score: Some(0.0),
                    method: SearchMethod::Hybrid,
                });
                let index = self.entries.len() - 1;
                self.positions.insert(result.chunk.id.clone(), index);
                index
            }
        };
        &mut self.entries[index]
    }

    fn add(&mut self, result: &SearchResult, contribution: f32) {
        let entry = self.entry(result);
        let total = entry.combined_score.unwrap_or(0.0) + contribution;
        entry.combined_score = Some(total);
        entry.score = total;
        match result.method {
            SearchMethod::Keyword => {
                entry.keyword_score = entry.keyword_score.or(Some(result.score));
            }
            _ => entry.vector_score = entry.vector_score.or(Some(result.score)),
        }
    }

    /// Stable sort by fused score, best first
    fn into_sorted(mut self) -> Vec<SearchResult> {
        self.entries
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        self.entries
    }
}

/// Reciprocal Rank Fusion of two pre-sorted tier lists.
///
/// A chunk listed twice within one tier only counts at its first rank.
pub fn combine_with_rrf(
    vector_results: &[SearchResult],
    keyword_results: &[SearchResult],
    k: f32,
) -> Vec<SearchResult> {
    let mut fused = Fused::new(vector_results.len() + keyword_results.len());

    for tier in [vector_results, keyword_results] {
        let mut seen = std::collections::HashSet::new();
        for (rank, result) in tier.iter().enumerate() {
            if !seen.insert(result.chunk.id.as_str()) {
                continue;
            }
            fused.add(result, 1.0 / (k + (rank + 1) as f32));
        }
    }

    fused.into_sorted()
}

/// Weighted-score fusion.
///
/// `combined = vector_weight * vector_score + keyword_weight * keyword_score`,
/// with a missing tier counting as 0. Results below `min_score` are dropped.
pub fn combine_weighted(
    vector_results: &[SearchResult],
    keyword_results: &[SearchResult],
    config: &FusionConfig,
) -> Vec<SearchResult> {
    let mut fused = Fused::new(vector_results.len() + keyword_results.len());

    for (tier, weight) in [
        (vector_results, config.vector_weight),
        (keyword_results, config.keyword_weight),
    ] {
        let mut seen = std::collections::HashSet::new();
        for result in tier {
            if !seen.insert(result.chunk.id.as_str()) {
                continue;
            }
            fused.add(result, weight * result.score);
        }
    }

    let mut results = fused.into_sorted();
    results.retain(|r| r.score >= config.min_score);
    results
}
