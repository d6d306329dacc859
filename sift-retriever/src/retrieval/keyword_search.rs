//! Keyword tier of hybrid search.
//!
//! ## Pipeline
//!
//! 1. Extract query terms (model or fallback tokenizer).
//! 2. Keep corpus chunks with at least one keyword containing a query term
//!    (case-insensitive substring). Chunks without keywords never qualify.
//! 3. If more candidates remain than the ranker token budget allows, keep the
//!    ones matching the most distinct terms. The sort is stable, so equal
//!    counts keep corpus order.
//! 4. Ask the [`KeywordRanker`] to score the candidate summaries, under a
//!    timeout, and validate its answer.
//! 5. Sort by relevance and cut to `top_k`.
//!
//! Every failure after step 1 yields an empty result list. The reason is
//! reported separately in [`KeywordTierStatus`] so the result shape stays the
//! same whether nothing matched or the ranker was down.

use super::corpus::CorpusCache;
use super::keyword_ranker::{CandidateSummary, KeywordRanker, validate_rankings};
use super::query_keywords::{ExtractedTerms, QueryKeywordExtractor};
use super::types::SearchResult;
use crate::llm::LlmResponse;
use crate::storage::Chunk;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Budget and timeouts for the keyword tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordSearchConfig {
    /// Maximum prompt tokens spent on candidate summaries
    pub max_ranker_input_tokens: usize,
    /// Estimated prompt tokens per candidate summary
    pub estimated_tokens_per_candidate: usize,
    pub ranker_timeout_ms: u64,
    pub extractor_timeout_ms: u64,
}

impl Default for KeywordSearchConfig {
    fn default() -> Self {
        Self {
            max_ranker_input_tokens: 6000,
            estimated_tokens_per_candidate: 30,
            ranker_timeout_ms: 20_000,
            extractor_timeout_ms: 10_000,
        }
    }
}

impl KeywordSearchConfig {
    /// Most candidates the ranker may be sent; always at least one.
    pub fn candidate_cap(&self) -> usize {
        (self.max_ranker_input_tokens / self.estimated_tokens_per_candidate.max(1)).max(1)
    }

    pub fn ranker_timeout(&self) -> Duration {
        Duration::from_millis(self.ranker_timeout_ms)
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_millis(self.extractor_timeout_ms)
    }

    /// Set the ranker token budget (builder style)
    pub fn with_token_budget(self, max_ranker_input_tokens: usize, per_candidate: usize) -> Self {
        Self {
            max_ranker_input_tokens,
            estimated_tokens_per_candidate: per_candidate,
            ..self
        }
    }

    /// Set the ranker timeout (builder style)
    pub fn with_ranker_timeout(self, timeout: Duration) -> Self {
        Self {
            ranker_timeout_ms: timeout.as_millis() as u64,
            ..self
        }
    }
}

/// Why the keyword tier produced what it produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordTierStatus {
    /// The ranker scored the candidates
    Ranked,
    /// The query yielded no search terms
    NoTerms,
    /// No chunk keyword matched any term
    NoMatches,
    /// The ranker errored or answered with something unusable
    RankerFailed,
    /// The ranker did not answer within the timeout
    RankerTimedOut,
}

/// Result of the keyword tier with diagnostics
#[derive(Debug, Clone)]
pub struct KeywordSearchOutcome {
    pub results: Vec<SearchResult>,
    pub status: KeywordTierStatus,
    pub terms: ExtractedTerms,
    /// Candidates sent to the ranker after budget truncation
    pub candidates_ranked: usize,
}

/// Number of distinct `terms` found inside any of the chunk's keywords.
pub fn matched_term_count(chunk: &Chunk, terms: &[String]) -> usize {
    if chunk.keywords.is_empty() {
        return 0;
    }
    let keywords: Vec<String> = chunk.keywords.iter().map(|k| k.to_lowercase()).collect();
    terms
        .iter()
        .filter(|term| {
            let term = term.to_lowercase();
            !term.is_empty() && keywords.iter().any(|k| k.contains(&term))
        })
        .count()
}

/// Chunks matching at least one term, in corpus order, with their match counts.
pub fn filter_candidates<'a>(chunks: &'a [Chunk], terms: &[String]) -> Vec<(&'a Chunk, usize)> {
    chunks
        .iter()
        .filter_map(|chunk| {
            let matches = matched_term_count(chunk, terms);
            (matches > 0).then_some((chunk, matches))
        })
        .collect()
}

/// Keep at most `cap` candidates, preferring higher match counts.
///
/// Does nothing when the candidates already fit. Equal counts keep their
/// input order.
pub fn apply_budget<T>(mut candidates: Vec<(T, usize)>, cap: usize) -> Vec<(T, usize)> {
    if candidates.len() > cap {
        tracing::debug!(
            "Truncating {} keyword candidates to budget of {}",
            candidates.len(),
            cap
        );
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates.truncate(cap);
    }
    candidates
}

/// Run the keyword tier: extract terms, then filter and rank the corpus.
pub async fn keyword_search(
    query: &str,
    corpus: &CorpusCache,
    top_k: usize,
    extractor: &QueryKeywordExtractor,
    ranker: &dyn KeywordRanker,
    config: &KeywordSearchConfig,
) -> KeywordSearchOutcome {
    let terms = extractor
        .extract_within(query, config.extractor_timeout())
        .await;
    rank_with_terms(query, terms, corpus, top_k, ranker, config).await
}

/// Keyword tier for already extracted terms.
pub async fn rank_with_terms(
    query: &str,
    terms: ExtractedTerms,
    corpus: &CorpusCache,
    top_k: usize,
    ranker: &dyn KeywordRanker,
    config: &KeywordSearchConfig,
) -> KeywordSearchOutcome {
    let outcome = |results, status, candidates_ranked, terms| KeywordSearchOutcome {
        results,
        status,
        terms,
        candidates_ranked,
    };

    if terms.is_empty() {
        tracing::debug!("No search terms for query, keyword tier is empty");
        return outcome(Vec::new(), KeywordTierStatus::NoTerms, 0, terms);
    }

    let candidates = filter_candidates(corpus.chunks(), &terms.terms);
    if candidates.is_empty() {
        tracing::debug!("No chunk keywords matched {:?}", terms.terms);
        return outcome(Vec::new(), KeywordTierStatus::NoMatches, 0, terms);
    }

    // Summaries carry chunk ids; ranked entries are resolved back through the snapshot.
    let summaries: Vec<CandidateSummary> = apply_budget(candidates, config.candidate_cap())
        .into_iter()
        .enumerate()
        .map(|(index, (chunk, _))| CandidateSummary::from_chunk(index, chunk))
        .collect();

    let raw = match tokio::time::timeout(config.ranker_timeout(), ranker.rank(query, &summaries))
        .await
    {
        Ok(LlmResponse::Ok(raw)) => raw,
        Ok(LlmResponse::Malformed(raw)) => {
            tracing::warn!(
                "Keyword ranker returned malformed output, keyword tier is empty: {}",
                raw.chars().take(200).collect::<String>()
            );
            return outcome(
                Vec::new(),
                KeywordTierStatus::RankerFailed,
                summaries.len(),
                terms,
            );
        }
        Ok(LlmResponse::ProviderError(cause)) => {
            tracing::warn!("Keyword ranker failed ({cause}), keyword tier is empty");
            return outcome(
                Vec::new(),
                KeywordTierStatus::RankerFailed,
                summaries.len(),
                terms,
            );
        }
        Err(_) => {
            tracing::warn!(
                "Keyword ranker timed out after {:?}, keyword tier is empty",
                config.ranker_timeout()
            );
            return outcome(
                Vec::new(),
                KeywordTierStatus::RankerTimedOut,
                summaries.len(),
                terms,
            );
        }
    };

    let mut ranked = validate_rankings(raw, &summaries);
    ranked.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });
    ranked.truncate(top_k);

    let results: Vec<SearchResult> = ranked
        .into_iter()
        .filter_map(|r| {
            let id = &summaries[r.index].chunk_id;
            let chunk = corpus.get(id);
            if chunk.is_none() {
                tracing::warn!("Ranked chunk {} is missing from the corpus snapshot", id);
            }
            chunk.map(|chunk| SearchResult::keyword(chunk.clone(), r.relevance))
        })
        .collect();

    tracing::debug!(
        "Keyword tier ranked {} candidates, returning {}",
        summaries.len(),
        results.len()
    );
    outcome(results, KeywordTierStatus::Ranked, summaries.len(), terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::keyword_ranker::RawRanking;
    use crate::retrieval::query_keywords::TermSource;
    use crate::retrieval::test_support::tagged_chunk;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Ranker that scores candidates by a fixed table of chunk ids.
    struct TableRanker {
        scores: Vec<(&'static str, f64)>,
        extra: Vec<RawRanking>,
        seen: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl TableRanker {
        fn new(scores: Vec<(&'static str, f64)>) -> Self {
            Self {
                scores,
                extra: Vec::new(),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl KeywordRanker for TableRanker {
        async fn rank(
            &self,
            _query: &str,
            candidates: &[CandidateSummary],
        ) -> LlmResponse<Vec<RawRanking>> {
            self.seen
                .lock()
                .unwrap()
                .push(candidates.iter().map(|c| c.chunk_id.clone()).collect());
            let mut raw: Vec<RawRanking> = candidates
                .iter()
                .filter_map(|c| {
                    self.scores
                        .iter()
                        .find(|(id, _)| *id == c.chunk_id)
                        .map(|(_, score)| RawRanking {
                            index: c.index as i64,
                            score: *score,
                        })
                })
                .collect();
            raw.extend(self.extra.iter().copied());
            LlmResponse::Ok(raw)
        }
    }

    struct BrokenRanker(LlmResponse<Vec<RawRanking>>);

    #[async_trait]
    impl KeywordRanker for BrokenRanker {
        async fn rank(&self, _: &str, _: &[CandidateSummary]) -> LlmResponse<Vec<RawRanking>> {
            self.0.clone()
        }
    }

    struct StalledRanker;

    #[async_trait]
    impl KeywordRanker for StalledRanker {
        async fn rank(&self, _: &str, _: &[CandidateSummary]) -> LlmResponse<Vec<RawRanking>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            LlmResponse::Ok(Vec::new())
        }
    }

    fn terms(list: &[&str]) -> ExtractedTerms {
        ExtractedTerms {
            terms: list.iter().map(|t| t.to_string()).collect(),
            source: TermSource::Model,
        }
    }

    fn tax_corpus() -> CorpusCache {
        CorpusCache::from_chunks(vec![
            tagged_chunk("c1", "Late filing", &["tax", "penalty"]),
            tagged_chunk("c2", "Bookkeeping tools", &["Tax", "software"]),
            tagged_chunk("c3", "Ledgers", &["accounting"]),
            tagged_chunk("c4", "Untagged", &[]),
        ])
    }

    #[test]
    fn test_matched_term_count_is_substring_and_case_insensitive() {
        let chunk = tagged_chunk("a", "", &["Late-Filing Penalty", "taxes"]);
        let query = vec!["tax".to_string(), "penalty".to_string(), "audit".to_string()];
        assert_eq!(matched_term_count(&chunk, &query), 2);

        let bare = tagged_chunk("b", "", &[]);
        assert_eq!(matched_term_count(&bare, &query), 0);
    }

    #[test]
    fn test_filter_keeps_corpus_order() {
        let corpus = tax_corpus();
        let candidates = filter_candidates(corpus.chunks(), &["tax".to_string()]);
        let ids: Vec<_> = candidates.iter().map(|(c, _)| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_budget_keeps_best_match_and_is_stable() {
        let candidates = vec![("a", 1), ("b", 2), ("c", 1), ("d", 3), ("e", 2)];
        assert_eq!(
            apply_budget(candidates.clone(), 3),
            vec![("d", 3), ("b", 2), ("e", 2)]
        );
        assert_eq!(apply_budget(candidates.clone(), 1), vec![("d", 3)]);
        assert_eq!(apply_budget(candidates.clone(), 10), candidates);
    }

    #[test]
    fn test_candidate_cap() {
        assert_eq!(KeywordSearchConfig::default().candidate_cap(), 200);
        let tiny = KeywordSearchConfig::default().with_token_budget(10, 30);
        assert_eq!(tiny.candidate_cap(), 1);
        let degenerate = KeywordSearchConfig::default().with_token_budget(100, 0);
        assert_eq!(degenerate.candidate_cap(), 100);
    }

    #[tokio::test]
    async fn test_ranks_filtered_candidates() {
        let ranker = TableRanker::new(vec![("c1", 9.0), ("c2", 4.0)]);
        let corpus = tax_corpus();
        let outcome = rank_with_terms(
            "tax penalties for late filing",
            terms(&["tax", "penalties", "late", "filing"]),
            &corpus,
            10,
            &ranker,
            &KeywordSearchConfig::default(),
        )
        .await;

        assert_eq!(outcome.status, KeywordTierStatus::Ranked);
        assert_eq!(outcome.candidates_ranked, 2);
        let ids: Vec<_> = outcome.results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(outcome.results[0].keyword_score, Some(0.9));
        assert_eq!(ranker.seen.lock().unwrap()[0], vec!["c1", "c2"]);
        assert_eq!(Some(&outcome.results[1].chunk), corpus.get("c2"));
    }

    #[tokio::test]
    async fn test_results_sorted_and_truncated() {
        let ranker = TableRanker::new(vec![("c1", 2.0), ("c2", 8.0)]);
        let outcome = rank_with_terms(
            "tax",
            terms(&["tax"]),
            &tax_corpus(),
            1,
            &ranker,
            &KeywordSearchConfig::default(),
        )
        .await;
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].id(), "c2");
    }

    #[tokio::test]
    async fn test_out_of_range_entry_is_ignored() {
        let mut ranker = TableRanker::new(vec![("c1", 7.0), ("c2", 5.0)]);
        ranker.extra.push(RawRanking {
            index: 50,
            score: 10.0,
        });
        let outcome = rank_with_terms(
            "tax",
            terms(&["tax"]),
            &tax_corpus(),
            10,
            &ranker,
            &KeywordSearchConfig::default(),
        )
        .await;
        assert_eq!(outcome.status, KeywordTierStatus::Ranked);
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn test_budget_truncation_reaches_ranker() {
        let corpus = CorpusCache::from_chunks(vec![
            tagged_chunk("weak-1", "", &["tax"]),
            tagged_chunk("weak-2", "", &["tax"]),
            tagged_chunk("best", "", &["tax", "penalty", "late filing"]),
            tagged_chunk("weak-3", "", &["tax"]),
        ]);
        let ranker = TableRanker::new(vec![("best", 10.0), ("weak-1", 1.0)]);
        let config = KeywordSearchConfig::default().with_token_budget(60, 30);

        let outcome = rank_with_terms(
            "q",
            terms(&["tax", "penalty", "late"]),
            &corpus,
            10,
            &ranker,
            &config,
        )
        .await;

        assert_eq!(outcome.candidates_ranked, 2);
        assert_eq!(ranker.seen.lock().unwrap()[0], vec!["best", "weak-1"]);
        assert_eq!(outcome.results[0].id(), "best");
    }

    #[tokio::test]
    async fn test_empty_terms_and_no_matches() {
        let ranker = TableRanker::new(Vec::new());
        let config = KeywordSearchConfig::default();

        let none = rank_with_terms("?", terms(&[]), &tax_corpus(), 5, &ranker, &config).await;
        assert_eq!(none.status, KeywordTierStatus::NoTerms);
        assert!(none.results.is_empty());

        let miss =
            rank_with_terms("q", terms(&["payroll"]), &tax_corpus(), 5, &ranker, &config).await;
        assert_eq!(miss.status, KeywordTierStatus::NoMatches);
        assert!(miss.results.is_empty());
        assert!(ranker.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ranker_failures_yield_empty_tier() {
        let config = KeywordSearchConfig::default();
        for (ranker, expected) in [
            (
                BrokenRanker(LlmResponse::Malformed("nope".into())),
                KeywordTierStatus::RankerFailed,
            ),
            (
                BrokenRanker(LlmResponse::ProviderError("down".into())),
                KeywordTierStatus::RankerFailed,
            ),
        ] {
            let outcome =
                rank_with_terms("tax", terms(&["tax"]), &tax_corpus(), 5, &ranker, &config).await;
            assert_eq!(outcome.status, expected);
            assert!(outcome.results.is_empty());
        }
    }

    #[tokio::test]
    async fn test_stalled_ranker_times_out() {
        let config =
            KeywordSearchConfig::default().with_ranker_timeout(Duration::from_millis(20));
        let outcome =
            rank_with_terms("tax", terms(&["tax"]), &tax_corpus(), 5, &StalledRanker, &config)
                .await;
        assert_eq!(outcome.status, KeywordTierStatus::RankerTimedOut);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_uses_fallback_terms() {
        let ranker = TableRanker::new(vec![("c1", 9.0), ("c2", 3.0)]);
        let outcome = keyword_search(
            "tax penalties for late filing",
            &tax_corpus(),
            5,
            &QueryKeywordExtractor::fallback_only(),
            &ranker,
            &KeywordSearchConfig::default(),
        )
        .await;

        assert_eq!(outcome.terms.source, TermSource::Fallback);
        assert_eq!(outcome.results[0].id(), "c1");
    }
}
