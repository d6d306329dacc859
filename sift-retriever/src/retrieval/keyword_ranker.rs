//! Relevance ranking of keyword-matched candidates by a language model.
//!
//! The ranker sees only a compact summary per candidate (its keywords and the
//! subset of them that also occur in the document title), never the chunk
//! text. Whatever it returns is validated by [`validate_rankings`] before any
//! score reaches a search result.

use crate::llm::{CompletionBackend, CompletionRequest, LlmResponse, request_json};
use crate::storage::Chunk;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Upper end of the rubric the ranker scores on.
pub const MAX_RUBRIC_SCORE: f64 = 10.0;

/// What the ranker is told about one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    /// Position in the candidate list sent to the ranker
    pub index: usize,
    #[serde(skip)]
    pub chunk_id: String,
    pub keywords: Vec<String>,
    /// Keywords that also appear in the document title; weighted 3x by the rubric
    pub title_keywords: Vec<String>,
}

impl CandidateSummary {
    pub fn from_chunk(index: usize, chunk: &Chunk) -> Self {
        let title = words(&chunk.metadata.title);
        let title_keywords = chunk
            .keywords
            .iter()
            .filter(|k| {
                let keyword = words(k);
                !keyword.is_empty() && title.windows(keyword.len()).any(|w| w == keyword)
            })
            .cloned()
            .collect();

        Self {
            index,
            chunk_id: chunk.id.clone(),
            keywords: chunk.keywords.clone(),
            title_keywords,
        }
    }
}

/// Lowercase words of `text`, split at every non-alphanumeric character.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// A ranking entry as returned by the ranker, before validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRanking {
    pub index: i64,
    /// Relevance on the 0 to [`MAX_RUBRIC_SCORE`] rubric
    pub score: f64,
}

/// A validated ranking entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedRanking {
    pub index: usize,
    /// Relevance normalised to `[0, 1]`
    pub relevance: f32,
}

/// Scores keyword-matched candidates for a query.
#[async_trait]
pub trait KeywordRanker: Send + Sync {
    /// Score every candidate. Scores use the 0 to 10 rubric.
    async fn rank(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
    ) -> LlmResponse<Vec<RawRanking>>;
}

/// Check ranker output against the candidate list.
///
/// Out-of-range indexes and non-finite scores are dropped with a warning,
/// repeated indexes keep their first score, and scores are mapped from the
/// rubric onto `[0, 1]`. Candidates the ranker left out are logged. Output
/// keeps the ranker's order.
pub fn validate_rankings(
    raw: Vec<RawRanking>,
    candidates: &[CandidateSummary],
) -> Vec<ValidatedRanking> {
    let mut seen = HashSet::new();
    let mut validated = Vec::with_capacity(raw.len().min(candidates.len()));

    for entry in raw {
        if entry.index < 0 || entry.index as u64 >= candidates.len() as u64 {
            tracing::warn!(
                "Dropping ranking for candidate index {} (only {} candidates were sent)",
                entry.index,
                candidates.len()
            );
            continue;
        }
        let index = entry.index as usize;
        if !entry.score.is_finite() {
            tracing::warn!("Dropping non-finite score for candidate index {index}");
            continue;
        }
        if !seen.insert(index) {
            tracing::debug!("Ignoring repeated ranking for candidate index {index}");
            continue;
        }
        validated.push(ValidatedRanking {
            index,
            relevance: (entry.score / MAX_RUBRIC_SCORE).clamp(0.0, 1.0) as f32,
        });
    }

    if seen.len() < candidates.len() {
        let missing: Vec<&str> = candidates
            .iter()
            .filter(|c| !seen.contains(&c.index))
            .map(|c| c.chunk_id.as_str())
            .collect();
        tracing::warn!(
            "Keyword ranker left {} of {} candidates unscored: {:?}",
            missing.len(),
            candidates.len(),
            missing
        );
    }

    validated
}

const SYSTEM_PROMPT: &str = "You are a relevance judge for a document retrieval system. \
You score candidate passages, described only by their keywords, against a user question. \
Reply with JSON only.";

/// [`KeywordRanker`] backed by a language model.
#[derive(Clone)]
pub struct LlmKeywordRanker {
    backend: Arc<dyn CompletionBackend>,
}

impl LlmKeywordRanker {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl KeywordRanker for LlmKeywordRanker {
    async fn rank(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
    ) -> LlmResponse<Vec<RawRanking>> {
        if candidates.is_empty() {
            return LlmResponse::Ok(Vec::new());
        }

        let prompt = match build_prompt(query, candidates) {
            Ok(prompt) => prompt,
            Err(e) => return LlmResponse::ProviderError(format!("building ranker prompt: {e}")),
        };
        // Roughly 12 output tokens per ranking entry.
        let max_tokens = (candidates.len() as u32).saturating_mul(12).saturating_add(64);
        let request = CompletionRequest::json(SYSTEM_PROMPT, prompt).with_max_tokens(max_tokens);

        request_json(self.backend.as_ref(), &request)
            .await
            .and_then(|value| match parse_rankings(&value) {
                Some(rankings) => LlmResponse::Ok(rankings),
                None => LlmResponse::Malformed(value.to_string()),
            })
    }
}

fn build_prompt(query: &str, candidates: &[CandidateSummary]) -> serde_json::Result<String> {
    let mut listing = String::new();
    for candidate in candidates {
        listing.push_str(&serde_json::to_string(candidate)?);
        listing.push('\n');
    }

    Ok(format!(
        "Question: {query}\n\n\
Candidates (one JSON object per line):\n{listing}\n\
Score EVERY candidate from 0 to 10 for how likely its passage answers the question:\n\
- 10: keywords directly cover the question's main concepts\n\
- 5: keywords are related but only partially cover the question\n\
- 0: keywords are unrelated\n\
Keywords listed in title_keywords also appear in the document title and count three times \
as much as other keywords.\n\
Respond as {{\"rankings\": [{{\"index\": <candidate index>, \"score\": <0-10>}}]}} with one \
entry per candidate."
    ))
}

/// Pull `(index, score)` pairs out of ranker JSON.
///
/// Accepts `{"rankings": [...]}` or a bare array. Entries whose index is not an
/// integer, or whose score is not a number, are dropped with a warning. Returns
/// `None` only when there is no ranking array at all.
fn parse_rankings(value: &Value) -> Option<Vec<RawRanking>> {
    let entries = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.get("rankings")?.as_array()?,
        _ => return None,
    };

    let mut rankings = Vec::with_capacity(entries.len());
    for entry in entries {
        let index = entry.get("index").and_then(integer);
        let score = entry.get("score").and_then(Value::as_f64);
        match (index, score) {
            (Some(index), Some(score)) => rankings.push(RawRanking { index, score }),
            _ => tracing::warn!("Dropping malformed ranking entry: {entry}"),
        }
    }
    Some(rankings)
}

fn integer(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}
