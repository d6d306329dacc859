//! Query keyword extraction.
//!
//! A language model turns the free-text query into 3 to 12 lowercase search
//! terms. Whenever the model is unavailable, slow, or answers with something
//! unusable, a deterministic local tokenizer takes over. Extraction therefore
//! never fails; at worst it yields an empty term list, which keyword search
//! treats as "no lexical match".

use crate::llm::{CompletionBackend, CompletionRequest, LlmResponse, request_json, string_list};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on the number of query terms.
pub const MAX_QUERY_TERMS: usize = 12;

/// Model output with fewer terms than this is topped up from the fallback tokenizer.
pub const MIN_QUERY_TERMS: usize = 3;

/// Words never used as search terms.
pub const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most", "my", "no",
    "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "out",
    "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours",
];

const SYSTEM_PROMPT: &str = "You extract search keywords from user questions for a \
document retrieval system. Reply with JSON only.";

/// Which path produced the query terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TermSource {
    Model,
    Fallback,
}

/// Normalised query terms and their origin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedTerms {
    pub terms: Vec<String>,
    pub source: TermSource,
}

impl ExtractedTerms {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Deterministic tokenizer used when the model cannot be.
///
/// Lowercases, removes every character that is neither alphanumeric nor
/// whitespace, splits on whitespace, drops tokens of two characters or fewer
/// and stop-words, then deduplicates in order and caps at [`MAX_QUERY_TERMS`].
pub fn fallback_terms(query: &str) -> Vec<String> {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let mut terms: Vec<String> = Vec::new();
    for token in cleaned.split_whitespace() {
        if token.chars().count() <= 2 || is_stop_word(token) || terms.iter().any(|t| t == token) {
            continue;
        }
        terms.push(token.to_string());
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }
    terms
}

/// Normalise model-proposed terms: trim, lowercase, drop empty and
/// stop-word-only entries, dedupe in order.
fn normalise_model_terms(raw: Vec<String>) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for entry in raw {
        let term = entry.trim().to_lowercase();
        if term.is_empty() || term.split_whitespace().all(is_stop_word) {
            continue;
        }
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Turns queries into search terms via a language model with a local fallback.
#[derive(Clone)]
pub struct QueryKeywordExtractor {
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl QueryKeywordExtractor {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Extractor that always uses the local tokenizer
    pub fn fallback_only() -> Self {
        Self { backend: None }
    }

    /// Fallback tokenizer result for `query`
    pub fn fallback(query: &str) -> ExtractedTerms {
        ExtractedTerms {
            terms: fallback_terms(query),
            source: TermSource::Fallback,
        }
    }

    /// Extract terms, falling back if the model has not answered within `timeout`.
    pub async fn extract_within(&self, query: &str, timeout: Duration) -> ExtractedTerms {
        match tokio::time::timeout(timeout, self.extract(query)).await {
            Ok(terms) => terms,
            Err(_) => {
                tracing::warn!(
                    "Query keyword extraction timed out after {:?}, using fallback tokenizer",
                    timeout
                );
                Self::fallback(query)
            }
        }
    }

    /// Extract terms for `query`. Never fails.
    pub async fn extract(&self, query: &str) -> ExtractedTerms {
        let Some(backend) = &self.backend else {
            return Self::fallback(query);
        };

        let request =
            CompletionRequest::json(SYSTEM_PROMPT, build_prompt(query)).with_max_tokens(256);
        let response = request_json(backend.as_ref(), &request)
            .await
            .and_then(|value| match string_list(&value, "keywords") {
                Some(list) => LlmResponse::Ok(list),
                None => LlmResponse::Malformed(value.to_string()),
            });

        let proposed = match response {
            LlmResponse::Ok(list) => normalise_model_terms(list),
            LlmResponse::Malformed(raw) => {
                tracing::warn!(
                    "Keyword extractor returned an unusable response, using fallback tokenizer: {}",
                    raw.chars().take(200).collect::<String>()
                );
                return Self::fallback(query);
            }
            LlmResponse::ProviderError(cause) => {
                tracing::warn!("Keyword extractor unavailable ({cause}), using fallback tokenizer");
                return Self::fallback(query);
            }
        };

        if proposed.is_empty() {
            tracing::warn!("Keyword extractor proposed no usable terms, using fallback tokenizer");
            return Self::fallback(query);
        }

        let mut terms = proposed;
        if terms.len() < MIN_QUERY_TERMS {
            for token in fallback_terms(query) {
                if !terms.contains(&token) {
                    terms.push(token);
                }
            }
        }
        terms.truncate(MAX_QUERY_TERMS);

        tracing::debug!("Extracted query terms: {:?}", terms);
        ExtractedTerms {
            terms,
            source: TermSource::Model,
        }
    }
}

fn build_prompt(query: &str) -> String {
    format!(
        "Extract between {MIN_QUERY_TERMS} and {MAX_QUERY_TERMS} search keywords from the \
question below.\n\
Rules:\n\
- lowercase only\n\
- no articles, pronouns or other stop-words\n\
- multi-word phrases are allowed when they name one concept\n\
- include singular forms and close variants of important words\n\
Respond as {{\"keywords\": [\"...\"]}}.\n\n\
Question: {query}"
    )
}
