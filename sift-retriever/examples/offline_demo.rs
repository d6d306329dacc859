//! Offline demonstration of indexing and hybrid search
//!
//! No network access is needed: embeddings come from a hashed bag of words
//! and the keyword ranker scores candidates by term overlap. Swap in
//! `HttpEmbeddingProvider` and `LlmKeywordRanker` for real use.
//!
//! Run with `cargo run -p sift-retriever --example offline_demo`.

use anyhow::Result;
use async_trait::async_trait;
use half::f16;
use sift_embed::{EmbeddingProvider, EmbeddingResult, provider::l2_normalize};
use sift_retriever::llm::LlmResponse;
use sift_retriever::retrieval::{
    CandidateSummary, HybridSearchEngine, HybridSearchOptions, IncrementalIndexer, IndexerConfig,
    KeywordRanker, QueryKeywordExtractor, RawRanking, ReconcileOptions, SearchConfig,
    query_keywords::fallback_terms,
};
use sift_retriever::storage::Chunk;
use sift_retriever::storage::sqlite_store::SqliteStore;
use std::sync::Arc;

const DIMENSION: usize = 64;

/// Embeds text as normalised counts of hashed lowercase words.
struct HashedBagOfWords;

#[async_trait]
impl EmbeddingProvider for HashedBagOfWords {
    async fn embed_texts(&self, texts: &[String]) -> sift_embed::Result<EmbeddingResult> {
        let embeddings = texts
            .iter()
            .map(|text| {
                let mut counts = vec![0.0f32; DIMENSION];
                for word in text.split_whitespace() {
                    let word = word.to_lowercase();
                    let bucket = blake3::hash(word.as_bytes()).as_bytes()[0] as usize % DIMENSION;
                    counts[bucket] += 1.0;
                }
                l2_normalize(&mut counts);
                counts.into_iter().map(f16::from_f32).collect()
            })
            .collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        DIMENSION
    }

    fn provider_name(&self) -> &str {
        "hashed-bag-of-words"
    }
}

/// Scores candidates by how many query terms their keywords contain.
struct OverlapRanker;

#[async_trait]
impl KeywordRanker for OverlapRanker {
    async fn rank(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
    ) -> LlmResponse<Vec<RawRanking>> {
        let terms = fallback_terms(query);
        let rankings = candidates
            .iter()
            .map(|candidate| {
                let hits = |keywords: &[String]| {
                    terms
                        .iter()
                        .filter(|t| keywords.iter().any(|k| k.contains(t.as_str())))
                        .count() as f64
                };
                // Title keywords count three times.
                let score = hits(candidate.keywords.as_slice())
                    + 2.0 * hits(candidate.title_keywords.as_slice());
                RawRanking {
                    index: candidate.index as i64,
                    score: (score * 2.0).min(10.0),
                }
            })
            .collect();
        LlmResponse::Ok(rankings)
    }
}

fn demo_chunks() -> Vec<Chunk> {
    let chunk = |id: &str, doc: &str, title: &str, text: &str, keywords: &[&str]| {
        Chunk::new(id, text)
            .with_document(doc, title)
            .with_keywords(keywords.iter().copied())
    };
    vec![
        chunk(
            "penalties-1",
            "penalties",
            "Tax penalties",
            "Filing a return after the deadline adds a penalty of 5% of the unpaid tax per month.",
            &["tax", "penalty", "late filing", "deadline"],
        ),
        chunk(
            "penalties-2",
            "penalties",
            "Tax penalties",
            "Penalties can be waived when the delay had a reasonable cause such as illness.",
            &["penalty waiver", "reasonable cause", "tax"],
        ),
        chunk(
            "software-1",
            "software",
            "Choosing tax software",
            "Most tax software can file electronically and reminds you of upcoming deadlines.",
            &["tax software", "e-filing", "deadline reminder"],
        ),
        chunk(
            "accounting-1",
            "accounting",
            "Bookkeeping basics",
            "Double-entry bookkeeping records every transaction in two accounts.",
            &["accounting", "bookkeeping", "ledger"],
        ),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let store = Arc::new(SqliteStore::open_memory().await?);
    let embedder = Arc::new(HashedBagOfWords);

    let indexer = IncrementalIndexer::new(
        store.clone(),
        embedder.clone(),
        None,
        IndexerConfig::default(),
    );
    let stats = indexer
        .reconcile("finance", demo_chunks(), ReconcileOptions::default())
        .await?;
    println!("Indexed: {}", serde_json::to_string(&stats)?);

    // A second pass with the same chunks does no work.
    let stats = indexer
        .reconcile("finance", demo_chunks(), ReconcileOptions::default())
        .await?;
    println!("Re-indexed: {}", serde_json::to_string(&stats)?);

    let engine = HybridSearchEngine::new(
        store,
        embedder,
        QueryKeywordExtractor::fallback_only(),
        Arc::new(OverlapRanker),
        SearchConfig::default(),
    );

    for query in ["tax penalties for late filing", "how do I keep a ledger"] {
        let response = engine
            .hybrid_search(
                query,
                3,
                HybridSearchOptions::collection("finance").with_verbose(true),
            )
            .await?;

        println!("\nQuery: {query}");
        if let Some(breakdown) = &response.breakdown {
            println!(
                "  terms: {:?} ({:?}), keyword tier: {:?}",
                breakdown.query_terms, breakdown.term_source, breakdown.keyword_status
            );
        }
        for (rank, result) in response.results.iter().enumerate() {
            println!(
                "  {}. {:.3} {} ({})",
                rank + 1,
                result.score,
                result.chunk.id,
                result.chunk.metadata.title
            );
        }
    }

    Ok(())
}
