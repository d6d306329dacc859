//! Vector tier of hybrid search.

use super::types::SearchResult;
use crate::error::{Result, RetrievalError};
use crate::storage::EmbeddingStore;
use sift_embed::{EmbedError, EmbeddingProvider};

/// Nearest chunks to `query` by cosine similarity, best first.
///
/// The query is embedded with a single provider call. Any embedding failure
/// is returned to the caller rather than degrading to an empty tier, because
/// a silently missing vector tier turns hybrid search into keyword-only
/// search.
pub async fn vector_search(
    store: &dyn EmbeddingStore,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    top_k: usize,
    collection_filter: Option<&str>,
) -> Result<Vec<SearchResult>> {
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let query_embedding = embedder.embed_text(query).await?;
    let expected = embedder.embedding_dimension();
    if query_embedding.len() != expected {
        return Err(RetrievalError::Embedding(EmbedError::DimensionMismatch {
            expected,
            actual: query_embedding.len(),
        }));
    }

    let hits = store
        .search_similar(&query_embedding, top_k, collection_filter)
        .await?;
    tracing::debug!("Vector tier returned {} results", hits.len());

    Ok(hits
        .into_iter()
        .map(|(chunk, similarity)| SearchResult::vector(chunk, similarity))
        .collect())
}
