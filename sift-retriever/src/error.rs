//! Error type for the public retrieval and indexing API

use sift_embed::EmbedError;

/// Errors surfaced by hybrid search and reconciliation.
///
/// Only the vector tier and the chunk store can fail a search. Keyword tier
/// problems degrade to an empty tier and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The embedding provider failed or broke its contract
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// The chunk store could not be read or written
    #[error("Chunk store error: {0}")]
    Store(#[from] anyhow::Error),

    /// The caller passed arguments that cannot be served
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;
