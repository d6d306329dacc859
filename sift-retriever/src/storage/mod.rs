//! Storage abstraction layer for sift-retriever
//!
//! This module provides trait-based abstractions for storing and retrieving text
//! chunks together with their embeddings and keyword tags. It separates storage
//! concerns from the retrieval logic, so the search and indexing paths only ever
//! talk to the traits.
//!
//! ## Key Components
//!
//! - **ChunkStore**: Row-level chunk storage (filtered scan, upsert, delete)
//! - **EmbeddingStore**: Nearest-neighbour search over stored embeddings
//! - **CombinedStore**: Unified interface combining both stores
//! - **Data Types**: Chunk, ChunkMetadata, ChunkFilter and ChunkStats
//!
//! ## Architecture
//!
//! ```text
//! ChunkStore ─┐
//!             ├─ CombinedStore ── SqliteStore (concrete implementation)
//! EmbeddingStore ─┘
//! ```
//!
//! ## Invariants
//!
//! - `metadata.hash` is a deterministic function of the chunk's source text.
//!   Two chunks with the same hash are the same chunk as far as indexing is
//!   concerned, whatever their ids.
//! - Every upsert or delete is atomic per row. A reader never sees a half
//!   written chunk.

use anyhow::Result;
use async_trait::async_trait;
use half::f16;
use serde::{Deserialize, Serialize};

pub mod sqlite_store;

/// Stable identifier of a chunk, unique within the store.
pub type ChunkId = String;

/// Lowercase hex blake3 digest of `text`, used as the chunk content hash.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Descriptive metadata carried by every chunk.
///
/// Unknown keys are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub document_id: String,
    pub collection_id: String,
    pub title: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub hash: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Unit of retrievable text. See module docs for the invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: ChunkId,
    pub content: String,
    #[serde(default)]
    pub contextual_content: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f16>>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Creates a chunk with empty metadata and no embedding.
    pub fn new(id: impl Into<ChunkId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            contextual_content: None,
            embedding: None,
            keywords: Vec::new(),
            metadata: ChunkMetadata::default(),
        }
    }

    /// Set the keyword tags (builder style)
    pub fn with_keywords<I, S>(self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Set the collection id (builder style)
    pub fn with_collection(mut self, collection_id: impl Into<String>) -> Self {
        self.metadata.collection_id = collection_id.into();
        self
    }

    /// Set the document id and title (builder style)
    pub fn with_document(
        mut self,
        document_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        self.metadata.document_id = document_id.into();
        self.metadata.title = title.into();
        self
    }

    /// Set the embedding (builder style)
    pub fn with_embedding(self, embedding: Vec<f16>) -> Self {
        Self {
            embedding: Some(embedding),
            ..self
        }
    }

    /// Text that should be embedded for this chunk.
    ///
    /// The enriched `contextual_content` wins when present and non-blank.
    pub fn embedding_input(&self) -> &str {
        match self.contextual_content.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => &self.content,
        }
    }

    /// Fill in `metadata.hash` from the content if it is empty.
    pub fn ensure_hash(&mut self) {
        if self.metadata.hash.is_empty() {
            self.metadata.hash = content_hash(&self.content);
        }
    }
}

/// Query filter for chunk scans. An empty filter matches every chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub collection_id: Option<String>,
}

impl ChunkFilter {
    /// Filter matching a single collection
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: Some(collection_id.into()),
        }
    }
}

/// Aggregate counts over a filtered set of chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub chunks_with_embeddings: usize,
    pub chunks_with_keywords: usize,
    pub documents: usize,
    pub collections: usize,
}

/// Text storage operations for chunks. See module docs for details.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// List chunks matching the filter, in a stable order
    async fn list_chunks(&self, filter: ChunkFilter) -> Result<Vec<Chunk>>;

    /// Get a specific chunk by ID
    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Insert or replace chunks by ID in one transaction
    async fn upsert_chunks(&self, chunks: Vec<Chunk>) -> Result<()>;

    /// Delete chunks by ID and return how many existed
    async fn delete_chunks(&self, ids: &[ChunkId]) -> Result<usize>;

    /// Replace only the keyword tags of a chunk
    async fn update_keywords(&self, id: &str, keywords: &[String]) -> Result<()>;

    /// Count chunks matching the filter
    async fn count_chunks(&self, filter: ChunkFilter) -> Result<ChunkStats>;
}

/// Vector similarity search operations. See module docs for details.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Nearest chunks to `query` by cosine similarity, best first
    async fn search_similar(
        &self,
        query: &[f16],
        limit: usize,
        collection_filter: Option<&str>,
    ) -> Result<Vec<(Chunk, f32)>>;
}

/// Unified store combining row and vector operations. See module docs for details.
pub trait CombinedStore: ChunkStore + EmbeddingStore + Send + Sync {}

impl<T: ChunkStore + EmbeddingStore + Send + Sync> CombinedStore for T {}

/// Cosine similarity of two half-precision vectors, accumulated in `f32`.
///
/// Returns 0 for vectors of different length or zero norm.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        let x = x.to_f32();
        let y = y.to_f32();
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
