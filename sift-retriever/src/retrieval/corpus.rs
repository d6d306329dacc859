//! Request-scoped snapshot of the chunk corpus used for keyword pre-filtering.
//!
//! A [`CorpusCache`] is loaded at the start of every hybrid search and dropped
//! at its end. It is never shared between queries and never patched in place,
//! so a query sees either the corpus before a reconciliation or after it.
//! Vector search does not use it.

use crate::storage::{Chunk, ChunkFilter, ChunkStore};
use anyhow::Result;
use std::collections::HashMap;

/// Indexed list of chunks plus an id lookup.
#[derive(Debug, Clone, Default)]
pub struct CorpusCache {
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
}

impl CorpusCache {
    /// Load every chunk in scope. `None` means all collections.
    pub async fn load(store: &dyn ChunkStore, collection_filter: Option<&str>) -> Result<Self> {
        let filter = ChunkFilter {
            collection_id: collection_filter.map(str::to_string),
        };
        let chunks = store.list_chunks(filter).await?;
        tracing::debug!(
            "Loaded corpus snapshot of {} chunks (scope: {})",
            chunks.len(),
            collection_filter.unwrap_or("all")
        );
        Ok(Self::from_chunks(chunks))
    }

    /// Build a snapshot from chunks already in memory.
    ///
    /// If an id appears twice the first occurrence is the one found by [`CorpusCache::get`].
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        let mut by_id = HashMap::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            by_id.entry(chunk.id.clone()).or_insert(index);
        }
        Self { chunks, by_id }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.by_id.get(id).map(|&index| &self.chunks[index])
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
