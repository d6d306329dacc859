//! Incremental indexing: reconcile a fresh chunk set against the store.
//!
//! Chunks are compared by content hash. Only new or changed chunks are
//! embedded and tagged; unchanged chunks keep their stored embedding and
//! keywords. A chunk whose embedding or keywords cannot be generated is
//! skipped and left unwritten, so its hash still looks new on the next pass
//! and it is retried then. Reconciliation is therefore safe to re-run after
//! a partial or interrupted pass.

use super::chunk_keywords::ChunkKeywordGenerator;
use crate::error::{Result, RetrievalError};
use crate::llm::LlmResponse;
use crate::storage::{Chunk, ChunkFilter, ChunkId, ChunkStore};
use futures::stream::{self, StreamExt};
use half::f16;
use serde::{Deserialize, Serialize};
use sift_embed::{EmbedError, EmbeddingProvider};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for [`IncrementalIndexer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Most texts sent to the embedding provider in one call
    pub embed_batch_size: usize,
    /// Keyword generation calls in flight at once
    pub keyword_concurrency: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            embed_batch_size: 100,
            keyword_concurrency: 4,
        }
    }
}

impl IndexerConfig {
    /// Set the embedding batch size (builder style)
    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }

    /// Set the keyword generation concurrency (builder style)
    pub fn with_keyword_concurrency(mut self, concurrency: usize) -> Self {
        self.keyword_concurrency = concurrency.max(1);
        self
    }
}

/// Per-call options for [`IncrementalIndexer::reconcile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Regenerate keywords for unchanged chunks too. Embeddings of unchanged
    /// chunks are still left alone.
    pub force: bool,
}

impl ReconcileOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// New chunk ids written
    pub added: usize,
    /// Existing chunk ids rewritten with changed content
    pub updated: usize,
    /// Stored chunks deleted because their content is gone
    pub removed: usize,
    /// Fresh chunks whose content was already stored
    pub unchanged: usize,
    /// Unchanged chunks whose content moved to a different id; they are
    /// rewritten with the stored embedding and keywords, not re-embedded
    pub relocated: usize,
    /// Chunks skipped because embedding or keyword generation failed
    pub failed: usize,
    /// Unchanged chunks whose keywords were regenerated in force mode
    pub keywords_refreshed: usize,
}

/// Writes chunks, embeddings and keywords to the store.
///
/// This is the only component that mutates the chunk store.
pub struct IncrementalIndexer {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    keyword_generator: Option<Arc<dyn ChunkKeywordGenerator>>,
    config: IndexerConfig,
}

struct WorkItem {
    chunk: Chunk,
    replaces_existing: bool,
}

impl IncrementalIndexer {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        keyword_generator: Option<Arc<dyn ChunkKeywordGenerator>>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            keyword_generator,
            config,
        }
    }

    /// Bring `collection_id` in the store in line with `fresh_chunks`.
    ///
    /// Only chunk store failures are returned as errors. Failures for
    /// individual chunks are counted in [`ReconcileStats::failed`].
    pub async fn reconcile(
        &self,
        collection_id: &str,
        fresh_chunks: Vec<Chunk>,
        options: ReconcileOptions,
    ) -> Result<ReconcileStats> {
        if collection_id.trim().is_empty() {
            return Err(RetrievalError::InvalidInput(
                "collection id must not be empty".to_string(),
            ));
        }
        info!(
            "Reconciling collection {} with {} fresh chunks (force: {})",
            collection_id,
            fresh_chunks.len(),
            options.force
        );

        let fresh_chunks = prepare_fresh_chunks(collection_id, fresh_chunks);
        let existing = self
            .store
            .list_chunks(ChunkFilter::collection(collection_id))
            .await?;

        let mut stored_by_hash: HashMap<&str, &Chunk> = HashMap::new();
        for chunk in &existing {
            stored_by_hash
                .entry(chunk.metadata.hash.as_str())
                .or_insert(chunk);
        }
        let stored_by_id: HashMap<&str, &Chunk> =
            existing.iter().map(|c| (c.id.as_str(), c)).collect();
        let fresh_ids: HashSet<&str> = fresh_chunks.iter().map(|c| c.id.as_str()).collect();
        let fresh_hashes: HashSet<&str> = fresh_chunks
            .iter()
            .map(|c| c.metadata.hash.as_str())
            .collect();

        let mut stats = ReconcileStats::default();
        let mut kept: Vec<&Chunk> = Vec::new();
        let mut relocated: Vec<Chunk> = Vec::new();
        let mut work: Vec<WorkItem> = Vec::new();
        for chunk in &fresh_chunks {
            let hash = chunk.metadata.hash.as_str();
            let same_row = stored_by_id
                .get(chunk.id.as_str())
                .filter(|stored| stored.metadata.hash == hash);
            if let Some(stored) = same_row {
                stats.unchanged += 1;
                kept.push(*stored);
            } else if let Some(stored) = stored_by_hash.get(hash) {
                // Content already stored under another id: reuse its embedding
                // and keywords, write it under the fresh id.
                stats.unchanged += 1;
                stats.relocated += 1;
                relocated.push(relocate(chunk, stored));
            } else {
                work.push(WorkItem {
                    replaces_existing: stored_by_id.contains_key(chunk.id.as_str()),
                    chunk: chunk.clone(),
                });
            }
        }

        // Rows whose id is still in the fresh set are either kept or rewritten.
        let (removals, stale): (Vec<&Chunk>, Vec<&Chunk>) = existing
            .iter()
            .filter(|c| !fresh_ids.contains(c.id.as_str()))
            .partition(|c| !fresh_hashes.contains(c.metadata.hash.as_str()));

        debug!(
            "Collection {}: {} to index, {} unchanged ({} relocated), {} to remove",
            collection_id,
            work.len(),
            stats.unchanged,
            stats.relocated,
            removals.len()
        );

        let work = self.embed_work(work).await;
        let work = self.tag_work(work).await;
        let processed = work.iter().filter(|w| w.is_some()).count();
        stats.failed += work.len() - processed;

        let mut writes = Vec::with_capacity(processed + relocated.len());
        for item in work.into_iter().flatten() {
            if item.replaces_existing {
                stats.updated += 1;
            } else {
                stats.added += 1;
            }
            writes.push(item.chunk);
        }
        writes.extend(relocated.iter().cloned());
        if !writes.is_empty() {
            self.store.upsert_chunks(writes).await?;
        }
        if !removals.is_empty() {
            let ids: Vec<ChunkId> = removals.iter().map(|c| c.id.clone()).collect();
            stats.removed = self.store.delete_chunks(&ids).await?;
        }
        if !stale.is_empty() {
            let ids: Vec<ChunkId> = stale.iter().map(|c| c.id.clone()).collect();
            let dropped = self.store.delete_chunks(&ids).await?;
            debug!("Dropped {} rows whose content moved to another id", dropped);
        }

        if options.force {
            let targets: Vec<&Chunk> = kept.iter().copied().chain(relocated.iter()).collect();
            let (refreshed, failed) = self.refresh_keywords(&targets).await?;
            stats.keywords_refreshed = refreshed;
            stats.failed += failed;
        }

        info!(
            "Reconciled collection {}: {} added, {} updated, {} removed, {} unchanged, {} failed",
            collection_id,
            stats.added,
            stats.updated,
            stats.removed,
            stats.unchanged,
            stats.failed
        );
        Ok(stats)
    }

    /// Attach embeddings. Items that could not be embedded become `None`.
    async fn embed_work(&self, work: Vec<WorkItem>) -> Vec<Option<WorkItem>> {
        let batch_size = self.config.embed_batch_size.max(1);
        let mut out = Vec::with_capacity(work.len());
        let mut items = work.into_iter().peekable();

        while items.peek().is_some() {
            let batch: Vec<WorkItem> = items.by_ref().take(batch_size).collect();
            let texts: Vec<String> = batch
                .iter()
                .map(|w| w.chunk.embedding_input().to_string())
                .collect();

            match self.embed_batch(&texts).await {
                Ok(embeddings) => {
                    for (mut item, embedding) in batch.into_iter().zip(embeddings) {
                        item.chunk.embedding = Some(embedding);
                        out.push(Some(item));
                    }
                }
                Err(e) => {
                    warn!(
                        "Embedding batch of {} chunks failed ({}), retrying one by one",
                        batch.len(),
                        e
                    );
                    for (mut item, text) in batch.into_iter().zip(texts) {
                        match self.embed_batch(std::slice::from_ref(&text)).await {
                            Ok(mut embeddings) => {
                                item.chunk.embedding = embeddings.pop();
                                out.push(Some(item));
                            }
                            Err(e) => {
                                warn!(
                                    "Skipping chunk {}: embedding failed: {}",
                                    item.chunk.id, e
                                );
                                out.push(None);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// One provider call, with the reply checked for count and dimension.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f16>>> {
        let result = self.embedder.embed_texts(texts).await?;
        if result.embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                actual: result.embeddings.len(),
            }
            .into());
        }
        let expected = self.embedder.embedding_dimension();
        if let Some(bad) = result.embeddings.iter().find(|e| e.len() != expected) {
            return Err(EmbedError::DimensionMismatch {
                expected,
                actual: bad.len(),
            }
            .into());
        }
        Ok(result.embeddings)
    }

    /// Attach generated keywords. Items whose generation fails become `None`.
    async fn tag_work(&self, work: Vec<Option<WorkItem>>) -> Vec<Option<WorkItem>> {
        let Some(generator) = &self.keyword_generator else {
            return work;
        };
        let chunks: Vec<&Chunk> = work.iter().flatten().map(|w| &w.chunk).collect();
        let mut tags = self.generate_keywords(generator.as_ref(), &chunks).await;

        let mut position = 0;
        work.into_iter()
            .map(|item| {
                let mut item = item?;
                let generated = tags[position].take();
                position += 1;
                match generated {
                    Some(keywords) => {
                        item.chunk.keywords = keywords;
                        Some(item)
                    }
                    None => {
                        warn!(
                            "Skipping chunk {}: keyword generation failed",
                            item.chunk.id
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Regenerate keywords for stored chunks; returns (refreshed, failed).
    async fn refresh_keywords(&self, chunks: &[&Chunk]) -> Result<(usize, usize)> {
        let Some(generator) = &self.keyword_generator else {
            warn!("Force mode requested without a keyword generator, nothing to refresh");
            return Ok((0, 0));
        };
        let tags = self.generate_keywords(generator.as_ref(), chunks).await;

        let mut refreshed = 0;
        let mut failed = 0;
        for (chunk, keywords) in chunks.iter().zip(tags) {
            match keywords {
                Some(keywords) => {
                    self.store.update_keywords(&chunk.id, &keywords).await?;
                    refreshed += 1;
                }
                None => {
                    warn!("Keeping old keywords for chunk {}: generation failed", chunk.id);
                    failed += 1;
                }
            }
        }
        Ok((refreshed, failed))
    }

    /// Generate keywords for every chunk, `None` where generation failed.
    ///
    /// The output is in the same order as `chunks`.
    async fn generate_keywords(
        &self,
        generator: &dyn ChunkKeywordGenerator,
        chunks: &[&Chunk],
    ) -> Vec<Option<Vec<String>>> {
        let mut results: Vec<(usize, Option<Vec<String>>)> =
            stream::iter(chunks.iter().enumerate())
                .map(|(position, chunk)| async move {
                let keywords = match generator.generate(chunk).await {
                    LlmResponse::Ok(keywords) => Some(keywords),
                    LlmResponse::Malformed(raw) => {
                        debug!("Unusable keyword output for chunk {}: {}", chunk.id, raw);
                        None
                    }
                    LlmResponse::ProviderError(cause) => {
                        debug!("Keyword generation for chunk {} failed: {}", chunk.id, cause);
                        None
                    }
                };
                (position, keywords)
            })
                .buffer_unordered(self.config.keyword_concurrency.max(1))
                .collect()
                .await;
        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, keywords)| keywords).collect()
    }
}

/// Fresh chunk carrying the embedding and keywords already stored for its content.
fn relocate(fresh: &Chunk, stored: &Chunk) -> Chunk {
    let mut chunk = fresh.clone();
    chunk.embedding = stored.embedding.clone();
    chunk.keywords = stored.keywords.clone();
    chunk
}

/// Stamp the collection id and hash on each fresh chunk and drop repeated ids.
fn prepare_fresh_chunks(collection_id: &str, fresh_chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    let mut prepared = Vec::with_capacity(fresh_chunks.len());
    for mut chunk in fresh_chunks {
        if !seen.insert(chunk.id.clone()) {
            warn!("Ignoring repeated fresh chunk id {}", chunk.id);
            continue;
        }
        chunk.metadata.collection_id = collection_id.to_string();
        chunk.ensure_hash();
        prepared.push(chunk);
    }
    prepared
}
