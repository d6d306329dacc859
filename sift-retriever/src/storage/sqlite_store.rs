//! SQLite implementation of the storage traits
//!
//! All chunk data lives in a single `chunks` table. Keywords and the open
//! metadata map are stored as JSON text, embeddings as raw half-precision
//! blobs. Similarity search is a scan over the (optionally collection
//! filtered) rows with an in-memory cosine similarity, which is adequate for
//! corpora of tens of thousands of chunks.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE chunks (
//!     id TEXT PRIMARY KEY,
//!     collection_id TEXT NOT NULL,
//!     document_id TEXT NOT NULL,
//!     title TEXT NOT NULL,
//!     chunk_index INTEGER NOT NULL,
//!     total_chunks INTEGER NOT NULL,
//!     hash TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     contextual_content TEXT,
//!     keywords_json TEXT NOT NULL,   -- JSON array of strings
//!     extra_json TEXT NOT NULL,      -- JSON object of remaining metadata
//!     embedding BLOB,                -- f16 vector (optional)
//!     updated_at TIMESTAMP NOT NULL
//! );
//! ```
//!
//! Rows are always returned ordered by
//! `(collection_id, document_id, chunk_index, id)`.

use super::{
    Chunk, ChunkFilter, ChunkId, ChunkMetadata, ChunkStats, ChunkStore, EmbeddingStore,
    cosine_similarity,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use half::f16;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

const SELECT_COLUMNS: &str = "SELECT id, collection_id, document_id, title, chunk_index, \
     total_chunks, hash, content, contextual_content, keywords_json, extra_json, embedding \
     FROM chunks";

const ORDER_BY: &str = "ORDER BY collection_id, document_id, chunk_index, id";

/// SQLite-based implementation of the storage traits. See module docs for the schema.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) a database file with WAL journaling.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await
        .with_context(|| format!("opening chunk database {}", path.display()))?;

        tracing::debug!("Opened chunk database at {}", path.display());
        Self::new_with_pool(pool).await
    }

    /// Opens an in-memory database for testing.
    ///
    /// The pool is limited to one connection because every SQLite in-memory
    /// connection is its own database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                collection_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                title TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                hash TEXT NOT NULL,
                content TEXT NOT NULL,
                contextual_content TEXT,
                keywords_json TEXT NOT NULL DEFAULT '[]',
                extra_json TEXT NOT NULL DEFAULT '{}',
                embedding BLOB,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(hash)")
            .execute(pool)
            .await?;

        Ok(())
    }

    fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
        let id: String = row.get("id");
        let chunk_index: i64 = row.get("chunk_index");
        let total_chunks: i64 = row.get("total_chunks");
        let keywords_json: String = row.get("keywords_json");
        let extra_json: String = row.get("extra_json");
        let embedding_bytes: Option<Vec<u8>> = row.get("embedding");

        let keywords: Vec<String> = serde_json::from_str(&keywords_json)
            .with_context(|| format!("decoding keywords of chunk {id}"))?;
        let extra = serde_json::from_str(&extra_json)
            .with_context(|| format!("decoding metadata of chunk {id}"))?;

        Ok(Chunk {
            content: row.get("content"),
            contextual_content: row.get("contextual_content"),
            embedding: embedding_bytes.map(|bytes| decode_embedding(&bytes)),
            keywords,
            metadata: ChunkMetadata {
                document_id: row.get("document_id"),
                collection_id: row.get("collection_id"),
                title: row.get("title"),
                chunk_index: chunk_index.max(0) as usize,
                total_chunks: total_chunks.max(0) as usize,
                hash: row.get("hash"),
                extra,
            },
            id,
        })
    }
}

/// Read back an embedding blob.
fn decode_embedding(bytes: &[u8]) -> Vec<f16> {
    match bytemuck::try_cast_slice::<u8, f16>(bytes) {
        Ok(values) => values.to_vec(),
        // Blob buffers are not guaranteed to be 2-byte aligned.
        Err(_) => bytes
            .chunks_exact(2)
            .map(|pair| f16::from_ne_bytes([pair[0], pair[1]]))
            .collect(),
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn list_chunks(&self, filter: ChunkFilter) -> Result<Vec<Chunk>> {
        let rows = match &filter.collection_id {
            Some(collection_id) => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} WHERE collection_id = ?1 {ORDER_BY}"
                ))
                .bind(collection_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{SELECT_COLUMNS} {ORDER_BY}"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_chunk).transpose()
    }

    async fn upsert_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now();
        let mut tx = self.pool.begin().await?;

        for chunk in &chunks {
            let embedding_bytes = chunk
                .embedding
                .as_ref()
                .map(|e| bytemuck::cast_slice::<f16, u8>(e));
            let keywords_json = serde_json::to_string(&chunk.keywords)?;
            let extra_json = serde_json::to_string(&chunk.metadata.extra)?;

            sqlx::query(
                r#"
                INSERT INTO chunks (
                    id, collection_id, document_id, title, chunk_index, total_chunks, hash,
                    content, contextual_content, keywords_json, extra_json, embedding, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(id) DO UPDATE SET
                    collection_id = excluded.collection_id,
                    document_id = excluded.document_id,
                    title = excluded.title,
                    chunk_index = excluded.chunk_index,
                    total_chunks = excluded.total_chunks,
                    hash = excluded.hash,
                    content = excluded.content,
                    contextual_content = excluded.contextual_content,
                    keywords_json = excluded.keywords_json,
                    extra_json = excluded.extra_json,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.metadata.collection_id)
            .bind(&chunk.metadata.document_id)
            .bind(&chunk.metadata.title)
            .bind(chunk.metadata.chunk_index as i64)
            .bind(chunk.metadata.total_chunks as i64)
            .bind(&chunk.metadata.hash)
            .bind(&chunk.content)
            .bind(&chunk.contextual_content)
            .bind(keywords_json)
            .bind(extra_json)
            .bind(embedding_bytes)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!("Upserted {} chunks", chunks.len());
        Ok(())
    }

    async fn delete_chunks(&self, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;
        for id in ids {
            let result = sqlx::query("DELETE FROM chunks WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(deleted as usize)
    }

    async fn update_keywords(&self, id: &str, keywords: &[String]) -> Result<()> {
        let result =
            sqlx::query("UPDATE chunks SET keywords_json = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(serde_json::to_string(keywords)?)
                .bind(chrono::Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Chunk {id} not found");
        }
        Ok(())
    }

    async fn count_chunks(&self, filter: ChunkFilter) -> Result<ChunkStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_chunks,
                COUNT(embedding) AS chunks_with_embeddings,
                COALESCE(SUM(CASE WHEN keywords_json != '[]' THEN 1 ELSE 0 END), 0)
                    AS chunks_with_keywords,
                COUNT(DISTINCT document_id) AS documents,
                COUNT(DISTINCT collection_id) AS collections
            FROM chunks
            WHERE ?1 IS NULL OR collection_id = ?1
            "#,
        )
        .bind(filter.collection_id.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let count = |column: &str| -> usize { row.get::<i64, _>(column).max(0) as usize };
        Ok(ChunkStats {
            total_chunks: count("total_chunks"),
            chunks_with_embeddings: count("chunks_with_embeddings"),
            chunks_with_keywords: count("chunks_with_keywords"),
            documents: count("documents"),
            collections: count("collections"),
        })
    }
}

#[async_trait]
impl EmbeddingStore for SqliteStore {
    async fn search_similar(
        &self,
        query: &[f16],
        limit: usize,
        collection_filter: Option<&str>,
    ) -> Result<Vec<(Chunk, f32)>> {
        if limit == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE embedding IS NOT NULL \
             AND (?1 IS NULL OR collection_id = ?1) {ORDER_BY}"
        ))
        .bind(collection_filter)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = Self::row_to_chunk(row)?;
            let Some(embedding) = chunk.embedding.as_deref() else {
                continue;
            };
            if embedding.len() != query.len() {
                tracing::debug!(
                    "Skipping chunk {}: embedding dimension {} does not match query dimension {}",
                    chunk.id,
                    embedding.len(),
                    query.len()
                );
                continue;
            }
            let similarity = cosine_similarity(query, embedding);
            scored.push((chunk, similarity));
        }

        // Stable sort keeps storage order among equal similarities.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored)
    }
}
