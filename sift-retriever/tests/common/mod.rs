//! Scripted collaborators for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use half::f16;
use sift_embed::{EmbedError, EmbeddingProvider, EmbeddingResult};
use sift_retriever::llm::{CompletionBackend, CompletionRequest, LlmResponse};
use sift_retriever::retrieval::ChunkKeywordGenerator;
use sift_retriever::storage::Chunk;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Completion backend that replays canned replies in order.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, String>>>,
    delay: Option<Duration>,
    pub calls: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<&str, &str>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(reply: &str) -> Self {
        Self::new(vec![Ok(reply)])
    }

    pub fn failing(cause: &str) -> Self {
        Self::new(vec![Err(cause)])
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn prompt(&self, call: usize) -> String {
        self.calls.lock().unwrap()[call].prompt.clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(cause)) => Err(anyhow::anyhow!(cause)),
            None => Err(anyhow::anyhow!("no scripted reply left")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Embedding provider with a fixed text-to-vector table.
///
/// Texts not in the table get `default`. Any batch containing a text in
/// `failing` fails as a whole.
pub struct TableEmbedder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
    default: Vec<f32>,
    failing: HashSet<String>,
    pub batches: Arc<Mutex<Vec<Vec<String>>>>,
}

impl TableEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            table: HashMap::new(),
            default: vec![1.0; dimension],
            failing: HashSet::new(),
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with(mut self, text: &str, vector: &[f32]) -> Self {
        self.table.insert(text.to_string(), vector.to_vec());
        self
    }

    pub fn with_default(mut self, vector: &[f32]) -> Self {
        self.default = vector.to_vec();
        self
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn texts_embedded(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }

    pub fn call_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> sift_embed::Result<EmbeddingResult> {
        self.batches.lock().unwrap().push(texts.to_vec());
        if texts.iter().any(|t| self.failing.contains(t)) {
            return Err(EmbedError::Service {
                status: 503,
                body: "scripted failure".to_string(),
            });
        }
        let embeddings = texts
            .iter()
            .map(|t| to_f16(self.table.get(t).unwrap_or(&self.default)))
            .collect();
        Ok(EmbeddingResult {
            embeddings,
            dimension: self.dimension,
        })
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "table"
    }
}

/// Tags each chunk with `{prefix}-{id}`.
pub struct PrefixTagger {
    prefix: String,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl PrefixTagger {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChunkKeywordGenerator for PrefixTagger {
    async fn generate(&self, chunk: &Chunk) -> LlmResponse<Vec<String>> {
        self.calls.lock().unwrap().push(chunk.id.clone());
        LlmResponse::Ok(vec![format!("{}-{}", self.prefix, chunk.id)])
    }
}

pub fn to_f16(values: &[f32]) -> Vec<f16> {
    values.iter().map(|v| f16::from_f32(*v)).collect()
}

/// Chunk in collection `tax` with the given title and keywords.
pub fn tagged_chunk(id: &str, title: &str, keywords: &[&str]) -> Chunk {
    let mut chunk = Chunk::new(id, format!("content of {id}"))
        .with_collection("tax")
        .with_document(format!("doc-{id}"), title)
        .with_keywords(keywords.iter().copied());
    chunk.ensure_hash();
    chunk
}
