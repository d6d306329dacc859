//! Keyword tags for stored chunks, generated at indexing time.

use crate::llm::{CompletionBackend, CompletionRequest, LlmResponse, request_json, string_list};
use crate::storage::Chunk;
use async_trait::async_trait;
use std::sync::Arc;

/// Most tags kept per chunk.
pub const MAX_CHUNK_KEYWORDS: usize = 10;

/// Characters of chunk text included in the prompt.
const MAX_PROMPT_CHARS: usize = 4000;

/// Produces keyword tags for a chunk.
#[async_trait]
pub trait ChunkKeywordGenerator: Send + Sync {
    async fn generate(&self, chunk: &Chunk) -> LlmResponse<Vec<String>>;
}

/// Lowercase, trim and dedupe tags, keeping the first occurrence.
pub fn normalise_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim().to_lowercase();
        if !tag.is_empty() && !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen.truncate(MAX_CHUNK_KEYWORDS);
    seen
}

/// [`ChunkKeywordGenerator`] backed by a language model.
#[derive(Clone)]
pub struct LlmChunkKeywordGenerator {
    backend: Arc<dyn CompletionBackend>,
}

impl LlmChunkKeywordGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }
}

const SYSTEM_PROMPT: &str = "You tag passages of documentation with search keywords. \
Reply with JSON only.";

fn build_prompt(chunk: &Chunk) -> String {
    let text: String = chunk.embedding_input().chars().take(MAX_PROMPT_CHARS).collect();
    let title = if chunk.metadata.title.is_empty() {
        String::new()
    } else {
        format!("Document title: {}\n", chunk.metadata.title)
    };
    format!(
        "{title}Passage:\n{text}\n\n\
List 3 to {MAX_CHUNK_KEYWORDS} lowercase keywords or short phrases a user might search for \
to find this passage. Respond as {{\"keywords\": [\"...\"]}}."
    )
}

#[async_trait]
impl ChunkKeywordGenerator for LlmChunkKeywordGenerator {
    async fn generate(&self, chunk: &Chunk) -> LlmResponse<Vec<String>> {
        let request =
            CompletionRequest::json(SYSTEM_PROMPT, build_prompt(chunk)).with_max_tokens(200);
        request_json(self.backend.as_ref(), &request)
            .await
            .and_then(|value| match string_list(&value, "keywords") {
                Some(tags) => {
                    let tags = normalise_tags(tags);
                    if tags.is_empty() {
                        LlmResponse::Malformed(value.to_string())
                    } else {
                        LlmResponse::Ok(tags)
                    }
                }
                None => LlmResponse::Malformed(value.to_string()),
            })
    }
}
