//! Language-model backend used by the keyword extractor, the keyword ranker
//! and the chunk keyword generator.
//!
//! Everything that comes back from a model is treated as untrusted text. The
//! [`LlmResponse`] variant records whether a call produced a usable value, a
//! response that could not be interpreted, or no response at all, and callers
//! decide per variant how to degrade.
//!
//! ## Key Components
//!
//! - **CompletionBackend**: Async trait for a single text completion
//! - **OpenAiChatBackend**: reqwest client for `/chat/completions` endpoints
//! - **extract_json / request_json**: Lenient JSON recovery from model output

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod openai;

pub use openai::OpenAiChatBackend;

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the backend to constrain output to a JSON object
    pub json_mode: bool,
}

impl CompletionRequest {
    /// Creates a deterministic JSON-mode request.
    pub fn json(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.0,
            json_mode: true,
        }
    }

    /// Set the output token limit (builder style)
    pub fn with_max_tokens(self, max_tokens: u32) -> Self {
        Self { max_tokens, ..self }
    }
}

/// Text completion provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Run one completion and return the raw model text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Get the name/identifier of this backend
    fn name(&self) -> &str;
}

/// Outcome of a language-model call.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse<T> {
    /// The response was parsed and validated
    Ok(T),
    /// The backend answered but the text could not be used; holds the raw text
    Malformed(String),
    /// The backend could not be reached or returned an error
    ProviderError(String),
}

impl<T> LlmResponse<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// The value, discarding the failure detail
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LlmResponse<U> {
        match self {
            Self::Ok(value) => LlmResponse::Ok(f(value)),
            Self::Malformed(raw) => LlmResponse::Malformed(raw),
            Self::ProviderError(cause) => LlmResponse::ProviderError(cause),
        }
    }

    /// Like [`LlmResponse::map`], but the conversion may reject the value as malformed.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> LlmResponse<U>) -> LlmResponse<U> {
        match self {
            Self::Ok(value) => f(value),
            Self::Malformed(raw) => LlmResponse::Malformed(raw),
            Self::ProviderError(cause) => LlmResponse::ProviderError(cause),
        }
    }
}

/// Connection settings for an OpenAI-compatible chat completion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl LlmConfig {
    /// Set the model name (builder style)
    pub fn with_model<S: Into<String>>(self, model: S) -> Self {
        Self {
            model: model.into(),
            ..self
        }
    }

    /// Set the base URL (builder style)
    pub fn with_base_url<S: Into<String>>(self, base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..self
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Recover a JSON value from model output.
///
/// Tries, in order: the whole text, the first fenced code block, then the
/// outermost `{...}` and `[...]` spans, earliest first.
pub fn extract_json(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(fenced) {
            return Some(value);
        }
    }

    let mut spans: Vec<(usize, &str)> = [('{', '}'), ('[', ']')]
        .iter()
        .filter_map(|&(open, close)| {
            let start = trimmed.find(open)?;
            let end = trimmed.rfind(close)?;
            (end > start).then(|| (start, &trimmed[start..=end]))
        })
        .collect();
    spans.sort_by_key(|(start, _)| *start);
    spans
        .into_iter()
        .find_map(|(_, span)| serde_json::from_str(span).ok())
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an info string such as `json`.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Run a completion and parse its output as JSON.
pub async fn request_json(
    backend: &dyn CompletionBackend,
    request: &CompletionRequest,
) -> LlmResponse<serde_json::Value> {
    match backend.complete(request).await {
        Ok(raw) => match extract_json(&raw) {
            Some(value) => LlmResponse::Ok(value),
            None => {
                tracing::warn!(
                    "Backend {} returned output that is not JSON ({} bytes)",
                    backend.name(),
                    raw.len()
                );
                LlmResponse::Malformed(raw)
            }
        },
        Err(e) => {
            tracing::warn!("Backend {} failed: {e:#}", backend.name());
            LlmResponse::ProviderError(format!("{e:#}"))
        }
    }
}

/// Strings from a JSON array, or from the array under `key` of an object.
///
/// Non-string entries are skipped. Returns `None` when neither shape matches.
pub(crate) fn string_list(value: &serde_json::Value, key: &str) -> Option<Vec<String>> {
    let array = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map.get(key)?.as_array()?,
        _ => return None,
    };
    Some(
        array
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
    )
}
