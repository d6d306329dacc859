//! OpenAI-compatible chat completion backend

use super::{CompletionBackend, CompletionRequest, LlmConfig};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

enum AttemptError {
    /// Worth retrying: transport failure, 429 or 5xx
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

/// [`CompletionBackend`] for OpenAI-compatible `/chat/completions` endpoints.
///
/// Transient failures are retried up to `max_retries` times with exponential
/// backoff starting at 100 ms.
#[derive(Clone)]
pub struct OpenAiChatBackend {
    config: LlmConfig,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiChatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatBackend")
            .field("config", &self.config)
            .field("api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiChatBackend {
    /// Creates a backend, reading the API key from `config.api_key_env`.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "No API key found in {}, completion requests will be unauthenticated",
                config.api_key_env
            );
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            config,
            client,
            api_key,
        })
    }

    /// Use an explicit API key instead of the environment (builder style)
    pub fn with_api_key<S: Into<String>>(self, api_key: S) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..self
        }
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }

    async fn attempt(&self, body: &ChatRequest<'_>) -> std::result::Result<String, AttemptError> {
        let mut http = self
            .client
            .post(self.config.chat_completions_url())
            .json(body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| AttemptError::Transient(anyhow!("HTTP error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = anyhow!("completion service returned {status}: {text}");
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                AttemptError::Transient(err)
            } else {
                AttemptError::Fatal(err)
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| AttemptError::Transient(anyhow!("reading response body: {e}")))?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| AttemptError::Fatal(anyhow!("unexpected response shape: {e}")))?;
        first_choice_text(parsed).map_err(AttemptError::Fatal)
    }
}

fn first_choice_text(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("completion response has no message content"))
}

#[async_trait]
impl CompletionBackend for OpenAiChatBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.build_body(request);
        let mut attempt = 0u32;
        loop {
            match self.attempt(&body).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Transient(e)) if attempt < self.config.max_retries => {
                    let delay = sift_embed::backoff_delay(attempt);
                    tracing::warn!(attempt, error = %e, "Completion request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Transient(e)) | Err(AttemptError::Fatal(e)) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
