//! Embedding provider trait and the HTTP implementation

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use half::f16;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result from a vector of f16 embeddings.
    ///
    /// The dimension is inferred from the first embedding vector and is 0 when
    /// there are no embeddings.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Implementations must return exactly one vector per input text, in input
/// order, each of [`EmbeddingProvider::embedding_dimension`] length.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        let actual = result.len();
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or(EmbedError::CountMismatch {
                expected: 1,
                actual,
            })
    }

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Embedding provider for OpenAI-compatible `/embeddings` endpoints.
///
/// Requests are split into batches of [`EmbedConfig::batch_size`] texts. Each
/// batch is retried with exponential backoff on transient failures (transport
/// errors, 429, 5xx). Responses are checked for count and dimension before
/// being converted to half precision.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    config: EmbedConfig,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingProvider")
            .field("config", &self.config)
            .field("api_key", &self.api_key.is_some())
            .finish()
    }
}

impl HttpEmbeddingProvider {
    /// Creates a provider, reading the API key from `config.api_key_env`.
    ///
    /// A missing key is not an error here: local services often accept
    /// unauthenticated requests. The service will reject the request if it
    /// needs one.
    pub fn new(config: EmbedConfig) -> Result<Self> {
        config.validate()?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "No API key found in {}, embedding requests will be unauthenticated",
                config.api_key_env
            );
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        tracing::info!(
            "Created HTTP embedding provider for model {} at {}",
            config.model_name,
            config.base_url
        );
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

    /// The configuration this provider was created with
    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f16>>> {
        let mut attempt = 0u32;
        loop {
            match self.send_request(texts).await {
                Ok(response) => {
                    return decode_embeddings(
                        response,
                        texts.len(),
                        self.config.dimension,
                        self.config.normalize,
                    );
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(attempt, error = %e, "Embedding request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_request(&self, texts: &[String]) -> Result<EmbeddingsResponse> {
        let mut request = self
            .client
            .post(self.config.embeddings_url())
            .json(&EmbeddingsRequest {
                model: &self.config.model_name,
                input: texts,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| EmbedError::malformed(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult {
                embeddings: Vec::new(),
                dimension: self.config.dimension,
            });
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            tracing::debug!("Embedding batch of {} texts", batch.len());
            embeddings.extend(self.request_batch(batch).await?);
        }

        Ok(EmbeddingResult {
            embeddings,
            dimension: self.config.dimension,
        })
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        &self.config.model_name
    }
}

/// Check a response against the request and convert it to half precision.
///
/// When the service reports an `index` for every item the vectors are put back
/// in request order.
fn decode_embeddings(
    response: EmbeddingsResponse,
    expected: usize,
    dimension: usize,
    normalize: bool,
) -> Result<Vec<Vec<f16>>> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            actual: data.len(),
        });
    }

    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }

    data.into_iter()
        .map(|item| {
            let mut vector = item.embedding;
            if vector.len() != dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(EmbedError::malformed("non-finite values in embedding"));
            }
            if normalize {
                l2_normalize(&mut vector);
            }
            Ok(vector.into_iter().map(f16::from_f32).collect())
        })
        .collect()
}

/// Longest wait between two attempts of the same request.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Wait before retry number `attempt + 1`: 100ms doubled per attempt, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(attempt: u32) -> Duration {
    let millis = 2u64.saturating_pow(attempt).saturating_mul(100);
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn response(json: &str) -> EmbeddingsResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_embedding_result() {
        let embeddings = vec![
            vec![f16::from_f32(1.0), f16::from_f32(2.0)],
            vec![f16::from_f32(3.0), f16::from_f32(4.0)],
        ];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 2);
        assert!(!result.is_empty());
        assert!(EmbeddingResult::new(Vec::new()).is_empty());
    }

    #[test]
    fn test_request_serialization() {
        let input = vec!["alpha".to_string(), "beta".to_string()];
        let request = EmbeddingsRequest {
            model: "text-embedding-3-small",
            input: &input,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"][1], "beta");
    }

    #[test]
    fn test_decode_restores_request_order() {
        let body = response(
            r#"{"data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]}"#,
        );
        let vectors = decode_embeddings(body, 2, 2, false).unwrap();
        assert_eq!(vectors[0][0].to_f32(), 1.0);
        assert_eq!(vectors[1][1].to_f32(), 1.0);
    }

    #[test]
    fn test_decode_rejects_wrong_count() {
        let body = response(r#"{"data": [{"embedding": [1.0, 0.0]}]}"#);
        let err = decode_embeddings(body, 2, 2, false).unwrap_err();
        assert!(matches!(
            err,
            EmbedError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_dimension() {
        let body = response(r#"{"data": [{"embedding": [1.0, 0.0, 0.0]}]}"#);
        let err = decode_embeddings(body, 1, 2, false).unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_decode_normalizes_when_configured() {
        let body = response(r#"{"data": [{"embedding": [3.0, 4.0]}]}"#);
        let vectors = decode_embeddings(body, 1, 2, true).unwrap();
        assert!((vectors[0][0].to_f32() - 0.6).abs() < 1e-3);
        assert!((vectors[0][1].to_f32() - 0.8).abs() < 1e-3);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut zeros = vec![0.0f32; 3];
        l2_normalize(&mut zeros);
        assert_eq!(zeros, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_provider_rejects_invalid_config() {
        let result = HttpEmbeddingProvider::new(EmbedConfig::new("model", 0));
        assert!(matches!(result, Err(EmbedError::InvalidConfig { .. })));
    }

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(100));
        assert_eq!(backoff_delay(3), Duration::from_millis(800));
        assert_eq!(backoff_delay(64), MAX_BACKOFF);
        assert_eq!(backoff_delay(u32::MAX), MAX_BACKOFF);
    }

    /// Serves one canned HTTP response per connection, in order.
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{address}/v1")
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut received = Vec::new();
        let mut buffer = [0u8; 4096];
        loop {
            let read = socket.read(&mut buffer).await.unwrap();
            if read == 0 {
                return;
            }
            received.extend_from_slice(&buffer[..read]);
            let text = String::from_utf8_lossy(&received);
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if received.len() >= end + 4 + content_length {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .try_init()
            .ok();

        let base_url = serve(vec![
            (503, r#"{"error": "busy"}"#),
            (200, r#"{"data": [{"index": 0, "embedding": [3.0, 4.0]}]}"#),
        ])
        .await;
        let config = EmbedConfig::new("model", 2)
            .with_base_url(base_url)
            .with_normalize(true);
        let provider = HttpEmbeddingProvider::new(config).unwrap().with_api_key("key");

        let vector = tokio_test::assert_ok!(provider.embed_text("hello").await);
        assert!((vector[0].to_f32() - 0.6).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let base_url = serve(vec![(400, r#"{"error": "bad input"}"#)]).await;
        let config = EmbedConfig::new("model", 2).with_base_url(base_url);
        let provider = HttpEmbeddingProvider::new(config).unwrap();

        let err = tokio_test::assert_err!(provider.embed_texts(&["x".to_string()]).await);
        assert!(matches!(err, EmbedError::Service { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_empty_input_skips_request() {
        // Port 9 is discard; no request should be attempted at all.
        let config = EmbedConfig::new("model", 4).with_base_url("http://127.0.0.1:9");
        let provider = HttpEmbeddingProvider::new(config).unwrap();

        let result = provider.embed_texts(&[]).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.dimension, 4);
        assert_eq!(provider.provider_name(), "model");
    }
}
