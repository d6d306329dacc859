//! Error types for the embedding system

/// Result type for embedding operations.
///
/// This is a convenience type alias that uses [`EmbedError`] as the error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Covers configuration problems, transport failures against the embedding
/// service, and responses that do not satisfy the provider contract (wrong
/// number of vectors, wrong dimension).
///
/// # Error Categories
///
/// - **Configuration Errors**: Invalid settings or a missing API key
/// - **Transport Errors**: The HTTP request could not be completed
/// - **Service Errors**: The service answered with a non-success status
/// - **Contract Errors**: The response shape does not match the request
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when provider configuration is invalid
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// The environment variable holding the API key is not set
    #[error("API key not found in environment variable {var}")]
    MissingApiKey { var: String },

    /// The HTTP request failed before a response was received
    #[error("HTTP request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// The service returned a non-success status
    #[error("Embedding service returned {status}: {body}")]
    Service { status: u16, body: String },

    /// The response body could not be interpreted
    #[error("Malformed embedding response: {message}")]
    MalformedResponse { message: String },

    /// The service returned a different number of vectors than texts sent
    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// A returned vector does not have the configured dimension
    #[error("Expected embedding dimension {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Create an embedding generation error from any error type.
    ///
    /// # Arguments
    /// * `source` - The underlying error that caused the embedding generation failure
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::EmbeddingGeneration {
            source: Box::new(source),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a malformed response error with a custom message.
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Whether retrying the same request could succeed.
    ///
    /// Transport failures, rate limiting (429) and server errors (5xx) are
    /// transient. Everything else is a property of the request or the
    /// configuration and will fail again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::Service { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
