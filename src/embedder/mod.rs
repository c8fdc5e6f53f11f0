/// Embedder trait and shared types for text embedding.
///
/// Providers are called through an [`EmbedLimiter`](limiter::EmbedLimiter)
/// and retried with [`embed_with_retry`](retry::embed_with_retry).
pub mod http;
pub mod limiter;
pub mod mock;
pub mod retry;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedderError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("embedding provider rate limited the request")]
    RateLimited,

    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("embedding cancelled")]
    Cancelled,
}

impl EmbedderError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbedderError::Unavailable(_) | EmbedderError::RateLimited | EmbedderError::Timeout(_)
        )
    }
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, one per input in order.
    async fn embed_batch(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text, model).await?);
        }
        Ok(vectors)
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}
