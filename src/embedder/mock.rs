/// Mock embedder for testing purposes.
///
/// Generates deterministic embeddings based on a hash of the model and text.
use async_trait::async_trait;
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError};

/// A mock embedder that produces deterministic vectors from text hashes.
///
/// Useful for testing without a running embedding service.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn vector_for(&self, text: &str, model: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        model.hash(&mut hasher);
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        // xorshift keeps every component varied instead of repeating 8 bytes
        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            embedding.push((state % 2001) as f32 / 1000.0 - 1.0);
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }
        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, EmbedderError> {
        Ok(self.vector_for(text, model))
    }

    async fn embed_batch(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|t| self.vector_for(t, model)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
