// Embeddings module
// Maps text to fixed-dimension, L2-normalized vectors


pub mod ollama;

use async_trait::async_trait;

use crate::{ChatError, Result};

pub use ollama::{ModelInfo, OllamaEmbedder};

pub type EmbeddingVector = Vec<f32>;

/// Text embedding backend
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier
    fn model(&self) -> &str;

    /// Dimension every returned vector must have
    fn dimension(&self) -> usize;

    /// Embed a single text, failing with `DimensionMismatch` on a malformed vector
    async fn embed(&self, text: &str) -> Result<EmbeddingVector>;

    /// Embed several texts in one call. Vectors are returned in input order
    /// and are not dimension-checked so callers can skip bad items individually.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Embed `text` and verify the vector has the embedder's dimension
#[inline]
pub async fn embed_checked(embedder: &dyn Embedder, text: &str) -> Result<EmbeddingVector> {
    let vector = embedder.embed(text).await?;
    check_dimension(&vector, embedder.dimension())?;
    Ok(vector)
}

#[inline]
pub fn check_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(ChatError::DimensionMismatch {
            expected,
            actual: vector.len(),
        })
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
