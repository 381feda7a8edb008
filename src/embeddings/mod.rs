// Embeddings module
// Passage chunking and the embedding backends shared by indexing and retrieval

pub mod chunking;
pub mod hashing;
pub mod ollama;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;

pub use chunking::{ChunkingConfig, ContentChunk, chunk_document, estimate_token_count};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;

/// A pure text-to-vector function with a fixed output dimension
///
/// Implementations block; async callers run them on the blocking pool.
pub trait Embedder: Send + Sync {
    /// Identifier stored alongside an index so query and passage vectors match
    fn model_id(&self) -> String;

    fn dimension(&self) -> usize;

    /// Embed each text, returning vectors in input order
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    #[inline]
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .into_iter()
            .next()
            .context("Embedding backend returned no vector")
    }
}

/// Selectable embedding backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingModel {
    /// Offline feature hashing
    #[default]
    Hashing,
    /// Ollama embedding model from the `[ollama]` section
    Ollama,
}

impl fmt::Display for EmbeddingModel {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hashing => write!(f, "hashing"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// Build the embedder selected by the retrieval configuration
#[inline]
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.retrieval.embedding_model {
        EmbeddingModel::Hashing => Ok(Arc::new(HashingEmbedder::new(
            config.retrieval.hashing_dimension,
        ))),
        EmbeddingModel::Ollama => {
            let client =
                OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
            Ok(Arc::new(client))
        }
    }
}

/// Cosine similarity of two vectors; 0 for mismatched lengths or zero vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
        (x.mul_add(*y, d), x.mul_add(*x, na), y.mul_add(*y, nb))
    });
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Scale a vector to unit length in place; zero vectors are left untouched
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().fold(0.0f32, |acc, v| v.mul_add(*v, acc)).sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
