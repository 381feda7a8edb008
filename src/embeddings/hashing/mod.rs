//! Deterministic feature-hashing embedder
//!
//! Word unigrams and bigrams are hashed with SHA-256 into a fixed number of
//! signed buckets and the result is L2 normalised. No model or network is
//! needed, and identical text always maps to an identical vector.


use anyhow::Result;
use sha2::{Digest, Sha256};

use super::{Embedder, normalize};

const BIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed a single text
    #[inline]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);

        for token in &tokens {
            self.accumulate(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            if let [first, second] = pair {
                self.accumulate(&mut vector, &format!("{first} {second}"), BIGRAM_WEIGHT);
            }
        }

        normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };

        if let Some(slot) = vector.get_mut(index) {
            *slot += sign * weight;
        }
    }
}

impl Embedder for HashingEmbedder {
    #[inline]
    fn model_id(&self) -> String {
        format!("hashing-sha256-{}", self.dimension)
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Lowercased alphanumeric words; decimal points inside numbers are kept
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let decimal_point = c == '.'
            && current.chars().last().is_some_and(|p| p.is_ascii_digit())
            && chars.peek().is_some_and(char::is_ascii_digit);
        if c.is_alphanumeric() || c == '%' || decimal_point {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
