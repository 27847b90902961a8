//! Deterministic fakes shared by unit tests.

use async_trait::async_trait;

use crate::oracle::Embedder;

/// Embedder producing a deterministic byte-frequency vector; identical
/// texts embed identically, so exact-match queries rank first.
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dim: 32 }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(hash_embedding(text, self.dim))
    }
}

/// Byte-frequency embedding used by the fake embedder.
pub fn hash_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    for (position, byte) in text.bytes().enumerate() {
        vector[(byte as usize).wrapping_add(position * 7) % dim] += 1.0;
    }
    vector
}
