//! Deterministic lexical embeddings.
//!
//! Hashed bag-of-words: each lowercased alphanumeric token increments one
//! dimension chosen by FNV-1a, then the vector is L2-normalized. Texts that
//! share vocabulary land close in cosine space, which is all the substrate
//! needs from its always-available backend. No model download, no state,
//! identical output for identical input across runs.

use super::{l2_normalize, Embedder, EmbeddingError, EMBEDDING_DIMENSIONS};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

#[inline]
fn fnv1a(token: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Hashed bag-of-words embedder
pub struct LexicalEmbedder {
    dims: usize,
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalEmbedder {
    /// Embedder with the shared default dimensions
    pub fn new() -> Self {
        Self {
            dims: EMBEDDING_DIMENSIONS,
        }
    }

    /// Embedder with custom dimensions (tests shrink this)
    pub fn with_dimensions(dims: usize) -> Self {
        Self { dims }
    }
}

impl Embedder for LexicalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text cannot be empty".to_string(),
            ));
        }

        let mut vector = vec![0.0_f32; self.dims];
        for token in tokens(text) {
            let dim = (fnv1a(&token) % self.dims as u64) as usize;
            vector[dim] += 1.0;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &'static str {
        "lexical-fnv-256"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = LexicalEmbedder::new();
        let a = embedder.embed("the stars over the quiet harbor").unwrap();
        let b = embedder.embed("the stars over the quiet harbor").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unit_length() {
        let embedder = LexicalEmbedder::new();
        let v = embedder.embed("soup and bread").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let embedder = LexicalEmbedder::new();
        let stars_a = embedder.embed("I wonder about stars and galaxies").unwrap();
        let stars_b = embedder.embed("I wonder about stars and nebulae").unwrap();
        let soup = embedder.embed("Soup and bread taste good tonight").unwrap();

        let related = cosine_similarity(&stars_a, &stars_b);
        let unrelated = cosine_similarity(&stars_a, &soup);
        assert!(related > 0.6);
        assert!(related > unrelated);
    }

    #[test]
    fn test_empty_input_rejected() {
        let embedder = LexicalEmbedder::new();
        assert!(matches!(
            embedder.embed("   "),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = LexicalEmbedder::new();
        let a = embedder.embed("Stars, and galaxies!").unwrap();
        let b = embedder.embed("stars and galaxies").unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }
}
