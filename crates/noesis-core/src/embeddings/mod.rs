//! Text embeddings.
//!
//! The substrate maps thought content to fixed-dimension vectors through the
//! [`Embedder`] trait. Two backends exist:
//!
//! - [`LexicalEmbedder`]: deterministic hashed bag-of-words, always available.
//! - `LocalEmbedder` (feature `embeddings`): local ONNX model via fastembed.
//!
//! Embedding failure is never fatal to a save; callers may persist a thought
//! without a vector, in which case it is reachable only by id and metadata.

mod lexical;

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
mod local;

pub use lexical::LexicalEmbedder;

#[cfg(feature = "embeddings")]
pub use local::LocalEmbedder;

/// Embedding dimensions shared by every backend
pub const EMBEDDING_DIMENSIONS: usize = 256;

/// Bounded retry attempts for backend calls
const RETRY_ATTEMPTS: u32 = 3;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    /// Failed to initialize the backend
    BackendInit(String),
    /// The backend refused or timed out
    BackendFailed(String),
    /// Invalid input (empty text)
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::BackendInit(e) => write!(f, "backend initialization failed: {}", e),
            EmbeddingError::BackendFailed(e) => write!(f, "embedding failed: {}", e),
            EmbeddingError::InvalidInput(e) => write!(f, "invalid input: {}", e),
        }
    }
}

impl std::error::Error for EmbeddingError {}

impl From<EmbeddingError> for crate::error::SubstrateError {
    fn from(e: EmbeddingError) -> Self {
        crate::error::SubstrateError::BackendUnavailable(e.to_string())
    }
}

// ============================================================================
// EMBEDDER TRAIT
// ============================================================================

/// Maps text to a fixed-dimension vector, deterministically for a fixed model
pub trait Embedder: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Output dimensions
    fn dimensions(&self) -> usize;

    /// Backend identifier, recorded with each embedded thought
    fn model_name(&self) -> &'static str;
}

/// Embed with bounded exponential backoff.
///
/// Transient backend failures are retried; `InvalidInput` is not.
pub fn embed_with_retry(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let mut delay = std::time::Duration::from_millis(100);
    let mut last_err = None;
    for attempt in 0..RETRY_ATTEMPTS {
        match embedder.embed(text) {
            Ok(vector) => return Ok(vector),
            Err(e @ EmbeddingError::InvalidInput(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "embedding attempt failed");
                last_err = Some(e);
                if attempt + 1 < RETRY_ATTEMPTS {
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| EmbeddingError::BackendFailed("no attempts made".to_string())))
}

// ============================================================================
// SIMILARITY FUNCTIONS
// ============================================================================

/// Cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

/// Euclidean distance between two vectors
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Cosine similarity recovered from the L2 distance of two unit vectors
#[inline]
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 - (distance * distance) / 2.0
}

/// L2-normalize a vector in place
#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}
