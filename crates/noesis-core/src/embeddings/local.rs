//! Local model embeddings via fastembed.
//!
//! One process-global model behind a `OnceLock`; initialization downloads
//! the ONNX weights on first use. Output is Matryoshka-truncated to the
//! shared dimensions and L2-normalized so distances are comparable with the
//! lexical backend.

use std::sync::{Mutex, MutexGuard, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{l2_normalize, Embedder, EmbeddingError, EMBEDDING_DIMENSIONS};

/// Maximum text length fed to the model (bytes, truncated beyond)
const MAX_TEXT_LENGTH: usize = 8192;

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn model() -> Result<MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = MODEL.get_or_init(|| {
        let cache = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache) {
            tracing::warn!(path = %cache.display(), error = %e, "could not create model cache dir");
        }
        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache);
        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("failed to initialize embedding model: {e}"))
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::BackendInit(format!("lock poisoned: {e}"))),
        Err(e) => Err(EmbeddingError::BackendInit(e.clone())),
    }
}

/// Matryoshka truncation: the first N dimensions of the model output are a
/// valid N-dimensional embedding; re-normalize after cutting.
fn truncate(mut vector: Vec<f32>) -> Vec<f32> {
    if vector.len() > EMBEDDING_DIMENSIONS {
        vector.truncate(EMBEDDING_DIMENSIONS);
    }
    l2_normalize(&mut vector);
    vector
}

/// Local ONNX model embedder
pub struct LocalEmbedder {
    _unused: (),
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEmbedder {
    /// Create the embedder; the model itself loads lazily on first embed
    pub fn new() -> Self {
        Self { _unused: () }
    }

    /// Force model initialization now, surfacing any download/setup error
    pub fn init(&self) -> Result<(), EmbeddingError> {
        model().map(|_| ())
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text cannot be empty".to_string(),
            ));
        }

        let mut model = model()?;
        let text = if text.len() > MAX_TEXT_LENGTH {
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let mut embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::BackendFailed(e.to_string()))?;
        let vector = embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::BackendFailed("no embedding produced".to_string()))?;
        Ok(truncate(vector))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn model_name(&self) -> &'static str {
        "nomic-ai/nomic-embed-text-v1.5"
    }
}
