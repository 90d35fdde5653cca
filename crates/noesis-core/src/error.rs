//! Substrate error taxonomy.
//!
//! One enum covers every failure class a caller can observe. Component-local
//! errors (embedding, index) convert into this type at the module boundary.

use std::path::PathBuf;

/// Substrate error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SubstrateError {
    /// Embedding or generation backend unreachable after bounded retries
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Disk write, fsync, or rename failed; prior on-disk state is intact
    #[error("persistence failure on {path}: {source}")]
    Persistence {
        /// File the write was targeting
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// An on-disk store failed its schema check on load and no backup parsed
    #[error("corrupt store {path}: {detail}")]
    CorruptState {
        /// File that failed to load
        path: PathBuf,
        /// What went wrong
        detail: String,
    },

    /// Unknown thought, concept, or pattern id
    #[error("not found: {0}")]
    NotFound(String),

    /// A template placeholder had no matching context variable
    #[error("pattern/context mismatch: unresolved placeholder `{placeholder}` in pattern {pattern_id}")]
    PatternMismatch {
        /// Pattern whose template failed to render
        pattern_id: String,
        /// The placeholder that stayed unresolved
        placeholder: String,
    },

    /// Another process holds the data directory lock
    #[error("data directory locked: {0}")]
    DirectoryLocked(PathBuf),

    /// The operation was cancelled between suspension points
    #[error("cancelled")]
    Cancelled,

    /// A required environment variable was absent at startup
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
}

/// Substrate result type
pub type Result<T> = std::result::Result<T, SubstrateError>;

impl SubstrateError {
    /// Wrap an IO error that occurred while persisting `path`
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SubstrateError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Flag `path` as failing its schema check
    pub fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        SubstrateError::CorruptState {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Process exit code when this error aborts startup.
    ///
    /// 0 is a normal stop, 2 the directory lock is held, 3 a corrupt store
    /// was rejected with no usable backup, 4 a required environment variable
    /// was missing. Everything else is a generic failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SubstrateError::DirectoryLocked(_) => 2,
            SubstrateError::CorruptState { .. } => 3,
            SubstrateError::MissingEnv(_) => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            SubstrateError::DirectoryLocked(PathBuf::from("/tmp/x")).exit_code(),
            2
        );
        assert_eq!(
            SubstrateError::corrupt("/tmp/thoughts.json", "bad json").exit_code(),
            3
        );
        assert_eq!(SubstrateError::MissingEnv("NOESIS_DATA_DIR").exit_code(), 4);
        assert_eq!(
            SubstrateError::NotFound("t-123".to_string()).exit_code(),
            1
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = SubstrateError::PatternMismatch {
            pattern_id: "p-1".to_string(),
            placeholder: "concept".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("concept"));
        assert!(msg.contains("p-1"));
    }
}
