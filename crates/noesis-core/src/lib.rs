//! # Noesis Core
//!
//! A persistent, self-evolving cognitive substrate for a language-model
//! driven agent. The substrate records free-form textual thoughts, organizes
//! them into an associative graph, crystallizes recurring clusters into
//! named concepts, evolves the prompt templates that seed new thoughts, and
//! schedules cognitive jobs at intervals that adapt to the agent's mood.
//!
//! Four tightly-coupled subsystems produce the emergence:
//!
//! - **Emergent Memory**: thought store with vector retrieval, typed
//!   weighted associations, activation, and exponential decay
//! - **Concept Evolution**: density-based clustering of the active thought
//!   population into staged, labelled concepts with their own graph
//! - **Dynamic Prompts**: effectiveness-weighted template store that learns
//!   from feedback, mutates its best templates, and abstracts strong
//!   thoughts back into patterns
//! - **Adaptive Scheduler**: a cooperative loop driving jobs whose intervals
//!   flex with mood, temperament, and the quality of recent runs
//!
//! Text generation itself is delegated: the substrate builds prompts and
//! stores the resulting thoughts, but never calls a model. One substrate
//! instance owns its data directory, guarded by an advisory lock.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use noesis_core::{Config, SaveRequest, RetrievalMode, Substrate};
//!
//! # fn main() -> noesis_core::Result<()> {
//! let mut substrate = Substrate::open(Config::for_data_dir("/var/lib/noesis"))?;
//!
//! let thought = substrate.save(SaveRequest::new(
//!     "The harbor was quiet tonight, and the quiet felt deliberate.",
//! ))?;
//!
//! let related = substrate.retrieve("quiet harbor", 5, RetrievalMode::Spreading)?;
//! substrate.reinforce(&thought.id)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings`: local ONNX embedding model via fastembed. Without it the
//!   deterministic lexical backend is used, which needs no downloads.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod concepts;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod memory;
pub mod prompts;
pub mod scheduler;
pub mod storage;
pub mod substrate;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{Config, EmbeddingBackend, JobIntervals, OracleConfig};
pub use error::{Result, SubstrateError};

pub use memory::{
    Association, AssociationKind, DecayReport, MemoryStore, MetaValue, RetrievalMode,
    SaveRequest, ScoredThought, Thought, ThoughtType,
};

pub use concepts::{
    Concept, ConceptEdge, ConceptNetwork, ConceptStage, EvolutionReport, Integration,
};

pub use prompts::{PromptEvolution, PromptPattern, PromptStore, Rendered};

pub use scheduler::{
    adapted_interval, Job, JobFuture, JobOutcome, JobState, Mood, Scheduler, SchedulerHandle,
    Temperament,
};

pub use embeddings::{
    cosine_similarity, euclidean_distance, Embedder, EmbeddingError, LexicalEmbedder,
    EMBEDDING_DIMENSIONS,
};

#[cfg(feature = "embeddings")]
pub use embeddings::LocalEmbedder;

pub use index::{FlatIndex, IndexError};

pub use storage::{DirectoryLock, EventLog, FileStore};

pub use substrate::{pulse_job, Substrate};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, Job, JobOutcome, MetaValue, Mood, Result, RetrievalMode, SaveRequest, Scheduler,
        Substrate, SubstrateError, Thought, ThoughtType,
    };
}
