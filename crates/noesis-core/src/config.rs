//! Environment-driven configuration.
//!
//! All algorithmic tunables live here with their defaults so tests and
//! embedders can override them without touching the environment. Only the
//! data directory is required; a missing `NOESIS_DATA_DIR` is a startup
//! error with exit code 4.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SubstrateError};

/// Which embedding backend maps text to vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingBackend {
    /// Deterministic hashed bag-of-words. Always available.
    #[default]
    Lexical,
    /// Local ONNX model (requires the `embeddings` feature).
    Local,
}

impl EmbeddingBackend {
    fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "local" | "model" => EmbeddingBackend::Local,
            _ => EmbeddingBackend::Lexical,
        }
    }
}

/// Connection settings for the external oracle (text generation) backend.
///
/// The core never calls the oracle itself; these are carried for the
/// collaborators (jobs, HTTP layer) that do.
#[derive(Debug, Clone, Default)]
pub struct OracleConfig {
    /// Base URL of the oracle HTTP service
    pub url: Option<String>,
    /// API key, if the service requires one
    pub api_key: Option<String>,
}

/// Base intervals for the built-in cognitive jobs, in seconds
#[derive(Debug, Clone, Copy)]
pub struct JobIntervals {
    pub reflection: u64,
    pub dream: u64,
    pub monologue: u64,
    pub existential: u64,
    pub pulse: u64,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            reflection: 300,
            dream: 900,
            monologue: 1200,
            existential: 1800,
            pulse: 60,
        }
    }
}

/// Substrate configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory owning every store. Exactly one process may hold it.
    pub data_dir: PathBuf,
    /// Embedding backend selector
    pub embedding_backend: EmbeddingBackend,
    /// Oracle connection settings (passed through to collaborators)
    pub oracle: OracleConfig,
    /// Base intervals for the built-in jobs
    pub intervals: JobIntervals,
    /// Whether a second device may mirror this substrate (reserved)
    pub multi_device: bool,

    // ---- memory ----
    /// How many index neighbours `save` inspects for semantic links
    pub semantic_neighbors: usize,
    /// Minimum cosine similarity for a semantic association
    pub semantic_threshold: f32,
    /// How many most-recent thoughts receive temporal links
    pub temporal_fanout: usize,
    /// Base weight of a temporal association before age falloff
    pub temporal_coefficient: f64,
    /// Weight contributed by a contextual (shared tag/focus) link
    pub contextual_weight: f64,
    /// Activation added by one `reinforce`
    pub reinforce_boost: f64,
    /// Activation half-life
    pub activation_half_life: Duration,
    /// Association weight half-life
    pub association_half_life: Duration,
    /// Thoughts younger than this are exempt from decay
    pub decay_grace: Duration,
    /// Associations below this weight are dropped during decay
    pub edge_floor: f64,
    /// Similarity share in activation-weighted retrieval (activation gets the rest)
    pub similarity_alpha: f64,
    /// Per-hop damping during spreading retrieval
    pub spreading_damping: f64,
    /// Maximum BFS depth during spreading retrieval
    pub spreading_depth: usize,
    /// How many top similarity hits seed a spreading retrieval
    pub spreading_seeds: usize,
    /// Persist the vector index every N saves (and on flush)
    pub index_flush_every: u32,

    // ---- concepts ----
    /// Minimum cluster size; also DBSCAN min-samples
    pub min_cluster: usize,
    /// Thoughts below this activation are invisible to clustering
    pub clustering_activation_floor: f64,
    /// Centroid similarity at which a cluster merges into an existing concept
    pub merge_similarity: f32,
    /// Centroid similarity at which two concepts count as related
    pub related_similarity: f32,
    /// Centroid similarity needed to attach a thought to a concept
    pub integrate_similarity: f32,
    /// A thought belongs to at most this many concepts
    pub max_concepts_per_thought: usize,
    /// Run an evolution cycle after this many new thoughts...
    pub evolution_thought_stride: u64,
    /// ...or after this much wall time, whichever comes first
    pub evolution_max_gap: Duration,
    /// Cycles below min-cluster membership before a concept fades
    pub fading_grace_cycles: u32,

    // ---- prompts ----
    /// EWMA smoothing factor for pattern success scores
    pub score_smoothing: f64,
    /// Additive prior in selection weights, prevents starvation
    pub selection_prior: f64,
    /// Patterns scoring at least this are eligible for evolution
    pub evolve_threshold: f64,
    /// Derived patterns scoring below this begin accumulating a retire streak
    pub retire_threshold: f64,
    /// Selections below the retire threshold before a derived pattern is retired
    pub retire_streak: u32,

    // ---- scheduler ----
    /// Scheduler wake-up tick
    pub tick: Duration,
}

impl Config {
    /// Configuration with every tunable at its default, rooted at `data_dir`
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            embedding_backend: EmbeddingBackend::default(),
            oracle: OracleConfig::default(),
            intervals: JobIntervals::default(),
            multi_device: false,

            semantic_neighbors: 8,
            semantic_threshold: 0.55,
            temporal_fanout: 3,
            temporal_coefficient: 0.3,
            contextual_weight: 0.2,
            reinforce_boost: 0.25,
            activation_half_life: Duration::from_secs(7 * 24 * 3600),
            association_half_life: Duration::from_secs(30 * 24 * 3600),
            decay_grace: Duration::from_secs(3600),
            edge_floor: 0.05,
            similarity_alpha: 0.7,
            spreading_damping: 0.5,
            spreading_depth: 2,
            spreading_seeds: 2,
            index_flush_every: 16,

            min_cluster: 4,
            clustering_activation_floor: 0.2,
            merge_similarity: 0.85,
            related_similarity: 0.7,
            integrate_similarity: 0.6,
            max_concepts_per_thought: 3,
            evolution_thought_stride: 25,
            evolution_max_gap: Duration::from_secs(30 * 60),
            fading_grace_cycles: 3,

            score_smoothing: 0.2,
            selection_prior: 0.1,
            evolve_threshold: 0.6,
            retire_threshold: 0.25,
            retire_streak: 10,

            tick: Duration::from_secs(5),
        }
    }

    /// Build configuration from the process environment.
    ///
    /// `NOESIS_DATA_DIR` is required; everything else falls back to the
    /// defaults of [`Config::for_data_dir`].
    pub fn from_env() -> Result<Self> {
        let data_dir =
            std::env::var("NOESIS_DATA_DIR").map_err(|_| SubstrateError::MissingEnv("NOESIS_DATA_DIR"))?;
        let mut config = Self::for_data_dir(data_dir);

        if let Ok(backend) = std::env::var("NOESIS_EMBEDDING_BACKEND") {
            config.embedding_backend = EmbeddingBackend::parse(&backend);
        }
        config.oracle.url = std::env::var("NOESIS_ORACLE_URL").ok();
        config.oracle.api_key = std::env::var("NOESIS_ORACLE_API_KEY").ok();
        config.multi_device = std::env::var("NOESIS_MULTI_DEVICE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let mut read_interval = |name: &str, slot: &mut u64| {
            if let Some(secs) = std::env::var(name).ok().and_then(|v| v.parse().ok()) {
                *slot = secs;
            }
        };
        read_interval("NOESIS_REFLECTION_INTERVAL", &mut config.intervals.reflection);
        read_interval("NOESIS_DREAM_INTERVAL", &mut config.intervals.dream);
        read_interval("NOESIS_MONOLOGUE_INTERVAL", &mut config.intervals.monologue);
        read_interval("NOESIS_EXISTENTIAL_INTERVAL", &mut config.intervals.existential);
        read_interval("NOESIS_PULSE_INTERVAL", &mut config.intervals.pulse);

        Ok(config)
    }

    /// Decay rate (per second) matching the activation half-life
    pub fn activation_lambda(&self) -> f64 {
        std::f64::consts::LN_2 / self.activation_half_life.as_secs_f64()
    }

    /// Decay rate (per second) matching the association half-life
    pub fn association_lambda(&self) -> f64 {
        std::f64::consts::LN_2 / self.association_half_life.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::for_data_dir("/tmp/noesis");
        assert_eq!(config.semantic_neighbors, 8);
        assert_eq!(config.min_cluster, 4);
        assert_eq!(config.intervals.pulse, 60);
        assert!((config.semantic_threshold - 0.55).abs() < f32::EPSILON);
    }

    #[test]
    fn test_half_life_lambda() {
        let config = Config::for_data_dir("/tmp/noesis");
        let lambda = config.activation_lambda();
        let one_half_life = config.activation_half_life.as_secs_f64();
        let remaining = (-lambda * one_half_life).exp();
        assert!((remaining - 0.5).abs() < 1e-9);
    }

    // Environment access is process-global, so everything env-related lives
    // in one test to avoid races under the parallel test runner.
    #[test]
    fn test_from_env() {
        std::env::remove_var("NOESIS_DATA_DIR");
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.exit_code(), 4);

        std::env::set_var("NOESIS_DATA_DIR", "/tmp/noesis-env");
        std::env::set_var("NOESIS_REFLECTION_INTERVAL", "120");
        std::env::set_var("NOESIS_EMBEDDING_BACKEND", "lexical");
        let config = Config::from_env().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/noesis-env"));
        assert_eq!(config.intervals.reflection, 120);
        assert_eq!(config.embedding_backend, EmbeddingBackend::Lexical);

        std::env::remove_var("NOESIS_DATA_DIR");
        std::env::remove_var("NOESIS_REFLECTION_INTERVAL");
        std::env::remove_var("NOESIS_EMBEDDING_BACKEND");
    }
}
