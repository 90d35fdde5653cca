//! The substrate facade.
//!
//! One explicit object owns every store, constructed at startup and threaded
//! through collaborators; process-wide state is limited to the data
//! directory lock. Saving a thought writes it through memory, offers it to
//! the concept network, and trips an evolution cycle when one is due (every
//! N thoughts or T minutes, whichever comes first).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::concepts::{Concept, ConceptNetwork, ConceptStage, EvolutionReport, Integration};
use crate::config::{Config, EmbeddingBackend};
use crate::embeddings::{Embedder, LexicalEmbedder};
use crate::error::Result;
use crate::memory::{
    DecayReport, MemoryStore, RetrievalMode, SaveRequest, ScoredThought, Thought,
};
use crate::prompts::{PromptEvolution, PromptStore, Rendered};
use crate::scheduler::{Job, JobOutcome};
use crate::storage::{DirectoryLock, EventLog};

/// The cognitive substrate: memory, concepts, prompts, and their shared
/// data directory.
pub struct Substrate {
    config: Config,
    events: Arc<EventLog>,
    memory: MemoryStore,
    concepts: ConceptNetwork,
    prompts: PromptStore,
    thoughts_since_evolution: u64,
    last_evolution: DateTime<Utc>,
    _lock: DirectoryLock,
}

impl std::fmt::Debug for Substrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Substrate").finish_non_exhaustive()
    }
}

impl Substrate {
    /// Open the substrate over its data directory.
    ///
    /// Acquires the exclusive directory lock, builds the configured
    /// embedding backend, and loads (or rebuilds) every store.
    pub fn open(config: Config) -> Result<Self> {
        let lock = DirectoryLock::acquire(&config.data_dir)?;
        let events = Arc::new(EventLog::open(&config.data_dir)?);
        let embedder = build_embedder(&config);

        let memory = MemoryStore::open(&config, embedder, events.clone())?;
        let concepts = ConceptNetwork::open(&config, events.clone())?;
        let prompts = PromptStore::open(&config, events.clone())?;

        events.append(
            "substrate_started",
            serde_json::json!({
                "thoughts": memory.len(),
                "concepts": concepts.len(),
            }),
        );
        info!(
            data_dir = %config.data_dir.display(),
            thoughts = memory.len(),
            concepts = concepts.len(),
            "substrate opened"
        );

        Ok(Self {
            config,
            events,
            memory,
            concepts,
            prompts,
            thoughts_since_evolution: 0,
            last_evolution: Utc::now(),
            _lock: lock,
        })
    }

    /// Substrate configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read access to the thought store
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    /// Save a thought, integrate it into the concept network, and run an
    /// evolution cycle when one is due.
    pub fn save(&mut self, request: SaveRequest) -> Result<Thought> {
        let thought = self.memory.save(request)?;
        let vector = self.memory.vector_of(&thought.id).map(<[f32]>::to_vec);
        self.concepts.integrate(&thought, vector.as_deref())?;

        self.thoughts_since_evolution += 1;
        self.evolve_if_due()?;
        Ok(thought)
    }

    /// Retrieve up to `k` thoughts relevant to `query`
    pub fn retrieve(
        &self,
        query: &str,
        k: usize,
        mode: RetrievalMode,
    ) -> Result<Vec<ScoredThought>> {
        self.memory.retrieve(query, k, mode)
    }

    /// Boost a thought's activation, propagating to its neighbours
    pub fn reinforce(&mut self, id: &str) -> Result<()> {
        self.memory.reinforce(id)
    }

    /// The most recent `n` thoughts, optionally filtered by type
    pub fn recent(&self, n: usize, thought_type: Option<&str>) -> Vec<Thought> {
        self.memory
            .recent(n, thought_type)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Look up a thought by id
    pub fn get(&self, id: &str) -> Result<Thought> {
        self.memory.get(id).cloned()
    }

    /// Apply decay as of now. Driven by the pulse job.
    pub fn decay_now(&mut self) -> Result<DecayReport> {
        self.decay_at(Utc::now())
    }

    /// Apply decay as of an explicit instant
    pub fn decay_at(&mut self, now: DateTime<Utc>) -> Result<DecayReport> {
        self.memory.decay(now)
    }

    /// Chain of related thoughts walked from a seed
    pub fn trace(&self, start: &str, depth: usize, branch: usize) -> Result<Vec<Thought>> {
        Ok(self
            .memory
            .trace(start, depth, branch)?
            .into_iter()
            .cloned()
            .collect())
    }

    // ------------------------------------------------------------------
    // Concepts
    // ------------------------------------------------------------------

    /// Attach an existing thought to nearby concepts
    pub fn integrate(&mut self, thought_id: &str) -> Result<Integration> {
        let thought = self.memory.get(thought_id)?.clone();
        let vector = self.memory.vector_of(thought_id).map(<[f32]>::to_vec);
        self.concepts.integrate(&thought, vector.as_deref())
    }

    /// Concepts, optionally filtered by stage
    pub fn concepts(&self, stage: Option<ConceptStage>) -> Vec<Concept> {
        self.concepts.list(stage).into_iter().cloned().collect()
    }

    /// Concepts related to `concept_id` in the concept graph
    pub fn concept_neighbors(&self, concept_id: &str) -> Result<Vec<(Concept, f64)>> {
        Ok(self
            .concepts
            .neighbors(concept_id)?
            .into_iter()
            .map(|(c, w)| (c.clone(), w))
            .collect())
    }

    /// Run an evolution cycle immediately
    pub fn force_evolve(&mut self) -> Result<EvolutionReport> {
        let now = Utc::now();
        self.thoughts_since_evolution = 0;
        self.last_evolution = now;
        self.concepts.evolve(&self.memory, now)
    }

    fn evolve_if_due(&mut self) -> Result<()> {
        let now = Utc::now();
        let gap = chrono::Duration::from_std(self.config.evolution_max_gap).unwrap_or_default();
        let due = self.thoughts_since_evolution >= self.config.evolution_thought_stride
            || now - self.last_evolution >= gap;
        if due {
            self.thoughts_since_evolution = 0;
            self.last_evolution = now;
            self.concepts.evolve(&self.memory, now)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Prompts
    // ------------------------------------------------------------------

    /// Select and render a prompt for a thought type
    pub fn select_prompt(
        &mut self,
        thought_type: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<Rendered> {
        self.prompts.select(thought_type, variables)
    }

    /// Fold a feedback signal into a pattern's success score
    pub fn prompt_feedback(&mut self, pattern_id: &str, signal: f64) -> Result<()> {
        self.prompts.feedback(pattern_id, signal)
    }

    /// Evolve prompt patterns now
    pub fn evolve_prompts(&mut self) -> Result<PromptEvolution> {
        self.prompts.evolve()
    }

    /// Abstract a high-signal thought into a new pattern
    pub fn extract_pattern(
        &mut self,
        thought_content: &str,
        thought_type: &str,
        producer_id: Option<&str>,
        signal: f64,
        variables: &BTreeMap<String, String>,
    ) -> Result<Option<String>> {
        self.prompts
            .extract(thought_content, thought_type, producer_id, signal, variables)
    }

    /// Register a seed pattern for a caller-defined thought type
    pub fn register_prompt_seed(&mut self, thought_type: &str, template: &str) -> Result<()> {
        self.prompts.register_seed(thought_type, template)
    }

    /// Read access to the pattern store
    pub fn prompts(&self) -> &PromptStore {
        &self.prompts
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Persist everything, including the vector index
    pub fn flush(&mut self) -> Result<()> {
        self.memory.flush()
    }
}

impl Drop for Substrate {
    fn drop(&mut self) {
        if let Err(e) = self.memory.flush() {
            warn!(error = %e, "could not flush memory on shutdown");
        }
        self.events.append("substrate_stopped", serde_json::json!({}));
    }
}

fn build_embedder(config: &Config) -> Arc<dyn Embedder> {
    match config.embedding_backend {
        EmbeddingBackend::Lexical => Arc::new(LexicalEmbedder::new()),
        EmbeddingBackend::Local => {
            #[cfg(feature = "embeddings")]
            {
                Arc::new(crate::embeddings::LocalEmbedder::new())
            }
            #[cfg(not(feature = "embeddings"))]
            {
                warn!("local embedding backend requested without the `embeddings` feature, using lexical");
                Arc::new(LexicalEmbedder::new())
            }
        }
    }
}

/// The pulse job: decay plus lightweight maintenance, run by the scheduler
/// at the configured pulse interval.
pub fn pulse_job(substrate: Arc<tokio::sync::Mutex<Substrate>>, base_interval: Duration) -> Job {
    Job::new("pulse", base_interval, move || {
        let substrate = Arc::clone(&substrate);
        Box::pin(async move {
            let mut substrate = substrate.lock().await;
            let report = substrate.decay_now()?;
            substrate.flush()?;
            Ok(JobOutcome::quiet().with_feedback(if report.thoughts_decayed > 0 {
                0.5
            } else {
                0.4
            }))
        })
    })
    .with_priority(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubstrateError;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Substrate {
        Substrate::open(Config::for_data_dir(dir.path())).unwrap()
    }

    #[test]
    fn test_second_instance_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let substrate = open(&dir);
        let second = Substrate::open(Config::for_data_dir(dir.path()));
        match second {
            Err(e @ SubstrateError::DirectoryLocked(_)) => assert_eq!(e.exit_code(), 2),
            other => panic!("expected directory-locked, got {other:?}"),
        }
        drop(substrate);
        // Lock released on drop
        Substrate::open(Config::for_data_dir(dir.path())).unwrap();
    }

    #[test]
    fn test_save_integrates_into_existing_concepts() {
        let dir = tempfile::tempdir().unwrap();
        let mut substrate = open(&dir);
        for i in 1..=6 {
            substrate
                .save(SaveRequest::new(format!("I wonder about stars and galaxies #{i}")))
                .unwrap();
        }
        substrate.force_evolve().unwrap();
        let concept_id = substrate.concepts(None)[0].id.clone();
        let before = substrate.concepts(None)[0].members.len();

        let thought = substrate
            .save(SaveRequest::new("I wonder about stars and galaxies once more"))
            .unwrap();
        let concept = substrate
            .concepts(None)
            .into_iter()
            .find(|c| c.id == concept_id)
            .unwrap();
        assert_eq!(concept.members.len(), before + 1);
        assert!(concept.members.contains(&thought.id));
    }

    #[test]
    fn test_evolution_trips_on_thought_stride() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_data_dir(dir.path());
        config.evolution_thought_stride = 8;
        let mut substrate = Substrate::open(config).unwrap();

        for i in 1..=8 {
            substrate
                .save(SaveRequest::new(format!("Soup and bread taste good #{i}")))
                .unwrap();
        }
        // The eighth save tripped the stride; a concept crystallized without
        // an explicit force_evolve
        assert!(!substrate.concepts(None).is_empty());
    }

    #[test]
    fn test_integrate_by_id_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut substrate = open(&dir);
        for i in 1..=6 {
            substrate
                .save(SaveRequest::new(format!("Soup and bread taste good #{i}")))
                .unwrap();
        }
        substrate.force_evolve().unwrap();
        let thought = substrate
            .save(SaveRequest::new("Soup and bread taste good always"))
            .unwrap();
        let integration = substrate.integrate(&thought.id).unwrap();
        assert!(!integration.concepts.is_empty());

        assert!(matches!(
            substrate.integrate("missing"),
            Err(SubstrateError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_job_applies_decay() {
        let dir = tempfile::tempdir().unwrap();
        let substrate = Arc::new(tokio::sync::Mutex::new(open(&dir)));
        {
            let mut s = substrate.lock().await;
            s.save(SaveRequest::new("a thought for the pulse to groom"))
                .unwrap();
        }

        let job = pulse_job(Arc::clone(&substrate), Duration::from_secs(60));
        assert_eq!(job.name(), "pulse");

        let mut config = Config::for_data_dir(dir.path().join("sched"));
        config.tick = Duration::from_millis(20);
        let events = Arc::new(EventLog::open(&config.data_dir).unwrap());
        let mut scheduler = crate::scheduler::Scheduler::open(&config, events).unwrap();
        scheduler.register(job).unwrap();

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let scheduler = handle.stop().await.unwrap();
        assert!(scheduler.job_state("pulse").unwrap().run_count >= 1);
    }
}
