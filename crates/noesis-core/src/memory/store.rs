//! Thought store, association graph, retrieval, and decay.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embeddings::{embed_with_retry, similarity_from_distance, Embedder};
use crate::error::{Result, SubstrateError};
use crate::index::FlatIndex;
use crate::storage::{files, EventLog, FileStore};

use super::thought::{
    Association, AssociationKind, RetrievalMode, SaveRequest, ScoredThought, Thought,
};

/// How many recent thoughts are scanned for contextual links
const CONTEXT_WINDOW: usize = 20;
/// Weight of the causal edge to a parent thought
const CAUSAL_WEIGHT: f64 = 0.9;

/// Result of one decay sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayReport {
    /// Thoughts whose activation was reduced
    pub thoughts_decayed: usize,
    /// Association edges whose weight was reduced
    pub edges_decayed: usize,
    /// Edges dropped for falling below the weight floor
    pub edges_dropped: usize,
}

/// Authoritative thought store with its association graph and vector index
pub struct MemoryStore {
    config: Config,
    embedder: Arc<dyn Embedder>,
    events: Arc<EventLog>,

    thoughts: Vec<Thought>,
    by_id: HashMap<String, usize>,
    /// Outgoing edges keyed by source id
    edges: BTreeMap<String, Vec<Association>>,
    /// Reverse adjacency (source ids per target), rebuilt on load
    incoming: HashMap<String, Vec<String>>,
    index: FlatIndex,

    seq: u64,
    saves_since_flush: u32,

    thoughts_file: FileStore,
    associations_file: FileStore,
    index_blob: PathBuf,
    index_meta: PathBuf,
}

impl MemoryStore {
    /// Load the store from the data directory, rebuilding the vector index
    /// from `thoughts.json` when it is missing, corrupt, or out of step.
    pub fn open(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        events: Arc<EventLog>,
    ) -> Result<Self> {
        let dir = &config.data_dir;
        let thoughts_file = FileStore::new(dir, files::THOUGHTS);
        let associations_file = FileStore::new(dir, files::ASSOCIATIONS);

        let mut thoughts: Vec<Thought> = thoughts_file.load_or(Vec::new())?;
        thoughts.sort_by_key(|t| t.seq);

        // Corrupt associations are recoverable: the graph can be recomputed
        // from the thoughts themselves once the index is up.
        let (edges, recompute_edges) = match associations_file.load_or(BTreeMap::new()) {
            Ok(edges) => (edges, false),
            Err(SubstrateError::CorruptState { path, detail }) => {
                warn!(path = %path.display(), detail = %detail, "association store corrupt, recomputing");
                (BTreeMap::new(), true)
            }
            Err(e) => return Err(e),
        };

        let by_id: HashMap<String, usize> = thoughts
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        let seq = thoughts.iter().map(|t| t.seq + 1).max().unwrap_or(0);

        let index_blob = dir.join(files::VECTOR_INDEX);
        let index_meta = dir.join(files::INDEX_META);

        let mut store = Self {
            config: config.clone(),
            embedder,
            events,
            thoughts,
            by_id,
            edges,
            incoming: HashMap::new(),
            index: FlatIndex::new(0),
            seq,
            saves_since_flush: 0,
            thoughts_file,
            associations_file,
            index_blob,
            index_meta,
        };
        store.rebuild_incoming();
        store.load_or_rebuild_index()?;
        if recompute_edges {
            store.rebuild_associations()?;
        }
        Ok(store)
    }

    /// Recompute the association graph from stored thoughts, replaying each
    /// thought's connection establishment against the thoughts that preceded
    /// it. Weights come out as they did at save time because the gap
    /// calculations use the stored creation timestamps.
    fn rebuild_associations(&mut self) -> Result<()> {
        let mut edges: BTreeMap<String, Vec<Association>> = BTreeMap::new();
        for i in 0..self.thoughts.len() {
            let thought = &self.thoughts[i];
            let vector = self.index.get(&thought.id);
            let associations =
                self.connections_for(thought, vector, &self.thoughts[..i], thought.created_at);
            if !associations.is_empty() {
                edges.insert(thought.id.clone(), associations);
            }
        }
        self.edges = edges;
        self.rebuild_incoming();
        self.associations_file.save(&self.edges)?;
        info!(thoughts = self.thoughts.len(), "association graph recomputed");
        Ok(())
    }

    fn load_or_rebuild_index(&mut self) -> Result<()> {
        if self.index_blob.exists() && self.index_meta.exists() {
            match FlatIndex::load(&self.index_blob, &self.index_meta) {
                Ok(index) if self.index_matches(&index) => {
                    self.index = index;
                    return Ok(());
                }
                Ok(_) => info!("vector index out of step with thought store, rebuilding"),
                Err(e) => warn!(error = %e, "vector index failed to load, rebuilding"),
            }
        }
        self.rebuild_index()
    }

    /// The index and the store agree on the id set modulo tombstones
    fn index_matches(&self, index: &FlatIndex) -> bool {
        if index.dimensions() != self.embedder.dimensions() {
            return false;
        }
        let indexed: HashSet<&str> = index.ids().collect();
        let embedded: HashSet<&str> = self
            .thoughts
            .iter()
            .filter(|t| t.embedded)
            .map(|t| t.id.as_str())
            .collect();
        indexed == embedded
    }

    /// Re-embed every stored thought into a fresh index
    fn rebuild_index(&mut self) -> Result<()> {
        let mut index = FlatIndex::new(self.embedder.dimensions());
        let mut failures = 0_usize;
        for thought in &mut self.thoughts {
            match embed_with_retry(self.embedder.as_ref(), &thought.content) {
                Ok(vector) => {
                    index
                        .add(&thought.id, &vector)
                        .map_err(|e| SubstrateError::corrupt(&self.index_blob, e.to_string()))?;
                    thought.embedded = true;
                }
                Err(e) => {
                    warn!(id = %thought.id, error = %e, "could not re-embed thought during rebuild");
                    thought.embedded = false;
                    failures += 1;
                }
            }
        }
        self.index = index;
        if !self.thoughts.is_empty() {
            info!(
                thoughts = self.thoughts.len(),
                failures, "vector index rebuilt from thought store"
            );
            self.persist_index()?;
            self.thoughts_file.save(&self.thoughts)?;
        }
        Ok(())
    }

    fn rebuild_incoming(&mut self) {
        self.incoming.clear();
        for (source, edges) in &self.edges {
            for edge in edges {
                self.incoming
                    .entry(edge.target_id.clone())
                    .or_default()
                    .push(source.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Persist a new thought, embed it, and wire it into the graph.
    ///
    /// Embedding is best-effort: a backend failure leaves the thought
    /// reachable by id and metadata only.
    pub fn save(&mut self, request: SaveRequest) -> Result<Thought> {
        let now = Utc::now();
        let content = sanitize(&request.content);

        let mut thought = Thought {
            id: Uuid::new_v4().to_string(),
            seq: self.seq,
            content,
            thought_type: request.thought_type,
            origin: request.origin,
            created_at: now,
            last_accessed: now,
            decayed_at: now,
            activation: 1.0,
            parent_id: request.parent_id,
            metadata: request.metadata,
            embedded: false,
        };
        self.seq += 1;

        let vector = match embed_with_retry(self.embedder.as_ref(), &thought.content) {
            Ok(vector) => {
                self.index
                    .add(&thought.id, &vector)
                    .map_err(|e| SubstrateError::corrupt(&self.index_blob, e.to_string()))?;
                thought.embedded = true;
                Some(vector)
            }
            Err(e) => {
                warn!(id = %thought.id, error = %e, "saving thought without vector");
                None
            }
        };

        let associations = self.connections_for(&thought, vector.as_deref(), &self.thoughts, now);
        if !associations.is_empty() {
            for assoc in &associations {
                self.incoming
                    .entry(assoc.target_id.clone())
                    .or_default()
                    .push(thought.id.clone());
            }
            self.edges.insert(thought.id.clone(), associations);
        }

        self.by_id.insert(thought.id.clone(), self.thoughts.len());
        self.thoughts.push(thought.clone());

        self.thoughts_file.save(&self.thoughts)?;
        self.associations_file.save(&self.edges)?;
        self.saves_since_flush += 1;
        if self.saves_since_flush >= self.config.index_flush_every {
            self.persist_index()?;
        }

        self.events.append(
            "thought_saved",
            serde_json::json!({
                "id": thought.id,
                "type": thought.thought_type,
                "origin": thought.origin,
                "embedded": thought.embedded,
                "connections": self.edges.get(&thought.id).map_or(0, Vec::len),
            }),
        );
        debug!(id = %thought.id, seq = thought.seq, "thought saved");
        Ok(thought)
    }

    /// Build a thought's outgoing associations against the thoughts that
    /// precede it: semantic neighbours from the index, temporal links to the
    /// most recent thoughts, contextual links from shared tags, and a causal
    /// link to the parent. Weights sum per target across kinds, clamped to
    /// 1; no self-loops.
    fn connections_for(
        &self,
        thought: &Thought,
        vector: Option<&[f32]>,
        earlier: &[Thought],
        now: DateTime<Utc>,
    ) -> Vec<Association> {
        // target id -> (total weight, dominant kind, dominant contribution)
        let mut accum: HashMap<String, (f64, AssociationKind, f64)> = HashMap::new();
        let mut bump = |target: &str, weight: f64, kind: AssociationKind| {
            if weight <= 0.0 || target == thought.id {
                return;
            }
            let entry = accum
                .entry(target.to_string())
                .or_insert((0.0, kind, 0.0));
            entry.0 += weight;
            if weight > entry.2 {
                entry.1 = kind;
                entry.2 = weight;
            }
        };

        if let Some(vector) = vector {
            if let Ok(hits) = self
                .index
                .search(vector, self.config.semantic_neighbors + 1)
            {
                for (id, distance) in hits {
                    // The index may hold the thought itself and its
                    // successors (association rebuild); only earlier
                    // thoughts qualify
                    let is_earlier = self
                        .by_id
                        .get(&id)
                        .is_some_and(|&i| self.thoughts[i].seq < thought.seq);
                    if !is_earlier {
                        continue;
                    }
                    let similarity = similarity_from_distance(distance);
                    if similarity >= self.config.semantic_threshold {
                        bump(&id, similarity as f64, AssociationKind::Semantic);
                    }
                }
            }
        }

        for other in earlier.iter().rev().take(self.config.temporal_fanout) {
            let gap_hours =
                (now - other.created_at).num_milliseconds().max(0) as f64 / 3_600_000.0;
            let weight = self.config.temporal_coefficient / (1.0 + 0.1 * gap_hours);
            bump(&other.id, weight, AssociationKind::Temporal);
        }

        let focus = thought.metadata.get("focus");
        for other in earlier.iter().rev().take(CONTEXT_WINDOW) {
            let same_type = other.thought_type == thought.thought_type;
            let same_focus = !focus.is_null() && other.metadata.get("focus") == focus;
            if same_type || same_focus {
                bump(
                    &other.id,
                    self.config.contextual_weight,
                    AssociationKind::Contextual,
                );
            }
        }

        if let Some(parent) = thought.parent_id.as_deref() {
            if self.by_id.contains_key(parent) {
                bump(parent, CAUSAL_WEIGHT, AssociationKind::Causal);
            }
        }

        let mut associations: Vec<Association> = accum
            .into_iter()
            .map(|(target_id, (weight, kind, _))| Association {
                target_id,
                weight: weight.min(1.0),
                kind,
                updated_at: now,
            })
            .collect();
        associations.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        associations
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// Retrieve up to `k` thoughts relevant to `query`
    pub fn retrieve(
        &self,
        query: &str,
        k: usize,
        mode: RetrievalMode,
    ) -> Result<Vec<ScoredThought>> {
        let vector = embed_with_retry(self.embedder.as_ref(), query)?;
        match mode {
            RetrievalMode::Similarity => self.retrieve_similarity(&vector, k),
            RetrievalMode::ActivationWeighted => self.retrieve_activation_weighted(&vector, k),
            RetrievalMode::Spreading => self.retrieve_spreading(&vector, k),
        }
    }

    fn retrieve_similarity(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredThought>> {
        let hits = self
            .index
            .search(vector, k)
            .map_err(|e| SubstrateError::corrupt(&self.index_blob, e.to_string()))?;
        Ok(self.attach(hits.into_iter().map(|(id, d)| {
            (id, similarity_from_distance(d) as f64)
        })))
    }

    /// Re-rank a wider candidate pool by a blend of similarity and activation
    fn retrieve_activation_weighted(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredThought>> {
        let hits = self
            .index
            .search(vector, k.saturating_mul(4))
            .map_err(|e| SubstrateError::corrupt(&self.index_blob, e.to_string()))?;
        let alpha = self.config.similarity_alpha;
        let mut scored: Vec<(String, f64)> = hits
            .into_iter()
            .filter_map(|(id, d)| {
                let activation = self.by_id.get(&id).map(|&i| self.thoughts[i].activation)?;
                let similarity = similarity_from_distance(d) as f64;
                Some((id, alpha * similarity + (1.0 - alpha) * activation))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(self.attach(scored.into_iter()))
    }

    /// Bounded BFS over the association graph from the top similarity hits.
    /// Each newly reached thought accumulates incoming weight times source
    /// score, damped per hop; visited thoughts are never re-entered.
    fn retrieve_spreading(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredThought>> {
        let seeds = self
            .index
            .search(vector, self.config.spreading_seeds)
            .map_err(|e| SubstrateError::corrupt(&self.index_blob, e.to_string()))?;

        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = Vec::new();
        for (id, distance) in seeds {
            scores.insert(id.clone(), similarity_from_distance(distance) as f64);
            visited.insert(id.clone());
            frontier.push(id);
        }

        for _hop in 0..self.config.spreading_depth {
            let mut reached: HashMap<String, f64> = HashMap::new();
            for source in &frontier {
                let source_score = scores[source];
                for (neighbor, weight) in self.neighbors(source) {
                    if visited.contains(&neighbor) {
                        continue;
                    }
                    *reached.entry(neighbor).or_insert(0.0) +=
                        weight * source_score * self.config.spreading_damping;
                }
            }
            if reached.is_empty() {
                break;
            }
            frontier = reached.keys().cloned().collect();
            for (id, score) in reached {
                visited.insert(id.clone());
                scores.insert(id, score);
            }
        }

        let mut scored: Vec<(String, f64)> = scores.into_iter().collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(self.attach(scored.into_iter()))
    }

    fn attach(&self, hits: impl Iterator<Item = (String, f64)>) -> Vec<ScoredThought> {
        hits.filter_map(|(id, score)| {
            let &i = self.by_id.get(&id)?;
            Some(ScoredThought {
                thought: self.thoughts[i].clone(),
                score,
            })
        })
        .collect()
    }

    /// Undirected neighbourhood of a thought: outgoing targets plus incoming
    /// sources, deduplicated by strongest weight.
    fn neighbors(&self, id: &str) -> Vec<(String, f64)> {
        let mut best: HashMap<String, f64> = HashMap::new();
        if let Some(edges) = self.edges.get(id) {
            for edge in edges {
                let entry = best.entry(edge.target_id.clone()).or_insert(0.0);
                *entry = entry.max(edge.weight);
            }
        }
        if let Some(sources) = self.incoming.get(id) {
            for source in sources {
                if let Some(edge) = self
                    .edges
                    .get(source)
                    .and_then(|edges| edges.iter().find(|e| e.target_id == id))
                {
                    let entry = best.entry(source.clone()).or_insert(0.0);
                    *entry = entry.max(edge.weight);
                }
            }
        }
        best.into_iter().collect()
    }

    // ------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------

    /// Boost a thought's activation and propagate half the boost to its
    /// direct neighbours. Refreshes the decay clock on adjacent edges.
    pub fn reinforce(&mut self, id: &str) -> Result<()> {
        let now = Utc::now();
        let boost = self.config.reinforce_boost;

        let &idx = self
            .by_id
            .get(id)
            .ok_or_else(|| SubstrateError::NotFound(id.to_string()))?;
        {
            let thought = &mut self.thoughts[idx];
            thought.activation = (thought.activation + boost).min(1.0);
            thought.last_accessed = now;
        }

        for (neighbor, _) in self.neighbors(id) {
            if let Some(&i) = self.by_id.get(&neighbor) {
                let thought = &mut self.thoughts[i];
                thought.activation = (thought.activation + boost / 2.0).min(1.0);
            }
        }

        // Reinforcement is the one thing allowed to reset edge decay
        if let Some(edges) = self.edges.get_mut(id) {
            for edge in edges {
                edge.updated_at = now;
            }
        }
        let sources: Vec<String> = self.incoming.get(id).cloned().unwrap_or_default();
        for source in sources {
            if let Some(edges) = self.edges.get_mut(&source) {
                for edge in edges.iter_mut().filter(|e| e.target_id == id) {
                    edge.updated_at = now;
                }
            }
        }

        self.thoughts_file.save(&self.thoughts)?;
        self.associations_file.save(&self.edges)?;
        Ok(())
    }

    /// Apply exponential decay to activations and association weights.
    ///
    /// Thoughts younger than the grace period are exempt. Decay is exact in
    /// elapsed time since it was last applied, so sweeps compose.
    pub fn decay(&mut self, now: DateTime<Utc>) -> Result<DecayReport> {
        let mut report = DecayReport::default();
        let lambda_a = self.config.activation_lambda();
        let grace = chrono::Duration::from_std(self.config.decay_grace).unwrap_or_default();

        for thought in &mut self.thoughts {
            if now - thought.created_at < grace {
                continue;
            }
            let elapsed = (now - thought.decayed_at).num_milliseconds() as f64 / 1000.0;
            if elapsed <= 0.0 {
                continue;
            }
            thought.activation = (thought.activation * (-lambda_a * elapsed).exp()).clamp(0.0, 1.0);
            thought.decayed_at = now;
            report.thoughts_decayed += 1;
        }

        let lambda_e = self.config.association_lambda();
        let floor = self.config.edge_floor;
        for edges in self.edges.values_mut() {
            edges.retain_mut(|edge| {
                let elapsed = (now - edge.updated_at).num_milliseconds() as f64 / 1000.0;
                if elapsed > 0.0 {
                    edge.weight *= (-lambda_e * elapsed).exp();
                    edge.updated_at = now;
                    report.edges_decayed += 1;
                }
                if edge.weight < floor {
                    report.edges_dropped += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.edges.retain(|_, edges| !edges.is_empty());
        self.rebuild_incoming();

        self.thoughts_file.save(&self.thoughts)?;
        self.associations_file.save(&self.edges)?;
        self.events.append(
            "decay",
            serde_json::json!({
                "thoughts": report.thoughts_decayed,
                "edges": report.edges_decayed,
                "dropped": report.edges_dropped,
            }),
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// The most recent `n` thoughts, newest first, optionally filtered by type
    pub fn recent(&self, n: usize, thought_type: Option<&str>) -> Vec<&Thought> {
        self.thoughts
            .iter()
            .rev()
            .filter(|t| thought_type.is_none_or(|ty| t.thought_type == ty))
            .take(n)
            .collect()
    }

    /// Look up a thought by id
    pub fn get(&self, id: &str) -> Result<&Thought> {
        self.by_id
            .get(id)
            .map(|&i| &self.thoughts[i])
            .ok_or_else(|| SubstrateError::NotFound(id.to_string()))
    }

    /// All thoughts in creation order
    pub fn thoughts(&self) -> &[Thought] {
        &self.thoughts
    }

    /// Number of stored thoughts
    pub fn len(&self) -> usize {
        self.thoughts.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty()
    }

    /// Outgoing associations of a thought
    pub fn associations(&self, id: &str) -> &[Association] {
        self.edges.get(id).map_or(&[], Vec::as_slice)
    }

    /// The stored vector of a thought, if one was computed
    pub fn vector_of(&self, id: &str) -> Option<&[f32]> {
        self.index.get(id)
    }

    /// Walk the graph from a seed thought, following the strongest
    /// connections, producing a chain of related thoughts.
    pub fn trace(&self, start: &str, depth: usize, branch: usize) -> Result<Vec<&Thought>> {
        let start_thought = self.get(start)?;
        let mut chain = vec![start_thought];
        let mut seen: HashSet<&str> = HashSet::from([start]);
        let mut frontier = vec![start.to_string()];

        for _ in 0..depth {
            let mut next = Vec::new();
            for id in &frontier {
                let mut connected = self.neighbors(id);
                connected.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                for (neighbor, _) in connected.into_iter().take(branch) {
                    if let Some(&i) = self.by_id.get(&neighbor) {
                        let thought = &self.thoughts[i];
                        if seen.insert(&thought.id) {
                            chain.push(thought);
                            next.push(neighbor);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(chain)
    }

    /// Persist the vector index and both JSON stores
    pub fn flush(&mut self) -> Result<()> {
        self.thoughts_file.save(&self.thoughts)?;
        self.associations_file.save(&self.edges)?;
        self.persist_index()
    }

    fn persist_index(&mut self) -> Result<()> {
        self.index
            .save(&self.index_blob, &self.index_meta)
            .map_err(|e| SubstrateError::corrupt(&self.index_blob, e.to_string()))?;
        self.saves_since_flush = 0;
        Ok(())
    }
}

/// Strip control characters that would corrupt downstream renderings
fn sanitize(content: &str) -> String {
    content
        .trim()
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}
