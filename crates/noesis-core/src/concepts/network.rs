//! The concept network: reconciliation, lifecycle, and the concept graph.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::embeddings::{cosine_similarity, l2_normalize};
use crate::error::{Result, SubstrateError};
use crate::memory::{MemoryStore, Thought};
use crate::storage::{files, EventLog, FileStore};

use super::cluster::{dbscan, k_distance_eps};
use super::{derive_label, Concept, ConceptEdge, ConceptStage};

/// Centroid similarity at which two concepts are linked in the graph
const EDGE_SIMILARITY: f32 = 0.6;

/// Result of attaching one thought to the network
#[derive(Debug, Clone, Default)]
pub struct Integration {
    /// Concepts the thought now belongs to, with centroid similarity
    pub concepts: Vec<(String, f32)>,
    /// Whether any new membership was created
    pub newly_assigned: bool,
}

/// Result of one evolution cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionReport {
    /// Clusters found in the active population
    pub clusters: usize,
    /// Concepts created this cycle
    pub created: usize,
    /// Clusters merged into existing concepts
    pub merged: usize,
    /// Concepts that transitioned to fading
    pub faded: usize,
    /// Fading concepts deleted for having no members left
    pub deleted: usize,
    /// Concepts alive after the cycle
    pub concepts: usize,
    /// Edges in the recomputed concept graph
    pub edges: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConceptsFile {
    concepts: Vec<Concept>,
    edges: Vec<ConceptEdge>,
}

/// Manages concept crystallization, lifecycle, and interrelation
pub struct ConceptNetwork {
    config: Config,
    concepts: BTreeMap<String, Concept>,
    edges: Vec<ConceptEdge>,
    /// Reverse index: thought id -> number of concepts it belongs to
    membership: HashMap<String, usize>,
    store: FileStore,
    events: Arc<EventLog>,
}

impl ConceptNetwork {
    /// Load the network from `evolved_concepts.json`
    pub fn open(config: &Config, events: Arc<EventLog>) -> Result<Self> {
        let store = FileStore::new(&config.data_dir, files::CONCEPTS);
        let file: ConceptsFile = store.load_or(ConceptsFile::default())?;

        let mut membership: HashMap<String, usize> = HashMap::new();
        for concept in &file.concepts {
            for member in &concept.members {
                *membership.entry(member.clone()).or_insert(0) += 1;
            }
        }

        Ok(Self {
            config: config.clone(),
            concepts: file.concepts.into_iter().map(|c| (c.id.clone(), c)).collect(),
            edges: file.edges,
            membership,
            store,
            events,
        })
    }

    /// Concepts, optionally filtered by stage
    pub fn list(&self, stage: Option<ConceptStage>) -> Vec<&Concept> {
        self.concepts
            .values()
            .filter(|c| stage.is_none_or(|s| c.stage == s))
            .collect()
    }

    /// Look up a concept by id
    pub fn get(&self, id: &str) -> Result<&Concept> {
        self.concepts
            .get(id)
            .ok_or_else(|| SubstrateError::NotFound(id.to_string()))
    }

    /// Number of live concepts
    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    /// Whether no concepts exist yet
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Concepts connected to `id` in the graph, with edge weights
    pub fn neighbors(&self, id: &str) -> Result<Vec<(&Concept, f64)>> {
        self.get(id)?;
        let mut related = Vec::new();
        for edge in &self.edges {
            let other = if edge.source == id {
                &edge.target
            } else if edge.target == id {
                &edge.source
            } else {
                continue;
            };
            if let Some(concept) = self.concepts.get(other) {
                related.push((concept, edge.weight));
            }
        }
        related.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(related)
    }

    // ------------------------------------------------------------------
    // Integration
    // ------------------------------------------------------------------

    /// Attach a thought to up to K nearby concepts. Updates their
    /// last-updated timestamp but not their centroids; centroids move only
    /// at cycle time, for stability.
    pub fn integrate(&mut self, thought: &Thought, vector: Option<&[f32]>) -> Result<Integration> {
        let Some(vector) = vector else {
            return Ok(Integration::default());
        };
        if self.concepts.is_empty() {
            return Ok(Integration::default());
        }

        let now = Utc::now();
        let mut candidates: Vec<(String, f32)> = self
            .concepts
            .values()
            .filter(|c| c.stage != ConceptStage::Fading)
            .map(|c| (c.id.clone(), cosine_similarity(&c.centroid, vector)))
            .filter(|(_, sim)| *sim >= self.config.integrate_similarity)
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut integration = Integration::default();
        for (id, sim) in candidates {
            let already = self.concepts[&id].members.contains(&thought.id);
            let count = self.membership.get(&thought.id).copied().unwrap_or(0);
            if !already && count >= self.config.max_concepts_per_thought {
                continue;
            }
            let concept = self.concepts.get_mut(&id).expect("candidate exists");
            concept.last_updated = now;
            if !already {
                concept.members.insert(thought.id.clone());
                *self.membership.entry(thought.id.clone()).or_insert(0) += 1;
                integration.newly_assigned = true;
            }
            integration.concepts.push((id, sim));
            if integration.concepts.len() >= self.config.max_concepts_per_thought {
                break;
            }
        }

        if integration.newly_assigned {
            self.persist()?;
        }
        Ok(integration)
    }

    // ------------------------------------------------------------------
    // Evolution cycle
    // ------------------------------------------------------------------

    /// One full evolution cycle: cluster the active population, reconcile
    /// clusters against existing concepts, advance lifecycles, and recompute
    /// the concept graph.
    pub fn evolve(&mut self, memory: &MemoryStore, now: DateTime<Utc>) -> Result<EvolutionReport> {
        let mut report = EvolutionReport::default();

        let active: Vec<&Thought> = memory
            .thoughts()
            .iter()
            .filter(|t| {
                t.activation >= self.config.clustering_activation_floor
                    && memory.vector_of(&t.id).is_some()
            })
            .collect();

        if active.len() >= self.config.min_cluster {
            let vectors: Vec<&[f32]> = active
                .iter()
                .map(|t| memory.vector_of(&t.id).expect("filtered on presence"))
                .collect();
            let corpus: Vec<&str> = memory.thoughts().iter().map(|t| t.content.as_str()).collect();

            let eps = k_distance_eps(&vectors, self.config.min_cluster);
            let labels = dbscan(&vectors, eps, self.config.min_cluster);

            let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for (idx, label) in labels.iter().enumerate() {
                if let Some(label) = label {
                    clusters.entry(*label).or_default().push(idx);
                }
            }
            report.clusters = clusters.len();
            debug!(
                active = active.len(),
                eps = f64::from(eps),
                clusters = clusters.len(),
                "clustering done"
            );

            for indices in clusters.values() {
                self.reconcile_cluster(indices, &active, &vectors, &corpus, now, &mut report);
            }
        }

        self.lifecycle_pass(memory, now, &mut report);
        self.recompute_edges();

        report.concepts = self.concepts.len();
        report.edges = self.edges.len();
        self.persist()?;
        self.events.append(
            "evolution_cycle",
            serde_json::to_value(&report).unwrap_or_default(),
        );
        info!(
            clusters = report.clusters,
            created = report.created,
            merged = report.merged,
            concepts = report.concepts,
            "evolution cycle complete"
        );
        Ok(report)
    }

    /// Fold one cluster into the network: merge into a close concept, or
    /// crystallize a new one.
    fn reconcile_cluster(
        &mut self,
        indices: &[usize],
        active: &[&Thought],
        vectors: &[&[f32]],
        corpus: &[&str],
        now: DateTime<Utc>,
        report: &mut EvolutionReport,
    ) {
        let dims = vectors[indices[0]].len();
        let mut centroid = vec![0.0_f32; dims];
        for &idx in indices {
            for (c, x) in centroid.iter_mut().zip(vectors[idx]) {
                *c += x;
            }
        }
        l2_normalize(&mut centroid);

        let member_ids: Vec<&str> = indices.iter().map(|&i| active[i].id.as_str()).collect();

        let mut sims: Vec<(String, f32)> = self
            .concepts
            .values()
            .map(|c| (c.id.clone(), cosine_similarity(&c.centroid, &centroid)))
            .collect();
        sims.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let best_sim = sims.first().map(|(_, s)| *s).unwrap_or(0.0);
        let related_count = sims
            .iter()
            .filter(|(_, s)| *s >= self.config.related_similarity)
            .count();

        if best_sim >= self.config.merge_similarity
            || (related_count >= 2 && best_sim >= self.config.related_similarity)
        {
            // Merge into the closest concept. When several concepts sit in
            // the related band the runner-up stays linked through the graph
            // recomputation, since its centroid similarity clears the edge
            // threshold.
            let target = sims[0].0.clone();
            self.merge_cluster(&target, &member_ids, &centroid, now);
            report.merged += 1;
        } else {
            self.create_concept(&member_ids, indices, &centroid, active, vectors, corpus, now, report);
        }
    }

    fn merge_cluster(
        &mut self,
        concept_id: &str,
        member_ids: &[&str],
        cluster_centroid: &[f32],
        now: DateTime<Utc>,
    ) {
        let cap = self.config.max_concepts_per_thought;
        let addable: Vec<String> = member_ids
            .iter()
            .filter(|id| {
                let concept = &self.concepts[concept_id];
                !concept.members.contains(**id)
                    && self.membership.get(**id).copied().unwrap_or(0) < cap
            })
            .map(|id| id.to_string())
            .collect();

        // Membership-weighted mean: the cluster side weighs in with the
        // members it actually contributes, not its full incoming size
        let concept = self.concepts.get_mut(concept_id).expect("merge target exists");
        if !addable.is_empty() {
            let old_len = concept.members.len() as f32;
            for (c, x) in concept.centroid.iter_mut().zip(cluster_centroid) {
                *c = *c * old_len + x * addable.len() as f32;
            }
            l2_normalize(&mut concept.centroid);
        }
        concept.last_updated = now;

        for id in addable {
            concept.members.insert(id.clone());
            *self.membership.entry(id).or_insert(0) += 1;
        }

        self.events.append(
            "concept_merged",
            serde_json::json!({
                "id": concept_id,
                "members": self.concepts[concept_id].members.len(),
            }),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn create_concept(
        &mut self,
        member_ids: &[&str],
        indices: &[usize],
        centroid: &[f32],
        active: &[&Thought],
        vectors: &[&[f32]],
        corpus: &[&str],
        now: DateTime<Utc>,
        report: &mut EvolutionReport,
    ) {
        let cap = self.config.max_concepts_per_thought;
        let members: Vec<String> = member_ids
            .iter()
            .filter(|id| self.membership.get(**id).copied().unwrap_or(0) < cap)
            .map(|id| id.to_string())
            .collect();
        if members.len() < self.config.min_cluster {
            debug!("cluster skipped: too many members already at concept capacity");
            return;
        }

        // Most central member anchors the label fallback
        let central_idx = indices
            .iter()
            .copied()
            .min_by(|&a, &b| {
                let da = 1.0 - cosine_similarity(vectors[a], centroid);
                let db = 1.0 - cosine_similarity(vectors[b], centroid);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(indices[0]);

        let member_contents: Vec<&str> = indices.iter().map(|&i| active[i].content.as_str()).collect();
        let label = derive_label(&member_contents, active[central_idx].content.as_str(), corpus);

        let concept = Concept {
            id: Uuid::new_v4().to_string(),
            label: label.clone(),
            stage: ConceptStage::Emerging,
            centroid: centroid.to_vec(),
            members: members.iter().cloned().collect(),
            first_seen: now,
            last_updated: now,
            cycles_seen: 0,
            cycles_below_min: 0,
            salience: 0.0,
        };

        for member in &members {
            *self.membership.entry(member.clone()).or_insert(0) += 1;
        }
        self.events.append(
            "concept_created",
            serde_json::json!({
                "id": concept.id,
                "label": label,
                "members": concept.members.len(),
            }),
        );
        self.concepts.insert(concept.id.clone(), concept);
        report.created += 1;
    }

    /// Advance every concept's lifecycle: shed inactive members, track the
    /// below-minimum streak, fade, promote, and delete.
    fn lifecycle_pass(&mut self, memory: &MemoryStore, now: DateTime<Utc>, report: &mut EvolutionReport) {
        let ids: Vec<String> = self.concepts.keys().cloned().collect();
        let mut to_delete = Vec::new();

        for id in &ids {
            let concept = self.concepts.get_mut(id).expect("iterating live ids");
            concept.cycles_seen += 1;

            let floor = self.config.clustering_activation_floor;
            let removed: Vec<String> = concept
                .members
                .iter()
                .filter(|m| match memory.get(m) {
                    Ok(t) => t.activation < floor,
                    Err(_) => true,
                })
                .cloned()
                .collect();
            for member in &removed {
                concept.members.remove(member);
            }

            concept.salience = concept
                .members
                .iter()
                .filter_map(|m| memory.get(m).ok())
                .map(|t| t.activation)
                .sum();

            if concept.members.len() < self.config.min_cluster {
                concept.cycles_below_min += 1;
            } else {
                concept.cycles_below_min = 0;
            }

            if concept.stage != ConceptStage::Fading
                && concept.cycles_below_min >= self.config.fading_grace_cycles
            {
                concept.stage = ConceptStage::Fading;
                concept.last_updated = now;
                report.faded += 1;
                self.events
                    .append("concept_fading", serde_json::json!({"id": id}));
            } else if concept.stage == ConceptStage::Emerging
                && concept.members.len() >= 2 * self.config.min_cluster
                && concept.cycles_seen >= 2
            {
                concept.stage = ConceptStage::Established;
                concept.last_updated = now;
                self.events
                    .append("concept_established", serde_json::json!({"id": id}));
            }

            let delete = concept.stage == ConceptStage::Fading && concept.members.is_empty();
            for member in &removed {
                if let Some(count) = self.membership.get_mut(member) {
                    *count = count.saturating_sub(1);
                }
            }
            if delete {
                to_delete.push(id.clone());
            }
        }

        for id in to_delete {
            self.concepts.remove(&id);
            report.deleted += 1;
            self.events
                .append("concept_deleted", serde_json::json!({"id": id}));
        }

        // Salience in the top tenth promotes established concepts to central
        let mut ranked: Vec<(String, f64)> = self
            .concepts
            .values()
            .map(|c| (c.id.clone(), c.salience))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top = ((ranked.len() as f64) * 0.1).ceil() as usize;
        for (id, _) in ranked.into_iter().take(top) {
            let concept = self.concepts.get_mut(&id).expect("ranked over live ids");
            if concept.stage == ConceptStage::Established {
                concept.stage = ConceptStage::Central;
                self.events
                    .append("concept_central", serde_json::json!({"id": id}));
            }
        }
    }

    /// Recompute the concept graph from shared members and centroid
    /// similarity.
    fn recompute_edges(&mut self) {
        self.edges.clear();
        let ids: Vec<&String> = self.concepts.keys().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let a = &self.concepts[ids[i]];
                let b = &self.concepts[ids[j]];
                let shared = a.members.intersection(&b.members).count();
                let cos = cosine_similarity(&a.centroid, &b.centroid);
                if shared >= 1 || cos >= EDGE_SIMILARITY {
                    let union = a.members.union(&b.members).count();
                    let jaccard = if union > 0 {
                        shared as f64 / union as f64
                    } else {
                        0.0
                    };
                    let weight = (jaccard + 0.5 * cos.max(0.0) as f64).min(1.0);
                    self.edges.push(ConceptEdge {
                        source: ids[i].clone(),
                        target: ids[j].clone(),
                        weight,
                    });
                }
            }
        }
    }

    fn persist(&self) -> Result<()> {
        let file = ConceptsFile {
            concepts: self.concepts.values().cloned().collect(),
            edges: self.edges.clone(),
        };
        self.store.save(&file)
    }
}
