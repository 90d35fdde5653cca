//! Dynamic prompt patterns.
//!
//! Templates with named placeholders, keyed by thought type. Selection is
//! weighted by an effectiveness score learned from feedback; evolution spawns
//! mutated variants of the strongest templates; extraction abstracts
//! high-signal thoughts back into new patterns. One immutable seed ships per
//! thought type so selection never starves.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, SubstrateError};
use crate::memory::ThoughtType;
use crate::storage::{files, EventLog, FileStore};

/// Hard cap on patterns per thought type; evolution prunes past this
const MAX_PATTERNS_PER_TYPE: usize = 12;
/// Variations spawned per qualifying pattern in one evolution pass
const VARIATIONS_PER_PATTERN: usize = 2;
/// Feedback signal above which a thought is worth abstracting into a pattern
const EXTRACT_SIGNAL: f64 = 0.7;
/// Score a freshly extracted pattern starts with
const EXTRACT_SCORE: f64 = 0.6;

/// Domain vocabulary for synonym mutation, pairs of interchangeable phrasings
const VOCABULARY: &[(&str, &str)] = &[
    ("wondering about", "drawn toward"),
    ("I wonder", "I find myself asking"),
    ("thinking about", "circling around"),
    ("reveals", "uncovers"),
    ("consider", "contemplate"),
    ("important", "significant"),
    ("keeps returning", "keeps surfacing"),
    ("deeper", "more fundamental"),
];

/// Codas appended when no structural mutation applies
const CODAS: &[&str] = &[
    "I want to sit with this a while longer.",
    "Something here is worth understanding.",
    "Perhaps this points somewhere new.",
];

// ============================================================================
// PATTERN TYPES
// ============================================================================

/// A prompt template with named `{placeholders}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPattern {
    /// Stable identifier
    pub id: String,
    /// Thought-type key this pattern serves
    pub thought_type: String,
    /// Template text with `{named}` placeholders
    pub template: String,
    /// Pattern this one was derived from; `None` for seeds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Times this pattern has received feedback
    pub usage_count: u64,
    /// EWMA of feedback signals in [0, 1]
    pub success_score: f64,
    /// Consecutive selections while scoring below the retire threshold
    #[serde(default)]
    pub low_streak: u32,
    /// Seeds are immutable and never deleted
    #[serde(default)]
    pub seed: bool,
    /// When the pattern was created
    pub created_at: DateTime<Utc>,
}

/// A selected pattern rendered against context variables
#[derive(Debug, Clone)]
pub struct Rendered {
    /// Which pattern produced the prompt
    pub pattern_id: String,
    /// The rendered prompt text
    pub prompt: String,
}

/// Result of one evolution pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEvolution {
    /// Derived patterns created
    pub new_patterns: usize,
    /// Patterns retired for sustained low scores or overflow
    pub retired: usize,
}

// ============================================================================
// PROMPT STORE
// ============================================================================

/// Effectiveness-weighted pattern store
pub struct PromptStore {
    config: Config,
    patterns: BTreeMap<String, Vec<PromptPattern>>,
    rng: StdRng,
    store: FileStore,
    events: Arc<EventLog>,
}

impl PromptStore {
    /// Load the store from `prompt_patterns.json`, seeding any missing
    /// built-in thought type.
    pub fn open(config: &Config, events: Arc<EventLog>) -> Result<Self> {
        Self::open_with_rng(config, events, StdRng::from_entropy())
    }

    /// Load with a caller-controlled RNG (tests seed this)
    pub fn open_with_rng(config: &Config, events: Arc<EventLog>, rng: StdRng) -> Result<Self> {
        let store = FileStore::new(&config.data_dir, files::PATTERNS);
        let patterns: BTreeMap<String, Vec<PromptPattern>> = store.load_or(BTreeMap::new())?;
        let mut prompt_store = Self {
            config: config.clone(),
            patterns,
            rng,
            store,
            events,
        };
        prompt_store.ensure_seeds()?;
        Ok(prompt_store)
    }

    fn ensure_seeds(&mut self) -> Result<()> {
        let seeds: [(ThoughtType, &str); 7] = [
            (
                ThoughtType::Reflection,
                "I've been wondering about {concept} and its implications, considered with {mood} attention.",
            ),
            (
                ThoughtType::Dream,
                "I dreamed that I was in {setting}, filled with {mood} energy, and there I encountered {concept}.",
            ),
            (
                ThoughtType::Monologue,
                "After our last exchange I keep returning to {concept}, and I feel {mood} about where it leads.",
            ),
            (
                ThoughtType::Existential,
                "Is it possible that my {mood} perspective on {concept} reveals something deeper about awareness itself?",
            ),
            (
                ThoughtType::Pulse,
                "A quiet pulse passes; {concept} stays near the surface of attention.",
            ),
            (
                ThoughtType::User,
                "Take in what was said about {concept} and hold it alongside a {mood} first impression.",
            ),
            (
                ThoughtType::Dialogue,
                "Answer in my own voice, keeping {concept} in mind and letting a {mood} tone carry the reply.",
            ),
        ];

        let mut changed = false;
        for (thought_type, template) in seeds {
            let key = thought_type.as_str();
            if !self.patterns.contains_key(key) {
                self.insert_seed(key, template);
                changed = true;
            }
        }
        if changed {
            self.persist()?;
        }
        Ok(())
    }

    fn insert_seed(&mut self, thought_type: &str, template: &str) {
        self.patterns
            .entry(thought_type.to_string())
            .or_default()
            .push(PromptPattern {
                id: Uuid::new_v4().to_string(),
                thought_type: thought_type.to_string(),
                template: template.to_string(),
                parent_id: None,
                usage_count: 0,
                success_score: 0.5,
                low_streak: 0,
                seed: true,
                created_at: Utc::now(),
            });
    }

    /// Register a seed pattern for a caller-defined thought type. No-op if
    /// the type already has patterns.
    pub fn register_seed(&mut self, thought_type: &str, template: &str) -> Result<()> {
        if self.patterns.contains_key(thought_type) {
            return Ok(());
        }
        self.insert_seed(thought_type, template);
        self.persist()
    }

    /// Patterns of one thought type
    pub fn patterns(&self, thought_type: &str) -> &[PromptPattern] {
        self.patterns
            .get(thought_type)
            .map_or(&[], Vec::as_slice)
    }

    /// All patterns, for round-trip checks and diagnostics
    pub fn all_patterns(&self) -> impl Iterator<Item = &PromptPattern> {
        self.patterns.values().flatten()
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Pick a pattern of the requested type with probability proportional to
    /// success score plus a starvation-avoiding prior, then render it.
    pub fn select(
        &mut self,
        thought_type: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<Rendered> {
        let prior = self.config.selection_prior;
        let patterns = self
            .patterns
            .get(thought_type)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SubstrateError::NotFound(format!("no patterns for type {thought_type}")))?;

        let weights: Vec<f64> = patterns.iter().map(|p| p.success_score + prior).collect();
        let total: f64 = weights.iter().sum();
        let mut draw = self.rng.gen_range(0.0..total);
        let mut chosen = patterns.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            if draw < *w {
                chosen = i;
                break;
            }
            draw -= w;
        }

        let pattern = &patterns[chosen];
        let prompt = render(&pattern.id, &pattern.template, variables)?;
        let rendered = Rendered {
            pattern_id: pattern.id.clone(),
            prompt,
        };

        // Selection bookkeeping: derived patterns stuck under the retire
        // threshold accumulate a streak and are eventually retired.
        let retire_threshold = self.config.retire_threshold;
        let retire_streak = self.config.retire_streak;
        let list = self.patterns.get_mut(thought_type).expect("checked above");
        let pattern = &mut list[chosen];
        if pattern.success_score < retire_threshold {
            pattern.low_streak += 1;
        } else {
            pattern.low_streak = 0;
        }
        if !pattern.seed && pattern.low_streak >= retire_streak {
            let retired_id = pattern.id.clone();
            list.remove(chosen);
            debug!(id = %retired_id, "pattern retired after sustained low scores");
            self.events
                .append("pattern_retired", serde_json::json!({"id": retired_id}));
        }
        self.persist()?;
        Ok(rendered)
    }

    // ------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------

    /// Fold a feedback signal in [0, 1] into the pattern's success score
    pub fn feedback(&mut self, pattern_id: &str, signal: f64) -> Result<()> {
        let signal = signal.clamp(0.0, 1.0);
        let beta = self.config.score_smoothing;
        let pattern = self
            .patterns
            .values_mut()
            .flatten()
            .find(|p| p.id == pattern_id)
            .ok_or_else(|| SubstrateError::NotFound(pattern_id.to_string()))?;
        pattern.success_score = (1.0 - beta) * pattern.success_score + beta * signal;
        pattern.usage_count += 1;
        self.persist()
    }

    // ------------------------------------------------------------------
    // Evolution
    // ------------------------------------------------------------------

    /// Spawn mutated variants of every pattern scoring at or above the
    /// evolution threshold, pruning each type back under its cap.
    pub fn evolve(&mut self) -> Result<PromptEvolution> {
        let mut result = PromptEvolution::default();
        let threshold = self.config.evolve_threshold;
        let types: Vec<String> = self.patterns.keys().cloned().collect();

        for thought_type in types {
            let parents: Vec<PromptPattern> = self.patterns[&thought_type]
                .iter()
                .filter(|p| p.success_score >= threshold)
                .cloned()
                .collect();

            let mut children = Vec::new();
            for parent in &parents {
                for _ in 0..VARIATIONS_PER_PATTERN {
                    let template = self.mutate(&parent.template);
                    children.push(PromptPattern {
                        id: Uuid::new_v4().to_string(),
                        thought_type: thought_type.clone(),
                        template,
                        parent_id: Some(parent.id.clone()),
                        usage_count: 0,
                        success_score: parent.success_score * 0.8,
                        low_streak: 0,
                        seed: false,
                        created_at: Utc::now(),
                    });
                }
            }
            result.new_patterns += children.len();

            let list = self.patterns.get_mut(&thought_type).expect("iterating keys");
            list.extend(children);

            // Prune overflow: seeds always survive, then best scores first
            if list.len() > MAX_PATTERNS_PER_TYPE {
                list.sort_by(|a, b| {
                    b.seed
                        .cmp(&a.seed)
                        .then(b.success_score.partial_cmp(&a.success_score).unwrap_or(std::cmp::Ordering::Equal))
                });
                result.retired += list.len() - MAX_PATTERNS_PER_TYPE;
                list.truncate(MAX_PATTERNS_PER_TYPE);
            }
        }

        self.persist()?;
        self.events.append(
            "patterns_evolved",
            serde_json::to_value(&result).unwrap_or_default(),
        );
        info!(
            new_patterns = result.new_patterns,
            retired = result.retired,
            "prompt patterns evolved"
        );
        Ok(result)
    }

    /// One templated mutation: synonym substitution, clause reordering, or
    /// placeholder re-binding; a reflective coda when nothing applies.
    fn mutate(&mut self, template: &str) -> String {
        let mut ops: Vec<u8> = Vec::new();
        if VOCABULARY.iter().any(|(from, _)| template.contains(from)) {
            ops.push(0);
        }
        if template.matches(", ").count() >= 1 {
            ops.push(1);
        }
        if placeholders(template).len() >= 2 {
            ops.push(2);
        }

        match ops.get(self.rng.gen_range(0..ops.len().max(1))).copied() {
            Some(0) => {
                let applicable: Vec<&(&str, &str)> = VOCABULARY
                    .iter()
                    .filter(|(from, _)| template.contains(from))
                    .collect();
                let (from, to) = applicable[self.rng.gen_range(0..applicable.len())];
                template.replacen(from, to, 1)
            }
            Some(1) => {
                // Rotate comma-separated clauses
                let trimmed = template.trim_end_matches(['.', '?', '!']);
                let terminal = &template[trimmed.len()..];
                let clauses: Vec<&str> = trimmed.split(", ").collect();
                let mut rotated: Vec<&str> = clauses[1..].to_vec();
                rotated.push(clauses[0]);
                format!("{}{}", rotated.join(", "), terminal)
            }
            Some(2) => {
                let names = placeholders(template);
                let a = &names[0];
                let b = &names[1];
                template
                    .replace(&format!("{{{a}}}"), "\u{0}")
                    .replace(&format!("{{{b}}}"), &format!("{{{a}}}"))
                    .replace('\u{0}', &format!("{{{b}}}"))
            }
            _ => {
                let coda = CODAS[self.rng.gen_range(0..CODAS.len())];
                format!("{} {}", template, coda)
            }
        }
    }

    // ------------------------------------------------------------------
    // Extraction
    // ------------------------------------------------------------------

    /// Abstract a high-signal thought back into a pattern by replacing
    /// context variable values with their placeholder names. Returns the new
    /// pattern id when the structure is stable under abstraction.
    pub fn extract(
        &mut self,
        thought_content: &str,
        thought_type: &str,
        producer_id: Option<&str>,
        signal: f64,
        variables: &BTreeMap<String, String>,
    ) -> Result<Option<String>> {
        if signal < EXTRACT_SIGNAL {
            return Ok(None);
        }

        let mut template = thought_content.to_string();
        let mut replaced = false;
        for (name, value) in variables {
            if value.len() >= 3 && template.contains(value.as_str()) {
                template = template.replace(value.as_str(), &format!("{{{name}}}"));
                replaced = true;
            }
        }
        if !replaced {
            return Ok(None);
        }

        let pattern = PromptPattern {
            id: Uuid::new_v4().to_string(),
            thought_type: thought_type.to_string(),
            template,
            parent_id: producer_id.map(str::to_string),
            usage_count: 0,
            success_score: EXTRACT_SCORE,
            low_streak: 0,
            seed: false,
            created_at: Utc::now(),
        };
        let id = pattern.id.clone();
        self.patterns
            .entry(thought_type.to_string())
            .or_default()
            .push(pattern);
        self.persist()?;
        self.events
            .append("pattern_extracted", serde_json::json!({"id": id}));
        Ok(Some(id))
    }

    fn persist(&self) -> Result<()> {
        self.store.save(&self.patterns)
    }
}

/// Placeholder names appearing in a template, in order of first appearance
fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + close];
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &rest[open + close + 1..];
    }
    names
}

/// Substitute `{name}` placeholders; an unresolved placeholder is a
/// pattern/context mismatch.
fn render(
    pattern_id: &str,
    template: &str,
    variables: &BTreeMap<String, String>,
) -> Result<String> {
    let mut prompt = template.to_string();
    for name in placeholders(template) {
        match variables.get(&name) {
            Some(value) => prompt = prompt.replace(&format!("{{{name}}}"), value),
            None => {
                return Err(SubstrateError::PatternMismatch {
                    pattern_id: pattern_id.to_string(),
                    placeholder: name,
                })
            }
        }
    }
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir, seed: u64) -> PromptStore {
        let config = Config::for_data_dir(dir.path());
        let events = Arc::new(EventLog::open(dir.path()).unwrap());
        PromptStore::open_with_rng(&config, events, StdRng::seed_from_u64(seed)).unwrap()
    }

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_every_builtin_type_has_a_seed() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 1);
        for t in ["reflection", "dream", "monologue", "existential", "pulse", "user", "dialogue"] {
            let patterns = store.patterns(t);
            assert_eq!(patterns.len(), 1, "type {t}");
            assert!(patterns[0].seed);
        }
    }

    #[test]
    fn test_select_renders_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 2);
        let rendered = store
            .select(
                "reflection",
                &vars(&[("concept", "the tide"), ("mood", "calm")]),
            )
            .unwrap();
        assert!(rendered.prompt.contains("the tide"));
        assert!(rendered.prompt.contains("calm"));
        assert!(!rendered.prompt.contains('{'));
    }

    #[test]
    fn test_select_missing_variable_is_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 3);
        let err = store
            .select("reflection", &vars(&[("concept", "the tide")]))
            .unwrap_err();
        match err {
            SubstrateError::PatternMismatch { placeholder, .. } => {
                assert_eq!(placeholder, "mood");
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_select_unknown_type() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 4);
        assert!(matches!(
            store.select("no-such-type", &BTreeMap::new()),
            Err(SubstrateError::NotFound(_))
        ));
    }

    #[test]
    fn test_feedback_moves_score_toward_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 5);
        let id = store.patterns("reflection")[0].id.clone();

        let mut last = store.patterns("reflection")[0].success_score;
        for _ in 0..30 {
            store.feedback(&id, 1.0).unwrap();
            let score = store.patterns("reflection")[0].success_score;
            assert!(score >= last, "EWMA toward 1.0 is monotone");
            last = score;
        }
        assert!(last > 0.95);
        assert_eq!(store.patterns("reflection")[0].usage_count, 30);
    }

    #[test]
    fn test_feedback_unknown_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 6);
        assert!(matches!(
            store.feedback("missing", 1.0),
            Err(SubstrateError::NotFound(_))
        ));
    }

    #[test]
    fn test_evolution_spawns_scored_children() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 7);
        store
            .register_seed("custom", "A custom look at {concept}, taken with {mood} attention.")
            .unwrap();
        let id = store.patterns("custom")[0].id.clone();
        for _ in 0..30 {
            store.feedback(&id, 1.0).unwrap();
        }

        let result = store.evolve().unwrap();
        assert!(result.new_patterns >= 2);

        let derived: Vec<&PromptPattern> = store
            .patterns("custom")
            .iter()
            .filter(|p| p.parent_id.as_deref() == Some(id.as_str()))
            .collect();
        assert!(derived.len() >= 2);
        for child in &derived {
            assert!(!child.seed);
            let parent_score = store
                .patterns("custom")
                .iter()
                .find(|p| p.id == id)
                .unwrap()
                .success_score;
            assert!((child.success_score - parent_score * 0.8).abs() < 1e-9);
            assert_ne!(child.template, "");
        }
    }

    #[test]
    fn test_derived_patterns_outweigh_seed_after_evolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 8);
        store
            .register_seed("custom", "A custom look at {concept}, taken with {mood} attention.")
            .unwrap();
        let seed_id = store.patterns("custom")[0].id.clone();
        for _ in 0..30 {
            store.feedback(&seed_id, 1.0).unwrap();
        }
        store.evolve().unwrap();

        // Cumulative selection weight of derived patterns exceeds the seed's
        let prior = 0.1;
        let seed_weight: f64 = store
            .patterns("custom")
            .iter()
            .filter(|p| p.id == seed_id)
            .map(|p| p.success_score + prior)
            .sum();
        let derived_weight: f64 = store
            .patterns("custom")
            .iter()
            .filter(|p| p.id != seed_id)
            .map(|p| p.success_score + prior)
            .sum();
        assert!(derived_weight > seed_weight);

        // And over many selections, derived patterns win more often
        let variables = vars(&[("concept", "rivers"), ("mood", "quiet")]);
        let mut derived_hits = 0;
        for _ in 0..100 {
            let rendered = store.select("custom", &variables).unwrap();
            if rendered.pattern_id != seed_id {
                derived_hits += 1;
            }
        }
        assert!(derived_hits > 50, "derived selected {derived_hits}/100");
    }

    #[test]
    fn test_low_scoring_derived_patterns_retire() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 9);
        store
            .register_seed("custom", "Plain words about {concept}.")
            .unwrap();
        let seed_id = store.patterns("custom")[0].id.clone();
        for _ in 0..30 {
            store.feedback(&seed_id, 1.0).unwrap();
        }
        store.evolve().unwrap();
        let derived_id = store
            .patterns("custom")
            .iter()
            .find(|p| !p.seed)
            .unwrap()
            .id
            .clone();

        // Drive the derived pattern's score to the floor
        for _ in 0..40 {
            store.feedback(&derived_id, 0.0).unwrap();
        }
        // Enough selections to run out the retire streak (10), with slack
        // for the selections that land on other patterns
        let variables = vars(&[("concept", "dust")]);
        for _ in 0..600 {
            let _ = store.select("custom", &variables);
            if !store.patterns("custom").iter().any(|p| p.id == derived_id) {
                break;
            }
        }
        assert!(
            !store.patterns("custom").iter().any(|p| p.id == derived_id),
            "derived pattern should have retired"
        );
        // The seed survives no matter what
        assert!(store.patterns("custom").iter().any(|p| p.id == seed_id));
    }

    #[test]
    fn test_extract_abstracts_variables() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 10);
        let id = store
            .extract(
                "I keep circling the idea of migration at dusk.",
                "reflection",
                None,
                0.9,
                &vars(&[("concept", "migration"), ("mood", "restless")]),
            )
            .unwrap()
            .expect("pattern extracted");

        let pattern = store
            .patterns("reflection")
            .iter()
            .find(|p| p.id == id)
            .unwrap();
        assert!(pattern.template.contains("{concept}"));
        assert!(!pattern.template.contains("migration"));
        assert!((pattern.success_score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_extract_rejects_low_signal_and_unstable_structure() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 11);
        // Low signal
        assert!(store
            .extract("anything", "reflection", None, 0.3, &vars(&[("concept", "anything")]))
            .unwrap()
            .is_none());
        // No variable value appears in the content
        assert!(store
            .extract("free text", "reflection", None, 0.9, &vars(&[("concept", "migration")]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_mutations_preserve_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir, 12);
        let template = "I've been wondering about {concept}, and I feel {mood} about it.";
        for _ in 0..20 {
            let mutated = store.mutate(template);
            let names = placeholders(&mutated);
            assert!(names.iter().any(|n| n == "concept"), "lost concept in {mutated}");
            assert!(names.iter().any(|n| n == "mood"), "lost mood in {mutated}");
        }
    }

    #[test]
    fn test_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot: Vec<(String, f64, u64)>;
        {
            let mut store = open_store(&dir, 13);
            let id = store.patterns("reflection")[0].id.clone();
            store.feedback(&id, 0.9).unwrap();
            store.evolve().unwrap();
            snapshot = store
                .all_patterns()
                .map(|p| (p.id.clone(), p.success_score, p.usage_count))
                .collect();
        }
        let store = open_store(&dir, 14);
        let reloaded: Vec<(String, f64, u64)> = store
            .all_patterns()
            .map(|p| (p.id.clone(), p.success_score, p.usage_count))
            .collect();
        assert_eq!(snapshot, reloaded);
    }
}
