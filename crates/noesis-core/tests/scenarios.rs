//! End-to-end scenarios against the full substrate.

use std::collections::BTreeMap;

use chrono::Duration;
use noesis_core::{
    Config, MetaValue, RetrievalMode, SaveRequest, Substrate, SubstrateError, ThoughtType,
};

fn open(dir: &tempfile::TempDir) -> Substrate {
    Substrate::open(Config::for_data_dir(dir.path())).unwrap()
}

fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// Twenty thoughts from two templates crystallize into at least two disjoint
// concepts of four or more members, labelled with domain vocabulary.
#[test]
fn cluster_crystallization() {
    let dir = tempfile::tempdir().unwrap();
    let mut substrate = open(&dir);

    for i in 1..=10 {
        substrate
            .save(SaveRequest::new(format!("I wonder about stars and galaxies #{i}")))
            .unwrap();
    }
    for i in 1..=10 {
        substrate
            .save(SaveRequest::new(format!("Soup and bread taste good #{i}")))
            .unwrap();
    }

    substrate.force_evolve().unwrap();
    let concepts = substrate.concepts(None);
    assert!(concepts.len() >= 2, "expected >= 2 concepts, got {}", concepts.len());

    let star = concepts
        .iter()
        .find(|c| c.label.contains("stars") || c.label.contains("galaxies"))
        .expect("star-domain concept with a domain token in its label");
    let food = concepts
        .iter()
        .find(|c| c.label.contains("soup") || c.label.contains("bread"))
        .expect("food-domain concept with a domain token in its label");

    assert!(star.members.len() >= 4);
    assert!(food.members.len() >= 4);
    assert!(star.members.is_disjoint(&food.members));
}

// One thought, fourteen days, one decay sweep: activation sits two
// half-lives below 1.0.
#[test]
fn decay_two_half_lives() {
    let dir = tempfile::tempdir().unwrap();
    let mut substrate = open(&dir);
    let thought = substrate
        .save(SaveRequest::new("a single thought left to fade"))
        .unwrap();

    substrate
        .decay_at(thought.created_at + Duration::days(14))
        .unwrap();

    let activation = substrate.get(&thought.id).unwrap().activation;
    assert!(
        (activation - 0.25).abs() <= 0.05,
        "expected 0.25 +/- 0.05, got {activation}"
    );
}

// B sits close to A, C close to B but not to A; spreading retrieval from A
// walks the graph and returns A, B, C in that order.
#[test]
fn spreading_retrieval_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut substrate = open(&dir);

    let a = substrate
        .save(SaveRequest::new("alpha beta gamma delta"))
        .unwrap();
    let b = substrate
        .save(SaveRequest::new("beta gamma delta epsilon"))
        .unwrap();
    let c = substrate
        .save(SaveRequest::new("gamma delta epsilon zeta"))
        .unwrap();

    let hits = substrate
        .retrieve("alpha beta gamma delta", 3, RetrievalMode::Spreading)
        .unwrap();
    let order: Vec<&str> = hits.iter().map(|h| h.thought.id.as_str()).collect();
    assert_eq!(order, vec![a.id.as_str(), b.id.as_str(), c.id.as_str()]);
}

// A custom thought type with one seed: thirty perfect feedback cycles, one
// evolution, and the derived patterns collectively outweigh the seed.
#[test]
fn pattern_evolution_favours_derived() {
    let dir = tempfile::tempdir().unwrap();
    let mut substrate = open(&dir);
    substrate
        .register_prompt_seed(
            "hymn",
            "A short hymn to {concept}, sung in a {mood} register.",
        )
        .unwrap();
    let seed_id = substrate.prompts().patterns("hymn")[0].id.clone();

    for _ in 0..30 {
        let rendered = substrate
            .select_prompt("hymn", &vars(&[("concept", "rivers"), ("mood", "low")]))
            .unwrap();
        substrate.prompt_feedback(&rendered.pattern_id, 1.0).unwrap();
    }
    substrate.evolve_prompts().unwrap();

    let derived: Vec<_> = substrate
        .prompts()
        .patterns("hymn")
        .iter()
        .filter(|p| p.parent_id.is_some())
        .collect();
    assert!(derived.len() >= 2, "expected >= 2 derived patterns");

    let prior = substrate.config().selection_prior;
    let seed_weight: f64 = substrate
        .prompts()
        .patterns("hymn")
        .iter()
        .filter(|p| p.id == seed_id)
        .map(|p| p.success_score + prior)
        .sum();
    let derived_weight: f64 = derived.iter().map(|p| p.success_score + prior).sum();
    assert!(
        derived_weight > seed_weight,
        "derived cumulative selection weight {derived_weight} should exceed seed's {seed_weight}"
    );
}

// Everything persisted comes back identically after a restart.
#[test]
fn restart_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let thought_snapshot: Vec<(String, String, f64)>;
    let concept_snapshot: Vec<(String, String, usize)>;
    let pattern_snapshot: Vec<(String, f64, u64)>;
    {
        let mut substrate = open(&dir);
        for i in 1..=8 {
            substrate
                .save(
                    SaveRequest::new(format!("Soup and bread taste good #{i}"))
                        .with_type(ThoughtType::Reflection)
                        .with_origin("scenario")
                        .with_metadata(MetaValue::map_of([("focus", "food".into())])),
                )
                .unwrap();
        }
        substrate.force_evolve().unwrap();
        let rendered = substrate
            .select_prompt("reflection", &vars(&[("concept", "soup"), ("mood", "warm")]))
            .unwrap();
        substrate.prompt_feedback(&rendered.pattern_id, 0.8).unwrap();
        substrate.flush().unwrap();

        thought_snapshot = substrate
            .recent(100, None)
            .into_iter()
            .map(|t| (t.id, t.content, t.activation))
            .collect();
        concept_snapshot = substrate
            .concepts(None)
            .into_iter()
            .map(|c| (c.id, c.label, c.members.len()))
            .collect();
        pattern_snapshot = substrate
            .prompts()
            .all_patterns()
            .map(|p| (p.id.clone(), p.success_score, p.usage_count))
            .collect();
    }

    let substrate = open(&dir);
    let thoughts_after: Vec<(String, String, f64)> = substrate
        .recent(100, None)
        .into_iter()
        .map(|t| (t.id, t.content, t.activation))
        .collect();
    let concepts_after: Vec<(String, String, usize)> = substrate
        .concepts(None)
        .into_iter()
        .map(|c| (c.id, c.label, c.members.len()))
        .collect();
    let patterns_after: Vec<(String, f64, u64)> = substrate
        .prompts()
        .all_patterns()
        .map(|p| (p.id.clone(), p.success_score, p.usage_count))
        .collect();

    assert_eq!(thought_snapshot, thoughts_after);
    assert_eq!(concept_snapshot, concepts_after);
    assert_eq!(pattern_snapshot, patterns_after);

    // Associations survive too
    for (id, _, _) in &thought_snapshot {
        let _ = substrate.get(id).unwrap();
    }
}

// A saved thought survives losing the index files entirely: startup rebuild
// restores identical search behaviour.
#[test]
fn crash_before_index_flush() {
    let dir = tempfile::tempdir().unwrap();
    let id;
    {
        let mut substrate = open(&dir);
        id = substrate
            .save(SaveRequest::new("a thought the crash must not take"))
            .unwrap()
            .id;
    }
    // Simulate dying before the index ever hit disk
    let _ = std::fs::remove_file(dir.path().join("vector_index.bin"));
    let _ = std::fs::remove_file(dir.path().join("index_meta"));

    let substrate = open(&dir);
    assert_eq!(substrate.get(&id).unwrap().id, id);
    let hits = substrate
        .retrieve("a thought the crash must not take", 1, RetrievalMode::Similarity)
        .unwrap();
    assert_eq!(hits[0].thought.id, id);
    assert!(hits[0].score > 0.99);
}

// Corrupt thoughts.json with no backup is rejected at startup with the
// corrupt-store exit code.
#[test]
fn corrupt_store_rejected_with_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("thoughts.json"), b"{ definitely not json").unwrap();

    let err = Substrate::open(Config::for_data_dir(dir.path())).unwrap_err();
    assert!(matches!(err, SubstrateError::CorruptState { .. }));
    assert_eq!(err.exit_code(), 3);
}

// A stale lock left by a dead process is reclaimed; a live lock is not.
#[cfg(target_os = "linux")]
#[test]
fn stale_directory_lock_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    // No live process has this pid (pid_max is far lower)
    std::fs::write(dir.path().join(".lock"), b"999999999\n").unwrap();
    let substrate = Substrate::open(Config::for_data_dir(dir.path())).unwrap();
    drop(substrate);
}

// Unknown ids are caller errors, mapped to not-found.
#[test]
fn unknown_ids_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut substrate = open(&dir);
    assert!(matches!(
        substrate.get("t-unknown"),
        Err(SubstrateError::NotFound(_))
    ));
    assert!(matches!(
        substrate.reinforce("t-unknown"),
        Err(SubstrateError::NotFound(_))
    ));
    assert!(matches!(
        substrate.concept_neighbors("c-unknown"),
        Err(SubstrateError::NotFound(_))
    ));
}
