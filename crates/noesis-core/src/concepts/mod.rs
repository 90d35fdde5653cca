//! Concept evolution: clustering thoughts into named, staged concepts.
//!
//! An evolution cycle clusters the active thought population, reconciles the
//! clusters against existing concepts, advances concept lifecycle stages, and
//! recomputes the concept graph. Between cycles, new thoughts are only
//! *integrated* (attached to nearby concepts); centroids move at cycle time
//! only, for stability.

mod cluster;
mod network;

pub use network::{ConceptNetwork, EvolutionReport, Integration};

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONCEPT TYPES
// ============================================================================

/// Lifecycle stage of a concept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConceptStage {
    /// Freshly crystallized from a cluster
    #[default]
    Emerging,
    /// Grown past twice the minimum cluster size and survived two cycles
    Established,
    /// Salience within the top tenth of all concepts
    Central,
    /// Below minimum membership for several cycles; sheds members until deleted
    Fading,
}

impl ConceptStage {
    /// String representation used on disk
    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptStage::Emerging => "emerging",
            ConceptStage::Established => "established",
            ConceptStage::Central => "central",
            ConceptStage::Fading => "fading",
        }
    }
}

impl std::fmt::Display for ConceptStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persistent named cluster of thoughts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    /// Stable identifier (UUID v4)
    pub id: String,
    /// Human-readable label derived from member contents
    pub label: String,
    /// Lifecycle stage
    pub stage: ConceptStage,
    /// Unit centroid of member embeddings, recomputed at cycle time
    pub centroid: Vec<f32>,
    /// Member thought ids
    pub members: BTreeSet<String>,
    /// When the concept first crystallized
    pub first_seen: DateTime<Utc>,
    /// Last merge, integration, or lifecycle change
    pub last_updated: DateTime<Utc>,
    /// Evolution cycles this concept has been through
    pub cycles_seen: u32,
    /// Consecutive cycles with membership below the minimum
    pub cycles_below_min: u32,
    /// Sum of member activations, recomputed each cycle
    pub salience: f64,
}

/// A directed edge between two concepts.
///
/// Semantically undirected; stored one direction for efficiency, and
/// `neighbors` scans both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptEdge {
    /// One endpoint
    pub source: String,
    /// The other endpoint
    pub target: String,
    /// Jaccard overlap plus half the centroid similarity, clipped to 1
    pub weight: f64,
}

// ============================================================================
// LABEL DERIVATION
// ============================================================================

/// Tokens ignored by label derivation
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "about", "are", "as", "at", "be", "been", "but", "by", "for", "from",
    "had", "has", "have", "he", "her", "his", "i", "in", "into", "is", "it", "its", "me", "my",
    "no", "not", "of", "on", "or", "our", "she", "so", "that", "the", "their", "them", "they",
    "this", "to", "was", "we", "were", "what", "when", "where", "which", "who", "will", "with",
    "you", "your",
];

fn label_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= 3 && t.chars().all(char::is_alphabetic))
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

/// Deterministic concept label: the top TF-IDF unigrams (at most two) over
/// member contents, scored against the whole thought corpus, ties broken
/// lexicographically. Falls back to the leading words of the most central
/// member when nothing scores.
pub(crate) fn derive_label(
    member_contents: &[&str],
    central_content: &str,
    corpus: &[&str],
) -> String {
    use std::collections::HashMap;

    let mut tf: HashMap<String, usize> = HashMap::new();
    for content in member_contents {
        for token in label_tokens(content) {
            *tf.entry(token).or_insert(0) += 1;
        }
    }

    let corpus_docs = corpus.len().max(1);
    let mut scored: Vec<(f64, String)> = tf
        .into_iter()
        .map(|(token, count)| {
            let df = corpus
                .iter()
                .filter(|doc| label_tokens(doc).any(|t| t == token))
                .count()
                .max(1);
            let idf = (1.0 + corpus_docs as f64 / df as f64).ln();
            (count as f64 * idf, token)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    let label: Vec<String> = scored.into_iter().take(2).map(|(_, t)| t).collect();
    if !label.is_empty() {
        return label.join(" ");
    }

    let fallback: Vec<String> = label_tokens(central_content).take(3).collect();
    if fallback.is_empty() {
        "cluster".to_string()
    } else {
        fallback.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_prefers_domain_tokens() {
        let members: Vec<String> = (1..=4)
            .map(|i| format!("I wonder about stars and galaxies #{i}"))
            .collect();
        let others: Vec<String> = (1..=4)
            .map(|i| format!("Soup and bread taste good #{i}"))
            .collect();
        let member_refs: Vec<&str> = members.iter().map(String::as_str).collect();
        let corpus: Vec<&str> = members.iter().chain(others.iter()).map(String::as_str).collect();

        let label = derive_label(&member_refs, member_refs[0], &corpus);
        assert!(
            label.contains("stars") || label.contains("galaxies"),
            "label was {label}"
        );
        assert!(!label.contains("about"));
    }

    #[test]
    fn test_label_is_deterministic() {
        let members = ["tide charts and moorings", "tide charts and lanterns"];
        let corpus = ["tide charts and moorings", "tide charts and lanterns", "a different thing"];
        let a = derive_label(&members, members[0], &corpus);
        let b = derive_label(&members, members[0], &corpus);
        assert_eq!(a, b);
    }

    #[test]
    fn test_label_fallback_on_stopword_content() {
        let members = ["it is what it is"];
        let corpus = ["it is what it is"];
        let label = derive_label(&members, members[0], &corpus);
        assert_eq!(label, "cluster");
    }

    #[test]
    fn test_stage_roundtrip() {
        for stage in [
            ConceptStage::Emerging,
            ConceptStage::Established,
            ConceptStage::Central,
            ConceptStage::Fading,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            let back: ConceptStage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, stage);
        }
    }
}
