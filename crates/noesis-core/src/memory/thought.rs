//! Thought - the atom of memory
//!
//! A unit of generated or received text with metadata, activation, and the
//! typed weighted edges that tie it into the association graph.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// THOUGHT TYPES
// ============================================================================

/// Well-known thought types. The on-disk field stays an open string so
/// callers can register their own types; this enum names the built-ins.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtType {
    /// Free reflection over the current state of memory
    #[default]
    Reflection,
    /// Dream-job output
    Dream,
    /// Inner monologue
    Monologue,
    /// Existential question
    Existential,
    /// Heartbeat / maintenance note
    Pulse,
    /// Text supplied by a user
    User,
    /// One turn of a conversation
    Dialogue,
}

impl ThoughtType {
    /// String representation used on disk
    pub fn as_str(&self) -> &'static str {
        match self {
            ThoughtType::Reflection => "reflection",
            ThoughtType::Dream => "dream",
            ThoughtType::Monologue => "monologue",
            ThoughtType::Existential => "existential",
            ThoughtType::Pulse => "pulse",
            ThoughtType::User => "user",
            ThoughtType::Dialogue => "dialogue",
        }
    }

    /// Parse from a string name, defaulting to reflection
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "dream" => ThoughtType::Dream,
            "monologue" => ThoughtType::Monologue,
            "existential" => ThoughtType::Existential,
            "pulse" => ThoughtType::Pulse,
            "user" => ThoughtType::User,
            "dialogue" => ThoughtType::Dialogue,
            _ => ThoughtType::Reflection,
        }
    }
}

impl std::fmt::Display for ThoughtType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ASSOCIATIONS
// ============================================================================

/// Kind of edge between two thoughts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationKind {
    /// Embedding-neighbourhood similarity
    Semantic,
    /// Created close together in time
    Temporal,
    /// Shared caller-supplied context (type tag, focus)
    Contextual,
    /// One thought produced the other
    Causal,
}

impl std::fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationKind::Semantic => write!(f, "semantic"),
            AssociationKind::Temporal => write!(f, "temporal"),
            AssociationKind::Contextual => write!(f, "contextual"),
            AssociationKind::Causal => write!(f, "causal"),
        }
    }
}

/// A weighted, typed, directed edge to another thought
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    /// Target thought id
    pub target_id: String,
    /// Weight in (0, 1]
    pub weight: f64,
    /// Dominant kind of the connection
    pub kind: AssociationKind,
    /// Last time the weight was set, reinforced, or decayed
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// METADATA
// ============================================================================

/// Open metadata: a tagged value tree with typed accessors.
///
/// Caller-supplied metadata is open-ended, so it is modelled as
/// scalar | sequence | map rather than as heterogeneous records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum MetaValue {
    /// Absent / null
    #[default]
    Null,
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// Float scalar
    Float(f64),
    /// Text scalar
    Text(String),
    /// Ordered sequence
    Seq(Vec<MetaValue>),
    /// String-keyed map
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Whether this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, MetaValue::Null)
    }

    /// Text scalar, if that is what this is
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean scalar, if that is what this is
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer scalar, widening from Int only
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float scalar, widening from Int
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Float(f) => Some(*f),
            MetaValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Map lookup; `Null` for everything that is not a map or lacks the key
    pub fn get(&self, key: &str) -> &MetaValue {
        const NULL: &MetaValue = &MetaValue::Null;
        match self {
            MetaValue::Map(map) => map.get(key).unwrap_or(NULL),
            _ => NULL,
        }
    }

    /// Sequence items; empty for non-sequences
    pub fn items(&self) -> &[MetaValue] {
        match self {
            MetaValue::Seq(items) => items,
            _ => &[],
        }
    }

    /// Build a map from string pairs
    pub fn map_of<const N: usize>(pairs: [(&str, MetaValue); N]) -> Self {
        MetaValue::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        MetaValue::Float(f)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

// ============================================================================
// THOUGHT
// ============================================================================

/// A thought record. Content never mutates after creation; activation and
/// associations mutate freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    /// Stable opaque identifier (UUID v4)
    pub id: String,
    /// Monotonic creation counter; observers see a total order
    pub seq: u64,
    /// The text itself
    pub content: String,
    /// Type tag from the open set
    pub thought_type: String,
    /// Which job or caller produced it
    pub origin: String,
    /// When the thought was created
    pub created_at: DateTime<Utc>,
    /// When the thought was last accessed or reinforced
    pub last_accessed: DateTime<Utc>,
    /// When decay was last applied; lets repeated decay calls compose exactly
    pub decayed_at: DateTime<Utc>,
    /// Current relevance in [0, 1]
    pub activation: f64,
    /// Parent thought for chains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Open caller-supplied metadata
    #[serde(default, skip_serializing_if = "MetaValue::is_null")]
    pub metadata: MetaValue,
    /// Whether a vector was computed for this thought
    #[serde(default)]
    pub embedded: bool,
}

impl Thought {
    /// Parsed thought type
    pub fn get_type(&self) -> ThoughtType {
        ThoughtType::parse_name(&self.thought_type)
    }
}

/// Input for saving a thought
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SaveRequest {
    /// The text to remember
    pub content: String,
    /// Type tag; defaults to reflection
    #[serde(default = "default_type")]
    pub thought_type: String,
    /// Which job or caller produced it
    #[serde(default)]
    pub origin: String,
    /// Parent thought for chains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Open metadata; a `focus` key participates in contextual linking
    #[serde(default)]
    pub metadata: MetaValue,
}

fn default_type() -> String {
    ThoughtType::Reflection.as_str().to_string()
}

impl Default for SaveRequest {
    fn default() -> Self {
        Self {
            content: String::new(),
            thought_type: default_type(),
            origin: String::new(),
            parent_id: None,
            metadata: MetaValue::Null,
        }
    }
}

impl SaveRequest {
    /// Request with content and the default reflection type
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Set the type tag
    pub fn with_type(mut self, thought_type: ThoughtType) -> Self {
        self.thought_type = thought_type.as_str().to_string();
        self
    }

    /// Set the origin tag
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: MetaValue) -> Self {
        self.metadata = metadata;
        self
    }

    /// Chain off a parent thought
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

// ============================================================================
// RETRIEVAL
// ============================================================================

/// How `retrieve` ranks candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetrievalMode {
    /// Pure embedding similarity
    #[default]
    Similarity,
    /// Similarity re-ranked by activation
    ActivationWeighted,
    /// Bounded spreading over the association graph
    Spreading,
}

/// One retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredThought {
    /// The matched thought
    pub thought: Thought,
    /// Mode-dependent relevance score
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thought_type_roundtrip() {
        for t in [
            ThoughtType::Reflection,
            ThoughtType::Dream,
            ThoughtType::Monologue,
            ThoughtType::Existential,
            ThoughtType::Pulse,
            ThoughtType::User,
            ThoughtType::Dialogue,
        ] {
            assert_eq!(ThoughtType::parse_name(t.as_str()), t);
        }
        assert_eq!(ThoughtType::parse_name("anything"), ThoughtType::Reflection);
    }

    #[test]
    fn test_meta_value_accessors() {
        let meta = MetaValue::map_of([
            ("origin", "dream".into()),
            ("depth", 3i64.into()),
            ("weight", 0.5f64.into()),
        ]);
        assert_eq!(meta.get("origin").as_str(), Some("dream"));
        assert_eq!(meta.get("depth").as_i64(), Some(3));
        assert_eq!(meta.get("depth").as_f64(), Some(3.0));
        assert_eq!(meta.get("weight").as_f64(), Some(0.5));
        assert!(meta.get("absent").is_null());
        assert!(meta.get("origin").get("nested").is_null());
    }

    #[test]
    fn test_meta_value_json_roundtrip() {
        let meta = MetaValue::map_of([
            ("flag", true.into()),
            (
                "tags",
                MetaValue::Seq(vec!["a".into(), "b".into()]),
            ),
        ]);
        let json = serde_json::to_string(&meta).unwrap();
        let back: MetaValue = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn test_save_request_deny_unknown_fields() {
        let ok = r#"{"content": "a thought", "thoughtType": "dream"}"#;
        assert!(serde_json::from_str::<SaveRequest>(ok).is_ok());

        let bad = r#"{"content": "a thought", "unexpected": 1}"#;
        assert!(serde_json::from_str::<SaveRequest>(bad).is_err());
    }
}
