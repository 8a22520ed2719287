//! On-disk data model for a persisted brain.
//!
//! The snapshot format is camelCase JSON written by heterogeneous producers,
//! so parsing is deliberately loose: tags accept a single string or an
//! array, unknown node fields are preserved in `extras`, and optional fields
//! default rather than fail.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// A memory node: concept text plus scoring metadata and an optional dense
/// embedding. Cluster snapshots compose `id` as `<instance>:<origId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub concept: String,
    /// Single tag or tag set in the source JSON; always a set here.
    #[serde(default, alias = "tag", deserialize_with = "string_or_set")]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub activation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u64>,
    /// Provenance run ids; two or more means merged provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_runs: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Forward-compatible bag for fields this engine does not interpret.
    #[serde(flatten)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, concept: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            concept: concept.into(),
            tags: BTreeSet::new(),
            weight: 0.0,
            activation: 0.0,
            embedding: None,
            cycle: None,
            source_runs: None,
            instance_id: None,
            extras: BTreeMap::new(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Undirected weighted edge between two node ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(alias = "sourceId")]
    pub source: String,
    #[serde(alias = "targetId")]
    pub target: String,
    #[serde(default)]
    pub weight: f64,
}

/// A time-stamped reasoning entry keyed by a monotonic cycle counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    #[serde(default)]
    pub cycle: Option<u64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surprise: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    #[serde(default)]
    pub active_goals: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_runs: Option<BTreeSet<String>>,
}

/// Immutable-per-query aggregate of one loaded brain snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainState {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Cluster topology blob, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clusters: Option<serde_json::Value>,
    #[serde(default)]
    pub cycle_count: u64,
    /// Snapshot timestamp, epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_metadata: Option<RunMetadata>,
    #[serde(default)]
    pub is_cluster: bool,
}

impl BrainState {
    /// Map node id → index into `nodes`. Built once, used for edge
    /// validation, connected expansion and partition assembly.
    pub fn node_index(&self) -> HashMap<&str, usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect()
    }

    /// True when two or more provenance runs contributed to this brain.
    pub fn is_merged(&self) -> bool {
        if self
            .run_metadata
            .as_ref()
            .and_then(|m| m.source_runs.as_ref())
            .is_some_and(|runs| runs.len() > 1)
        {
            return true;
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if let Some(runs) = &node.source_runs {
                for run in runs {
                    seen.insert(run.as_str());
                    if seen.len() > 1 {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Distinct instance ids present across nodes (cluster snapshots).
    pub fn instance_ids(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter_map(|n| n.instance_id.clone())
            .collect()
    }
}

/// Journal record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveEntryKind {
    Finding,
    Insight,
}

/// Append-only live-journal record streamed by a worker agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEntry {
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: LiveEntryKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tag: String,
    pub timestamp: DateTime<Utc>,
}

/// Latest coordinator review, selected by numeric cycle in the filename.
#[derive(Debug, Clone)]
pub struct CoordinatorReview {
    pub cycle: u64,
    pub content: String,
}

// ── state hashing ─────────────────────────────────────────────────────────────

/// Deterministic version string for a loaded state.
///
/// Solo brains key on the cycle counter, cluster snapshots on their
/// timestamp and goal count: `solo:<cycles>:<nodes>` /
/// `cluster:<ts>:<nodes>:<activeGoals>`.
pub fn state_hash(state: &BrainState) -> String {
    if state.is_cluster {
        let goals = state
            .run_metadata
            .as_ref()
            .map(|m| m.active_goals)
            .unwrap_or(0);
        format!(
            "cluster:{}:{}:{}",
            state.timestamp,
            state.nodes.len(),
            goals
        )
    } else {
        format!("solo:{}:{}", state.cycle_count, state.nodes.len())
    }
}

/// SHA-256 hex of the state hash, used to validate the partition cache.
pub fn brain_hash(state: &BrainState) -> String {
    let mut hasher = Sha256::new();
    hasher.update(state_hash(state).as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── loose deserialization helpers ─────────────────────────────────────────────

fn string_or_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(tag) => BTreeSet::from([tag]),
        OneOrMany::Many(tags) => tags.into_iter().collect(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_accepts_single_tag_string() {
        let node: Node =
            serde_json::from_str(r#"{"id":"n1","concept":"x","tag":"finding"}"#).unwrap();
        assert!(node.has_tag("finding"));
    }

    #[test]
    fn node_accepts_tag_array_and_extras() {
        let node: Node = serde_json::from_str(
            r#"{"id":"n1","concept":"x","tags":["a","b"],"customField":7}"#,
        )
        .unwrap();
        assert_eq!(node.tags.len(), 2);
        assert_eq!(node.extras.get("customField"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn state_hash_shapes() {
        let mut state = BrainState {
            nodes: vec![Node::new("a", ""), Node::new("b", "")],
            edges: vec![],
            clusters: None,
            cycle_count: 12,
            timestamp: 1700000000000,
            run_metadata: None,
            is_cluster: false,
        };
        assert_eq!(state_hash(&state), "solo:12:2");

        state.is_cluster = true;
        state.run_metadata = Some(RunMetadata { active_goals: 3, source_runs: None });
        assert_eq!(state_hash(&state), "cluster:1700000000000:2:3");
    }

    #[test]
    fn brain_hash_is_stable_hex() {
        let state = BrainState {
            nodes: vec![],
            edges: vec![],
            clusters: None,
            cycle_count: 1,
            timestamp: 0,
            run_metadata: None,
            is_cluster: false,
        };
        let first = brain_hash(&state);
        assert_eq!(first, brain_hash(&state));
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn merged_detection_from_node_source_runs() {
        let mut state = BrainState {
            nodes: vec![Node::new("a", ""), Node::new("b", "")],
            edges: vec![],
            clusters: None,
            cycle_count: 0,
            timestamp: 0,
            run_metadata: None,
            is_cluster: false,
        };
        assert!(!state.is_merged());
        state.nodes[0].source_runs = Some(BTreeSet::from(["r1".to_string()]));
        state.nodes[1].source_runs = Some(BTreeSet::from(["r2".to_string()]));
        assert!(state.is_merged());
    }

    #[test]
    fn live_entry_parses_kind() {
        let entry: LiveEntry = serde_json::from_str(
            r#"{"nodeId":"n9","type":"finding","content":"c","tag":"t","timestamp":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(entry.kind, LiveEntryKind::Finding);
    }
}
