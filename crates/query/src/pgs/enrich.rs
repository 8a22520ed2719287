//! Turn raw communities into routable partitions: centroid embeddings,
//! document-frequency keywords, cross-partition adjacency, and a short
//! human-readable summary.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use cerebra_brain::EmbeddingCache;
use cerebra_brain::schema::BrainState;

use super::graph::PartitionGraph;

/// Keywords kept internally for summary building.
const KEYWORDS_RETAINED: usize = 50;
/// Keywords exposed on the partition record.
const KEYWORDS_EXPOSED: usize = 20;
const ADJACENT_LIMIT: usize = 5;
const SUMMARY_CONCEPT_CHARS: usize = 120;
const SUMMARY_KEYWORDS: usize = 8;

const STOP_WORDS: &[&str] = &[
    "about", "after", "also", "and", "are", "because", "been", "between",
    "but", "can", "could", "for", "from", "has", "have", "how", "into",
    "its", "more", "not", "now", "our", "out", "should", "than", "that",
    "the", "their", "there", "these", "this", "those", "was", "were",
    "what", "when", "where", "which", "while", "who", "will", "with",
    "would", "you",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjacentPartition {
    pub id: String,
    pub shared_edges: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub id: String,
    pub node_ids: Vec<String>,
    pub node_count: usize,
    pub summary: String,
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid_embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub adjacent_partitions: Vec<AdjacentPartition>,
}

/// Enrich `communities` (graph-index members) into partition records.
pub fn enrich_partitions(
    state: &BrainState,
    cache: &EmbeddingCache,
    graph: &PartitionGraph,
    communities: &[Vec<usize>],
) -> Vec<Partition> {
    // node graph index → partition position, for adjacency counting.
    let mut assignment: HashMap<usize, usize> = HashMap::new();
    for (position, members) in communities.iter().enumerate() {
        for &node in members {
            assignment.insert(node, position);
        }
    }

    // Count cross-partition edges once per undirected pair.
    let mut shared: HashMap<(usize, usize), usize> = HashMap::new();
    for (node, &home) in &assignment {
        for (neighbor, _) in graph.neighbors(*node) {
            let there = assignment[&neighbor];
            if home < there {
                *shared.entry((home, there)).or_insert(0) += 1;
            }
        }
    }

    communities
        .iter()
        .enumerate()
        .map(|(position, members)| {
            let state_nodes: Vec<&cerebra_brain::Node> = members
                .iter()
                .map(|&g| &state.nodes[graph.state_indices[g]])
                .collect();

            let keywords = keywords_by_document_frequency(&state_nodes);
            let summary = summarize(&state_nodes, &keywords);
            let centroid = centroid(&state_nodes, cache);
            let adjacent = adjacent_partitions(position, communities.len(), &shared);

            Partition {
                id: format!("p{position}"),
                node_ids: state_nodes.iter().map(|n| n.id.clone()).collect(),
                node_count: state_nodes.len(),
                summary,
                keywords: keywords.into_iter().take(KEYWORDS_EXPOSED).collect(),
                centroid_embedding: centroid,
                adjacent_partitions: adjacent,
            }
        })
        .collect()
}

/// Element-wise mean over member embeddings that exist and agree on
/// dimension. `None` when no member has a usable vector.
fn centroid(nodes: &[&cerebra_brain::Node], cache: &EmbeddingCache) -> Option<Vec<f32>> {
    let mut sum: Vec<f64> = Vec::new();
    let mut count = 0usize;
    for node in nodes {
        let vector = node
            .embedding
            .as_deref()
            .or_else(|| cache.node_vector(&node.id));
        let Some(vector) = vector else { continue };
        if sum.is_empty() {
            sum = vec![0.0; vector.len()];
        }
        if vector.len() != sum.len() {
            continue;
        }
        for (slot, value) in sum.iter_mut().zip(vector) {
            *slot += f64::from(*value);
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(sum.into_iter().map(|v| (v / count as f64) as f32).collect())
}

/// Score tokens by how many member concepts they appear in.
fn keywords_by_document_frequency(nodes: &[&cerebra_brain::Node]) -> Vec<String> {
    let mut document_frequency: HashMap<String, usize> = HashMap::new();
    for node in nodes {
        let tokens: BTreeSet<String> = node
            .concept
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_lowercase)
            .filter(|t| !STOP_WORDS.contains(&t.as_str()))
            .collect();
        for token in tokens {
            *document_frequency.entry(token).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = document_frequency.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(KEYWORDS_RETAINED)
        .map(|(token, _)| token)
        .collect()
}

/// Top-weighted member's opening text plus the leading keywords.
fn summarize(nodes: &[&cerebra_brain::Node], keywords: &[String]) -> String {
    let lead = nodes
        .iter()
        .max_by(|a, b| {
            a.weight
                .total_cmp(&b.weight)
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|n| {
            let chars: Vec<char> = n.concept.chars().collect();
            if chars.len() <= SUMMARY_CONCEPT_CHARS {
                n.concept.clone()
            } else {
                chars[..SUMMARY_CONCEPT_CHARS].iter().collect()
            }
        })
        .unwrap_or_default();

    let keyword_list: Vec<&str> = keywords
        .iter()
        .take(SUMMARY_KEYWORDS)
        .map(String::as_str)
        .collect();
    if keyword_list.is_empty() {
        lead
    } else {
        format!("{lead} [{}]", keyword_list.join(", "))
    }
}

fn adjacent_partitions(
    position: usize,
    total: usize,
    shared: &HashMap<(usize, usize), usize>,
) -> Vec<AdjacentPartition> {
    let mut counts: Vec<(usize, usize)> = (0..total)
        .filter(|&other| other != position)
        .filter_map(|other| {
            let key = if position < other { (position, other) } else { (other, position) };
            shared.get(&key).map(|&count| (other, count))
        })
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
        .into_iter()
        .take(ADJACENT_LIMIT)
        .map(|(other, shared_edges)| AdjacentPartition {
            id: format!("p{other}"),
            shared_edges,
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use cerebra_brain::schema::{Edge, Node};

    use super::*;

    fn state() -> BrainState {
        let mut nodes = Vec::new();
        for i in 0..3 {
            let mut n = Node::new(
                format!("a{i}"),
                "cache eviction policy under memory pressure",
            );
            n.weight = 0.2 + i as f64 * 0.3;
            n.embedding = Some(vec![1.0, 0.0]);
            nodes.push(n);
        }
        for i in 0..2 {
            let mut n = Node::new(format!("b{i}"), "scheduler fairness tuning");
            n.weight = 0.5;
            n.embedding = Some(vec![0.0, 1.0]);
            nodes.push(n);
        }
        BrainState {
            nodes,
            edges: vec![
                Edge { source: "a0".to_string(), target: "a1".to_string(), weight: 1.0 },
                Edge { source: "a2".to_string(), target: "b0".to_string(), weight: 0.2 },
                Edge { source: "a1".to_string(), target: "b1".to_string(), weight: 0.2 },
            ],
            clusters: None,
            cycle_count: 0,
            timestamp: 0,
            run_metadata: None,
            is_cluster: false,
        }
    }

    #[test]
    fn partitions_carry_centroid_keywords_summary_adjacency() {
        let state = state();
        let graph = PartitionGraph::build(&state);
        let cache = EmbeddingCache::empty(2);
        let communities = vec![vec![0, 1, 2], vec![3, 4]];
        let partitions = enrich_partitions(&state, &cache, &graph, &communities);

        assert_eq!(partitions.len(), 2);
        let first = &partitions[0];
        assert_eq!(first.id, "p0");
        assert_eq!(first.node_count, 3);
        assert_eq!(first.centroid_embedding, Some(vec![1.0, 0.0]));
        assert!(first.keywords.contains(&"cache".to_string()));
        // Highest-weight member (a2) leads the summary.
        assert!(first.summary.starts_with("cache eviction policy"));
        assert_eq!(first.adjacent_partitions.len(), 1);
        assert_eq!(first.adjacent_partitions[0].id, "p1");
        assert_eq!(first.adjacent_partitions[0].shared_edges, 2);
    }

    #[test]
    fn centroid_none_without_embeddings() {
        let mut state = state();
        for node in &mut state.nodes {
            node.embedding = None;
        }
        let graph = PartitionGraph::build(&state);
        let cache = EmbeddingCache::empty(2);
        let partitions = enrich_partitions(&state, &cache, &graph, &[vec![0, 1, 2]]);
        assert!(partitions[0].centroid_embedding.is_none());
    }
}
