//! Quality metrics over the evidence selected for a query: coverage,
//! confidence, cluster consensus, temporal spread, and gap detection.

use std::collections::HashMap;

use serde::Serialize;

use crate::ranker::{RankedNode, is_meta};
use crate::schema::{BrainState, Thought};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageRating {
    Excellent,
    Good,
    Fair,
    Limited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceRating {
    High,
    Medium,
    Low,
    VeryLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleDistribution {
    RecentHeavy,
    HistoricalHeavy,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GapSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct Coverage {
    pub used: usize,
    pub total: usize,
    pub ratio: f64,
    pub rating: CoverageRating,
}

#[derive(Debug, Clone, Serialize)]
pub struct Confidence {
    pub score: f64,
    pub rating: ConfidenceRating,
}

#[derive(Debug, Clone, Serialize)]
pub struct Consensus {
    pub participation: f64,
    pub score: f64,
    pub instances_represented: usize,
    pub instances_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Temporal {
    pub cycle_span: u64,
    pub datapoints: usize,
    pub distribution: CycleDistribution,
    pub recent_bias: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Gap {
    pub kind: String,
    pub severity: GapSeverity,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceReport {
    pub coverage: Coverage,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<Consensus>,
    pub temporal: Temporal,
    pub gaps: Vec<Gap>,
}

/// Score the evidence actually used for a query.
///
/// `used` is the ranked memory selected into the context; `thoughts` the
/// thought evidence. The candidate pool is every non-meta node in the brain.
pub fn analyze_evidence(
    state: &BrainState,
    used: &[RankedNode],
    thoughts: &[&Thought],
    query: &str,
) -> EvidenceReport {
    let total = state.nodes.iter().filter(|n| !is_meta(n)).count();
    let coverage = coverage(used.len(), total);
    let confidence = confidence(state, used, thoughts);
    let consensus = state.is_cluster.then(|| consensus(state, used));
    let temporal = temporal(thoughts);
    let gaps = detect_gaps(&coverage, &temporal, used.len(), thoughts.len(), query);

    EvidenceReport { coverage, confidence, consensus, temporal, gaps }
}

fn coverage(used: usize, total: usize) -> Coverage {
    let ratio = if total == 0 { 0.0 } else { used as f64 / total as f64 };
    let rating = if ratio >= 0.7 {
        CoverageRating::Excellent
    } else if ratio >= 0.5 {
        CoverageRating::Good
    } else if ratio >= 0.3 {
        CoverageRating::Fair
    } else {
        CoverageRating::Limited
    };
    Coverage { used, total, ratio, rating }
}

/// Reasoning markers that indicate a thought argues rather than recites.
const REASONING_WORDS: &[&str] = &["because", "therefore", "thus"];
const EVIDENCE_WORDS: &[&str] = &["observed", "found", "discovered"];

fn confidence(state: &BrainState, used: &[RankedNode], thoughts: &[&Thought]) -> Confidence {
    let memory = if used.is_empty() {
        0.0
    } else {
        let sum: f64 = used
            .iter()
            .map(|ranked| {
                let node = &state.nodes[ranked.index];
                let mut value = node.activation * node.weight;
                if node.has_tag("agent_insight") {
                    value *= 1.3;
                }
                if node.has_tag("breakthrough") {
                    value *= 1.4;
                }
                if node.has_tag("validated") {
                    value *= 1.2;
                }
                value.min(1.0)
            })
            .sum();
        sum / used.len() as f64
    };

    let coherence = if thoughts.is_empty() {
        0.7
    } else {
        let sum: f64 = thoughts
            .iter()
            .map(|t| {
                let lower = t.content.to_lowercase();
                let reasons = REASONING_WORDS.iter().any(|w| lower.contains(w));
                let evidences = EVIDENCE_WORDS.iter().any(|w| lower.contains(w));
                if reasons && evidences { 1.0 } else { 0.7 }
            })
            .sum();
        sum / thoughts.len() as f64
    };

    let score = (0.7 * memory + 0.3 * coherence).clamp(0.0, 1.0);
    let rating = if score >= 0.8 {
        ConfidenceRating::High
    } else if score >= 0.6 {
        ConfidenceRating::Medium
    } else if score >= 0.4 {
        ConfidenceRating::Low
    } else {
        ConfidenceRating::VeryLow
    };
    Confidence { score, rating }
}

fn consensus(state: &BrainState, used: &[RankedNode]) -> Consensus {
    let instances_total = state.instance_ids().len().max(1);

    let mut per_instance: HashMap<&str, usize> = HashMap::new();
    for ranked in used {
        if let Some(instance) = state.nodes[ranked.index].instance_id.as_deref() {
            *per_instance.entry(instance).or_default() += 1;
        }
    }
    let instances_represented = per_instance.len();
    let participation = instances_represented as f64 / instances_total as f64;

    let norm_var = if per_instance.is_empty() {
        0.0
    } else {
        let counts: Vec<f64> = per_instance.values().map(|&c| c as f64).collect();
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let var =
            counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        if mean > 0.0 { (var / (mean * mean)).clamp(0.0, 1.0) } else { 0.0 }
    };

    Consensus {
        participation,
        score: participation * (1.0 - 0.5 * norm_var),
        instances_represented,
        instances_total,
    }
}

fn temporal(thoughts: &[&Thought]) -> Temporal {
    let cycles: Vec<u64> = thoughts.iter().filter_map(|t| t.cycle).collect();
    if cycles.is_empty() {
        return Temporal {
            cycle_span: 0,
            datapoints: 0,
            distribution: CycleDistribution::Even,
            recent_bias: 0.0,
        };
    }

    let min = *cycles.iter().min().unwrap_or(&0);
    let max = *cycles.iter().max().unwrap_or(&0);
    let span = max - min;
    let recent_bias = if span == 0 {
        1.0
    } else {
        let midpoint = min + span / 2;
        cycles.iter().filter(|&&c| c >= midpoint).count() as f64 / cycles.len() as f64
    };
    let distribution = if recent_bias > 0.6 {
        CycleDistribution::RecentHeavy
    } else if recent_bias < 0.3 {
        CycleDistribution::HistoricalHeavy
    } else {
        CycleDistribution::Even
    };

    Temporal { cycle_span: span, datapoints: cycles.len(), distribution, recent_bias }
}

fn detect_gaps(
    coverage: &Coverage,
    temporal: &Temporal,
    memory_used: usize,
    thought_count: usize,
    query: &str,
) -> Vec<Gap> {
    let mut gaps = Vec::new();

    if temporal.cycle_span > 10 && temporal.datapoints < 5 {
        gaps.push(Gap {
            kind: "temporal".to_string(),
            severity: GapSeverity::Medium,
            description: format!(
                "{} datapoints across a {}-cycle span",
                temporal.datapoints, temporal.cycle_span
            ),
        });
    }
    if coverage.ratio < 0.05 {
        gaps.push(Gap {
            kind: "coverage".to_string(),
            severity: GapSeverity::High,
            description: format!(
                "only {} of {} candidate memories consulted",
                coverage.used, coverage.total
            ),
        });
    }
    if thought_count < 3 {
        gaps.push(Gap {
            kind: "thoughts".to_string(),
            severity: GapSeverity::Medium,
            description: format!("{thought_count} supporting thoughts"),
        });
    }
    if query.split_whitespace().count() > 15 && memory_used < 10 {
        gaps.push(Gap {
            kind: "complexity".to_string(),
            severity: GapSeverity::Medium,
            description: "complex question with thin memory support".to_string(),
        });
    }

    gaps
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::schema::Node;

    use super::*;

    fn node(id: &str, weight: f64, activation: f64, tags: &[&str]) -> Node {
        let mut n = Node::new(id, "concept");
        n.weight = weight;
        n.activation = activation;
        n.tags = tags.iter().map(|t| t.to_string()).collect();
        n
    }

    fn ranked(index: usize, id: &str) -> RankedNode {
        RankedNode { index, id: id.to_string(), score: 1.0, via_connection: false }
    }

    fn thought(cycle: u64, content: &str) -> Thought {
        Thought {
            cycle: Some(cycle),
            timestamp: "2026-01-01T00:00:00Z".parse().unwrap(),
            role: "reasoner".to_string(),
            content: content.to_string(),
            goal: None,
            surprise: None,
            instance_id: None,
        }
    }

    fn state_with(nodes: Vec<Node>, is_cluster: bool) -> BrainState {
        BrainState {
            nodes,
            edges: vec![],
            clusters: None,
            cycle_count: 0,
            timestamp: 0,
            run_metadata: None,
            is_cluster,
        }
    }

    #[test]
    fn coverage_ratings() {
        assert_eq!(coverage(7, 10).rating, CoverageRating::Excellent);
        assert_eq!(coverage(5, 10).rating, CoverageRating::Good);
        assert_eq!(coverage(3, 10).rating, CoverageRating::Fair);
        assert_eq!(coverage(1, 10).rating, CoverageRating::Limited);
        assert_eq!(coverage(0, 0).ratio, 0.0);
    }

    #[test]
    fn coherent_thoughts_raise_confidence() {
        let state = state_with(vec![node("a", 0.9, 0.9, &[])], false);
        let used = vec![ranked(0, "a")];

        let argued = thought(1, "because we observed the spike, latency dropped");
        let recited = thought(2, "latency numbers were collected");

        let high = confidence(&state, &used, &[&argued]);
        let lower = confidence(&state, &used, &[&recited]);
        assert!(high.score > lower.score);
    }

    #[test]
    fn consensus_only_for_clusters() {
        let mut a = node("i1:a", 0.5, 0.5, &[]);
        a.instance_id = Some("i1".to_string());
        let mut b = node("i2:b", 0.5, 0.5, &[]);
        b.instance_id = Some("i2".to_string());
        let solo_state = state_with(vec![a.clone(), b.clone()], false);
        let cluster_state = state_with(vec![a, b], true);
        let used = vec![ranked(0, "i1:a"), ranked(1, "i2:b")];

        assert!(analyze_evidence(&solo_state, &used, &[], "q").consensus.is_none());
        let report = analyze_evidence(&cluster_state, &used, &[], "q");
        let consensus = report.consensus.unwrap();
        assert!((consensus.participation - 1.0).abs() < 1e-9);
        // Perfectly balanced counts ⇒ zero variance penalty.
        assert!((consensus.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn temporal_distribution_labels() {
        let recent: Vec<Thought> = (0..10).map(|i| thought(90 + i, "x")).collect();
        let refs: Vec<&Thought> = recent.iter().collect();
        let t = temporal(&refs);
        assert_eq!(t.distribution, CycleDistribution::RecentHeavy);

        let spread: Vec<Thought> = vec![thought(1, "x"), thought(50, "x"), thought(100, "x")];
        let refs: Vec<&Thought> = spread.iter().collect();
        assert_eq!(temporal(&refs).distribution, CycleDistribution::Even);
    }

    #[test]
    fn gap_rules_fire() {
        let state = state_with(vec![node("a", 0.5, 0.5, &[]); 100], false);
        let sparse = vec![thought(0, "x"), thought(50, "y")];
        let refs: Vec<&Thought> = sparse.iter().collect();
        let report = analyze_evidence(&state, &[ranked(0, "a")], &refs, "short query");

        let kinds: Vec<&str> = report.gaps.iter().map(|g| g.kind.as_str()).collect();
        assert!(kinds.contains(&"temporal"));
        assert!(kinds.contains(&"coverage"));
        assert!(kinds.contains(&"thoughts"));
    }
}
