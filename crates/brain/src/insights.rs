//! Offline insight synthesis over the thought stream and node set: recurring
//! themes, concept evolutions, concept clusters, breakthrough detection, and
//! cross-instance agreement.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::schema::{BrainState, Node, Thought};

const MIN_CLUSTER_SIZE: usize = 3;
const MIN_THEME_OCCURRENCES: usize = 3;

const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "because", "being", "below", "between", "could",
    "doing", "during", "every", "further", "having", "might", "other", "should",
    "since", "their", "there", "these", "thing", "things", "think", "those",
    "through", "under", "until", "where", "which", "while", "would",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThemePattern {
    pub theme: String,
    pub occurrences: usize,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize)]
pub struct Evolution {
    pub early_excerpt: String,
    pub late_excerpt: String,
    pub significance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConceptCluster {
    pub node_ids: Vec<String>,
    pub central_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Breakthrough {
    pub source: String,
    pub excerpt: String,
    pub strength: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceAgreement {
    pub instance_a: String,
    pub instance_b: String,
    pub tag_similarity: f64,
    pub summary: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InsightReport {
    pub themes: Vec<ThemePattern>,
    pub evolutions: Vec<Evolution>,
    pub clusters: Vec<ConceptCluster>,
    pub breakthroughs: Vec<Breakthrough>,
    pub cross_instance: Vec<InstanceAgreement>,
}

pub fn synthesize_insights(state: &BrainState, thoughts: &[Thought]) -> InsightReport {
    let mut sorted: Vec<&Thought> = thoughts.iter().collect();
    sorted.sort_by_key(|t| t.cycle.unwrap_or(0));

    InsightReport {
        themes: temporal_patterns(&sorted),
        evolutions: evolutions(&sorted),
        clusters: concept_clusters(&state.nodes),
        breakthroughs: breakthroughs(&state.nodes, &sorted),
        cross_instance: cross_instance(state),
    }
}

// ── temporal patterns ─────────────────────────────────────────────────────────

fn temporal_patterns(sorted: &[&Thought]) -> Vec<ThemePattern> {
    // theme → cycles where it occurred, in stream order.
    let mut occurrences: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    for thought in sorted {
        let cycle = thought.cycle.unwrap_or(0);
        let mut seen_here: BTreeSet<String> = BTreeSet::new();
        for token in meaningful_tokens(&thought.content) {
            if seen_here.insert(token.clone()) {
                occurrences.entry(token).or_default().push(cycle);
            }
        }
    }

    let mut themes: Vec<ThemePattern> = occurrences
        .into_iter()
        .filter(|(_, cycles)| cycles.len() >= MIN_THEME_OCCURRENCES)
        .map(|(theme, cycles)| {
            let occurrences = cycles.len();
            ThemePattern { theme, occurrences, trend: trend_from_gaps(&cycles) }
        })
        .collect();
    themes.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then_with(|| a.theme.cmp(&b.theme)));
    themes
}

/// Trend from the spacing between consecutive occurrences: shrinking gaps in
/// the later half mean the theme is accelerating.
fn trend_from_gaps(cycles: &[u64]) -> Trend {
    let gaps: Vec<f64> = cycles
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]) as f64)
        .collect();
    if gaps.len() < 2 {
        return Trend::Stable;
    }
    let overall = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let half = gaps.len() / 2;
    let late = &gaps[half..];
    let late_mean = late.iter().sum::<f64>() / late.len() as f64;
    if overall == 0.0 {
        return Trend::Stable;
    }
    if late_mean < 0.7 * overall {
        Trend::Increasing
    } else if late_mean > 1.3 * overall {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

// ── evolutions ────────────────────────────────────────────────────────────────

const EVOLUTION_MARKERS: &[&str] = &[
    "initially", "originally", "at first", "now", "evolved", "shifted",
    "changed", "revised", "no longer",
];

/// Compare the three earliest thoughts against the three latest; flag an
/// evolution when either window carries explicit change markers.
fn evolutions(sorted: &[&Thought]) -> Vec<Evolution> {
    if sorted.len() < 6 {
        return Vec::new();
    }
    let early: String = sorted[..3]
        .iter()
        .map(|t| t.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let late: String = sorted[sorted.len() - 3..]
        .iter()
        .map(|t| t.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let early_lower = early.to_lowercase();
    let late_lower = late.to_lowercase();
    let marked = EVOLUTION_MARKERS
        .iter()
        .any(|m| early_lower.contains(m) || late_lower.contains(m));
    if !marked {
        return Vec::new();
    }

    vec![Evolution {
        early_excerpt: excerpt(&early, 200),
        late_excerpt: excerpt(&late, 200),
        significance: 0.7,
    }]
}

// ── concept clusters ──────────────────────────────────────────────────────────

/// Greedy agglomeration: a node joins the first cluster whose seed it
/// resembles (`0.6·tagJaccard + 0.4·wordJaccard ≥ 0.6`).
fn concept_clusters(nodes: &[Node]) -> Vec<ConceptCluster> {
    struct Bucket {
        seed_tags: BTreeSet<String>,
        seed_words: BTreeSet<String>,
        member_indices: Vec<usize>,
    }

    let mut buckets: Vec<Bucket> = Vec::new();
    for (index, node) in nodes.iter().enumerate() {
        let words: BTreeSet<String> = concept_words(&node.concept);
        let mut placed = false;
        for bucket in &mut buckets {
            let sim = 0.6 * jaccard(&node.tags, &bucket.seed_tags)
                + 0.4 * jaccard(&words, &bucket.seed_words);
            if sim >= 0.6 {
                bucket.member_indices.push(index);
                placed = true;
                break;
            }
        }
        if !placed {
            buckets.push(Bucket {
                seed_tags: node.tags.clone(),
                seed_words: words,
                member_indices: vec![index],
            });
        }
    }

    buckets
        .into_iter()
        .filter(|b| b.member_indices.len() >= MIN_CLUSTER_SIZE)
        .map(|bucket| {
            let mut term_counts: HashMap<String, usize> = HashMap::new();
            for &index in &bucket.member_indices {
                for word in concept_words(&nodes[index].concept) {
                    *term_counts.entry(word).or_default() += 1;
                }
            }
            let mut terms: Vec<(String, usize)> = term_counts.into_iter().collect();
            terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            ConceptCluster {
                node_ids: bucket
                    .member_indices
                    .iter()
                    .map(|&i| nodes[i].id.clone())
                    .collect(),
                central_terms: terms.into_iter().take(3).map(|(t, _)| t).collect(),
            }
        })
        .collect()
}

// ── breakthroughs ─────────────────────────────────────────────────────────────

fn breakthrough_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"breakthrough|discovery|insight").expect("static pattern compiles")
    })
}

fn breakthrough_thought_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(breakthrough|discovered|realized|found|aha|eureka|insight)\b")
            .expect("static pattern compiles")
    })
}

fn breakthroughs(nodes: &[Node], sorted_thoughts: &[&Thought]) -> Vec<Breakthrough> {
    let mut out: Vec<Breakthrough> = nodes
        .iter()
        .filter(|n| {
            n.tags.iter().any(|t| breakthrough_tag_re().is_match(t))
                && n.activation * n.weight >= 0.75
        })
        .map(|n| Breakthrough {
            source: format!("node:{}", n.id),
            excerpt: excerpt(&n.concept, 200),
            strength: n.activation * n.weight,
        })
        .collect();

    out.extend(
        sorted_thoughts
            .iter()
            .filter(|t| breakthrough_thought_re().is_match(&t.content))
            .map(|t| Breakthrough {
                source: format!("cycle:{}", t.cycle.unwrap_or(0)),
                excerpt: excerpt(&t.content, 200),
                strength: 1.0 + t.surprise.unwrap_or(0.0),
            }),
    );
    out.sort_by(|a, b| b.strength.total_cmp(&a.strength).then_with(|| a.source.cmp(&b.source)));
    out
}

// ── cross-instance agreement ──────────────────────────────────────────────────

fn cross_instance(state: &BrainState) -> Vec<InstanceAgreement> {
    let mut tags_by_instance: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for node in &state.nodes {
        if let Some(instance) = node.instance_id.as_deref() {
            tags_by_instance
                .entry(instance)
                .or_default()
                .extend(node.tags.iter().cloned());
        }
    }

    let instances: Vec<&str> = tags_by_instance.keys().copied().collect();
    let mut out = Vec::new();
    for (i, a) in instances.iter().enumerate() {
        for b in &instances[i + 1..] {
            let sim = jaccard(&tags_by_instance[a], &tags_by_instance[b]);
            let summary = if sim > 0.7 {
                "High overlap in focus areas"
            } else if sim > 0.4 {
                "Moderate overlap in focus areas"
            } else {
                "Significant divergence between instances"
            };
            out.push(InstanceAgreement {
                instance_a: a.to_string(),
                instance_b: b.to_string(),
                tag_similarity: sim,
                summary: summary.to_string(),
            });
        }
    }
    out
}

// ── helpers ───────────────────────────────────────────────────────────────────

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn meaningful_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 4)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn concept_words(concept: &str) -> BTreeSet<String> {
    concept
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let cut: String = chars.into_iter().take(max_chars).collect();
    format!("{cut}…")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

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

    fn node(id: &str, concept: &str, tags: &[&str], weight: f64, activation: f64) -> Node {
        let mut n = Node::new(id, concept);
        n.tags = tags.iter().map(|t| t.to_string()).collect();
        n.weight = weight;
        n.activation = activation;
        n
    }

    fn empty_state(nodes: Vec<Node>) -> BrainState {
        BrainState {
            nodes,
            edges: vec![],
            clusters: None,
            cycle_count: 0,
            timestamp: 0,
            run_metadata: None,
            is_cluster: false,
        }
    }

    #[test]
    fn recurring_theme_detected_with_accelerating_trend() {
        let thoughts: Vec<Thought> = vec![
            thought(0, "memory consolidation starts"),
            thought(20, "memory consolidation again"),
            thought(24, "memory consolidation continues"),
            thought(26, "memory consolidation accelerating"),
        ];
        let report = synthesize_insights(&empty_state(vec![]), &thoughts);
        let theme = report
            .themes
            .iter()
            .find(|t| t.theme == "consolidation")
            .expect("theme present");
        assert_eq!(theme.occurrences, 4);
        assert_eq!(theme.trend, Trend::Increasing);
    }

    #[test]
    fn rare_tokens_do_not_become_themes() {
        let thoughts = vec![thought(0, "singular mention of quasars")];
        let report = synthesize_insights(&empty_state(vec![]), &thoughts);
        assert!(report.themes.is_empty());
    }

    #[test]
    fn evolution_requires_markers_and_six_thoughts() {
        let mut thoughts: Vec<Thought> = (0..6)
            .map(|i| thought(i, "plain observation without markers"))
            .collect();
        assert!(synthesize_insights(&empty_state(vec![]), &thoughts)
            .evolutions
            .is_empty());

        thoughts[5] = thought(5, "the approach has now shifted toward streaming");
        let report = synthesize_insights(&empty_state(vec![]), &thoughts);
        assert_eq!(report.evolutions.len(), 1);
        assert!((report.evolutions[0].significance - 0.7).abs() < 1e-9);
    }

    #[test]
    fn clusters_form_from_shared_tags_and_words() {
        let nodes = vec![
            node("a", "cache eviction policy", &["storage"], 0.5, 0.5),
            node("b", "cache eviction tuning", &["storage"], 0.5, 0.5),
            node("c", "cache eviction metrics", &["storage"], 0.5, 0.5),
            node("d", "unrelated botany topic", &["plants"], 0.5, 0.5),
        ];
        let report = synthesize_insights(&empty_state(nodes), &[]);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].node_ids.len(), 3);
        assert!(report.clusters[0]
            .central_terms
            .contains(&"cache".to_string()));
    }

    #[test]
    fn breakthroughs_from_tags_and_thought_text() {
        let nodes = vec![
            node("strong", "big leap", &["breakthrough"], 0.9, 0.9),
            node("weak", "small step", &["breakthrough"], 0.3, 0.3),
        ];
        let thoughts = vec![thought(7, "we finally discovered the root cause")];
        let report = synthesize_insights(&empty_state(nodes), &thoughts);
        let sources: Vec<&str> = report.breakthroughs.iter().map(|b| b.source.as_str()).collect();
        assert!(sources.contains(&"node:strong"));
        assert!(sources.contains(&"cycle:7"));
        assert!(!sources.contains(&"node:weak"));
    }

    #[test]
    fn cross_instance_divergence_labeled() {
        let mut a = node("i1:a", "x", &["alpha", "beta"], 0.5, 0.5);
        a.instance_id = Some("i1".to_string());
        let mut b = node("i2:b", "y", &["gamma"], 0.5, 0.5);
        b.instance_id = Some("i2".to_string());
        let report = synthesize_insights(&empty_state(vec![a, b]), &[]);
        assert_eq!(report.cross_instance.len(), 1);
        assert!(report.cross_instance[0].summary.contains("divergence"));
    }
}
