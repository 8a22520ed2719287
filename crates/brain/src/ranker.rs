//! Hybrid semantic + keyword ranking over the node and thought sets.
//!
//! Scoring model per candidate node:
//! ```text
//! semantic = 100 · cosine(queryVec, nodeVec)            (0 when either absent)
//! keyword  = verbatim(+50) + Σ token_rank·3             (capped at 100)
//! base     = 0.7·semantic + 0.3·keyword                 (keyword-only without a query vector)
//! score    = base · (0.5 + activation·weight) · tag_multiplier · provenance_boost
//! ```
//! Meta content (dreams, reasoning traces, introspection) is excluded before
//! scoring and stays excluded no matter what it would have scored.

use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use crate::embedding_cache::{EmbeddingCache, thought_key};
use crate::schema::{BrainState, Thought};

/// Tags whose presence excludes a node from retrieval entirely.
const META_TAGS: &[&str] = &["dream", "reasoning", "introspection"];

/// Concept prefixes with the same effect as the meta tags.
const META_PREFIXES: &[&str] = &["[DREAM]", "[REASONING]"];

/// Multiplicative tag reweighting. Applied as a product over every entry
/// present in the node's tag set, so tag order never matters.
const TAG_WEIGHTS: &[(&str, f64)] = &[
    ("agent_finding", 1.5),
    ("discovery", 1.5),
    ("breakthrough", 1.6),
    ("research", 1.4),
    ("analysis", 1.3),
    ("synthesis", 1.3),
    ("finding", 1.4),
    ("evidence", 1.3),
    ("agent_insight", 0.6),
    ("summary", 0.7),
    ("consolidated", 0.7),
    ("coordinator", 0.6),
    ("meta", 0.5),
    ("process", 0.6),
];

#[derive(Debug, Clone)]
pub struct RankOptions {
    pub limit: usize,
    pub include_connected: bool,
    /// Deep mode widens the connected-expansion cap to 100.
    pub deep: bool,
    pub filter_tags: Option<BTreeSet<String>>,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            include_connected: false,
            deep: false,
            filter_tags: None,
        }
    }
}

/// A scored node, referenced by index into the state's node arena.
#[derive(Debug, Clone)]
pub struct RankedNode {
    pub index: usize,
    pub id: String,
    pub score: f64,
    /// Added by connected expansion rather than direct scoring.
    pub via_connection: bool,
}

#[derive(Debug, Clone)]
pub struct RankedThought {
    pub index: usize,
    pub score: f64,
}

/// Rank the brain's nodes against `query`.
///
/// Deterministic given the state, query and embedder output: ties are broken
/// by ascending node id.
pub fn rank_nodes(
    state: &BrainState,
    query: &str,
    query_vec: Option<&[f32]>,
    cache: &EmbeddingCache,
    options: &RankOptions,
) -> Vec<RankedNode> {
    let query_lower = query.to_lowercase();
    let tokens = query_tokens(&query_lower);

    let mut scored: Vec<RankedNode> = state
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| !is_meta(node))
        .map(|(index, node)| {
            let node_vec = node
                .embedding
                .as_deref()
                .or_else(|| cache.node_vector(&node.id));
            let semantic = match (query_vec, node_vec) {
                (Some(q), Some(n)) if q.len() == n.len() => 100.0 * cosine(q, n),
                _ => 0.0,
            };
            let concept_lower = node.concept.to_lowercase();
            let keyword = keyword_score(&concept_lower, &query_lower, &tokens);

            let base = if query_vec.is_some() {
                0.7 * semantic + 0.3 * keyword
            } else {
                keyword
            };
            let importance = 0.5 + node.activation * node.weight;
            let score = base * importance * tag_multiplier(node) * provenance_boost(node);

            trace!(id = %node.id, semantic, keyword, score, "scored node");
            RankedNode { index, id: node.id.clone(), score, via_connection: false }
        })
        .collect();

    if let Some(filter) = &options.filter_tags {
        scored.retain(|ranked| {
            state.nodes[ranked.index]
                .tags
                .iter()
                .any(|t| filter.contains(t))
        });
    }

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(options.limit);

    if options.include_connected && !scored.is_empty() {
        expand_connected(state, &mut scored, options.deep);
    }

    scored
}

/// Edge-neighbor expansion over the strongest direct hits.
fn expand_connected(state: &BrainState, results: &mut Vec<RankedNode>, deep: bool) {
    let top_count = ((results.len() as f64 * 0.1).ceil() as usize)
        .clamp(10, 50)
        .min(results.len());
    let cap = if deep {
        100
    } else {
        15usize.max((top_count as f64 * 0.5).ceil() as usize)
    };

    let index_by_id = state.node_index();
    let mut adjacency: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
    for edge in &state.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push((edge.target.as_str(), edge.weight));
        adjacency
            .entry(edge.target.as_str())
            .or_default()
            .push((edge.source.as_str(), edge.weight));
    }

    let mut present: BTreeSet<&str> = BTreeSet::new();
    let seen: Vec<String> = results.iter().map(|r| r.id.clone()).collect();
    for id in &seen {
        present.insert(id.as_str());
    }

    let mut added: Vec<RankedNode> = Vec::new();
    'outer: for ranked in results.iter().take(top_count) {
        let Some(neighbors) = adjacency.get(ranked.id.as_str()) else {
            continue;
        };
        let mut neighbors = neighbors.clone();
        neighbors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (neighbor_id, _) in neighbors {
            if added.len() >= cap {
                break 'outer;
            }
            if present.contains(neighbor_id) {
                continue;
            }
            let Some(&index) = index_by_id.get(neighbor_id) else {
                continue;
            };
            if is_meta(&state.nodes[index]) {
                continue;
            }
            present.insert(neighbor_id);
            added.push(RankedNode {
                index,
                id: neighbor_id.to_string(),
                score: 0.0,
                via_connection: true,
            });
        }
    }
    results.extend(added);
}

/// Rank thoughts with the same hybrid scheme.
///
/// Keyword weights: +15 per token hit in the body, +10 per token hit in the
/// goal, +30 for a full-phrase body match, total capped at 100; the final
/// score is multiplied by `1 + surprise`.
pub fn rank_thoughts(
    thoughts: &[Thought],
    query: &str,
    query_vec: Option<&[f32]>,
    cache: &EmbeddingCache,
    limit: usize,
) -> Vec<RankedThought> {
    let query_lower = query.to_lowercase();
    let tokens = query_tokens(&query_lower);

    let mut scored: Vec<(RankedThought, u64)> = thoughts
        .iter()
        .enumerate()
        .map(|(index, thought)| {
            let content_lower = thought.content.to_lowercase();
            let goal_lower = thought.goal.as_deref().map(str::to_lowercase);

            let mut keyword = 0.0f64;
            for token in &tokens {
                if content_lower.contains(token.as_str()) {
                    keyword += 15.0;
                }
                if goal_lower.as_deref().is_some_and(|g| g.contains(token.as_str())) {
                    keyword += 10.0;
                }
            }
            if !query_lower.is_empty() && content_lower.contains(&query_lower) {
                keyword += 30.0;
            }
            keyword = keyword.min(100.0);

            let semantic = match (query_vec, cache.thought_vector(&thought_key(thought))) {
                (Some(q), Some(t)) if q.len() == t.len() => 100.0 * cosine(q, t),
                _ => 0.0,
            };
            let base = if query_vec.is_some() {
                0.7 * semantic + 0.3 * keyword
            } else {
                keyword
            };
            let score = base * (1.0 + thought.surprise.unwrap_or(0.0));
            (RankedThought { index, score }, thought.cycle.unwrap_or(0))
        })
        .collect();

    scored.sort_by(|(a, cycle_a), (b, cycle_b)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| cycle_a.cmp(cycle_b))
    });
    scored.truncate(limit);
    scored.into_iter().map(|(ranked, _)| ranked).collect()
}

// ── scoring pieces ────────────────────────────────────────────────────────────

pub(crate) fn is_meta(node: &crate::schema::Node) -> bool {
    if META_TAGS.iter().any(|t| node.has_tag(t)) {
        return true;
    }
    META_PREFIXES.iter().any(|p| node.concept.starts_with(p))
}

fn keyword_score(concept_lower: &str, query_lower: &str, tokens: &[String]) -> f64 {
    let mut score = 0.0f64;
    if !query_lower.is_empty() && concept_lower.contains(query_lower) {
        score += 50.0;
    }
    for (rank, token) in tokens.iter().enumerate() {
        if concept_lower.contains(token.as_str()) {
            score += 3.0 * (rank + 1) as f64;
        }
    }
    score.min(100.0)
}

fn tag_multiplier(node: &crate::schema::Node) -> f64 {
    TAG_WEIGHTS
        .iter()
        .filter(|(tag, _)| node.has_tag(tag))
        .map(|(_, weight)| weight)
        .product()
}

fn provenance_boost(node: &crate::schema::Node) -> f64 {
    match &node.source_runs {
        Some(runs) if runs.len() > 1 => 1.0 + 0.15 * (runs.len() - 1) as f64,
        _ => 1.0,
    }
}

fn query_tokens(query_lower: &str) -> Vec<String> {
    query_lower
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(String::from)
        .collect()
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let mag_a: f64 = a.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
