//! Single-level Louvain community detection plus the two refinement passes
//! (merge undersized communities, bisect oversized ones).
//!
//! Visit order is randomized each iteration; callers pass a seedable RNG so
//! tests stay reproducible while production uses entropy.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use super::graph::PartitionGraph;

const MAX_ITERATIONS: usize = 20;
const GAIN_EPSILON: f64 = 1e-10;

/// One pass of modularity optimization. Returns communities as lists of
/// graph indices; singleton nodes without edges still form communities.
pub fn detect_communities<R: Rng>(graph: &PartitionGraph, rng: &mut R) -> Vec<Vec<usize>> {
    let n = graph.len();
    if n == 0 {
        return Vec::new();
    }

    let two_m = 2.0 * graph.total_weight();
    let mut assignment: Vec<usize> = (0..n).collect();
    // Total degree per community, including the member itself.
    let mut community_degree: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();

    if two_m > 0.0 {
        let mut order: Vec<usize> = (0..n).collect();
        for iteration in 0..MAX_ITERATIONS {
            order.shuffle(rng);
            let mut moved = 0usize;

            for &node in &order {
                let current = assignment[node];
                let k = graph.degree(node);
                let links = graph.weights_to_communities(node, &assignment);

                // Detach before comparing so the node's own degree never
                // biases its home community.
                community_degree[current] -= k;
                let link_current = links.get(&current).copied().unwrap_or(0.0);
                let stay_gain =
                    link_current - k * community_degree[current] / two_m;

                let mut best_community = current;
                let mut best_gain = stay_gain;
                for (&candidate, &link) in &links {
                    if candidate == current {
                        continue;
                    }
                    let gain = link - k * community_degree[candidate] / two_m;
                    if gain > best_gain + GAIN_EPSILON {
                        best_gain = gain;
                        best_community = candidate;
                    }
                }

                community_degree[best_community] += k;
                if best_community != current {
                    assignment[node] = best_community;
                    moved += 1;
                }
            }

            if moved == 0 {
                debug!(iteration, "louvain converged");
                break;
            }
        }
    }

    collect_communities(&assignment)
}

fn collect_communities(assignment: &[usize]) -> Vec<Vec<usize>> {
    let mut by_label: HashMap<usize, Vec<usize>> = HashMap::new();
    for (node, &label) in assignment.iter().enumerate() {
        by_label.entry(label).or_default().push(node);
    }
    let mut communities: Vec<Vec<usize>> = by_label.into_values().collect();
    // Deterministic order regardless of label values.
    communities.sort_by_key(|members| members[0]);
    communities
}

/// Absorb every community smaller than `min_size` into its most strongly
/// connected neighbor (by summed inter-community edge weight). The scan
/// restarts after each merge; empty communities are removed.
pub fn merge_small_communities(
    mut communities: Vec<Vec<usize>>,
    graph: &PartitionGraph,
    min_size: usize,
) -> Vec<Vec<usize>> {
    while communities.len() > 1 {
        let Some((small_idx, target_idx)) = find_merge(&communities, graph, min_size) else {
            break;
        };
        let absorbed = communities.remove(small_idx);
        let target_idx = if target_idx > small_idx {
            target_idx - 1
        } else {
            target_idx
        };
        communities[target_idx].extend(absorbed);
        communities.retain(|c| !c.is_empty());
    }
    communities
}

/// Locate the next undersized community and its merge target.
fn find_merge(
    communities: &[Vec<usize>],
    graph: &PartitionGraph,
    min_size: usize,
) -> Option<(usize, usize)> {
    let mut membership: HashMap<usize, usize> = HashMap::new();
    for (community_idx, community) in communities.iter().enumerate() {
        for &node in community {
            membership.insert(node, community_idx);
        }
    }

    for (small_idx, members) in communities.iter().enumerate() {
        if members.len() >= min_size {
            continue;
        }

        let mut strength: HashMap<usize, f64> = HashMap::new();
        for &node in members {
            for (neighbor, weight) in graph.neighbors(node) {
                let target = membership[&neighbor];
                if target != small_idx {
                    *strength.entry(target).or_insert(0.0) += weight;
                }
            }
        }

        let target = strength
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(idx, _)| idx)
            // Isolated small community: fold into the largest other one.
            .or_else(|| {
                communities
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != small_idx)
                    .max_by_key(|(_, c)| c.len())
                    .map(|(idx, _)| idx)
            });
        if let Some(target_idx) = target {
            return Some((small_idx, target_idx));
        }
    }
    None
}

/// Bisect any community above `max_size` with a balanced greedy split:
/// seeds are the first and middle member, the rest go to the group with the
/// higher edge-weight affinity minus a `0.1·|group|` balancing penalty.
pub fn split_oversize_communities(
    communities: Vec<Vec<usize>>,
    graph: &PartitionGraph,
    max_size: usize,
) -> Vec<Vec<usize>> {
    let mut queue = communities;
    let mut done: Vec<Vec<usize>> = Vec::new();

    while let Some(members) = queue.pop() {
        if members.len() <= max_size || members.len() < 2 {
            done.push(members);
            continue;
        }

        let mut group_a = vec![members[0]];
        let mut group_b = vec![members[members.len() / 2]];
        for &node in &members {
            if node == group_a[0] || node == group_b[0] {
                continue;
            }
            let affinity_a =
                graph.weight_to_members(node, &group_a) - 0.1 * group_a.len() as f64;
            let affinity_b =
                graph.weight_to_members(node, &group_b) - 0.1 * group_b.len() as f64;
            if affinity_a >= affinity_b {
                group_a.push(node);
            } else {
                group_b.push(node);
            }
        }

        // A degenerate split cannot shrink; stop rather than loop.
        if group_a.is_empty() || group_b.is_empty() {
            done.push(members);
            continue;
        }
        queue.push(group_a);
        queue.push(group_b);
    }

    done.sort_by_key(|members| members.first().copied().unwrap_or(usize::MAX));
    done
}

// ── Tests ─────────────────────────────────────────────────────────────────────
