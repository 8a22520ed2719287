//! Index-arena view of the brain graph for partitioning.
//!
//! Nodes are addressed by dense indices, edges by `(index, index, weight)`;
//! duplicate edges are summed and self-loops dropped. Edges referencing
//! unknown ids are skipped and never counted in the totals.

use std::collections::HashMap;

use cerebra_brain::schema::BrainState;

#[derive(Debug)]
pub struct PartitionGraph {
    /// Graph index → node id.
    pub node_ids: Vec<String>,
    /// Graph index → index into `state.nodes`.
    pub state_indices: Vec<usize>,
    /// Graph index → (neighbor graph index, summed weight).
    adjacency: Vec<HashMap<usize, f64>>,
    /// Weighted degree per node.
    degrees: Vec<f64>,
    /// Sum of all edge weights, each undirected edge counted once.
    total_weight: f64,
}

impl PartitionGraph {
    pub fn build(state: &BrainState) -> Self {
        let mut graph = Self {
            node_ids: state.nodes.iter().map(|n| n.id.clone()).collect(),
            state_indices: (0..state.nodes.len()).collect(),
            adjacency: vec![HashMap::new(); state.nodes.len()],
            degrees: vec![0.0; state.nodes.len()],
            total_weight: 0.0,
        };

        let index: HashMap<&str, usize> = graph
            .node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        for edge in &state.edges {
            let (Some(&a), Some(&b)) = (
                index.get(edge.source.as_str()),
                index.get(edge.target.as_str()),
            ) else {
                continue;
            };
            if a == b {
                continue;
            }
            *graph.adjacency[a].entry(b).or_insert(0.0) += edge.weight;
            *graph.adjacency[b].entry(a).or_insert(0.0) += edge.weight;
            graph.degrees[a] += edge.weight;
            graph.degrees[b] += edge.weight;
            graph.total_weight += edge.weight;
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    pub fn degree(&self, node: usize) -> f64 {
        self.degrees[node]
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.adjacency[node].iter().map(|(&n, &w)| (n, w))
    }

    /// Summed weight between `node` and every community in `assignment`.
    pub fn weights_to_communities(
        &self,
        node: usize,
        assignment: &[usize],
    ) -> HashMap<usize, f64> {
        let mut weights: HashMap<usize, f64> = HashMap::new();
        for (neighbor, weight) in self.neighbors(node) {
            *weights.entry(assignment[neighbor]).or_insert(0.0) += weight;
        }
        weights
    }

    /// Summed edge weight between `node` and a set of member indices.
    pub fn weight_to_members(&self, node: usize, members: &[usize]) -> f64 {
        members
            .iter()
            .filter_map(|&m| self.adjacency[node].get(&m))
            .sum()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use cerebra_brain::schema::{Edge, Node};

    use super::*;

    fn state_with_edges(ids: &[&str], edges: &[(&str, &str, f64)]) -> BrainState {
        BrainState {
            nodes: ids.iter().map(|id| Node::new(*id, "c")).collect(),
            edges: edges
                .iter()
                .map(|(s, t, w)| Edge {
                    source: s.to_string(),
                    target: t.to_string(),
                    weight: *w,
                })
                .collect(),
            clusters: None,
            cycle_count: 0,
            timestamp: 0,
            run_metadata: None,
            is_cluster: false,
        }
    }

    #[test]
    fn duplicate_edges_are_summed() {
        let state = state_with_edges(&["a", "b"], &[("a", "b", 0.4), ("b", "a", 0.6)]);
        let graph = PartitionGraph::build(&state);
        assert!((graph.total_weight() - 1.0).abs() < 1e-12);
        assert!((graph.degree(0) - 1.0).abs() < 1e-12);
        let neighbors: Vec<(usize, f64)> = graph.neighbors(0).collect();
        assert_eq!(neighbors.len(), 1);
        assert!((neighbors[0].1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn dangling_and_self_edges_are_skipped() {
        let state = state_with_edges(
            &["a", "b"],
            &[("a", "ghost", 1.0), ("a", "a", 1.0), ("a", "b", 0.5)],
        );
        let graph = PartitionGraph::build(&state);
        assert!((graph.total_weight() - 0.5).abs() < 1e-12);
    }
}
