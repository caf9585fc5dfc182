//! Compressed adjacency structures for particle and partitioning graphs.

use crate::jagged::Jagged;
use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator;

/// Node and edge weight type.
pub type Weight = i64;

/// Per-node adjacency lists, compressed.
///
/// Bucket `i` holds the ids adjacent to node `i`, sorted in ascending order.
/// Symmetry is not enforced: with per-particle search radii a node may list a
/// neighbor that does not list it back.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    lists: Jagged<u32>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            lists: Jagged::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.lists.len()
    }

    pub fn neighbors(&self, node: usize) -> &[u32] {
        self.lists.bucket(node)
    }

    pub fn clear(&mut self) {
        self.lists.clear();
    }

    pub fn push_node<I>(&mut self, neighbors: I)
    where
        I: IntoIterator<Item = u32>,
    {
        self.lists.push_bucket(neighbors);
    }

    /// Unique unordered edges, as `(a, b)` pairs with `a < b`.
    ///
    /// Each pair is read off the smaller endpoint's list, so a pair appears
    /// exactly once as long as containment is symmetric.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.num_nodes()).flat_map(move |a| {
            self.neighbors(a)
                .iter()
                .filter(move |&&b| a < b as usize)
                .map(move |&b| (a as u32, b))
        })
    }

    /// Parallel version of [`edges`](Self::edges).
    pub fn par_edges(&self) -> impl ParallelIterator<Item = (u32, u32)> + Clone + '_ {
        (0..self.num_nodes()).into_par_iter().flat_map_iter(move |a| {
            self.neighbors(a)
                .iter()
                .filter(move |&&b| a < b as usize)
                .map(move |&b| (a as u32, b))
        })
    }

    pub fn num_edges(&self) -> usize {
        self.edges().count()
    }
}

/// A weighted graph in compressed-row form.
///
/// Adjacency must be symmetric with equal edge weights in both directions,
/// without self-loops or duplicates. These invariants are only checked in
/// debug builds; [`append_node`](Self::append_node) trusts its caller.
#[derive(Debug, Clone)]
pub struct WeightedGraph {
    offsets: Vec<usize>,
    neighbors: Vec<usize>,
    edge_weights: Vec<Weight>,
    node_weights: Vec<Weight>,
}

impl Default for WeightedGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightedGraph {
    pub fn new() -> Self {
        Self {
            offsets: vec![0],
            neighbors: Vec::new(),
            edge_weights: Vec::new(),
            node_weights: Vec::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.node_weights.len()
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        debug_assert_eq!(self.neighbors.len() % 2, 0);
        self.neighbors.len() / 2
    }

    pub fn nodes(&self) -> std::ops::Range<usize> {
        0..self.num_nodes()
    }

    pub fn node_weight(&self, node: usize) -> Weight {
        self.node_weights[node]
    }

    pub fn node_weights(&self) -> &[Weight] {
        &self.node_weights
    }

    pub fn total_node_weight(&self) -> Weight {
        self.node_weights.iter().sum()
    }

    pub fn degree(&self, node: usize) -> usize {
        self.offsets[node + 1] - self.offsets[node]
    }

    /// Total weight of the edges incident to `node`.
    pub fn weighted_degree(&self, node: usize) -> Weight {
        self.edge_weights[self.offsets[node]..self.offsets[node + 1]]
            .iter()
            .sum()
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.neighbors[self.offsets[node]..self.offsets[node + 1]]
    }

    /// Weighted edges incident to `node`, as `(neighbor, weight)` pairs.
    pub fn wedges_of(&self, node: usize) -> impl Iterator<Item = (usize, Weight)> + '_ {
        let range = self.offsets[node]..self.offsets[node + 1];
        self.neighbors[range.clone()]
            .iter()
            .copied()
            .zip(self.edge_weights[range].iter().copied())
    }

    /// Unique weighted edges, as `(a, b, weight)` with `a < b`.
    pub fn wedges(&self) -> impl Iterator<Item = (usize, usize, Weight)> + '_ {
        self.nodes().flat_map(move |a| {
            self.wedges_of(a)
                .filter(move |&(b, _)| a < b)
                .map(move |(b, w)| (a, b, w))
        })
    }

    pub fn clear(&mut self) {
        self.offsets.truncate(1);
        self.neighbors.clear();
        self.edge_weights.clear();
        self.node_weights.clear();
    }

    /// Append one node with its weighted neighbor list, in the given order.
    pub fn append_node<I>(&mut self, weight: Weight, neighbors: I)
    where
        I: IntoIterator<Item = (usize, Weight)>,
    {
        debug_assert!(weight > 0, "node weights must be positive");
        let node = self.num_nodes();
        for (neighbor, edge_weight) in neighbors {
            debug_assert_ne!(neighbor, node, "self-loops are not allowed");
            debug_assert!(edge_weight > 0, "edge weights must be positive");
            self.neighbors.push(neighbor);
            self.edge_weights.push(edge_weight);
        }
        self.offsets.push(self.neighbors.len());
        self.node_weights.push(weight);
    }

    /// Build a unit-weight graph from undirected edges.
    ///
    /// Duplicate pairs are merged; both orientations are stored.
    pub fn from_unit_edges(num_nodes: usize, edges: &[(u32, u32)]) -> Self {
        let weighted: Vec<(usize, usize, Weight)> = edges
            .iter()
            .map(|&(a, b)| (a as usize, b as usize, 1))
            .collect();
        Self::from_edges(num_nodes, &weighted)
    }

    /// Build a graph with unit node weights from weighted undirected edges.
    pub fn from_edges(num_nodes: usize, edges: &[(usize, usize, Weight)]) -> Self {
        let mut directed: Vec<(usize, usize, Weight)> = Vec::with_capacity(2 * edges.len());
        for &(a, b, w) in edges {
            debug_assert_ne!(a, b);
            let (a, b) = (usize::min(a, b), usize::max(a, b));
            directed.push((a, b, w));
            directed.push((b, a, w));
        }
        directed.sort_unstable();
        directed.dedup_by_key(|&mut (a, b, _)| (a, b));

        let mut graph = Self::new();
        graph.offsets.reserve(num_nodes);
        graph.neighbors.reserve(directed.len());
        graph.edge_weights.reserve(directed.len());
        let mut cursor = 0;
        for node in 0..num_nodes {
            while cursor < directed.len() && directed[cursor].0 == node {
                let (_, neighbor, w) = directed[cursor];
                graph.neighbors.push(neighbor);
                graph.edge_weights.push(w);
                cursor += 1;
            }
            graph.offsets.push(graph.neighbors.len());
            graph.node_weights.push(1);
        }
        graph
    }

    /// Whether every directed edge has a mirror with the same weight.
    pub fn is_symmetric(&self) -> bool {
        self.nodes().all(|a| {
            self.wedges_of(a)
                .all(|(b, w)| self.wedges_of(b).any(|(c, v)| c == a && v == w))
        })
    }
}

/// Total weight of the edges whose endpoints lie in different parts.
pub fn cut_size(graph: &WeightedGraph, part_ids: &[usize]) -> Weight {
    debug_assert_eq!(graph.num_nodes(), part_ids.len());
    graph
        .wedges()
        .filter(|&(a, b, _)| part_ids[a] != part_ids[b])
        .map(|(_, _, w)| w)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(n: usize) -> WeightedGraph {
        let edges: Vec<(usize, usize, Weight)> = (1..n).map(|i| (i - 1, i, 1)).collect();
        WeightedGraph::from_edges(n, &edges)
    }

    #[test]
    fn test_adjacency_edges() {
        let mut graph = Graph::new();
        graph.push_node([1, 2]);
        graph.push_node([0, 2]);
        graph.push_node([0, 1]);
        let edges: Vec<_> = graph.edges().collect();
        assert_eq!(edges, [(0, 1), (0, 2), (1, 2)]);
        assert_eq!(graph.num_edges(), 3);

        let mut par_edges: Vec<_> = graph.par_edges().collect();
        par_edges.sort_unstable();
        assert_eq!(par_edges, edges);
    }

    #[test]
    fn test_append_node_round_trip() {
        let mut graph = WeightedGraph::new();
        graph.append_node(2, [(1, 3)]);
        graph.append_node(1, [(0, 3), (2, 1)]);
        graph.append_node(1, [(1, 1)]);
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.num_edges(), 2);
        assert_eq!(graph.total_node_weight(), 4);
        assert_eq!(graph.weighted_degree(1), 4);
        assert!(graph.is_symmetric());
        let wedges: Vec<_> = graph.wedges().collect();
        assert_eq!(wedges, [(0, 1, 3), (1, 2, 1)]);
    }

    #[test]
    fn test_from_edges_sorts_and_dedups() {
        let graph = WeightedGraph::from_edges(4, &[(2, 0, 1), (0, 1, 5), (1, 0, 5), (3, 2, 2)]);
        assert_eq!(graph.num_edges(), 3);
        assert_eq!(graph.neighbors(0), &[1, 2]);
        assert_eq!(graph.wedges_of(0).collect::<Vec<_>>(), [(1, 5), (2, 1)]);
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_edge_count_is_half_degree_sum() {
        let graph = path(10);
        let degree_sum: usize = graph.nodes().map(|a| graph.degree(a)).sum();
        assert_eq!(graph.num_edges(), degree_sum / 2);
    }

    #[test]
    fn test_cut_size() {
        let graph = path(4);
        assert_eq!(cut_size(&graph, &[0, 0, 1, 1]), 1);
        assert_eq!(cut_size(&graph, &[0, 1, 0, 1]), 3);
        assert_eq!(cut_size(&graph, &[0, 0, 0, 0]), 0);
    }
}
