//! Greedy growing of connected parts, used on the coarsest graph.

use crate::graph::Weight;
use crate::graph::WeightedGraph;
use crate::profile;
use crate::Error;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

const UNASSIGNED: usize = usize::MAX;

/// Grow `part_count` connected parts of balanced weight.
///
/// Parts are grown one at a time from a seed (the unlabeled node of lowest
/// degree, ties going to the heaviest). The frontier node with the highest
/// affinity joins next, where affinity is the edge weight into the part
/// minus the edge weight out of it. When a part's frontier dries up before
/// the part reaches its weight target, a fresh seed keeps it growing, so
/// disconnected graphs are covered too. Nodes left after the last part are
/// attached to the neighboring part with the highest affinity.
///
/// # Example
///
/// ```rust
/// # fn main() -> Result<(), maille::Error> {
/// use maille::Partition as _;
/// use maille::WeightedGraph;
///
/// let path = WeightedGraph::from_edges(4, &[(0, 1, 1), (1, 2, 1), (2, 3, 1)]);
/// let mut partition = [0; 4];
/// maille::GreedyGrowing { part_count: 2 }.partition(&mut partition, &path)?;
/// assert_eq!(partition[0], partition[1]);
/// assert_eq!(partition[2], partition[3]);
/// assert_ne!(partition[0], partition[3]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct GreedyGrowing {
    pub part_count: usize,
}

impl crate::Partition<&WeightedGraph> for GreedyGrowing {
    type Metadata = ();
    type Error = Error;

    fn partition(
        &mut self,
        part_ids: &mut [usize],
        graph: &WeightedGraph,
    ) -> Result<(), Error> {
        let _section = profile::section("greedy_growing");
        let n = graph.num_nodes();
        if part_ids.len() != n {
            return Err(Error::InputLenMismatch {
                expected: n,
                actual: part_ids.len(),
            });
        }
        let k = self.part_count;
        if k == 0 || k > n {
            return Err(Error::NotEnoughNodes { nodes: n, parts: k });
        }

        let total = graph.total_node_weight();
        let target = (total + k as Weight - 1) / k as Weight;

        part_ids.fill(UNASSIGNED);
        let mut unassigned = n;

        // Edge weight from each unlabeled node into the part being grown,
        // reset lazily between parts through the touched list.
        let mut conn: Vec<Weight> = vec![0; n];
        let mut touched: Vec<usize> = Vec::new();
        let mut frontier: BinaryHeap<(Weight, Reverse<usize>)> = BinaryHeap::new();

        let affinity = |conn: &[Weight], v: usize| 2 * conn[v] - graph.weighted_degree(v);

        for part in 0..k {
            if unassigned == 0 {
                break;
            }
            for &v in &touched {
                conn[v] = 0;
            }
            touched.clear();
            frontier.clear();

            let mut weight: Weight = 0;
            // Leave at least one node for each of the remaining parts.
            while weight < target && unassigned > k - part - 1 {
                let next = loop {
                    match frontier.pop() {
                        Some((score, Reverse(v))) => {
                            if part_ids[v] != UNASSIGNED || score != affinity(&conn, v) {
                                continue;
                            }
                            break Some(v);
                        }
                        None => break None,
                    }
                };
                let v = next.unwrap_or_else(|| {
                    // Fresh seed: lowest degree first, then heaviest.
                    (0..n)
                        .filter(|&v| part_ids[v] == UNASSIGNED)
                        .min_by_key(|&v| {
                            (graph.degree(v), Reverse(graph.node_weight(v)), v)
                        })
                        .unwrap()
                });

                part_ids[v] = part;
                unassigned -= 1;
                weight += graph.node_weight(v);
                for (u, w) in graph.wedges_of(v) {
                    if part_ids[u] != UNASSIGNED {
                        continue;
                    }
                    if conn[u] == 0 {
                        touched.push(u);
                    }
                    conn[u] += w;
                    frontier.push((affinity(&conn, u), Reverse(u)));
                }
            }
        }

        if unassigned > 0 {
            attach_leftovers(graph, part_ids, k);
        }
        Ok(())
    }
}

/// Attach every node still unlabeled to the neighboring part it is most
/// connected to, or to the lightest part when it has no labeled neighbor.
fn attach_leftovers(graph: &WeightedGraph, part_ids: &mut [usize], k: usize) {
    let mut loads: Vec<Weight> = vec![0; k];
    for (v, &part) in part_ids.iter().enumerate() {
        if part != UNASSIGNED {
            loads[part] += graph.node_weight(v);
        }
    }

    let mut part_conn: Vec<Weight> = vec![0; k];
    for v in 0..graph.num_nodes() {
        if part_ids[v] != UNASSIGNED {
            continue;
        }
        part_conn.fill(0);
        let mut best: Option<usize> = None;
        for (u, w) in graph.wedges_of(v) {
            let part = part_ids[u];
            if part == UNASSIGNED {
                continue;
            }
            part_conn[part] += w;
            if best.is_none_or(|b| part_conn[part] > part_conn[b]) {
                best = Some(part);
            }
        }
        let part = best.unwrap_or_else(|| {
            (0..k).min_by_key(|&p| loads[p]).unwrap()
        });
        part_ids[v] = part;
        loads[part] += graph.node_weight(v);
    }
}
