//! Graph coarsening by edge matching.

use crate::graph::Weight;
use crate::graph::WeightedGraph;
use crate::jagged::Jagged;
use crate::par;
use crate::profile;
use std::cmp::Reverse;

const UNMATCHED: usize = usize::MAX;

/// Outcome of one coarsening step.
#[derive(Debug, Default)]
pub struct Coarsening {
    pub coarse: WeightedGraph,
    /// Coarse id of every fine node.
    pub fine_to_coarse: Vec<usize>,
    /// Fine nodes merged into each coarse node (one or two of them).
    pub coarse_to_fine: Jagged<u32>,
}

/// A strategy that merges matched node pairs into a smaller graph.
pub trait Coarsen {
    fn coarsen(&self, fine: &WeightedGraph) -> Coarsening;
}

/// Finalizer of a 64-bit mix, used to shuffle ties without a real RNG so
/// results do not depend on the thread count.
fn scramble(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn scramble_pair(a: usize, b: usize) -> u64 {
    scramble(scramble(a as u64) ^ b as u64)
}

/// Sorted Heavy Edge Matching.
///
/// Nodes are visited from the lightest to the heaviest, equal weights
/// shuffled. Each unmatched node grabs the unmatched neighbor behind its
/// heaviest edge; ties go to the lighter neighbor to keep the coarse weight
/// distribution uniform, then to the hash. No optimality guarantee, but
/// fast.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoarsenHem;

impl Coarsen for CoarsenHem {
    fn coarsen(&self, fine: &WeightedGraph) -> Coarsening {
        let _section = profile::section("coarsen_hem");
        let n = fine.num_nodes();

        let mut order: Vec<usize> = (0..n).collect();
        par::sort_by_key(&mut order, |&v| (fine.node_weight(v), scramble(v as u64)));

        let mut fine_to_coarse = vec![UNMATCHED; n];
        let mut groups: Vec<(u32, u32)> = Vec::with_capacity(n);
        for &v in &order {
            if fine_to_coarse[v] != UNMATCHED {
                continue;
            }
            let coarse = groups.len();
            fine_to_coarse[v] = coarse;

            let mut best = UNMATCHED;
            let mut best_edge = 0;
            for (u, w) in fine.wedges_of(v) {
                if fine_to_coarse[u] != UNMATCHED {
                    continue;
                }
                let better = w > best_edge
                    || (w == best_edge
                        && (best == UNMATCHED
                            || (fine.node_weight(u), scramble(u as u64))
                                < (fine.node_weight(best), scramble(best as u64))));
                if better {
                    best = u;
                    best_edge = w;
                }
            }
            if best != UNMATCHED {
                fine_to_coarse[best] = coarse;
                groups.push((v as u32, best as u32));
            } else {
                groups.push((v as u32, u32::MAX));
            }
        }

        finish(fine, fine_to_coarse, &groups)
    }
}

/// Greedy Edge Matching.
///
/// Edges are visited from the heaviest to the lightest; among equal weights
/// the edge with the lighter endpoint goes first, then the hash. Both
/// endpoints merge if still unmatched. Guarantees at least half the weight
/// of an optimal matching, at the price of sorting the edges.
///
/// Leftover nodes become singleton coarse nodes, appended in ascending node
/// order after all matched pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoarsenGem;

impl Coarsen for CoarsenGem {
    fn coarsen(&self, fine: &WeightedGraph) -> Coarsening {
        let _section = profile::section("coarsen_gem");
        let n = fine.num_nodes();

        let mut edges: Vec<(usize, usize, Weight)> = fine.wedges().collect();
        par::sort_by_key(&mut edges, |&(a, b, w)| {
            (
                Reverse(w),
                Weight::min(fine.node_weight(a), fine.node_weight(b)),
                scramble_pair(a, b),
            )
        });

        let mut fine_to_coarse = vec![UNMATCHED; n];
        let mut groups: Vec<(u32, u32)> = Vec::with_capacity(n);
        for &(a, b, _) in &edges {
            if fine_to_coarse[a] != UNMATCHED || fine_to_coarse[b] != UNMATCHED {
                continue;
            }
            fine_to_coarse[a] = groups.len();
            fine_to_coarse[b] = groups.len();
            groups.push((a as u32, b as u32));
        }
        for v in 0..n {
            if fine_to_coarse[v] == UNMATCHED {
                fine_to_coarse[v] = groups.len();
                groups.push((v as u32, u32::MAX));
            }
        }

        finish(fine, fine_to_coarse, &groups)
    }
}

/// Assemble the coarse graph from the matching.
fn finish(
    fine: &WeightedGraph,
    fine_to_coarse: Vec<usize>,
    groups: &[(u32, u32)],
) -> Coarsening {
    let mut coarse_to_fine = Jagged::new();
    let mut coarse = WeightedGraph::new();
    let mut coarse_neighbors: Vec<(usize, Weight)> = Vec::new();

    for &(first, second) in groups {
        let group = [first, second];
        let group = group.iter().copied().filter(|&v| v != u32::MAX);

        let mut coarse_weight = 0;
        coarse_neighbors.clear();
        let coarse_node = coarse.num_nodes();
        for v in group.clone() {
            coarse_weight += fine.node_weight(v as usize);
            for (u, w) in fine.wedges_of(v as usize) {
                let coarse_neighbor = fine_to_coarse[u];
                if coarse_neighbor == coarse_node {
                    continue;
                }
                match coarse_neighbors
                    .iter_mut()
                    .find(|(c, _)| *c == coarse_neighbor)
                {
                    Some((_, total)) => *total += w,
                    None => coarse_neighbors.push((coarse_neighbor, w)),
                }
            }
        }
        coarse.append_node(coarse_weight, coarse_neighbors.iter().copied());
        coarse_to_fine.push_bucket(group);
    }

    Coarsening {
        coarse,
        fine_to_coarse,
        coarse_to_fine,
    }
}
