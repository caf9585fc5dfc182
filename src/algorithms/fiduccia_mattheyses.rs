//! Fiduccia-Mattheyses refinement with rollback to the best prefix.

use crate::graph::cut_size;
use crate::graph::Weight;
use crate::graph::WeightedGraph;
use crate::imbalance::compute_parts_load;
use crate::profile;
use crate::Error;
use rayon::iter::IntoParallelRefIterator as _;
use rayon::iter::ParallelIterator as _;
use std::collections::BinaryHeap;

/// Diagnostic data returned for a run of [`FiducciaMattheyses`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Number of passes actually run.
    pub passes: usize,
    /// Total cut weight shaved off by the kept prefixes.
    pub gain: Weight,
}

/// An implementation of the Fiduccia-Mattheyses topologic algorithm,
/// extended to partitions of more than two parts.
///
/// Each pass keeps a priority queue of boundary nodes keyed by gain, the cut
/// weight saved by moving the node to its best alternative part. The
/// highest-gain move that respects the balance constraint is applied, the
/// node is locked for the rest of the pass and the gains of its neighbors
/// are refreshed. Once the queue drains (or the move budget is hit), the
/// pass rolls back to the move prefix with the highest cumulative gain,
/// preferring the better balanced prefix among equal gains. Passes repeat
/// until one yields no positive gain, or [`max_passes`] is reached.
///
/// A move into part `q` respects balance when the resulting weight of `q`
/// stays under `(1 + balance_tolerance) * total / part_count`; non-positive
/// gain moves must also strictly improve the balance between the two parts
/// involved, which lets a pass walk out of an unbalanced projection without
/// wandering between equivalent states.
///
/// Original algorithm from "A Linear-Time Heuristic for Improving Network
/// Partitions" by C.M. Fiduccia and R.M. Mattheyses.
///
/// [`max_passes`]: FiducciaMattheyses::max_passes
///
/// # Example
///
/// ```rust
/// # fn main() -> Result<(), maille::Error> {
/// use maille::Partition as _;
/// use maille::WeightedGraph;
///
/// //    swap
/// // 0  1  0  1
/// // +--+--+--+
/// // |  |  |  |
/// // +--+--+--+
/// // 0  0  1  1
/// let grid = WeightedGraph::from_edges(
///     8,
///     &[
///         (0, 1, 1), (1, 2, 1), (2, 3, 1),
///         (4, 5, 1), (5, 6, 1), (6, 7, 1),
///         (0, 4, 1), (1, 5, 1), (2, 6, 1), (3, 7, 1),
///     ],
/// );
/// let mut partition = [0, 1, 0, 1, 0, 0, 1, 1];
///
/// maille::FiducciaMattheyses::new(2).partition(&mut partition, &grid)?;
///
/// assert_eq!(partition, [0, 0, 1, 1, 0, 0, 1, 1]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FiducciaMattheyses {
    pub part_count: usize,
    /// Accepted relative overweight of a part, defaults to 3%.
    pub balance_tolerance: f64,
    pub max_passes: usize,
    /// Per-pass move budget; `None` means one move per node.
    pub max_moves_per_pass: Option<usize>,
}

impl FiducciaMattheyses {
    pub fn new(part_count: usize) -> Self {
        Self {
            part_count,
            balance_tolerance: 0.03,
            max_passes: 10,
            max_moves_per_pass: None,
        }
    }
}

struct Move {
    node: usize,
    from: usize,
    to: usize,
    gain: Weight,
}

impl crate::Partition<&WeightedGraph> for FiducciaMattheyses {
    type Metadata = Metadata;
    type Error = Error;

    fn partition(
        &mut self,
        part_ids: &mut [usize],
        graph: &WeightedGraph,
    ) -> Result<Metadata, Error> {
        let _section = profile::section("fiduccia_mattheyses");
        let n = graph.num_nodes();
        if part_ids.len() != n {
            return Err(Error::InputLenMismatch {
                expected: n,
                actual: part_ids.len(),
            });
        }
        let k = self.part_count;
        if k == 0 || k > usize::max(n, 1) {
            return Err(Error::NotEnoughNodes { nodes: n, parts: k });
        }
        if k == 1 {
            part_ids.fill(0);
            return Ok(Metadata::default());
        }

        let mut part_weights =
            compute_parts_load(part_ids, k, graph.node_weights().par_iter().copied());
        let total = graph.total_node_weight();
        let max_part_weight =
            ((1.0 + self.balance_tolerance) * total as f64 / k as f64).ceil() as Weight;
        let move_budget = usize::min(n, self.max_moves_per_pass.unwrap_or(n));

        tracing::debug!(cut = cut_size(graph, part_ids), "starting refinement");

        let mut metadata = Metadata::default();
        let mut locked = vec![false; n];
        let mut queue: BinaryHeap<(Weight, usize)> = BinaryHeap::new();
        let mut deferred: Vec<usize> = Vec::new();
        let mut moves: Vec<Move> = Vec::new();

        // The cut weight saved by moving `v` to its best feasible part.
        // `None` when the node is interior, locked, or has no feasible
        // target.
        let best_move = |part_ids: &[usize],
                         part_weights: &[Weight],
                         locked: &[bool],
                         v: usize|
         -> Option<(Weight, usize)> {
            if locked[v] {
                return None;
            }
            let own = part_ids[v];
            let weight = graph.node_weight(v);
            let mut internal = 0;
            let mut conn: Vec<(usize, Weight)> = Vec::new();
            let mut boundary = false;
            for (u, w) in graph.wedges_of(v) {
                let part = part_ids[u];
                if part == own {
                    internal += w;
                } else {
                    boundary = true;
                    match conn.iter_mut().find(|(p, _)| *p == part) {
                        Some((_, total)) => *total += w,
                        None => conn.push((part, w)),
                    }
                }
            }
            if !boundary {
                return None;
            }
            if part_weights[own] <= weight {
                // Last node of its part; moving it would empty the part.
                return None;
            }
            conn.iter()
                .map(|&(part, w)| (w - internal, part))
                .filter(|&(gain, part)| {
                    let to_weight = part_weights[part] + weight;
                    to_weight <= max_part_weight
                        && (gain > 0 || part_weights[own] >= to_weight)
                })
                .max()
                .map(|(gain, part)| (gain, part))
        };

        // Enqueue `v` under its balance-blind gain; the actual move is
        // recomputed at extraction time.
        let enqueue = |queue: &mut BinaryHeap<(Weight, usize)>,
                       part_ids: &[usize],
                       locked: &[bool],
                       v: usize| {
            if locked[v] {
                return;
            }
            let estimate = best_gain_estimate(graph, part_ids, v);
            if estimate > Weight::MIN {
                queue.push((estimate, v));
            }
        };

        for pass in 0..self.max_passes {
            locked.fill(false);
            queue.clear();
            deferred.clear();
            moves.clear();

            for v in 0..n {
                enqueue(&mut queue, part_ids, &locked, v);
            }

            // Prefix ranking: repair any over-tolerance part first, then
            // maximize the cumulative gain, then prefer the lighter heaviest
            // part. A projection from a coarser level may start above the
            // tolerance; fixing that is worth a negative gain.
            let prefix_key = |cumulative: Weight, spread: Weight| {
                (spread > max_part_weight, -cumulative, spread)
            };
            let initial_spread = *part_weights.iter().max().unwrap();
            let initially_violating = initial_spread > max_part_weight;

            let mut cumulative = 0;
            let mut best_prefix = 0;
            let mut best_gain = 0;
            let mut best_key = prefix_key(0, initial_spread);
            while let Some((_, v)) = queue.pop() {
                if moves.len() >= move_budget {
                    break;
                }
                let Some((gain, to)) = best_move(part_ids, &part_weights, &locked, v)
                else {
                    // Still a boundary node, just not movable under the
                    // current part weights: hold it until the next move
                    // changes them.
                    if !locked[v] && best_gain_estimate(graph, part_ids, v) > Weight::MIN {
                        deferred.push(v);
                    }
                    continue;
                };

                let from = part_ids[v];
                let weight = graph.node_weight(v);
                part_ids[v] = to;
                part_weights[from] -= weight;
                part_weights[to] += weight;
                locked[v] = true;
                cumulative += gain;
                moves.push(Move { node: v, from, to, gain });

                let spread = *part_weights.iter().max().unwrap();
                let key = prefix_key(cumulative, spread);
                if key < best_key {
                    best_key = key;
                    best_gain = cumulative;
                    best_prefix = moves.len();
                }

                for v in deferred.drain(..) {
                    enqueue(&mut queue, part_ids, &locked, v);
                }
                for (u, _) in graph.wedges_of(v) {
                    enqueue(&mut queue, part_ids, &locked, u);
                }
            }

            // Roll back to the best prefix.
            for done in moves[best_prefix..].iter().rev() {
                part_ids[done.node] = done.from;
                let weight = graph.node_weight(done.node);
                part_weights[done.to] -= weight;
                part_weights[done.from] += weight;
            }

            metadata.passes = pass + 1;
            metadata.gain += best_gain;
            tracing::debug!(
                pass,
                kept_moves = best_prefix,
                gain = best_gain,
                "refinement pass done"
            );
            // A pass that only repaired the balance may have opened up cut
            // improvements; give the next pass a chance in that case.
            let repaired_balance = initially_violating && !best_key.0;
            if best_gain <= 0 && !repaired_balance {
                break;
            }
        }

        tracing::debug!(cut = cut_size(graph, part_ids), "refinement done");
        Ok(metadata)
    }
}

/// Optimistic queue key: the gain ignoring balance, so that entries outrank
/// each other the same way whether or not a target is momentarily full. The
/// real move is recomputed at extraction time.
fn best_gain_estimate(graph: &WeightedGraph, part_ids: &[usize], v: usize) -> Weight {
    let own = part_ids[v];
    let mut internal = 0;
    let mut conn: Vec<(usize, Weight)> = Vec::new();
    for (u, w) in graph.wedges_of(v) {
        let part = part_ids[u];
        if part == own {
            internal += w;
        } else {
            match conn.iter_mut().find(|(p, _)| *p == part) {
                Some((_, total)) => *total += w,
                None => conn.push((part, w)),
            }
        }
    }
    conn.iter().map(|&(_, w)| w - internal).max().unwrap_or(Weight::MIN)
}
