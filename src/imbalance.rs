//! Partition load metrics.

use itertools::Itertools;
use num_traits::ToPrimitive;
use num_traits::Zero;
use rayon::iter::IndexedParallelIterator;
use rayon::iter::IntoParallelIterator;
use rayon::iter::IntoParallelRefIterator as _;
use rayon::iter::ParallelIterator as _;
use std::ops::AddAssign;
use std::ops::Sub;

/// Total weight carried by each part.
pub fn compute_parts_load<W>(partition: &[usize], num_parts: usize, weights: W) -> Vec<W::Item>
where
    W: IntoParallelIterator,
    W::Iter: IndexedParallelIterator,
    W::Item: Zero + Copy + AddAssign + Send + Sync,
{
    debug_assert!(*partition.par_iter().max().unwrap_or(&0) < usize::max(num_parts, 1));

    partition
        .par_iter()
        .zip(weights)
        .fold(
            || vec![W::Item::zero(); num_parts],
            |mut acc, (&part, w)| {
                acc[part] += w;
                acc
            },
        )
        .reduce_with(|mut loads0, loads1| {
            for (l0, l1) in loads0.iter_mut().zip(loads1) {
                *l0 += l1;
            }
            loads0
        })
        .unwrap_or_else(|| vec![W::Item::zero(); num_parts])
}

/// Relative imbalance of the heaviest part: `(max_load - ideal) / ideal`.
pub fn imbalance<W>(num_parts: usize, partition: &[usize], weights: W) -> f64
where
    W: IntoParallelIterator,
    W::Iter: IndexedParallelIterator,
    W::Item: Zero + Copy + AddAssign + ToPrimitive + Send + Sync,
{
    if num_parts == 0 || partition.is_empty() {
        return 0.0;
    }
    let loads = compute_parts_load(partition, num_parts, weights);
    let total: f64 = loads.iter().map(|l| l.to_f64().unwrap()).sum();
    if total == 0.0 {
        return 0.0;
    }
    let ideal = total / num_parts.to_f64().unwrap();
    loads
        .iter()
        .map(|l| (l.to_f64().unwrap() - ideal) / ideal)
        .minmax()
        .into_option()
        .unwrap()
        .1
}

/// Absolute load difference between the heaviest and the lightest part.
pub fn max_imbalance<W>(num_parts: usize, partition: &[usize], weights: W) -> W::Item
where
    W: IntoParallelIterator,
    W::Iter: IndexedParallelIterator,
    W::Item: Zero + Copy + AddAssign + Sub<Output = W::Item> + PartialOrd + Send + Sync,
{
    compute_parts_load(partition, num_parts, weights)
        .iter()
        .minmax_by(|a, b| PartialOrd::partial_cmp(a, b).unwrap())
        .into_option()
        .map_or_else(W::Item::zero, |(min, max)| *max - *min)
}
