//! Recursive coordinate and inertial bisection over point clouds.

use crate::geometry::inertia_axis;
use crate::geometry::BoundingBox;
use crate::geometry::PointND;
use crate::par;
use crate::profile;
use crate::Error;
use crate::PointPartition;
use nalgebra::allocator::Allocator;
use nalgebra::Const;
use nalgebra::DefaultAllocator;
use nalgebra::DimDiff;
use nalgebra::DimSub;
use nalgebra::U1;
use std::mem;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

/// # Recursive Coordinate Bisection algorithm
///
/// Partitions a point cloud by recursively splitting it with a hyperplane
/// orthogonal to the widest axis of the current subset, at the weighted
/// median. Odd part counts are handled by splitting the part budget
/// unevenly and placing the hyperplane at the matching weight fraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rcb;

/// # Recursive Inertial Bisection algorithm
///
/// A variant of [`Rcb`] where each split is orthogonal to the inertia axis
/// of the current subset instead of a coordinate axis, which tends to
/// produce better shaped parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rib;

impl<const D: usize> PointPartition<D> for Rcb {
    fn partition(
        &self,
        points: &[PointND<D>],
        weights: &[f64],
        part_ids: &mut [usize],
        part_count: usize,
    ) -> Result<(), Error> {
        let _section = profile::section("rcb");
        bisect(points, weights, part_ids, part_count, &|ids: &[u32]| {
            widest_axis(points, ids)
        })
    }
}

impl<const D: usize> PointPartition<D> for Rib
where
    Const<D>: DimSub<U1>,
    DefaultAllocator: Allocator<DimDiff<Const<D>, U1>>,
{
    fn partition(
        &self,
        points: &[PointND<D>],
        weights: &[f64],
        part_ids: &mut [usize],
        part_count: usize,
    ) -> Result<(), Error> {
        let _section = profile::section("rib");
        bisect(points, weights, part_ids, part_count, &|ids: &[u32]| {
            let subset: Vec<PointND<D>> = ids.iter().map(|&id| points[id as usize]).collect();
            let subset_weights: Vec<f64> = ids.iter().map(|&id| weights[id as usize]).collect();
            inertia_axis(&subset, &subset_weights)
        })
    }
}

fn widest_axis<const D: usize>(points: &[PointND<D>], ids: &[u32]) -> PointND<D> {
    let subset: Vec<PointND<D>> = ids.iter().map(|&id| points[id as usize]).collect();
    let extents = BoundingBox::from_points(&subset).unwrap().extents();
    let widest = (0..D)
        .max_by(|&a, &b| f64::partial_cmp(&extents[a], &extents[b]).unwrap())
        .unwrap();
    let mut direction = PointND::<D>::zeros();
    direction[widest] = 1.0;
    direction
}

fn bisect<const D: usize, F>(
    points: &[PointND<D>],
    weights: &[f64],
    part_ids: &mut [usize],
    part_count: usize,
    direction: &F,
) -> Result<(), Error>
where
    F: Fn(&[u32]) -> PointND<D> + Sync,
{
    let n = points.len();
    if part_ids.len() != n {
        return Err(Error::InputLenMismatch {
            expected: n,
            actual: part_ids.len(),
        });
    }
    if weights.len() != n {
        return Err(Error::InputLenMismatch {
            expected: n,
            actual: weights.len(),
        });
    }
    if weights.iter().any(|&w| w < 0.0) {
        return Err(Error::NegativeValues);
    }
    if part_count == 0 || part_count > n {
        return Err(Error::NotEnoughNodes {
            nodes: n,
            parts: part_count,
        });
    }

    let mut ids: Vec<u32> = (0..n as u32).collect();
    let part_ids = as_atomic(part_ids);
    recurse(points, weights, &mut ids, part_ids, part_count, 0, direction);
    Ok(())
}

fn recurse<const D: usize, F>(
    points: &[PointND<D>],
    weights: &[f64],
    ids: &mut [u32],
    part_ids: &[AtomicUsize],
    part_count: usize,
    first_part: usize,
    direction: &F,
) where
    F: Fn(&[u32]) -> PointND<D> + Sync,
{
    if part_count == 1 {
        for &id in ids.iter() {
            part_ids[id as usize].store(first_part, Ordering::Relaxed);
        }
        return;
    }

    let normal = direction(ids);
    par::sort_by(ids, |&a, &b| {
        let pa = points[a as usize].dot(&normal);
        let pb = points[b as usize].dot(&normal);
        f64::partial_cmp(&pa, &pb).unwrap_or(std::cmp::Ordering::Equal)
    });

    // Split the part budget in two and place the cut at the matching
    // fraction of the subset weight, keeping enough points on both sides to
    // seed every remaining part.
    let left_parts = part_count / 2;
    let right_parts = part_count - left_parts;
    let total: f64 = ids.iter().map(|&id| weights[id as usize]).sum();
    let target = total * left_parts as f64 / part_count as f64;

    let mut split = 0;
    let mut cumulated = 0.0;
    while split < ids.len() && cumulated < target {
        cumulated += weights[ids[split] as usize];
        split += 1;
    }
    let split = split.clamp(left_parts, ids.len() - right_parts);

    let (left, right) = ids.split_at_mut(split);
    rayon::join(
        || recurse(points, weights, left, part_ids, left_parts, first_part, direction),
        || {
            recurse(
                points,
                weights,
                right,
                part_ids,
                right_parts,
                first_part + left_parts,
                direction,
            )
        },
    );
}

/// Transmute a mutable slice of [`usize`] into an immutable slice of
/// [`AtomicUsize`], so bisection halves can label parts concurrently.
fn as_atomic(p: &mut [usize]) -> &[AtomicUsize] {
    assert_eq!(mem::size_of::<usize>(), mem::size_of::<AtomicUsize>());
    assert_eq!(mem::align_of::<usize>(), mem::align_of::<AtomicUsize>());

    unsafe { mem::transmute::<&mut [usize], &[AtomicUsize]>(p) }
}
