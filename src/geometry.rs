//! A few useful geometric types

use itertools::Itertools;
use itertools::MinMaxResult;
use nalgebra::allocator::Allocator;
use nalgebra::Const;
use nalgebra::DefaultAllocator;
use nalgebra::DimDiff;
use nalgebra::DimSub;
use nalgebra::SMatrix;
use nalgebra::SVector;
use nalgebra::U1;

/// Point in `D`-dimensional space.
pub type PointND<const D: usize> = SVector<f64, D>;

pub type Point1D = PointND<1>;
pub type Point2D = PointND<2>;
pub type Point3D = PointND<3>;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox<const D: usize> {
    pub p_min: PointND<D>,
    pub p_max: PointND<D>,
}

impl<const D: usize> BoundingBox<D> {
    pub fn new(p_min: PointND<D>, p_max: PointND<D>) -> Self {
        debug_assert!(
            p_min.iter().zip(p_max.iter()).all(|(lo, hi)| lo <= hi),
            "inverted bounding box",
        );
        Self { p_min, p_max }
    }

    /// The smallest box containing all the given points.
    ///
    /// Returns `None` when the input is empty.
    pub fn from_points(points: &[PointND<D>]) -> Option<Self> {
        let first = *points.first()?;
        let (p_min, p_max) =
            points
                .iter()
                .skip(1)
                .fold((first, first), |(mut p_min, mut p_max), p| {
                    for d in 0..D {
                        p_min[d] = f64::min(p_min[d], p[d]);
                        p_max[d] = f64::max(p_max[d], p[d]);
                    }
                    (p_min, p_max)
                });
        Some(Self { p_min, p_max })
    }

    pub fn extents(&self) -> PointND<D> {
        self.p_max - self.p_min
    }

    pub fn contains(&self, p: &PointND<D>) -> bool {
        (0..D).all(|d| self.p_min[d] <= p[d] && p[d] <= self.p_max[d])
    }

    /// The closest point of the box *surface* to `p`.
    ///
    /// Outside points are clamped onto the box; inside points are projected
    /// onto the nearest face. Used to mirror boundary particles: the mirror
    /// image of `p` is `2 * clamp(p) - p`.
    pub fn clamp(&self, p: &PointND<D>) -> PointND<D> {
        if !self.contains(p) {
            let mut q = *p;
            for d in 0..D {
                q[d] = f64::clamp(q[d], self.p_min[d], self.p_max[d]);
            }
            return q;
        }
        // Inside: move the single cheapest coordinate onto its nearest face.
        let (axis, lo) = (0..D)
            .flat_map(|d| [(d, true), (d, false)])
            .min_by(|&(d1, lo1), &(d2, lo2)| {
                let dist = |d: usize, lo: bool| {
                    if lo {
                        p[d] - self.p_min[d]
                    } else {
                        self.p_max[d] - p[d]
                    }
                };
                f64::partial_cmp(&dist(d1, lo1), &dist(d2, lo2)).unwrap()
            })
            .unwrap();
        let mut q = *p;
        q[axis] = if lo { self.p_min[axis] } else { self.p_max[axis] };
        q
    }
}

/// Direction of the largest spread of a weighted point cloud.
///
/// This is the eigenvector associated with the largest eigenvalue of the
/// weighted covariance matrix, i.e. the inertia axis used by recursive
/// inertial bisection.
pub fn inertia_axis<const D: usize>(points: &[PointND<D>], weights: &[f64]) -> PointND<D>
where
    Const<D>: DimSub<U1>,
    DefaultAllocator: Allocator<DimDiff<Const<D>, U1>>,
{
    debug_assert_eq!(points.len(), weights.len());

    let total: f64 = weights.iter().sum();
    if points.is_empty() || total == 0.0 {
        return first_axis();
    }

    let center = weighted_center(points, weights, total);
    let covariance = weighted_covariance(points, weights, center);
    largest_eigenvector(covariance)
}

/// The first standard basis vector, `(1, 0, ..., 0)`.
fn first_axis<const D: usize>() -> PointND<D> {
    let mut axis = PointND::<D>::zeros();
    axis[0] = 1.0;
    axis
}

/// Weighted centroid of `points`, given the precomputed sum of `weights`.
fn weighted_center<const D: usize>(
    points: &[PointND<D>],
    weights: &[f64],
    total: f64,
) -> PointND<D> {
    points
        .iter()
        .zip(weights)
        .map(|(p, w)| p * *w)
        .sum::<PointND<D>>()
        / total
}

/// Weighted covariance matrix of `points` around `center`.
fn weighted_covariance<const D: usize>(
    points: &[PointND<D>],
    weights: &[f64],
    center: PointND<D>,
) -> SMatrix<f64, D, D> {
    points
        .iter()
        .zip(weights)
        .map(|(p, w)| {
            let d = p - center;
            d * d.transpose() * *w
        })
        .sum()
}

/// Eigenvector associated with the largest eigenvalue of a symmetric matrix.
fn largest_eigenvector<const D: usize>(covariance: SMatrix<f64, D, D>) -> PointND<D>
where
    Const<D>: DimSub<U1>,
    DefaultAllocator: Allocator<DimDiff<Const<D>, U1>>,
{
    let eigen = covariance.symmetric_eigen();
    let largest = match eigen
        .eigenvalues
        .iter()
        .enumerate()
        .minmax_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
    {
        MinMaxResult::MinMax(_, (i, _)) | MinMaxResult::OneElement((i, _)) => i,
        MinMaxResult::NoElements => unreachable!(),
    };
    eigen.eigenvectors.column(largest).into_owned()
}
