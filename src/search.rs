//! Uniform-grid index for fixed-radius neighbor queries.

use crate::geometry::BoundingBox;
use crate::geometry::PointND;
use crate::jagged::Jagged;
use crate::Error;

/// A uniform grid over a point cloud.
///
/// The grid is rebuilt from scratch for every query batch; there is no
/// incremental update. The cell edge should estimate the largest query
/// radius so that most queries scan a 3^D neighborhood, but any positive
/// radius is answered correctly by widening the scanned cell box.
///
/// Queries take `&self` and may run concurrently; building may not.
#[derive(Debug)]
pub struct GridSearch<'p, const D: usize> {
    points: &'p [PointND<D>],
    origin: PointND<D>,
    cell_size: f64,
    dims: [usize; D],
    cells: Jagged<u32>,
}

impl<'p, const D: usize> GridSearch<'p, D> {
    /// Index `points` with the given cell edge.
    pub fn build(points: &'p [PointND<D>], cell_size: f64) -> Result<Self, Error> {
        if !(cell_size > 0.0 && cell_size.is_finite()) {
            return Err(Error::InvalidRadius);
        }

        let bbox = BoundingBox::from_points(points).unwrap_or_else(|| {
            BoundingBox::new(PointND::<D>::zeros(), PointND::<D>::zeros())
        });
        let extents = bbox.extents();
        let mut dims = [1_usize; D];
        let mut cell_count = 1_usize;
        for d in 0..D {
            dims[d] = usize::max(1, (extents[d] / cell_size).ceil() as usize);
            cell_count = cell_count
                .checked_mul(dims[d])
                .ok_or(Error::InvalidRadius)?;
        }

        let mut index = Self {
            points,
            origin: bbox.p_min,
            cell_size,
            dims,
            cells: Jagged::new(),
        };

        // Counting sort of the point ids into their cells.
        let mut counts = vec![0_usize; cell_count + 1];
        let point_cells: Vec<usize> = points
            .iter()
            .map(|p| {
                let cell = index.flat_cell(index.cell_of(p));
                counts[cell + 1] += 1;
                cell
            })
            .collect();
        for c in 1..counts.len() {
            counts[c] += counts[c - 1];
        }
        let mut ids = vec![0_u32; points.len()];
        let mut heads = counts[..cell_count].to_vec();
        for (i, &cell) in point_cells.iter().enumerate() {
            ids[heads[cell]] = i as u32;
            heads[cell] += 1;
        }
        for cell in 0..cell_count {
            index
                .cells
                .push_bucket(ids[counts[cell]..counts[cell + 1]].iter().copied());
        }
        Ok(index)
    }

    fn cell_of(&self, p: &PointND<D>) -> [usize; D] {
        let mut cell = [0_usize; D];
        for d in 0..D {
            let c = ((p[d] - self.origin[d]) / self.cell_size).floor();
            cell[d] = (c.max(0.0) as usize).min(self.dims[d] - 1);
        }
        cell
    }

    fn flat_cell(&self, cell: [usize; D]) -> usize {
        let mut flat = 0;
        for d in (0..D).rev() {
            flat = flat * self.dims[d] + cell[d];
        }
        flat
    }

    /// Append to `out` the ids of all points within `radius` of `center`.
    ///
    /// Distances are inclusive and exact; a point at exactly `radius` is
    /// reported. The output order follows the cell traversal, not the ids.
    pub fn search(&self, center: &PointND<D>, radius: f64, out: &mut Vec<u32>) {
        debug_assert!(radius > 0.0);
        let radius_sq = radius * radius;

        let mut lo = [0_usize; D];
        let mut hi = [0_usize; D];
        for d in 0..D {
            let span = |x: f64| {
                let c = ((x - self.origin[d]) / self.cell_size).floor();
                (c.max(0.0) as usize).min(self.dims[d] - 1)
            };
            lo[d] = span(center[d] - radius);
            hi[d] = span(center[d] + radius);
        }

        let mut cell = lo;
        loop {
            for &id in self.cells.bucket(self.flat_cell(cell)) {
                let dist_sq = (self.points[id as usize] - center).norm_squared();
                if dist_sq <= radius_sq {
                    out.push(id);
                }
            }
            // Odometer step through the cell box.
            let mut d = 0;
            loop {
                cell[d] += 1;
                if cell[d] <= hi[d] {
                    break;
                }
                cell[d] = lo[d];
                d += 1;
                if d == D {
                    return;
                }
            }
        }
    }
}
