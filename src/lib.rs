//! The runtime data plane of a smoothed-particle hydrodynamics solver: a
//! particle mesh that discovers neighbors, mirrors boundary particles, and
//! partitions the neighbor graph into race-free blocks, every step.
//!
//! # Crate Layout
//!
//! The mesh itself lives in [`ParticleMesh`]; everything else is the
//! machinery it orchestrates, usable on its own:
//!
//! - [`GridSearch`]: fixed-radius neighbor queries over a uniform grid.
//! - [`Graph`] and [`WeightedGraph`]: compressed adjacency storage.
//! - Graph partitioning through the [`Partition`] trait:
//!   + [`GreedyGrowing`]: connected growth, used on the coarsest graph.
//!   + [`FiducciaMattheyses`]: boundary refinement with rollback.
//!   + [`Multilevel`]: coarsen / split / refine V-cycle over [`CoarsenHem`]
//!     or [`CoarsenGem`].
//!   + [`Uniform`]: contiguous ranges, the degenerate fallback.
//! - Geometry partitioning through the [`PointPartition`] trait: [`Rcb`]
//!   and [`Rib`].
//! - [`par`]: work-stealing primitives over a process-wide worker pool.
//!
//! Partition ids are dense and start from zero. Algorithms are deliberately
//! biased toward speed over optimal edge cut: the partition is rebuilt every
//! simulation step.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    rust_2018_idioms
)]

mod algorithms;
pub mod geometry;
mod graph;
pub mod imbalance;
mod jagged;
mod mesh;
pub mod par;
pub mod profile;
mod search;

pub use crate::algorithms::*;
pub use crate::geometry::BoundingBox;
pub use crate::geometry::{Point1D, Point2D, Point3D, PointND};
pub use crate::graph::cut_size;
pub use crate::graph::Graph;
pub use crate::graph::Weight;
pub use crate::graph::WeightedGraph;
pub use crate::jagged::Jagged;
pub use crate::mesh::GraphBackedSecondary;
pub use crate::mesh::ParticleMesh;
pub use crate::mesh::ParticleSet;
pub use crate::mesh::PartIndex;
pub use crate::mesh::PartVec;
pub use crate::mesh::SubsetPartition;
pub use crate::mesh::SubsetView;
pub use crate::search::GridSearch;

pub use nalgebra;
pub use rayon;

/// The `Partition` trait allows for partitioning data.
///
/// Partitioning algorithms implement this trait.
///
/// The generic argument `M` defines the input of the algorithms (e.g. a
/// weighted graph or nothing at all).
///
/// The input partition must be of the correct size and its contents may or
/// may not be used by the algorithms.
pub trait Partition<M> {
    /// Diagnostic data returned for a specific run of the algorithm.
    type Metadata;

    /// Error details, should the algorithm fail to run.
    type Error;

    /// Partition the given data and output the part ID of each element in
    /// `part_ids`.
    ///
    /// Part IDs must be contiguous and start from zero, meaning the number
    /// of parts is one plus the maximum of `part_ids`. If a lower ID does
    /// not appear in the array, the part is assumed to be empty.
    fn partition(&mut self, part_ids: &mut [usize], data: M)
        -> Result<Self::Metadata, Self::Error>;
}

/// Geometry-only partitioning over a point cloud.
///
/// Unlike [`Partition`], the part count is an argument: the particle mesh
/// picks it at every step from the worker count. Weights must not be
/// negative.
pub trait PointPartition<const D: usize> {
    fn partition(
        &self,
        points: &[geometry::PointND<D>],
        weights: &[f64],
        part_ids: &mut [usize],
        part_count: usize,
    ) -> Result<(), Error>;
}
