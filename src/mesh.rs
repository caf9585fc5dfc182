//! Particle adjacency mesh.
//!
//! [`ParticleMesh::update`] rebuilds, once per simulation step, everything
//! the pairwise force kernels need: per-particle neighbor lists, mirrored
//! interpolation neighbors for the boundary particles, and a multilevel
//! block structure over the neighbor edges that makes symmetric pairwise
//! updates safe to run in parallel.

use crate::algorithms::Coarsen;
use crate::algorithms::CoarsenGem;
use crate::algorithms::Multilevel;
use crate::algorithms::Rib;
use crate::geometry::BoundingBox;
use crate::geometry::PointND;
use crate::graph::Graph;
use crate::graph::WeightedGraph;
use crate::jagged::Jagged;
use crate::par;
use crate::profile;
use crate::search::GridSearch;
use crate::Error;
use crate::Partition;
use crate::PointPartition;
use rayon::prelude::*;

/// Storage of one part id.
pub type PartIndex = u16;

/// Per-particle stack of part ids, one per partitioning level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartVec([PartIndex; PartVec::MAX_LEVELS]);

impl PartVec {
    /// Capacity of the stack; the runtime level count may be lower.
    pub const MAX_LEVELS: usize = 4;

    pub fn splat(id: PartIndex) -> Self {
        Self([id; Self::MAX_LEVELS])
    }

    pub fn level(&self, level: usize) -> PartIndex {
        self.0[level]
    }

    pub fn set_level(&mut self, level: usize, id: PartIndex) {
        self.0[level] = id;
    }

    /// Number of leading levels on which both stacks agree.
    ///
    /// Two particles with a common prefix of `k` share a block at the first
    /// `k` levels and sit in different blocks at level `k`.
    pub fn common(a: Self, b: Self) -> usize {
        a.0.iter().zip(&b.0).take_while(|(x, y)| x == y).count()
    }
}

impl Default for PartVec {
    fn default() -> Self {
        Self::splat(0)
    }
}

/// Storage contract between the mesh and the particle arrays.
///
/// The mesh reads positions and types, and writes one [`PartVec`] per
/// particle; everything else stays with the caller.
pub trait ParticleSet<const D: usize> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current position of every particle.
    fn positions(&self) -> &[PointND<D>];

    /// Whether particle `i` is a fixed (boundary) particle.
    fn is_fixed(&self, i: usize) -> bool;

    /// Fixed particle ids in ascending order.
    fn fixed(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(|&i| self.is_fixed(i))
    }

    fn part_vecs_mut(&mut self) -> &mut [PartVec];
}

/// A subset of particles handed to a secondary partitioner.
#[derive(Debug, Clone, Copy)]
pub struct SubsetView<'a, const D: usize> {
    /// Positions of the subset members, gathered.
    pub points: &'a [PointND<D>],
    /// Global particle ids of the members, in gathered order.
    pub members: &'a [u32],
    /// Adjacency over all particles, not just the subset.
    pub adjacency: &'a Graph,
}

/// A partitioning strategy usable on the interface subsets of a mesh.
pub trait SubsetPartition<const D: usize> {
    fn partition_subset(
        &self,
        view: SubsetView<'_, D>,
        part_ids: &mut [usize],
        part_count: usize,
    ) -> Result<(), Error>;
}

/// Any geometric partitioner works on a subset through its gathered
/// positions alone.
impl<const D: usize, P> SubsetPartition<D> for P
where
    P: PointPartition<D>,
{
    fn partition_subset(
        &self,
        view: SubsetView<'_, D>,
        part_ids: &mut [usize],
        part_count: usize,
    ) -> Result<(), Error> {
        let weights = vec![1.0; view.points.len()];
        self.partition(view.points, &weights, part_ids, part_count)
    }
}

/// Secondary strategy that runs a multilevel graph partition over the
/// subgraph induced by the subset on the particle adjacency.
#[derive(Debug, Clone, Copy)]
pub struct GraphBackedSecondary<C = CoarsenGem> {
    pub coarsen: C,
    pub balance_tolerance: f64,
}

impl Default for GraphBackedSecondary<CoarsenGem> {
    fn default() -> Self {
        Self {
            coarsen: CoarsenGem,
            balance_tolerance: 0.03,
        }
    }
}

impl<const D: usize, C> SubsetPartition<D> for GraphBackedSecondary<C>
where
    C: Coarsen + Copy,
{
    fn partition_subset(
        &self,
        view: SubsetView<'_, D>,
        part_ids: &mut [usize],
        part_count: usize,
    ) -> Result<(), Error> {
        let _section = profile::section("induced_subgraph");
        let m = view.members.len();

        let mut local = vec![u32::MAX; view.adjacency.num_nodes()];
        for (rank, &id) in view.members.iter().enumerate() {
            local[id as usize] = rank as u32;
        }
        let mut pairs: Vec<(u32, u32)> = Vec::new();
        for (rank, &id) in view.members.iter().enumerate() {
            let rank = rank as u32;
            for &neighbor in view.adjacency.neighbors(id as usize) {
                let other = local[neighbor as usize];
                if other != u32::MAX && other != rank {
                    pairs.push((u32::min(rank, other), u32::max(rank, other)));
                }
            }
        }
        let graph = WeightedGraph::from_unit_edges(m, &pairs);

        Multilevel {
            part_count,
            coarsen: self.coarsen,
            balance_tolerance: self.balance_tolerance,
        }
        .partition(part_ids, &graph)?;
        Ok(())
    }
}

/// The particle adjacency mesh.
///
/// `P` labels every particle at the top level from positions alone; `Q`
/// labels the interface subsets of the deeper levels. All output containers
/// are reused from one [`update`](Self::update) to the next.
#[derive(Debug)]
pub struct ParticleMesh<const D: usize, P = Rib, Q = GraphBackedSecondary> {
    domain: BoundingBox<D>,
    num_levels: usize,
    num_parts: Option<usize>,
    primary: P,
    secondary: Q,

    adjacency: Graph,
    interp_adjacency: Graph,
    fixed_ids: Vec<u32>,
    block_edges: Jagged<(u32, u32)>,

    search_lists: Vec<Vec<u32>>,
    interp_lists: Vec<Vec<u32>>,
    radii: Vec<f64>,
    all_ids: Vec<u32>,
    interface: Vec<u32>,
    subset_points: Vec<PointND<D>>,
    scratch_parts: Vec<usize>,
    unit_weights: Vec<f64>,
    part_vecs: Vec<PartVec>,
}

impl<const D: usize> ParticleMesh<D> {
    pub fn new(domain: BoundingBox<D>) -> Self {
        Self::with_strategies(domain, Rib, GraphBackedSecondary::default())
    }
}

impl<const D: usize, P, Q> ParticleMesh<D, P, Q> {
    pub fn with_strategies(domain: BoundingBox<D>, primary: P, secondary: Q) -> Self {
        Self {
            domain,
            num_levels: 2,
            num_parts: None,
            primary,
            secondary,
            adjacency: Graph::new(),
            interp_adjacency: Graph::new(),
            fixed_ids: Vec::new(),
            block_edges: Jagged::new(),
            search_lists: Vec::new(),
            interp_lists: Vec::new(),
            radii: Vec::new(),
            all_ids: Vec::new(),
            interface: Vec::new(),
            subset_points: Vec::new(),
            scratch_parts: Vec::new(),
            unit_weights: Vec::new(),
            part_vecs: Vec::new(),
        }
    }

    /// Number of partitioning levels, between 1 and [`PartVec::MAX_LEVELS`].
    pub fn with_num_levels(mut self, num_levels: usize) -> Self {
        self.num_levels = num_levels;
        self
    }

    /// Number of parts per level; defaults to the worker count.
    pub fn with_num_parts(mut self, num_parts: usize) -> Self {
        self.num_parts = Some(num_parts);
        self
    }

    /// Neighbors of particle `i`, ascending.
    pub fn neighbors(&self, i: usize) -> &[u32] {
        self.adjacency.neighbors(i)
    }

    /// Non-fixed particles around the mirror image of the `rank`-th fixed
    /// particle, ascending. Ranks follow [`ParticleSet::fixed`] order; see
    /// [`fixed_ids`](Self::fixed_ids).
    pub fn interp_neighbors(&self, rank: usize) -> &[u32] {
        self.interp_adjacency.neighbors(rank)
    }

    /// The fixed particle behind each interpolation rank.
    pub fn fixed_ids(&self) -> &[u32] {
        &self.fixed_ids
    }

    /// Unique unordered neighbor pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.adjacency.edges()
    }

    /// Neighbor pairs bucketed by the depth of their common block prefix.
    ///
    /// Bucket `0` holds the pairs whose endpoints disagree already at the
    /// top level; the last bucket holds the intra-leaf bulk. Within bucket
    /// `k`, pairs that share a particle always lie in the same level-`k`
    /// block, so one bucket can be traversed block-parallel without write
    /// races on particle fields (see [`par::block_for_each`]).
    pub fn block_pairs(&self) -> &Jagged<(u32, u32)> {
        &self.block_edges
    }

    pub fn adjacency(&self) -> &Graph {
        &self.adjacency
    }
}

impl<const D: usize, P, Q> ParticleMesh<D, P, Q>
where
    P: PointPartition<D>,
    Q: SubsetPartition<D>,
{
    /// Rebuild the mesh for the current particle state.
    ///
    /// `radius` maps a particle id to its search radius and must return a
    /// strictly positive, finite value for every particle. On failure all
    /// outputs are left empty.
    pub fn update<S, R>(&mut self, particles: &mut S, radius: R) -> Result<(), Error>
    where
        S: ParticleSet<D> + Sync,
        R: Fn(usize) -> f64 + Sync,
    {
        let result = self.try_update(particles, radius);
        if result.is_err() {
            self.adjacency.clear();
            self.interp_adjacency.clear();
            self.block_edges.clear();
            self.fixed_ids.clear();
        }
        result
    }

    fn try_update<S, R>(&mut self, particles: &mut S, radius: R) -> Result<(), Error>
    where
        S: ParticleSet<D> + Sync,
        R: Fn(usize) -> f64 + Sync,
    {
        let _section = profile::section("mesh_update");

        let n = particles.len();
        let positions = particles.positions();
        if positions.len() != n {
            return Err(Error::InputLenMismatch {
                expected: n,
                actual: positions.len(),
            });
        }

        let num_parts = self.num_parts.unwrap_or_else(par::num_threads);
        let num_levels = self.num_levels;
        if num_levels == 0 || num_levels > PartVec::MAX_LEVELS {
            return Err(Error::TooManyLevels { levels: num_levels });
        }
        let total_parts = num_levels * num_parts + 1;
        if PartIndex::try_from(total_parts).is_err() {
            return Err(Error::TooManyLevels { levels: num_levels });
        }
        if num_parts == 0 || num_parts > n {
            return Err(Error::NotEnoughNodes {
                nodes: n,
                parts: num_parts,
            });
        }

        self.all_ids.clear();
        self.all_ids.extend(0..n as u32);

        self.search(particles, &radius)?;
        self.partition(positions, n, num_parts, num_levels)?;

        // Publish the labels.
        let part_vecs_out = particles.part_vecs_mut();
        if part_vecs_out.len() != n {
            return Err(Error::InputLenMismatch {
                expected: n,
                actual: part_vecs_out.len(),
            });
        }
        part_vecs_out.copy_from_slice(&self.part_vecs);
        Ok(())
    }

    fn search<S, R>(&mut self, particles: &S, radius: &R) -> Result<(), Error>
    where
        S: ParticleSet<D> + Sync,
        R: Fn(usize) -> f64 + Sync,
    {
        let _section = profile::section("mesh_search");
        let n = particles.len();
        let positions = particles.positions();

        self.radii.resize(n, 0.0);
        par::transform(&self.all_ids, &mut self.radii, |&i| radius(i as usize));
        if self.radii.iter().any(|r| !(r.is_finite() && *r > 0.0)) {
            return Err(Error::InvalidRadius);
        }
        let h_cell = self.radii.iter().copied().fold(0.0, f64::max);

        let index = GridSearch::build(positions, h_cell)?;

        // Per-particle neighbor queries, sorted by id.
        self.search_lists.resize_with(n, Vec::new);
        {
            let radii = &self.radii;
            par::for_each(
                self.search_lists.par_iter_mut().enumerate(),
                |(i, list)| {
                    list.clear();
                    index.search(&positions[i], radii[i], list);
                    list.sort_unstable();
                    list.retain(|&j| j as usize != i);
                },
            );
        }
        self.adjacency.clear();
        for list in &self.search_lists {
            self.adjacency.push_node(list.iter().copied());
        }

        // Interpolation queries around the mirror image of each fixed
        // particle, fixed hits dropped.
        self.fixed_ids.clear();
        self.fixed_ids.extend(particles.fixed().map(|i| i as u32));
        self.interp_lists.resize_with(self.fixed_ids.len(), Vec::new);
        {
            let radii = &self.radii;
            let domain = self.domain;
            par::for_each(
                self.interp_lists
                    .par_iter_mut()
                    .zip(self.fixed_ids.par_iter()),
                |(list, &i)| {
                    let position = positions[i as usize];
                    let mirror = 2.0 * domain.clamp(&position) - position;
                    list.clear();
                    index.search(&mirror, 3.0 * radii[i as usize], list);
                    list.retain(|&j| !particles.is_fixed(j as usize));
                    list.sort_unstable();
                },
            );
        }
        self.interp_adjacency.clear();
        for list in &self.interp_lists {
            self.interp_adjacency.push_node(list.iter().copied());
        }
        Ok(())
    }

    fn partition(
        &mut self,
        positions: &[PointND<D>],
        n: usize,
        num_parts: usize,
        num_levels: usize,
    ) -> Result<(), Error> {
        let _section = profile::section("mesh_partition");
        let Self {
            primary,
            secondary,
            adjacency,
            block_edges,
            all_ids,
            interface,
            subset_points,
            scratch_parts,
            unit_weights,
            part_vecs,
            ..
        } = self;

        let sentinel = (num_levels * num_parts) as PartIndex;
        part_vecs.clear();
        part_vecs.resize(n, PartVec::splat(sentinel));

        for level in 0..num_levels {
            if level == 0 {
                unit_weights.clear();
                unit_weights.resize(n, 1.0);
                scratch_parts.clear();
                scratch_parts.resize(n, 0);
                primary.partition(positions, unit_weights, scratch_parts, num_parts)?;
                for (vec, &part) in part_vecs.iter_mut().zip(scratch_parts.iter()) {
                    vec.set_level(0, part as PartIndex);
                }
            } else {
                if interface.is_empty() {
                    break;
                }
                let subset_parts = usize::min(num_parts, interface.len());
                subset_points.resize(interface.len(), PointND::zeros());
                par::transform(interface, subset_points, |&id| positions[id as usize]);
                scratch_parts.clear();
                scratch_parts.resize(interface.len(), 0);
                secondary.partition_subset(
                    SubsetView {
                        points: subset_points.as_slice(),
                        members: interface.as_slice(),
                        adjacency,
                    },
                    scratch_parts,
                    subset_parts,
                )?;
                for (&id, &part) in interface.iter().zip(scratch_parts.iter()) {
                    part_vecs[id as usize]
                        .set_level(level, (level * num_parts + part) as PartIndex);
                }
            }

            if level + 1 == num_levels {
                break;
            }

            // Particles with a neighbor in another block of this level feed
            // the next one.
            let is_interface = |&a: &u32| {
                let own = part_vecs[a as usize].level(level);
                adjacency
                    .neighbors(a as usize)
                    .iter()
                    .any(|&b| part_vecs[b as usize].level(level) != own)
            };
            if level == 0 {
                interface.resize(n, 0);
                let count = par::unstable_copy_if(all_ids, interface, is_interface);
                interface.truncate(count);
            } else {
                interface.retain(|id| is_interface(id));
            }
        }

        // Bucket every neighbor pair by how deep its endpoints share blocks.
        let keyed = adjacency.par_edges().map(|(a, b)| {
            let common = PartVec::common(part_vecs[a as usize], part_vecs[b as usize]);
            (usize::min(common, num_levels), (a, b))
        });
        block_edges.assign_par(num_levels + 1, keyed);
        tracing::debug!(
            sizes = ?block_edges.bucket_sizes().collect::<Vec<_>>(),
            "block edges assembled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point1D;
    use crate::geometry::Point2D;

    struct TestParticles<const D: usize> {
        positions: Vec<PointND<D>>,
        fixed: Vec<bool>,
        part_vecs: Vec<PartVec>,
    }

    impl<const D: usize> TestParticles<D> {
        fn fluid(positions: Vec<PointND<D>>) -> Self {
            let n = positions.len();
            Self {
                positions,
                fixed: vec![false; n],
                part_vecs: vec![PartVec::default(); n],
            }
        }

        fn with_fixed(mut self, fixed: impl IntoIterator<Item = usize>) -> Self {
            for i in fixed {
                self.fixed[i] = true;
            }
            self
        }
    }

    impl<const D: usize> ParticleSet<D> for TestParticles<D> {
        fn len(&self) -> usize {
            self.positions.len()
        }

        fn positions(&self) -> &[PointND<D>] {
            &self.positions
        }

        fn is_fixed(&self, i: usize) -> bool {
            self.fixed[i]
        }

        fn part_vecs_mut(&mut self) -> &mut [PartVec] {
            &mut self.part_vecs
        }
    }

    fn line(n: usize) -> TestParticles<1> {
        TestParticles::fluid((0..n).map(|i| Point1D::new(i as f64)).collect())
    }

    fn domain_1d(lo: f64, hi: f64) -> BoundingBox<1> {
        BoundingBox::new(Point1D::new(lo), Point1D::new(hi))
    }

    #[test]
    fn test_part_vec_common() {
        let mut a = PartVec::splat(9);
        let mut b = PartVec::splat(9);
        assert_eq!(PartVec::common(a, b), PartVec::MAX_LEVELS);
        b.set_level(0, 1);
        assert_eq!(PartVec::common(a, b), 0);
        b.set_level(0, 9);
        b.set_level(2, 3);
        a.set_level(3, 5);
        assert_eq!(PartVec::common(a, b), 2);
    }

    #[test]
    fn test_uniform_line_neighbors() {
        let mut particles = line(10);
        let mut mesh = ParticleMesh::new(domain_1d(0.0, 9.0)).with_num_parts(2);
        mesh.update(&mut particles, |_| 1.5).unwrap();

        assert_eq!(mesh.neighbors(0), &[1]);
        assert_eq!(mesh.neighbors(4), &[3, 5]);
        assert_eq!(mesh.neighbors(9), &[8]);
        assert_eq!(mesh.pairs().count(), 9);
    }

    #[test]
    fn test_grid_neighbors() {
        // 3x3 grid at integer coordinates, radius 1.1: the center sees only
        // its four axis neighbors.
        let particles_pos: Vec<Point2D> = (0..9)
            .map(|i| Point2D::new((i % 3) as f64, (i / 3) as f64))
            .collect();
        let mut particles = TestParticles::fluid(particles_pos);
        let mut mesh = ParticleMesh::new(BoundingBox::new(
            Point2D::new(0.0, 0.0),
            Point2D::new(2.0, 2.0),
        ))
        .with_num_parts(2);
        mesh.update(&mut particles, |_| 1.1).unwrap();

        assert_eq!(mesh.neighbors(4), &[1, 3, 5, 7]);
        assert_eq!(mesh.neighbors(0), &[1, 3]);
    }

    #[test]
    fn test_fixed_particle_mirroring() {
        // Fixed particle near the lower wall of [0, 1]: its mirror image
        // falls at -0.05 and the fluid particle at 0.03 is well within the
        // tripled radius.
        let mut particles = TestParticles::fluid(vec![
            Point1D::new(0.05),
            Point1D::new(0.03),
        ])
        .with_fixed([0]);
        let mut mesh = ParticleMesh::new(domain_1d(0.0, 1.0)).with_num_parts(1);
        mesh.update(&mut particles, |_| 0.05).unwrap();

        assert_eq!(mesh.fixed_ids(), &[0]);
        assert_eq!(mesh.interp_neighbors(0), &[1]);
    }

    #[test]
    fn test_interp_neighbors_are_never_fixed() {
        let positions: Vec<Point1D> = (0..20).map(|i| Point1D::new(0.05 * i as f64)).collect();
        let mut particles = TestParticles::fluid(positions).with_fixed([0, 1, 2]);
        let mut mesh = ParticleMesh::new(domain_1d(0.0, 1.0)).with_num_parts(2);
        mesh.update(&mut particles, |_| 0.12).unwrap();

        assert_eq!(mesh.fixed_ids(), &[0, 1, 2]);
        for rank in 0..3 {
            let interp = mesh.interp_neighbors(rank);
            assert!(!interp.is_empty());
            assert!(interp.iter().all(|&j| j > 2), "{interp:?}");
            assert!(interp.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_zero_radius_clears_outputs() {
        let mut particles = line(10);
        let mut mesh = ParticleMesh::new(domain_1d(0.0, 9.0)).with_num_parts(2);
        mesh.update(&mut particles, |_| 1.5).unwrap();
        assert_ne!(mesh.pairs().count(), 0);

        let outcome = mesh.update(&mut particles, |i| if i == 7 { 0.0 } else { 1.5 });
        assert_eq!(outcome.unwrap_err(), Error::InvalidRadius);
        assert_eq!(mesh.pairs().count(), 0);
        assert_eq!(mesh.block_pairs().item_count(), 0);
        assert_eq!(mesh.fixed_ids(), &[] as &[u32]);
    }

    #[test]
    fn test_rejects_more_parts_than_particles() {
        let mut particles = line(3);
        let mut mesh = ParticleMesh::new(domain_1d(0.0, 2.0)).with_num_parts(8);
        let outcome = mesh.update(&mut particles, |_| 1.5);
        assert_eq!(
            outcome.unwrap_err(),
            Error::NotEnoughNodes { nodes: 3, parts: 8 }
        );
    }

    #[test]
    fn test_two_separated_clusters_have_no_interface() {
        // Two clumps far apart: the top-level cut falls between them, no
        // particle is on an interface, and every pair lands in the deepest
        // bucket.
        let mut positions = Vec::new();
        for i in 0..12 {
            positions.push(Point2D::new(0.3 * (i % 4) as f64, 0.3 * (i / 4) as f64));
        }
        for i in 0..12 {
            positions.push(Point2D::new(50.0 + 0.3 * (i % 4) as f64, 0.3 * (i / 4) as f64));
        }
        let mut particles = TestParticles::fluid(positions);
        let mut mesh = ParticleMesh::new(BoundingBox::new(
            Point2D::new(0.0, 0.0),
            Point2D::new(52.0, 2.0),
        ))
        .with_num_parts(2);
        mesh.update(&mut particles, |_| 0.5).unwrap();

        let blocks = mesh.block_pairs();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.bucket(0).is_empty());
        assert!(blocks.bucket(1).is_empty());
        assert_eq!(blocks.bucket(2).len(), mesh.pairs().count());
        assert_ne!(blocks.bucket(2).len(), 0);
    }

    /// Invariants shared by the dam-break style checks below.
    fn check_mesh_invariants<const D: usize>(
        mesh: &ParticleMesh<D>,
        particles: &TestParticles<D>,
        radius: f64,
        num_levels: usize,
    ) {
        let n = particles.len();
        // Neighbor lists: strictly ascending, within the radius, no self.
        for i in 0..n {
            let neighbors = mesh.neighbors(i);
            assert!(neighbors.windows(2).all(|w| w[0] < w[1]));
            for &j in neighbors {
                assert_ne!(j as usize, i);
                let dist =
                    (particles.positions[i] - particles.positions[j as usize]).norm();
                assert!(dist <= radius + 1e-12);
            }
        }

        // The buckets partition the edge set: nothing lost, nothing twice.
        let mut from_blocks: Vec<(u32, u32)> = mesh
            .block_pairs()
            .buckets()
            .flatten()
            .copied()
            .collect();
        from_blocks.sort_unstable();
        let mut edges: Vec<(u32, u32)> = mesh.pairs().collect();
        edges.sort_unstable();
        assert_eq!(from_blocks, edges);

        // Bucket keys match the published part vectors, and pairs sharing a
        // particle within one bucket share their whole block prefix, which
        // is what makes per-block traversal race-free.
        let prefix = |i: u32, k: usize| {
            (0..k)
                .map(|l| particles.part_vecs[i as usize].level(l))
                .collect::<Vec<_>>()
        };
        for (key, bucket) in mesh.block_pairs().buckets().enumerate() {
            for &(a, b) in bucket {
                let common = PartVec::common(
                    particles.part_vecs[a as usize],
                    particles.part_vecs[b as usize],
                );
                assert_eq!(usize::min(common, num_levels), key);
                assert_eq!(prefix(a, key), prefix(b, key));
            }
        }
    }

    #[test]
    fn test_block_structure_on_a_dense_sheet() {
        let positions: Vec<Point2D> = (0..20 * 10)
            .map(|i| Point2D::new((i % 20) as f64, (i / 20) as f64))
            .collect();
        let mut particles =
            TestParticles::fluid(positions).with_fixed((0..20).collect::<Vec<_>>());
        let mut mesh = ParticleMesh::new(BoundingBox::new(
            Point2D::new(0.0, 0.0),
            Point2D::new(19.0, 9.0),
        ))
        .with_num_parts(4);
        mesh.update(&mut particles, |_| 1.6).unwrap();

        check_mesh_invariants(&mesh, &particles, 1.6, 2);

        // A connected sheet split in four parts has a real interface.
        assert_ne!(mesh.block_pairs().bucket(0).len(), 0);
        // The intra-leaf bucket carries the bulk of the edges.
        let sizes: Vec<usize> = mesh.block_pairs().bucket_sizes().collect();
        assert!(sizes[2] > sizes[0] && sizes[2] > sizes[1], "{sizes:?}");
    }

    #[test]
    fn test_three_levels() {
        let positions: Vec<Point2D> = (0..24 * 12)
            .map(|i| Point2D::new((i % 24) as f64, (i / 24) as f64))
            .collect();
        let mut particles = TestParticles::fluid(positions);
        let mut mesh = ParticleMesh::new(BoundingBox::new(
            Point2D::new(0.0, 0.0),
            Point2D::new(23.0, 11.0),
        ))
        .with_num_parts(3)
        .with_num_levels(3);
        mesh.update(&mut particles, |_| 1.6).unwrap();

        assert_eq!(mesh.block_pairs().len(), 4);
        check_mesh_invariants(&mesh, &particles, 1.6, 3);
    }

    #[test]
    fn test_random_cloud_invariants() {
        use rand::Rng as _;
        use rand::SeedableRng as _;

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let positions: Vec<Point2D> = (0..300)
            .map(|_| Point2D::new(rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)))
            .collect();
        let mut particles = TestParticles::fluid(positions);
        let mut mesh = ParticleMesh::new(BoundingBox::new(
            Point2D::new(0.0, 0.0),
            Point2D::new(10.0, 10.0),
        ))
        .with_num_parts(4);
        mesh.update(&mut particles, |_| 0.8).unwrap();

        check_mesh_invariants(&mesh, &particles, 0.8, 2);
    }

    #[test]
    fn test_update_is_idempotent_across_steps() {
        let mut particles = line(30);
        let mut mesh = ParticleMesh::new(domain_1d(0.0, 29.0)).with_num_parts(2);
        mesh.update(&mut particles, |_| 1.5).unwrap();
        let pairs_before: Vec<_> = mesh.pairs().collect();
        let blocks_before: Vec<usize> = mesh.block_pairs().bucket_sizes().collect();

        mesh.update(&mut particles, |_| 1.5).unwrap();
        assert_eq!(mesh.pairs().collect::<Vec<_>>(), pairs_before);
        assert_eq!(
            mesh.block_pairs().bucket_sizes().collect::<Vec<_>>(),
            blocks_before
        );
    }
}
