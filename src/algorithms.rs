use std::collections::TryReserveError;
use std::fmt;

mod coarsen;
mod fiduccia_mattheyses;
mod greedy_growing;
mod multilevel;
mod recursive_bisection;

pub use coarsen::Coarsen;
pub use coarsen::CoarsenGem;
pub use coarsen::CoarsenHem;
pub use coarsen::Coarsening;
pub use fiduccia_mattheyses::FiducciaMattheyses;
pub use fiduccia_mattheyses::Metadata as FmMetadata;
pub use greedy_growing::GreedyGrowing;
pub use multilevel::Multilevel;
pub use recursive_bisection::Rcb;
pub use recursive_bisection::Rib;

/// Common errors thrown by algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// An allocation failed, out of memory error.
    Alloc,

    /// Input sets don't have matching lengths.
    InputLenMismatch { expected: usize, actual: usize },

    /// Input contains negative values and such values are not supported.
    NegativeValues,

    /// More parts requested than there are nodes, or no part at all.
    NotEnoughNodes { nodes: usize, parts: usize },

    /// A search or mirror radius is zero, negative or not finite.
    InvalidRadius,

    /// The requested level count exceeds the per-particle capacity, or the
    /// part ids would overflow their storage.
    TooManyLevels { levels: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc => write!(f, "out of memory"),
            Self::InputLenMismatch { expected, actual } => write!(
                f,
                "input sets don't have the same length (expected {expected} items, got {actual})",
            ),
            Self::NegativeValues => write!(f, "input contains negative values"),
            Self::NotEnoughNodes { nodes, parts } => {
                write!(f, "cannot split {nodes} nodes into {parts} parts")
            }
            Self::InvalidRadius => write!(f, "radius must be positive and finite"),
            Self::TooManyLevels { levels } => {
                write!(f, "cannot track {levels} partitioning levels")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::Alloc
    }
}

/// Map elements to contiguous, evenly sized ranges of parts.
///
/// Part sizes differ by at most one. This is the degenerate fallback used
/// when the element order is already a good partition, or as a baseline in
/// comparisons.
///
/// # Example
///
/// ```rust
/// # fn main() -> Result<(), maille::Error> {
/// use maille::Partition as _;
///
/// let mut partition = [0; 7];
/// maille::Uniform { part_count: 3 }.partition(&mut partition, ())?;
/// assert_eq!(partition, [0, 0, 0, 1, 1, 2, 2]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Uniform {
    pub part_count: usize,
}

impl crate::Partition<()> for Uniform {
    type Metadata = ();
    type Error = Error;

    fn partition(&mut self, part_ids: &mut [usize], _: ()) -> Result<(), Error> {
        let len = part_ids.len();
        if self.part_count == 0 || self.part_count > len {
            return Err(Error::NotEnoughNodes {
                nodes: len,
                parts: self.part_count,
            });
        }
        let size = len / self.part_count;
        let remainder = len % self.part_count;
        for part in 0..self.part_count {
            let first = part * size + usize::min(part, remainder);
            let last = (part + 1) * size + usize::min(part + 1, remainder);
            part_ids[first..last].fill(part);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Partition as _;

    #[test]
    fn test_uniform_sizes_differ_by_at_most_one() {
        for len in [1, 5, 16, 97] {
            for parts in [1, 2, 3, len] {
                let mut partition = vec![0; len];
                Uniform { part_count: parts }
                    .partition(&mut partition, ())
                    .unwrap();
                let loads = crate::imbalance::compute_parts_load(
                    &partition,
                    parts,
                    vec![1_i64; len],
                );
                assert!(loads.iter().all(|&l| l > 0));
                let min = loads.iter().min().unwrap();
                let max = loads.iter().max().unwrap();
                assert!(max - min <= 1, "len={len} parts={parts} loads={loads:?}");
            }
        }
    }

    #[test]
    fn test_uniform_rejects_too_many_parts() {
        let mut partition = [0; 3];
        let outcome = Uniform { part_count: 4 }.partition(&mut partition, ());
        assert_eq!(
            outcome.unwrap_err(),
            Error::NotEnoughNodes { nodes: 3, parts: 4 }
        );
    }
}
