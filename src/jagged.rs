//! Compressed storage for a sequence of variable-length buckets.

use rayon::iter::ParallelIterator;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

/// A list of buckets stored back-to-back in a single allocation.
///
/// Buckets keep their insertion order and are addressed by index. Clearing
/// keeps the underlying capacity, so a `Jagged` can be refilled every
/// simulation step without going through the allocator.
#[derive(Debug, Clone)]
pub struct Jagged<T> {
    offsets: Vec<usize>,
    items: Vec<T>,
}

impl<T> Default for Jagged<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Jagged<T> {
    pub fn new() -> Self {
        Self {
            offsets: vec![0],
            items: Vec::new(),
        }
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of items across all buckets.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn bucket(&self, k: usize) -> &[T] {
        &self.items[self.offsets[k]..self.offsets[k + 1]]
    }

    pub fn buckets(&self) -> impl Iterator<Item = &[T]> + Clone + '_ {
        (0..self.len()).map(move |k| self.bucket(k))
    }

    pub fn bucket_sizes(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets.windows(2).map(|w| w[1] - w[0])
    }

    /// Remove every bucket, keeping allocations.
    pub fn clear(&mut self) {
        self.offsets.truncate(1);
        self.items.clear();
    }

    pub fn push_bucket<I>(&mut self, bucket: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.extend(bucket);
        self.offsets.push(self.items.len());
    }
}

impl<T> Jagged<T>
where
    T: Copy + Default + Send + Sync,
{
    /// Rebuild the whole structure from keyed items, in parallel.
    ///
    /// Every `(key, item)` pair lands in bucket `key`; items within a bucket
    /// end up in no particular order. The iterator is consumed twice: once to
    /// size the buckets and once to scatter the items through per-bucket
    /// atomic write cursors, so no locking is involved.
    pub fn assign_par<I>(&mut self, bucket_count: usize, keyed: I)
    where
        I: ParallelIterator<Item = (usize, T)> + Clone,
    {
        let counts = keyed
            .clone()
            .fold(
                || vec![0_usize; bucket_count],
                |mut acc, (key, _)| {
                    acc[key] += 1;
                    acc
                },
            )
            .reduce(
                || vec![0_usize; bucket_count],
                |mut acc, partial| {
                    for (a, b) in acc.iter_mut().zip(partial) {
                        *a += b;
                    }
                    acc
                },
            );

        self.offsets.clear();
        self.offsets.push(0);
        let mut total = 0;
        for count in &counts {
            total += count;
            self.offsets.push(total);
        }

        self.items.clear();
        self.items.resize(total, T::default());
        let cursors: Vec<AtomicUsize> = self.offsets[..bucket_count]
            .iter()
            .map(|&offset| AtomicUsize::new(offset))
            .collect();

        let items = SharedSlice(self.items.as_mut_ptr());
        keyed.for_each(|(key, item)| {
            let slot = cursors[key].fetch_add(1, Ordering::Relaxed);
            // Each slot index is handed out exactly once, so the writes
            // cannot alias.
            unsafe { items.write(slot, item) };
        });
    }
}

/// A raw slice handle that allows disjoint writes from multiple threads.
///
/// Callers must hand out each index to at most one writer.
pub(crate) struct SharedSlice<T>(pub(crate) *mut T);

impl<T> SharedSlice<T> {
    pub(crate) unsafe fn write(&self, index: usize, value: T) {
        unsafe { self.0.add(index).write(value) };
    }
}

unsafe impl<T: Send> Send for SharedSlice<T> {}
unsafe impl<T: Send> Sync for SharedSlice<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::iter::IntoParallelIterator;

    #[test]
    fn test_push_and_read() {
        let mut jagged = Jagged::new();
        jagged.push_bucket([1, 2, 3]);
        jagged.push_bucket([]);
        jagged.push_bucket([4]);
        assert_eq!(jagged.len(), 3);
        assert_eq!(jagged.bucket(0), &[1, 2, 3]);
        assert_eq!(jagged.bucket(1), &[] as &[i32]);
        assert_eq!(jagged.bucket(2), &[4]);
        assert_eq!(jagged.item_count(), 4);

        jagged.clear();
        assert_eq!(jagged.len(), 0);
        assert_eq!(jagged.item_count(), 0);
    }

    #[test]
    fn test_assign_par_matches_serial_bucketization() {
        let items: Vec<(usize, u32)> = (0..10_000_u32).map(|x| ((x % 7) as usize, x)).collect();

        let mut jagged = Jagged::new();
        jagged.assign_par(7, items.clone().into_par_iter());

        let mut expected = vec![Vec::new(); 7];
        for &(key, x) in &items {
            expected[key].push(x);
        }

        assert_eq!(jagged.len(), 7);
        for key in 0..7 {
            let mut bucket = jagged.bucket(key).to_vec();
            bucket.sort_unstable();
            assert_eq!(bucket, expected[key]);
        }
    }

    #[test]
    fn test_assign_par_with_empty_buckets() {
        let items: Vec<(usize, u32)> = vec![(3, 1), (3, 2), (0, 3)];
        let mut jagged = Jagged::new();
        jagged.assign_par(5, items.into_par_iter());
        assert_eq!(jagged.len(), 5);
        assert_eq!(jagged.bucket(0), &[3]);
        assert!(jagged.bucket(1).is_empty());
        assert!(jagged.bucket(2).is_empty());
        assert_eq!(jagged.bucket_sizes().collect::<Vec<_>>(), [1, 0, 0, 2, 0]);
        assert!(jagged.bucket(4).is_empty());
    }
}
