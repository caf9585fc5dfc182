//! Parallel primitives over a process-wide worker pool.
//!
//! Every helper in this module runs inside a single shared
//! [`rayon::ThreadPool`] so nested calls reuse the same workers. The pool is
//! built lazily with [`DEFAULT_NUM_THREADS`] workers unless [`init`] is called
//! first.

use crate::jagged::Jagged;
use crate::jagged::SharedSlice;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::OnceLock;

/// Worker count used when [`init`] was never called.
pub const DEFAULT_NUM_THREADS: usize = 8;

static POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();

fn build_pool(num_threads: usize) -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("maille-worker-{i}"))
        .build()
        .expect("failed to build the worker pool")
}

/// Set the worker count for the whole process.
///
/// # Panics
///
/// Panics if the pool has already been initialized, either by an earlier call
/// or lazily by a primitive.
pub fn init(num_threads: usize) {
    assert!(num_threads > 0, "worker count must be positive");
    let mut fresh = false;
    POOL.get_or_init(|| {
        fresh = true;
        build_pool(num_threads)
    });
    assert!(fresh, "the worker pool is already initialized");
    tracing::debug!(num_threads, "worker pool initialized");
}

fn pool() -> &'static rayon::ThreadPool {
    POOL.get_or_init(|| build_pool(DEFAULT_NUM_THREADS))
}

/// Number of workers in the pool.
pub fn num_threads() -> usize {
    pool().current_num_threads()
}

/// Invoke `f` on every item, in no particular order.
pub fn for_each<I, F>(items: I, f: F)
where
    I: IntoParallelIterator + Send,
    F: Fn(I::Item) + Sync + Send,
{
    pool().install(|| items.into_par_iter().for_each(f));
}

/// Invoke the fallible `f` on every item.
///
/// Once a task fails no new items are started; tasks already running finish
/// their grain, and one captured error is returned after all of them joined.
pub fn try_for_each<I, F, E>(items: I, f: F) -> Result<(), E>
where
    I: IntoParallelIterator + Send,
    F: Fn(I::Item) -> Result<(), E> + Sync + Send,
    E: Send,
{
    pool().install(|| items.into_par_iter().try_for_each(f))
}

/// The contiguous chunk handled by `thread` when `len` items are split over
/// `count` threads: `len / count` items per chunk, with the remainder spread
/// over the first chunks.
pub fn thread_chunk(len: usize, thread: usize, count: usize) -> Range<usize> {
    let quotient = len / count;
    let remainder = len % count;
    let first = thread * quotient + usize::min(thread, remainder);
    let last = (thread + 1) * quotient + usize::min(thread + 1, remainder);
    first..last
}

/// Invoke `f(item, thread)` with a fixed item-to-thread mapping.
///
/// The input is split into exactly [`num_threads`] contiguous chunks per
/// [`thread_chunk`], so for a given `(len, num_threads)` every item is always
/// paired with the same thread index.
pub fn deterministic_for_each<T, F>(items: &[T], f: F)
where
    T: Sync,
    F: Fn(&T, usize) + Sync + Send,
{
    let count = num_threads();
    pool().install(|| {
        (0..count).into_par_iter().for_each(|thread| {
            for item in &items[thread_chunk(items.len(), thread, count)] {
                f(item, thread);
            }
        });
    });
}

/// Iterate buckets one after the other, items within a bucket in parallel.
pub fn block_for_each<T, F>(buckets: &Jagged<T>, f: F)
where
    T: Sync,
    F: Fn(&T) + Sync + Send,
{
    for bucket in buckets.buckets() {
        pool().install(|| bucket.into_par_iter().for_each(&f));
    }
}

/// Parallel reduction.
///
/// `combine` must be associative; it does not have to be commutative because
/// partial results are merged along a stable split tree.
pub fn fold<I, R, F, C>(items: I, init: R, fold_op: F, combine: C) -> R
where
    I: IntoParallelIterator + Send,
    R: Clone + Send + Sync,
    F: Fn(R, I::Item) -> R + Sync + Send,
    C: Fn(R, R) -> R + Sync + Send,
{
    pool().install(|| {
        items
            .into_par_iter()
            .fold(|| init.clone(), &fold_op)
            .reduce(|| init.clone(), &combine)
    })
}

/// Map `input` into the preallocated `output`, element-wise.
pub fn transform<T, U, F>(input: &[T], output: &mut [U], f: F)
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    assert_eq!(input.len(), output.len());
    pool().install(|| {
        output
            .par_iter_mut()
            .zip(input)
            .for_each(|(out, item)| *out = f(item));
    });
}

/// Items filtered into a chunk-local buffer before each flush.
const FLUSH_CAP: usize = 64;

/// Copy the items satisfying `pred` into a prefix of `output`, in parallel.
///
/// Returns the number of copied items. Survivors end up in no particular
/// order: each chunk filters into a small local buffer and flushes it at a
/// position claimed with one atomic fetch-add.
pub fn unstable_copy_if<T, F>(input: &[T], output: &mut [T], pred: F) -> usize
where
    T: Copy + Send + Sync,
    F: Fn(&T) -> bool + Sync + Send,
{
    assert!(output.len() >= input.len());
    let cursor = AtomicUsize::new(0);
    let out = SharedSlice(output.as_mut_ptr());
    pool().install(|| {
        input.par_chunks(FLUSH_CAP).for_each(|chunk| {
            let mut buffer = Vec::with_capacity(FLUSH_CAP);
            buffer.extend(chunk.iter().filter(|&item| pred(item)));
            if buffer.is_empty() {
                return;
            }
            let start = cursor.fetch_add(buffer.len(), Ordering::Relaxed);
            for (k, item) in buffer.into_iter().enumerate() {
                // Disjoint slots: the fetch-add reserved this range.
                unsafe { out.write(start + k, item) };
            }
        });
    });
    cursor.into_inner()
}

/// Parallel unstable sort by key.
pub fn sort_by_key<T, K, F>(items: &mut [T], key: F)
where
    T: Send,
    K: Ord + Send,
    F: Fn(&T) -> K + Sync + Send,
{
    pool().install(|| items.par_sort_unstable_by_key(key));
}

/// Parallel unstable sort with an explicit comparator.
pub fn sort_by<T, F>(items: &mut [T], compare: F)
where
    T: Send,
    F: Fn(&T, &T) -> std::cmp::Ordering + Sync + Send,
{
    pool().install(|| items.par_sort_unstable_by(compare));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_thread_chunks_cover_input() {
        for len in [0, 1, 7, 64, 1001] {
            for count in [1, 2, 7, 8] {
                let mut next = 0;
                for thread in 0..count {
                    let chunk = thread_chunk(len, thread, count);
                    assert_eq!(chunk.start, next);
                    assert!(chunk.len() == len / count || chunk.len() == len / count + 1);
                    next = chunk.end;
                }
                assert_eq!(next, len);
            }
        }
    }

    #[test]
    fn test_deterministic_for_each_mapping_is_stable() {
        let items: Vec<usize> = (0..1000).collect();
        let run = || {
            let owners: Vec<AtomicUsize> =
                (0..items.len()).map(|_| AtomicUsize::new(usize::MAX)).collect();
            deterministic_for_each(&items, |&item, thread| {
                owners[item].store(thread, Ordering::Relaxed);
            });
            owners
                .into_iter()
                .map(AtomicUsize::into_inner)
                .collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first, run());
        for (item, &owner) in first.iter().enumerate() {
            assert!(thread_chunk(1000, owner, num_threads()).contains(&item));
        }
    }

    #[test]
    fn test_try_for_each_reports_one_failure() {
        let outcome = try_for_each(0..10_000_usize, |i| {
            if i % 977 == 0 && i != 0 {
                Err(i)
            } else {
                Ok(())
            }
        });
        assert_eq!(outcome.unwrap_err() % 977, 0);
    }

    #[test]
    fn test_fold_sum() {
        let total = fold(0..1000_u64, 0_u64, |acc, x| acc + x, |a, b| a + b);
        assert_eq!(total, 499_500);
    }

    #[test]
    fn test_block_for_each_visits_every_item_once() {
        let mut buckets = Jagged::new();
        buckets.push_bucket(0..100_u64);
        buckets.push_bucket(100..130_u64);
        buckets.push_bucket(std::iter::empty());
        buckets.push_bucket(130..200_u64);
        let sum = AtomicU64::new(0);
        block_for_each(&buckets, |&x| {
            sum.fetch_add(x, Ordering::Relaxed);
        });
        assert_eq!(sum.into_inner(), (0..200).sum::<u64>());
    }

    #[test]
    fn test_transform() {
        let input: Vec<i32> = (0..500).collect();
        let mut output = vec![0_i64; 500];
        transform(&input, &mut output, |&x| i64::from(x) * 2);
        assert!(output.iter().enumerate().all(|(i, &x)| x == 2 * i as i64));
    }

    proptest!(
        #[test]
        fn test_unstable_copy_if_keeps_the_right_multiset(input in proptest::collection::vec(0_u32..50, 0..500)) {
            let mut output = vec![0_u32; input.len()];
            let kept = unstable_copy_if(&input, &mut output, |&x| x % 3 == 0);

            let mut expected: Vec<u32> = input.iter().copied().filter(|&x| x % 3 == 0).collect();
            let mut actual = output[..kept].to_vec();
            expected.sort_unstable();
            actual.sort_unstable();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn test_sort_by_key_sorts_a_permutation(input in proptest::collection::vec(any::<i32>(), 0..500)) {
            let mut sorted = input.clone();
            sort_by_key(&mut sorted, |&x| x);
            prop_assert!(sorted.windows(2).all(|w| w[0] <= w[1]));

            let mut expected = input;
            expected.sort_unstable();
            prop_assert_eq!(sorted, expected);
        }
    );
}
