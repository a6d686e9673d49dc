//! Tiled parallel-for over an optional thread pool.
//!
//! Every pipeline stage is expressed as a set of independent tiles over a
//! 1D or 2D index range. With a pool, tiles run unordered on its workers
//! and the call blocks until all of them finish (each stage is a
//! barrier). Without a pool, the *same* tile grid runs sequentially on
//! the caller thread — parallelism is a scheduling choice, never an
//! observable-output choice, so the two paths are bit-identical.

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::core::blocking::BlockIterator;

/// Run `f(start, len)` for every tile of `[0, range)` with tile size
/// `tile` (the last tile may be ragged).
pub(crate) fn compute_1d_tiled<F>(threadpool: Option<&ThreadPool>, range: usize, tile: usize, f: F)
where
    F: Fn(usize, usize) + Sync,
{
    debug_assert!(tile > 0);
    match threadpool {
        None => {
            for (start, len) in BlockIterator::new(range, tile) {
                f(start, len);
            }
        }
        Some(pool) => {
            let tiles: Vec<(usize, usize)> = BlockIterator::new(range, tile).collect();
            pool.install(|| {
                tiles.into_par_iter().for_each(|(start, len)| f(start, len));
            });
        }
    }
}

/// Run `f(i_start, j_start, i_len, j_len)` for every tile of the
/// `[0, range_i) x [0, range_j)` grid with tile sizes `(tile_i, tile_j)`.
pub(crate) fn compute_2d_tiled<F>(
    threadpool: Option<&ThreadPool>,
    range_i: usize,
    range_j: usize,
    tile_i: usize,
    tile_j: usize,
    f: F,
) where
    F: Fn(usize, usize, usize, usize) + Sync,
{
    debug_assert!(tile_i > 0 && tile_j > 0);
    match threadpool {
        None => {
            for (i_start, i_len) in BlockIterator::new(range_i, tile_i) {
                for (j_start, j_len) in BlockIterator::new(range_j, tile_j) {
                    f(i_start, j_start, i_len, j_len);
                }
            }
        }
        Some(pool) => {
            let tiles: Vec<(usize, usize, usize, usize)> = BlockIterator::new(range_i, tile_i)
                .flat_map(|(i_start, i_len)| {
                    BlockIterator::new(range_j, tile_j)
                        .map(move |(j_start, j_len)| (i_start, j_start, i_len, j_len))
                })
                .collect();
            pool.install(|| {
                tiles
                    .into_par_iter()
                    .for_each(|(i_start, j_start, i_len, j_len)| f(i_start, j_start, i_len, j_len));
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(workers: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .unwrap()
    }

    #[test]
    fn test_1d_covers_range_exactly_once() {
        let range = 37;
        let hits: Vec<AtomicUsize> = (0..range).map(|_| AtomicUsize::new(0)).collect();
        compute_1d_tiled(Some(&pool(4)), range, 5, |start, len| {
            for i in start..start + len {
                hits[i].fetch_add(1, Ordering::Relaxed);
            }
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_2d_sequential_equals_parallel() {
        let (range_i, range_j) = (13, 9);
        let run = |threadpool: Option<&ThreadPool>| {
            let cells: Vec<AtomicUsize> =
                (0..range_i * range_j).map(|_| AtomicUsize::new(0)).collect();
            compute_2d_tiled(threadpool, range_i, range_j, 4, 2, |i0, j0, il, jl| {
                for i in i0..i0 + il {
                    for j in j0..j0 + jl {
                        cells[i * range_j + j].fetch_add(i * 100 + j, Ordering::Relaxed);
                    }
                }
            });
            cells
                .into_iter()
                .map(|c| c.into_inner())
                .collect::<Vec<_>>()
        };

        let sequential = run(None);
        let parallel = run(Some(&pool(4)));
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_empty_range_runs_nothing() {
        compute_1d_tiled(None, 0, 4, |_, _| panic!("tile on empty range"));
        compute_2d_tiled(None, 0, 5, 2, 2, |_, _, _, _| panic!("tile on empty range"));
    }
}
