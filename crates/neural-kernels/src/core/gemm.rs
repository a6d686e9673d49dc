//! Blocked, packed, tiled matrix-multiplication engine.
//!
//! Computes `C[m x n] = A[m x k] · Bᵀ`, where `B` is supplied as an
//! `n x k` row-major matrix (the natural layout of a weight matrix whose
//! rows are output channels). The four-stage pipeline follows the
//! fully-connected template:
//!
//! 1. pack all of `A` (2D parallel tiles over row and reduction blocks);
//! 2. for each reduction block, sequentially:
//!    a. pack the `B` rows restricted to that block (1D parallel tiles);
//!    b. for each row block, a 2D parallel tile loop over
//!       (column blocks, row subblocks) invoking one microkernel per
//!       column subblock.
//!
//! The reduction-block loop is sequential because every multiplication
//! tile reads the packed `B` produced for that block — a true data
//! dependency. Multiplication tiles write disjoint `C` regions, so each
//! stage is safe for unordered execution, and the first reduction block
//! overwrites `C` (unless `accumulate` is set) while later blocks
//! accumulate — every output element is written exactly once per call.

use rayon::ThreadPool;

use crate::core::blocking::{round_up, BlockIterator, BlockingPlan};
use crate::core::packing::{pack_a_block, pack_b_block};
use crate::parallel::{compute_1d_tiled, compute_2d_tiled};
use crate::profile::{Phase, PhaseClock};
use crate::simd::dispatch::{column_mask, ResolvedKernels, COL_SUBBLOCK_MAX};

/// Phase attribution for the two packing stages; the axes of the engine
/// carry different tensors depending on the operator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PackingPhases {
    pub(crate) pack_a: Phase,
    pub(crate) pack_b: Phase,
}

impl PackingPhases {
    /// Fully-connected template: `A` is the activation matrix, `B` the
    /// kernel matrix.
    pub(crate) const FULLY_CONNECTED: Self = Self {
        pack_a: Phase::InputTransform,
        pack_b: Phase::KernelTransform,
    };
}

/// Run the blocked engine.
///
/// `packed_a` must hold `round_up(m, 4) * k` elements and `packed_b`
/// `round_up(n, 24) * plan.input_channels_block_max` elements, both
/// 64-byte aligned (arena spans). With `accumulate`, existing `C` values
/// are summed into instead of overwritten.
///
/// # Safety
///
/// `a` must be valid for `m * k` reads, `b` for `n * k` reads, and `c`
/// for writes to `m` rows of `n` elements spaced `ldc` apart. Scratch
/// pointers must satisfy the size contract above and not alias the
/// operands.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn blocked_sgemm(
    m: usize,
    k: usize,
    n: usize,
    a: *const f32,
    b: *const f32,
    c: *mut f32,
    ldc: usize,
    accumulate: bool,
    packed_a: *mut f32,
    packed_b: *mut f32,
    plan: &BlockingPlan,
    kernels: &ResolvedKernels,
    phases: PackingPhases,
    threadpool: Option<&ThreadPool>,
    clock: &mut PhaseClock<'_>,
) {
    let a_addr = a as usize;
    let b_addr = b as usize;
    let c_addr = c as usize;
    let packed_a_addr = packed_a as usize;
    let packed_b_addr = packed_b as usize;

    clock.run(phases.pack_a, || {
        compute_2d_tiled(
            threadpool,
            m,
            k,
            plan.batch_block_max,
            plan.input_channels_block_max,
            |row_block_start, reduction_block_start, row_block_size, reduction_block_size| {
                // Tiles write disjoint packed regions (packing layout
                // invariant), so unordered execution is sound.
                unsafe {
                    pack_a_block(
                        a_addr as *const f32,
                        packed_a_addr as *mut f32,
                        k,
                        row_block_start,
                        reduction_block_start,
                        row_block_size,
                        reduction_block_size,
                        plan.batch_subblock_max,
                    );
                }
            },
        );
    });

    for (reduction_block_start, reduction_block_size) in
        BlockIterator::new(k, plan.input_channels_block_max)
    {
        clock.run(phases.pack_b, || {
            compute_1d_tiled(
                threadpool,
                n,
                plan.output_channels_block_max,
                |col_block_start, col_block_size| {
                    unsafe {
                        pack_b_block(
                            b_addr as *const f32,
                            packed_b_addr as *mut f32,
                            k,
                            reduction_block_start,
                            reduction_block_size,
                            col_block_start,
                            col_block_size,
                            plan.output_channels_subblock_max,
                        );
                    }
                },
            );
        });

        clock.run(Phase::BlockMultiplication, || {
            let kernels = *kernels;
            for (row_block_start, row_block_size) in BlockIterator::new(m, plan.batch_block_max) {
                let row_block_stride = round_up(row_block_size, plan.batch_subblock_max);
                compute_2d_tiled(
                    threadpool,
                    n,
                    row_block_size,
                    plan.output_channels_block_max,
                    plan.batch_subblock_max,
                    |col_block_start, row_subblock_start, col_block_size, row_subblock_size| {
                        let packed_a = packed_a_addr as *const f32;
                        let packed_b = packed_b_addr as *const f32;
                        let c = c_addr as *mut f32;

                        let update = if accumulate { 1 } else { reduction_block_start };
                        // Tiles cover disjoint (row, column) output
                        // ranges, exhaustively over the grid.
                        unsafe {
                            let a_tile = packed_a.add(
                                row_block_start * k
                                    + reduction_block_start * row_block_stride
                                    + row_subblock_start * reduction_block_size,
                            );

                            let mut col_subblock_start = 0;
                            while col_subblock_start < col_block_size {
                                let col_subblock_size =
                                    (col_block_size - col_subblock_start).min(COL_SUBBLOCK_MAX);
                                let kernel = kernels.select(row_subblock_size, col_subblock_size);
                                let b_tile = packed_b.add(
                                    (col_block_start + col_subblock_start) * reduction_block_size,
                                );
                                let c_tile = c.add(
                                    (row_block_start + row_subblock_start) * ldc
                                        + col_block_start
                                        + col_subblock_start,
                                );
                                kernel(
                                    reduction_block_size,
                                    update,
                                    a_tile,
                                    b_tile,
                                    c_tile,
                                    ldc,
                                    column_mask(col_subblock_size),
                                );
                                col_subblock_start += COL_SUBBLOCK_MAX;
                            }
                        }
                    },
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arena::Arena;
    use crate::core::packing::{packed_a_size, packed_b_size};
    use crate::hardware::HardwareProfile;
    use crate::simd::dispatch::{KernelTable, ROW_SUBBLOCK_MAX};
    use crate::simd::simd_level;

    fn naive(m: usize, k: usize, n: usize, a: &[f32], b: &[f32]) -> Vec<f32> {
        let mut c = vec![0.0f32; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for p in 0..k {
                    sum += a[i * k + p] * b[j * k + p];
                }
                c[i * n + j] = sum;
            }
        }
        c
    }

    fn run_engine(
        m: usize,
        k: usize,
        n: usize,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
        accumulate: bool,
        plan: &BlockingPlan,
    ) {
        let kernels = KernelTable::for_level(simd_level()).resolve().unwrap();
        let arena = Arena::for_spans(&[
            packed_a_size(m, k, ROW_SUBBLOCK_MAX),
            packed_b_size(n, plan.input_channels_block_max, COL_SUBBLOCK_MAX),
        ])
        .unwrap();
        let mut clock = PhaseClock::start(None);
        unsafe {
            blocked_sgemm(
                m,
                k,
                n,
                a.as_ptr(),
                b.as_ptr(),
                c.as_mut_ptr(),
                n,
                accumulate,
                arena.span(0),
                arena.span(1),
                plan,
                &kernels,
                PackingPhases::FULLY_CONNECTED,
                None,
                &mut clock,
            );
        }
        clock.stop();
    }

    fn default_plan() -> BlockingPlan {
        BlockingPlan::from_profile(&HardwareProfile::default())
    }

    #[test]
    fn test_small_gemm_matches_naive() {
        let (m, k, n) = (3, 5, 2);
        let a: Vec<f32> = (0..m * k).map(|i| i as f32 * 0.5 - 3.0).collect();
        let b: Vec<f32> = (0..n * k).map(|i| 1.0 - i as f32 * 0.25).collect();
        let mut c = vec![f32::NAN; m * n];

        run_engine(m, k, n, &a, &b, &mut c, false, &default_plan());

        let expected = naive(m, k, n, &a, &b);
        for (got, want) in c.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-5, "{got} != {want}");
        }
    }

    #[test]
    fn test_ragged_shapes_match_naive() {
        // Row, reduction, and column counts that are multiples of nothing.
        for &(m, k, n) in &[(1, 1, 1), (5, 3, 7), (13, 9, 29), (4, 28, 24)] {
            let a: Vec<f32> = (0..m * k).map(|i| ((i * 7 % 11) as f32) - 5.0).collect();
            let b: Vec<f32> = (0..n * k).map(|i| ((i * 5 % 13) as f32) * 0.5).collect();
            let mut c = vec![f32::NAN; m * n];

            run_engine(m, k, n, &a, &b, &mut c, false, &default_plan());

            let expected = naive(m, k, n, &a, &b);
            for (idx, (got, want)) in c.iter().zip(&expected).enumerate() {
                assert!(
                    (got - want).abs() < 1e-4,
                    "({m},{k},{n}) element {idx}: {got} != {want}"
                );
            }
        }
    }

    #[test]
    fn test_multiple_reduction_blocks() {
        // Shrink the caches so every blocking level splits.
        let profile = HardwareProfile {
            l1_cache_bytes: 28 * 4 * 4, // reduction blocks of 4
            l2_cache_bytes: 24 * 4 * 8, // column blocks of 24
            l3_cache_bytes: 4 * 4 * 16, // row blocks of 16
            simd_width: 8,
        };
        let plan = BlockingPlan::from_profile(&profile);
        assert_eq!(plan.input_channels_block_max, 4);

        let (m, k, n) = (21, 19, 31);
        let a: Vec<f32> = (0..m * k).map(|i| ((i % 17) as f32) * 0.3 - 1.0).collect();
        let b: Vec<f32> = (0..n * k).map(|i| ((i % 23) as f32) * 0.1 - 0.8).collect();
        let mut c = vec![f32::NAN; m * n];

        run_engine(m, k, n, &a, &b, &mut c, false, &plan);

        let expected = naive(m, k, n, &a, &b);
        for (got, want) in c.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-4);
        }
    }

    #[test]
    fn test_random_shapes_match_naive() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..8 {
            let m = rng.gen_range(1..40);
            let k = rng.gen_range(1..60);
            let n = rng.gen_range(1..50);
            let a: Vec<f32> = (0..m * k).map(|_| rng.gen_range(-2.0..2.0)).collect();
            let b: Vec<f32> = (0..n * k).map(|_| rng.gen_range(-2.0..2.0)).collect();
            let mut c = vec![f32::NAN; m * n];

            run_engine(m, k, n, &a, &b, &mut c, false, &default_plan());

            let expected = naive(m, k, n, &a, &b);
            for (got, want) in c.iter().zip(&expected) {
                assert!((got - want).abs() < 1e-3, "({m},{k},{n}): {got} != {want}");
            }
        }
    }

    #[test]
    fn test_accumulate_sums_across_calls() {
        let (m, k, n) = (4, 6, 9);
        let a: Vec<f32> = (0..m * k).map(|i| i as f32 * 0.1).collect();
        let b: Vec<f32> = (0..n * k).map(|i| 1.0 - i as f32 * 0.01).collect();
        let mut c = vec![0.0f32; m * n];

        run_engine(m, k, n, &a, &b, &mut c, false, &default_plan());
        run_engine(m, k, n, &a, &b, &mut c, true, &default_plan());

        let expected = naive(m, k, n, &a, &b);
        for (got, want) in c.iter().zip(&expected) {
            assert!((got - 2.0 * want).abs() < 1e-4);
        }
    }
}
