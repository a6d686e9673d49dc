//! The `f32x8` microkernel family.
//!
//! Twelve specialized inner-product routines, one per
//! (row-subblock height, column-vector count) pair. Each computes a
//! dense `MR x (NV * 8)` tile of `C = A · Bᵀ`, accumulating over `k`
//! reduction steps, reading packed tiles and writing strided into the
//! unpacked output matrix.
//!
//! Packed operand layout (see `core/packing.rs`):
//! - `a`: one column of `ROW_SUBBLOCK_MAX` row values per reduction step,
//!   so element `(p, i)` lives at `a[p * 4 + i]`.
//! - `b`: one row of `COL_SUBBLOCK_MAX` column values per reduction step,
//!   so element `(p, j)` lives at `b[p * 24 + j]`.
//!
//! The final output vector is gated by `column_mask`: a lane is stored
//! only where the mask word is non-zero, so a full-width kernel can be
//! reused for a narrower residual subblock without writing past the true
//! output width. `update == 0` overwrites `C`; any other value
//! accumulates into it (the caller passes the reduction-block start, so
//! every block after the first accumulates).

use wide::f32x8;

use crate::simd::dispatch::{COL_SUBBLOCK_MAX, ROW_SUBBLOCK_MAX, SIMD_WIDTH};

macro_rules! sgemm_kernel {
    ($name:ident, $mr:literal, $nv:literal) => {
        /// # Safety
        ///
        /// `a` must hold `k * 4` packed elements, `b` must hold
        /// `k * 24` packed elements, `c` must be valid for the tile rows
        /// at `row_stride` spacing, and `column_mask` must point at 8
        /// mask words.
        pub unsafe fn $name(
            k: usize,
            update: usize,
            a: *const f32,
            b: *const f32,
            c: *mut f32,
            row_stride: usize,
            column_mask: *const u32,
        ) {
            let mut acc = [[f32x8::splat(0.0); $nv]; $mr];

            for p in 0..k {
                let a_column = a.add(p * ROW_SUBBLOCK_MAX);
                let b_row = b.add(p * COL_SUBBLOCK_MAX);

                let mut b_vectors = [f32x8::splat(0.0); $nv];
                for v in 0..$nv {
                    let mut lanes = [0.0f32; SIMD_WIDTH];
                    std::ptr::copy_nonoverlapping(
                        b_row.add(v * SIMD_WIDTH),
                        lanes.as_mut_ptr(),
                        SIMD_WIDTH,
                    );
                    b_vectors[v] = f32x8::from(lanes);
                }

                for i in 0..$mr {
                    let a_broadcast = f32x8::splat(*a_column.add(i));
                    for v in 0..$nv {
                        acc[i][v] = a_broadcast.mul_add(b_vectors[v], acc[i][v]);
                    }
                }
            }

            for i in 0..$mr {
                let row = c.add(i * row_stride);
                for v in 0..$nv {
                    let lanes: [f32; SIMD_WIDTH] = acc[i][v].into();
                    if v + 1 < $nv {
                        // Interior vectors always cover valid columns.
                        if update != 0 {
                            for lane in 0..SIMD_WIDTH {
                                *row.add(v * SIMD_WIDTH + lane) += lanes[lane];
                            }
                        } else {
                            std::ptr::copy_nonoverlapping(
                                lanes.as_ptr(),
                                row.add(v * SIMD_WIDTH),
                                SIMD_WIDTH,
                            );
                        }
                    } else {
                        // Final vector: store only mask-enabled lanes.
                        for lane in 0..SIMD_WIDTH {
                            if *column_mask.add(lane) != 0 {
                                let dst = row.add(v * SIMD_WIDTH + lane);
                                if update != 0 {
                                    *dst += lanes[lane];
                                } else {
                                    *dst = lanes[lane];
                                }
                            }
                        }
                    }
                }
            }
        }
    };
}

sgemm_kernel!(sgemm_1x8, 1, 1);
sgemm_kernel!(sgemm_1x16, 1, 2);
sgemm_kernel!(sgemm_1x24, 1, 3);
sgemm_kernel!(sgemm_2x8, 2, 1);
sgemm_kernel!(sgemm_2x16, 2, 2);
sgemm_kernel!(sgemm_2x24, 2, 3);
sgemm_kernel!(sgemm_3x8, 3, 1);
sgemm_kernel!(sgemm_3x16, 3, 2);
sgemm_kernel!(sgemm_3x24, 3, 3);
sgemm_kernel!(sgemm_4x8, 4, 1);
sgemm_kernel!(sgemm_4x16, 4, 2);
sgemm_kernel!(sgemm_4x24, 4, 3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::dispatch::column_mask;

    /// Pack a row-major `rows x k` matrix into the `a` operand layout.
    fn pack_a(matrix: &[f32], rows: usize, k: usize) -> Vec<f32> {
        let mut packed = vec![0.0; k * ROW_SUBBLOCK_MAX];
        for p in 0..k {
            for i in 0..rows {
                packed[p * ROW_SUBBLOCK_MAX + i] = matrix[i * k + p];
            }
        }
        packed
    }

    /// Pack a row-major `cols x k` matrix into the `b` operand layout.
    fn pack_b(matrix: &[f32], cols: usize, k: usize) -> Vec<f32> {
        let mut packed = vec![0.0; k * COL_SUBBLOCK_MAX];
        for p in 0..k {
            for j in 0..cols {
                packed[p * COL_SUBBLOCK_MAX + j] = matrix[j * k + p];
            }
        }
        packed
    }

    #[test]
    fn test_sgemm_2x8_small() {
        // A: 2x3, B rows are output columns: 2x3.
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.0, 0.0, 2.0, 0.0, 1.0, 1.0];
        let packed_a = pack_a(&a, 2, 3);
        let packed_b = pack_b(&b, 2, 3);

        let mut c = vec![0.0f32; 2 * 8];
        unsafe {
            sgemm_2x8(
                3,
                0,
                packed_a.as_ptr(),
                packed_b.as_ptr(),
                c.as_mut_ptr(),
                8,
                column_mask(2),
            );
        }

        // c[i][j] = dot(a_row_i, b_row_j)
        assert_eq!(c[0], 1.0 * 1.0 + 2.0 * 0.0 + 3.0 * 2.0);
        assert_eq!(c[1], 1.0 * 0.0 + 2.0 * 1.0 + 3.0 * 1.0);
        assert_eq!(c[8], 4.0 * 1.0 + 5.0 * 0.0 + 6.0 * 2.0);
        assert_eq!(c[9], 4.0 * 0.0 + 5.0 * 1.0 + 6.0 * 1.0);
    }

    #[test]
    fn test_residual_mask_prevents_overrun() {
        // 5 output columns: lanes 5..8 must stay untouched.
        let a = [1.0, 1.0];
        let b = [1.0, 2.0, 3.0, 4.0, 5.0, 10.0, 20.0, 30.0, 40.0, 50.0];
        let packed_a = pack_a(&a, 1, 2);
        let packed_b = pack_b(&b, 5, 2);

        let canary = -77.0f32;
        let mut c = vec![canary; 8];
        unsafe {
            sgemm_1x8(
                2,
                0,
                packed_a.as_ptr(),
                packed_b.as_ptr(),
                c.as_mut_ptr(),
                8,
                column_mask(5),
            );
        }

        for j in 0..5 {
            assert_eq!(c[j], b[j * 2] + b[j * 2 + 1]);
        }
        for j in 5..8 {
            assert_eq!(c[j], canary, "masked lane {j} was written");
        }
    }

    #[test]
    fn test_update_accumulates() {
        let a = [2.0];
        let b = [3.0];
        let packed_a = pack_a(&a, 1, 1);
        let packed_b = pack_b(&b, 1, 1);

        let mut c = vec![10.0f32; 8];
        unsafe {
            // First block overwrites.
            sgemm_1x8(
                1,
                0,
                packed_a.as_ptr(),
                packed_b.as_ptr(),
                c.as_mut_ptr(),
                8,
                column_mask(1),
            );
            assert_eq!(c[0], 6.0);
            // Later blocks accumulate.
            sgemm_1x8(
                1,
                1,
                packed_a.as_ptr(),
                packed_b.as_ptr(),
                c.as_mut_ptr(),
                8,
                column_mask(1),
            );
        }
        assert_eq!(c[0], 12.0);
    }

    #[test]
    fn test_sgemm_4x24_full_width() {
        let k = 5;
        let a: Vec<f32> = (0..4 * k).map(|i| (i % 7) as f32 - 3.0).collect();
        let b: Vec<f32> = (0..24 * k).map(|i| (i % 5) as f32 * 0.5).collect();
        let packed_a = pack_a(&a, 4, k);
        let packed_b = pack_b(&b, 24, k);

        let ldc = 30; // wider than the tile, exercises the stride
        let mut c = vec![0.0f32; 4 * ldc];
        unsafe {
            sgemm_4x24(
                k,
                0,
                packed_a.as_ptr(),
                packed_b.as_ptr(),
                c.as_mut_ptr(),
                ldc,
                column_mask(24),
            );
        }

        for i in 0..4 {
            for j in 0..24 {
                let expected: f32 = (0..k).map(|p| a[i * k + p] * b[j * k + p]).sum();
                assert!(
                    (c[i * ldc + j] - expected).abs() < 1e-5,
                    "mismatch at ({i}, {j})"
                );
            }
            for j in 24..ldc {
                assert_eq!(c[i * ldc + j], 0.0);
            }
        }
    }
}
