//! Packing transforms.
//!
//! Both transforms copy a 2D row-major matrix tile into a blocked layout
//! in which one outer subblock, fully traversed for a fixed inner index,
//! is contiguous — the access order of the microkernels. The packed
//! region written for one `(outer_block, inner_block)` tile is disjoint
//! from every other tile's region, which is what makes packing safe to
//! run as unordered parallel tiles with no cross-tile writes.
//!
//! ```text
//! Matrix rows 0..5, subblock max 4, one inner block of width 3:
//!
//! [ a0 b0 c0 ]      packed:  a0 a1 a2 a3 | b0 b1 b2 b3 | c0 c1 c2 c3
//! [ a1 b1 c1 ]               a4 a5  .  . | b4 b5  .  . | c4 c5  .  .
//! [ ...      ]               '-- subblock 0 --'  then subblock 1 (ragged)
//! ```

use crate::core::blocking::round_up;

/// Pack one `(outer_block, inner_block)` tile of the row ("input")
/// operand.
///
/// `matrix` is `outer_dim x inner_dim` row-major; the full inner
/// dimension is `inner_dim`. The packed element for
/// `(outer, inner)` lands at
/// `outer_block_start * inner_dim
///  + inner_block_start * round_up(outer_block_size, outer_subblock_max)
///  + outer_subblock_start * inner_block_size
///  + inner_offset * outer_subblock_max
///  + outer_subblock_offset`.
///
/// # Safety
///
/// `matrix` must be valid for `outer_dim * inner_dim` reads and `packed`
/// for `round_up(outer_dim, outer_subblock_max) * inner_dim` writes.
pub(crate) unsafe fn pack_a_block(
    matrix: *const f32,
    packed: *mut f32,
    inner_dim: usize,
    outer_block_start: usize,
    inner_block_start: usize,
    outer_block_size: usize,
    inner_block_size: usize,
    outer_subblock_max: usize,
) {
    let outer_block_stride = round_up(outer_block_size, outer_subblock_max);
    let block_base = outer_block_start * inner_dim + inner_block_start * outer_block_stride;

    let mut outer_subblock_start = 0;
    while outer_subblock_start < outer_block_size {
        let outer_subblock_size = (outer_block_size - outer_subblock_start).min(outer_subblock_max);
        for inner_offset in 0..inner_block_size {
            let inner = inner_block_start + inner_offset;
            for outer_subblock_offset in 0..outer_subblock_size {
                let outer = outer_block_start + outer_subblock_start + outer_subblock_offset;
                let packed_index = block_base
                    + outer_subblock_start * inner_block_size
                    + inner_offset * outer_subblock_max
                    + outer_subblock_offset;
                *packed.add(packed_index) = *matrix.add(outer * inner_dim + inner);
            }
        }
        outer_subblock_start += outer_subblock_max;
    }
}

/// Pack one outer block of the column ("kernel") operand, restricted to
/// the current reduction block.
///
/// Unlike [`pack_a_block`], the packed buffer holds only the current
/// inner (reduction) block, so the packed element for `(outer, inner)`
/// lands at
/// `(outer_block_start + outer_subblock_start) * inner_block_size
///  + inner_offset * outer_subblock_max
///  + outer_subblock_offset`.
///
/// # Safety
///
/// `matrix` must be valid for `outer_dim * inner_dim` reads and `packed`
/// for `round_up(outer_dim, outer_subblock_max) * inner_block_size`
/// writes.
pub(crate) unsafe fn pack_b_block(
    matrix: *const f32,
    packed: *mut f32,
    inner_dim: usize,
    inner_block_start: usize,
    inner_block_size: usize,
    outer_block_start: usize,
    outer_block_size: usize,
    outer_subblock_max: usize,
) {
    let mut outer_subblock_start = 0;
    while outer_subblock_start < outer_block_size {
        let outer_subblock_size = (outer_block_size - outer_subblock_start).min(outer_subblock_max);
        let subblock_base = (outer_block_start + outer_subblock_start) * inner_block_size;
        for inner_offset in 0..inner_block_size {
            let inner = inner_block_start + inner_offset;
            for outer_subblock_offset in 0..outer_subblock_size {
                let outer = outer_block_start + outer_subblock_start + outer_subblock_offset;
                let packed_index =
                    subblock_base + inner_offset * outer_subblock_max + outer_subblock_offset;
                *packed.add(packed_index) = *matrix.add(outer * inner_dim + inner);
            }
        }
        outer_subblock_start += outer_subblock_max;
    }
}

/// Packed row-operand size in elements for an `outer_dim x inner_dim`
/// matrix.
#[inline]
pub(crate) fn packed_a_size(outer_dim: usize, inner_dim: usize, outer_subblock_max: usize) -> usize {
    round_up(outer_dim, outer_subblock_max) * inner_dim
}

/// Packed column-operand size in elements; sized for the largest
/// reduction block.
#[inline]
pub(crate) fn packed_b_size(
    outer_dim: usize,
    inner_block_max: usize,
    outer_subblock_max: usize,
) -> usize {
    round_up(outer_dim, outer_subblock_max) * inner_block_max
}
