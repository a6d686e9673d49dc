//! Rectified linear unit layer: forward output and input gradient.

use rayon::ThreadPool;
use wide::{f32x8, CmpGt};

use crate::error::Result;
use crate::hardware;
use crate::parallel::compute_1d_tiled;
use crate::simd::dispatch::SIMD_WIDTH;
use crate::validation::validate_channelwise;

/// Elements per parallel tile; a multiple of the vector width so only
/// the final tile has a scalar tail.
const RELU_TILE: usize = 8192;

/// Computes the output of a rectified linear unit layer:
/// `output[b][c] = input[b][c] >= 0 ? input[b][c]
///                                  : input[b][c] * negative_slope`.
///
/// - `input` is a `batch_size x channels` matrix.
/// - `output` is a `batch_size x channels` matrix.
pub fn relu_output(
    batch_size: usize,
    channels: usize,
    input: &[f32],
    output: &mut [f32],
    negative_slope: f32,
    threadpool: Option<&ThreadPool>,
) -> Result<()> {
    validate_channelwise(batch_size, channels)?;
    hardware::current()?;

    let elements = batch_size * channels;
    assert_eq!(input.len(), elements, "input dimensions mismatch");
    assert_eq!(output.len(), elements, "output dimensions mismatch");

    let input_addr = input.as_ptr() as usize;
    let output_addr = output.as_mut_ptr() as usize;

    compute_1d_tiled(threadpool, elements, RELU_TILE, |start, len| {
        let input = input_addr as *const f32;
        let output = output_addr as *mut f32;
        unsafe {
            let src = std::slice::from_raw_parts(input.add(start), len);
            let dst = std::slice::from_raw_parts_mut(output.add(start), len);
            relu_slice(src, dst, negative_slope);
        }
    });

    Ok(())
}

/// Computes the gradient of the input of a rectified linear unit layer:
/// `grad_input[b][c] = grad_output[b][c] * (input[b][c] > 0 ? 1
///                                                          : negative_slope)`.
///
/// - `grad_output`, `input`, and `grad_input` are
///   `batch_size x channels` matrices.
pub fn relu_input_gradient(
    batch_size: usize,
    channels: usize,
    grad_output: &[f32],
    input: &[f32],
    grad_input: &mut [f32],
    negative_slope: f32,
    threadpool: Option<&ThreadPool>,
) -> Result<()> {
    validate_channelwise(batch_size, channels)?;
    hardware::current()?;

    let elements = batch_size * channels;
    assert_eq!(grad_output.len(), elements, "grad_output dimensions mismatch");
    assert_eq!(input.len(), elements, "input dimensions mismatch");
    assert_eq!(grad_input.len(), elements, "grad_input dimensions mismatch");

    let grad_output_addr = grad_output.as_ptr() as usize;
    let input_addr = input.as_ptr() as usize;
    let grad_input_addr = grad_input.as_mut_ptr() as usize;

    compute_1d_tiled(threadpool, elements, RELU_TILE, |start, len| {
        let grad_output = grad_output_addr as *const f32;
        let input = input_addr as *const f32;
        let grad_input = grad_input_addr as *mut f32;
        unsafe {
            let grad = std::slice::from_raw_parts(grad_output.add(start), len);
            let src = std::slice::from_raw_parts(input.add(start), len);
            let dst = std::slice::from_raw_parts_mut(grad_input.add(start), len);
            relu_gradient_slice(grad, src, dst, negative_slope);
        }
    });

    Ok(())
}

/// Vectorized forward ReLU over one contiguous slice.
fn relu_slice(input: &[f32], output: &mut [f32], negative_slope: f32) {
    let slope = f32x8::splat(negative_slope);
    let mut chunks_in = input.chunks_exact(SIMD_WIDTH);
    let mut chunks_out = output.chunks_exact_mut(SIMD_WIDTH);
    for (src, dst) in (&mut chunks_in).zip(&mut chunks_out) {
        let mut lanes = [0.0f32; SIMD_WIDTH];
        lanes.copy_from_slice(src);
        let v = f32x8::from(lanes);
        // max keeps the positive half, min scales the negative half.
        let result = v.max(f32x8::splat(0.0)) + v.min(f32x8::splat(0.0)) * slope;
        let result_lanes: [f32; SIMD_WIDTH] = result.into();
        dst.copy_from_slice(&result_lanes);
    }
    for (src, dst) in chunks_in
        .remainder()
        .iter()
        .zip(chunks_out.into_remainder())
    {
        *dst = if *src >= 0.0 { *src } else { *src * negative_slope };
    }
}

/// Vectorized ReLU gradient over one contiguous slice.
fn relu_gradient_slice(
    grad_output: &[f32],
    input: &[f32],
    grad_input: &mut [f32],
    negative_slope: f32,
) {
    let slope = f32x8::splat(negative_slope);
    let vector_len = grad_input.len() - grad_input.len() % SIMD_WIDTH;
    for start in (0..vector_len).step_by(SIMD_WIDTH) {
        let mut grad_lanes = [0.0f32; SIMD_WIDTH];
        let mut input_lanes = [0.0f32; SIMD_WIDTH];
        grad_lanes.copy_from_slice(&grad_output[start..start + SIMD_WIDTH]);
        input_lanes.copy_from_slice(&input[start..start + SIMD_WIDTH]);
        let grad = f32x8::from(grad_lanes);
        let mask = f32x8::from(input_lanes).cmp_gt(f32x8::splat(0.0));
        let result = mask.blend(grad, grad * slope);
        let result_lanes: [f32; SIMD_WIDTH] = result.into();
        grad_input[start..start + SIMD_WIDTH].copy_from_slice(&result_lanes);
    }
    for i in vector_len..grad_input.len() {
        grad_input[i] = if input[i] > 0.0 {
            grad_output[i]
        } else {
            grad_output[i] * negative_slope
        };
    }
}
