//! Max-pooling layer.

use rayon::ThreadPool;

use crate::error::{Error, Result};
use crate::geometry::{pooling_output_size, Padding, Size};
use crate::hardware;
use crate::parallel::compute_2d_tiled;
use crate::validation::validate_pooling;

/// Computes the output of a max-pooling layer.
///
/// - `input` is `input[batch][channels][input_h][input_w]`.
/// - `output` is `output[batch][channels][output_h][output_w]` with
///   `output = ceil((padded - pooling) / stride) + 1` per axis.
///
/// Padding pixels affect the output size but never contribute to a
/// maximum. Only 2x2 pooling with 2x2 stride is currently implemented;
/// other geometries report the unsupported statuses.
#[allow(clippy::too_many_arguments)]
pub fn max_pooling_output(
    batch_size: usize,
    channels: usize,
    input_size: Size,
    input_padding: Padding,
    pooling_size: Size,
    pooling_stride: Size,
    input: &[f32],
    output: &mut [f32],
    threadpool: Option<&ThreadPool>,
) -> Result<()> {
    validate_pooling(
        batch_size,
        channels,
        input_size,
        input_padding,
        pooling_size,
        pooling_stride,
    )?;
    hardware::current()?;
    if pooling_size != Size::new(2, 2) {
        return Err(Error::UnsupportedPoolingSize);
    }
    if pooling_stride != Size::new(2, 2) {
        return Err(Error::UnsupportedPoolingStride);
    }

    let output_size = pooling_output_size(input_size, input_padding, pooling_size, pooling_stride);
    let input_plane = input_size.area();
    let output_plane = output_size.area();

    assert_eq!(
        input.len(),
        batch_size * channels * input_plane,
        "input dimensions mismatch"
    );
    assert_eq!(
        output.len(),
        batch_size * channels * output_plane,
        "output dimensions mismatch"
    );

    let input_addr = input.as_ptr() as usize;
    let output_addr = output.as_mut_ptr() as usize;

    compute_2d_tiled(threadpool, batch_size, channels, 1, 1, |b, c, _, _| {
        let input = input_addr as *const f32;
        let output = output_addr as *mut f32;
        let plane_index = b * channels + c;
        unsafe {
            pool_plane(
                input.add(plane_index * input_plane),
                output.add(plane_index * output_plane),
                input_size,
                output_size,
                input_padding,
                pooling_size,
                pooling_stride,
            );
        }
    });

    Ok(())
}

/// Max-pool one image plane.
unsafe fn pool_plane(
    input: *const f32,
    output: *mut f32,
    input_size: Size,
    output_size: Size,
    padding: Padding,
    pooling: Size,
    stride: Size,
) {
    for oy in 0..output_size.height {
        let window_top = (oy * stride.height) as isize - padding.top as isize;
        for ox in 0..output_size.width {
            let window_left = (ox * stride.width) as isize - padding.left as isize;
            let mut maximum = f32::NEG_INFINITY;
            for ky in 0..pooling.height {
                let iy = window_top + ky as isize;
                if iy < 0 || iy as usize >= input_size.height {
                    continue;
                }
                for kx in 0..pooling.width {
                    let ix = window_left + kx as isize;
                    if ix < 0 || ix as usize >= input_size.width {
                        continue;
                    }
                    let value = *input.add(iy as usize * input_size.width + ix as usize);
                    maximum = maximum.max(value);
                }
            }
            *output.add(oy * output_size.width + ox) = maximum;
        }
    }
}
