//! Softmax layer.

use rayon::ThreadPool;

use crate::error::Result;
use crate::hardware;
use crate::parallel::compute_1d_tiled;
use crate::validation::validate_channelwise;

/// Computes the output of a softmax layer:
/// `output[b][c] = exp(input[b][c]) / Σ_i exp(input[b][i])`.
///
/// Rows are normalized by their maximum before exponentiation, so
/// arbitrarily large inputs stay finite.
///
/// - `input` is a `batch_size x channels` matrix.
/// - `output` is a `batch_size x channels` matrix.
pub fn softmax_output(
    batch_size: usize,
    channels: usize,
    input: &[f32],
    output: &mut [f32],
    threadpool: Option<&ThreadPool>,
) -> Result<()> {
    validate_channelwise(batch_size, channels)?;
    hardware::current()?;

    assert_eq!(
        input.len(),
        batch_size * channels,
        "input dimensions mismatch"
    );
    assert_eq!(
        output.len(),
        batch_size * channels,
        "output dimensions mismatch"
    );

    let input_addr = input.as_ptr() as usize;
    let output_addr = output.as_mut_ptr() as usize;

    compute_1d_tiled(threadpool, batch_size, 1, |row_start, row_len| {
        let input = input_addr as *const f32;
        let output = output_addr as *mut f32;
        for b in row_start..row_start + row_len {
            unsafe {
                let row_in = std::slice::from_raw_parts(input.add(b * channels), channels);
                let row_out = std::slice::from_raw_parts_mut(output.add(b * channels), channels);
                softmax_row(row_in, row_out);
            }
        }
    });

    Ok(())
}

fn softmax_row(input: &[f32], output: &mut [f32]) {
    let maximum = input.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (out, &value) in output.iter_mut().zip(input) {
        let e = (value - maximum).exp();
        *out = e;
        sum += e;
    }
    let scale = 1.0 / sum;
    for out in output.iter_mut() {
        *out *= scale;
    }
}
