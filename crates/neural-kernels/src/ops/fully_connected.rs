//! Fully connected layer: batched training form and single-vector
//! inference form.

use rayon::ThreadPool;
use wide::f32x8;

use crate::core::arena::Arena;
use crate::core::blocking::BlockingPlan;
use crate::core::gemm::{blocked_sgemm, PackingPhases};
use crate::core::packing::{packed_a_size, packed_b_size};
use crate::error::Result;
use crate::hardware;
use crate::parallel::compute_1d_tiled;
use crate::profile::{PhaseClock, Profile};
use crate::simd::dispatch::{COL_SUBBLOCK_MAX, ROW_SUBBLOCK_MAX, SIMD_WIDTH};
use crate::validation::{validate_fully_connected, validate_fully_connected_inference};

/// Computes the output of a fully connected layer from input and kernel
/// matrices: `output[b][o] = Σ_i input[b][i] * kernel[o][i]`.
///
/// Optimized for moderate minibatch sizes; for a single vector use
/// [`fully_connected_inference`].
///
/// - `input` is a `batch_size x input_channels` matrix.
/// - `kernel` is an `output_channels x input_channels` matrix.
/// - `output` is a `batch_size x output_channels` matrix.
///
/// With `threadpool == None` the computation runs on the caller thread;
/// the result is bit-identical either way. When `profile` is provided it
/// receives per-phase timings; `None` incurs no timing overhead.
pub fn fully_connected_output(
    batch_size: usize,
    input_channels: usize,
    output_channels: usize,
    input: &[f32],
    kernel: &[f32],
    output: &mut [f32],
    threadpool: Option<&ThreadPool>,
    profile: Option<&mut Profile>,
) -> Result<()> {
    let mut clock = PhaseClock::start(profile);

    let result = (|| {
        validate_fully_connected(batch_size, input_channels, output_channels)?;
        let state = hardware::current()?;

        assert_eq!(input.len(), batch_size * input_channels, "input dimensions mismatch");
        assert_eq!(
            kernel.len(),
            output_channels * input_channels,
            "kernel dimensions mismatch"
        );
        assert_eq!(
            output.len(),
            batch_size * output_channels,
            "output dimensions mismatch"
        );

        let plan = BlockingPlan::from_profile(&state.profile);
        let kernels = state.kernels.resolve()?;

        let arena = Arena::for_spans(&[
            packed_a_size(batch_size, input_channels, ROW_SUBBLOCK_MAX),
            packed_b_size(
                output_channels,
                plan.input_channels_block_max,
                COL_SUBBLOCK_MAX,
            ),
        ])?;

        unsafe {
            blocked_sgemm(
                batch_size,
                input_channels,
                output_channels,
                input.as_ptr(),
                kernel.as_ptr(),
                output.as_mut_ptr(),
                output_channels,
                false,
                arena.span(0),
                arena.span(1),
                &plan,
                &kernels,
                PackingPhases::FULLY_CONNECTED,
                threadpool,
                &mut clock,
            );
        }
        Ok(())
    })();

    clock.stop();
    result
}

/// Inference tile along the output-channel axis: coarse enough to
/// amortize scheduling, fine enough to balance a small pool.
const INFERENCE_TILE: usize = 64;

/// Computes the output of a fully connected layer for a single input
/// vector: `output[o] = Σ_i input[i] * kernel[o][i]`.
///
/// - `input` is an `input_channels` vector.
/// - `kernel` is an `output_channels x input_channels` matrix.
/// - `output` is an `output_channels` vector.
pub fn fully_connected_inference(
    input_channels: usize,
    output_channels: usize,
    input: &[f32],
    kernel: &[f32],
    output: &mut [f32],
    threadpool: Option<&ThreadPool>,
) -> Result<()> {
    validate_fully_connected_inference(input_channels, output_channels)?;
    hardware::current()?;

    assert_eq!(input.len(), input_channels, "input dimensions mismatch");
    assert_eq!(
        kernel.len(),
        output_channels * input_channels,
        "kernel dimensions mismatch"
    );
    assert_eq!(output.len(), output_channels, "output dimensions mismatch");

    let input_addr = input.as_ptr() as usize;
    let kernel_addr = kernel.as_ptr() as usize;
    let output_addr = output.as_mut_ptr() as usize;

    compute_1d_tiled(threadpool, output_channels, INFERENCE_TILE, |start, len| {
        let input = input_addr as *const f32;
        let kernel = kernel_addr as *const f32;
        let output = output_addr as *mut f32;
        for o in start..start + len {
            unsafe {
                let row = kernel.add(o * input_channels);
                *output.add(o) = dot(input, row, input_channels);
            }
        }
    });

    Ok(())
}

/// SIMD dot product of two dense vectors.
unsafe fn dot(x: *const f32, y: *const f32, len: usize) -> f32 {
    let mut acc = f32x8::splat(0.0);
    let vector_len = len - len % SIMD_WIDTH;
    let mut p = 0;
    while p < vector_len {
        let mut x_lanes = [0.0f32; SIMD_WIDTH];
        let mut y_lanes = [0.0f32; SIMD_WIDTH];
        std::ptr::copy_nonoverlapping(x.add(p), x_lanes.as_mut_ptr(), SIMD_WIDTH);
        std::ptr::copy_nonoverlapping(y.add(p), y_lanes.as_mut_ptr(), SIMD_WIDTH);
        acc = f32x8::from(x_lanes).mul_add(f32x8::from(y_lanes), acc);
        p += SIMD_WIDTH;
    }
    let mut sum = acc.reduce_add();
    while p < len {
        sum += *x.add(p) * *y.add(p);
        p += 1;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::initialize;

    fn naive(
        batch_size: usize,
        input_channels: usize,
        output_channels: usize,
        input: &[f32],
        kernel: &[f32],
    ) -> Vec<f32> {
        let mut output = vec![0.0f32; batch_size * output_channels];
        for b in 0..batch_size {
            for o in 0..output_channels {
                let mut sum = 0.0;
                for i in 0..input_channels {
                    sum += input[b * input_channels + i] * kernel[o * input_channels + i];
                }
                output[b * output_channels + o] = sum;
            }
        }
        output
    }

    fn pool(workers: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .unwrap()
    }

    #[test]
    fn test_known_scenario_3x5x2() {
        initialize().unwrap();
        let (batch, ic, oc) = (3, 5, 2);
        let input: Vec<f32> = (0..batch * ic).map(|i| i as f32 + 1.0).collect();
        // Identity-like kernel: row o selects channel o.
        let mut kernel = vec![0.0f32; oc * ic];
        kernel[0] = 1.0; // output 0 <- input channel 0
        kernel[ic + 1] = 1.0; // output 1 <- input channel 1
        let mut output = vec![f32::NAN; batch * oc];

        fully_connected_output(batch, ic, oc, &input, &kernel, &mut output, None, None).unwrap();

        let expected = naive(batch, ic, oc, &input, &kernel);
        for (got, want) in output.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-5, "{got} != {want}");
        }
        // Identity rows pick out the raw inputs.
        assert_eq!(output[0], 1.0);
        assert_eq!(output[1], 2.0);
        assert_eq!(output[2], 6.0);
        assert_eq!(output[3], 7.0);
    }

    #[test]
    fn test_invalid_arguments_leave_output_untouched() {
        initialize().unwrap();
        let canary = 123.25f32;
        let mut output = vec![canary; 4];

        assert_eq!(
            fully_connected_output(0, 0, 2, &[], &[], &mut output, None, None),
            Err(Error::InvalidBatchSize)
        );
        assert_eq!(
            fully_connected_output(2, 0, 2, &[], &[], &mut output, None, None),
            Err(Error::InvalidInputChannels)
        );
        assert_eq!(
            fully_connected_output(2, 3, 0, &[], &[], &mut output, None, None),
            Err(Error::InvalidOutputChannels)
        );
        assert!(output.iter().all(|&v| v == canary));
    }

    #[test]
    fn test_larger_ragged_shapes() {
        initialize().unwrap();
        for &(batch, ic, oc) in &[(7, 37, 50), (4, 292, 24), (9, 300, 53), (1, 8, 1)] {
            let input: Vec<f32> = (0..batch * ic)
                .map(|i| ((i * 31 % 61) as f32) * 0.1 - 3.0)
                .collect();
            let kernel: Vec<f32> = (0..oc * ic)
                .map(|i| ((i * 17 % 41) as f32) * 0.05 - 1.0)
                .collect();
            let mut output = vec![f32::NAN; batch * oc];

            fully_connected_output(batch, ic, oc, &input, &kernel, &mut output, None, None)
                .unwrap();

            let expected = naive(batch, ic, oc, &input, &kernel);
            for (idx, (got, want)) in output.iter().zip(&expected).enumerate() {
                assert!(
                    (got - want).abs() < 1e-3 * want.abs().max(1.0),
                    "({batch},{ic},{oc}) element {idx}: {got} != {want}"
                );
            }
        }
    }

    #[test]
    fn test_parallelism_invariance_bit_identical() {
        initialize().unwrap();
        let (batch, ic, oc) = (13, 67, 29);
        let input: Vec<f32> = (0..batch * ic)
            .map(|i| ((i * 13 % 97) as f32) * 0.21 - 9.0)
            .collect();
        let kernel: Vec<f32> = (0..oc * ic)
            .map(|i| ((i * 7 % 89) as f32) * 0.13 - 5.0)
            .collect();

        let mut reference = vec![0.0f32; batch * oc];
        fully_connected_output(batch, ic, oc, &input, &kernel, &mut reference, None, None)
            .unwrap();

        for workers in [1, 2, 4, 8] {
            let pool = pool(workers);
            let mut output = vec![0.0f32; batch * oc];
            fully_connected_output(
                batch,
                ic,
                oc,
                &input,
                &kernel,
                &mut output,
                Some(&pool),
                None,
            )
            .unwrap();
            for (got, want) in output.iter().zip(&reference) {
                assert_eq!(
                    got.to_bits(),
                    want.to_bits(),
                    "{workers}-worker result differs from sequential"
                );
            }
        }
    }

    #[test]
    fn test_profile_additivity() {
        initialize().unwrap();
        let (batch, ic, oc) = (16, 128, 48);
        let input = vec![0.5f32; batch * ic];
        let kernel = vec![0.25f32; oc * ic];
        let mut output = vec![0.0f32; batch * oc];
        let mut profile = Profile::default();

        fully_connected_output(
            batch,
            ic,
            oc,
            &input,
            &kernel,
            &mut output,
            None,
            Some(&mut profile),
        )
        .unwrap();

        // No output-transform stage in the fully-connected pipeline.
        assert_eq!(profile.output_transform, 0.0);
        assert!(
            profile.total
                >= profile.input_transform
                    + profile.kernel_transform
                    + profile.block_multiplication
        );
    }

    #[test]
    fn test_inference_matches_batched() {
        initialize().unwrap();
        let (ic, oc) = (37, 19);
        let input: Vec<f32> = (0..ic).map(|i| (i as f32).cos()).collect();
        let kernel: Vec<f32> = (0..oc * ic).map(|i| ((i % 29) as f32) * 0.07).collect();

        let mut inference = vec![0.0f32; oc];
        fully_connected_inference(ic, oc, &input, &kernel, &mut inference, None).unwrap();

        let mut batched = vec![0.0f32; oc];
        fully_connected_output(1, ic, oc, &input, &kernel, &mut batched, None, None).unwrap();

        for (got, want) in inference.iter().zip(&batched) {
            assert!((got - want).abs() < 1e-4, "{got} != {want}");
        }
    }

    #[test]
    fn test_inference_invalid_arguments() {
        initialize().unwrap();
        let mut output = vec![0.0f32; 2];
        assert_eq!(
            fully_connected_inference(0, 2, &[], &[], &mut output, None),
            Err(Error::InvalidInputChannels)
        );
        assert_eq!(
            fully_connected_inference(3, 0, &[0.0; 3], &[], &mut [], None),
            Err(Error::InvalidOutputChannels)
        );
    }

    #[test]
    fn test_inference_parallel_matches_sequential() {
        initialize().unwrap();
        let (ic, oc) = (100, 130);
        let input: Vec<f32> = (0..ic).map(|i| (i as f32) * 0.01).collect();
        let kernel: Vec<f32> = (0..oc * ic).map(|i| ((i % 53) as f32) * 0.02).collect();

        let mut sequential = vec![0.0f32; oc];
        fully_connected_inference(ic, oc, &input, &kernel, &mut sequential, None).unwrap();

        let pool = pool(4);
        let mut parallel = vec![0.0f32; oc];
        fully_connected_inference(ic, oc, &input, &kernel, &mut parallel, Some(&pool)).unwrap();

        for (got, want) in parallel.iter().zip(&sequential) {
            assert_eq!(got.to_bits(), want.to_bits());
        }
    }
}
