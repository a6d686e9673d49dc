//! 2D convolution: forward (batched and single-image) and gradients with
//! respect to input and kernel.
//!
//! Every variant runs on the same blocked engine; what differs is which
//! tensor plays which engine axis and which lowering brings it into a
//! plain matrix shape. The domain transform is a per-call strategy: this
//! build ships the identity-domain strategy (direct patch lowering), and
//! the Fourier/Winograd members of the capability set fail fast with a
//! capability error.

use rayon::ThreadPool;

use crate::core::arena::Arena;
use crate::core::blocking::BlockingPlan;
use crate::core::gemm::{blocked_sgemm, PackingPhases};
use crate::core::packing::{packed_a_size, packed_b_size};
use crate::error::{Error, Result};
use crate::geometry::{convolution_output_size, Padding, Size};
use crate::hardware;
use crate::parallel::compute_1d_tiled;
use crate::profile::{Phase, PhaseClock, Profile};
use crate::simd::dispatch::{ResolvedKernels, COL_SUBBLOCK_MAX, ROW_SUBBLOCK_MAX};
use crate::validation::validate_convolution;

/// Algorithm for computing convolutional layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Let the library choose for the layer parameters.
    Auto,
    /// Identity-domain blocked multiplication over lowered patches.
    Direct,
    /// Tiled convolution over 8x8 Fourier-transform blocks.
    Ft8x8,
    /// Tiled convolution over 16x16 Fourier-transform blocks.
    Ft16x16,
    /// Tiled convolution over 8x8 Winograd-transform blocks.
    Wt8x8,
}

/// How kernel-transform coefficients are produced during inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelTransformStrategy {
    /// Recompute the kernel transform whenever it is needed.
    Recompute,
    /// Compute the kernel transform once per call and reuse it.
    Reuse,
    /// Expect coefficients transformed ahead of time by the caller.
    Precomputed,
}

/// Shape bundle shared by every convolution variant.
#[derive(Debug, Clone, Copy)]
struct ConvGeometry {
    input_channels: usize,
    output_channels: usize,
    input_size: Size,
    input_padding: Padding,
    kernel_size: Size,
    output_size: Size,
}

impl ConvGeometry {
    fn new(
        input_channels: usize,
        output_channels: usize,
        input_size: Size,
        input_padding: Padding,
        kernel_size: Size,
    ) -> Self {
        Self {
            input_channels,
            output_channels,
            input_size,
            input_padding,
            kernel_size,
            output_size: convolution_output_size(input_size, input_padding, kernel_size),
        }
    }

    /// Output positions per image plane.
    fn positions(&self) -> usize {
        self.output_size.area()
    }

    /// Elements in one lowered patch: `input_channels * kh * kw`.
    fn patch_len(&self) -> usize {
        self.input_channels * self.kernel_size.area()
    }

    fn input_image_elements(&self) -> usize {
        self.input_channels * self.input_size.area()
    }

    fn output_image_elements(&self) -> usize {
        self.output_channels * self.positions()
    }
}

/// The per-call domain-transform plug-in.
///
/// A strategy lowers each image into its multiplication domain, runs the
/// blocked engine there, and brings the product back. The identity
/// domain lowers to dense patches and needs no inverse beyond the bias;
/// transform domains would substitute their own math behind the same
/// three entry points.
trait TransformStrategy: Sync {
    /// Scratch elements for one lowered image.
    fn lowered_elements(&self, geometry: &ConvGeometry) -> usize;

    /// Lower one input image into the multiplication domain.
    ///
    /// # Safety
    /// `input_image` must cover `geometry.input_image_elements()` reads
    /// and `lowered` must cover `lowered_elements` writes.
    unsafe fn transform_forward(
        &self,
        geometry: &ConvGeometry,
        input_image: *const f32,
        lowered: *mut f32,
        threadpool: Option<&ThreadPool>,
    );

    /// Multiply kernel and lowered image, storing output-channel rows
    /// directly into the output image.
    ///
    /// # Safety
    /// Pointer contracts of [`blocked_sgemm`] for the geometry's shapes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn multiply_in_transform_domain(
        &self,
        geometry: &ConvGeometry,
        kernel_matrix: *const f32,
        lowered: *const f32,
        output_image: *mut f32,
        packed_a: *mut f32,
        packed_b: *mut f32,
        plan: &BlockingPlan,
        kernels: &ResolvedKernels,
        threadpool: Option<&ThreadPool>,
        clock: &mut PhaseClock<'_>,
    );

    /// Bring the product back from the multiplication domain and apply
    /// the bias.
    ///
    /// # Safety
    /// `output_image` must cover `geometry.output_image_elements()`
    /// writes; `bias` must cover `output_channels` reads.
    unsafe fn transform_inverse(
        &self,
        geometry: &ConvGeometry,
        output_image: *mut f32,
        bias: *const f32,
        threadpool: Option<&ThreadPool>,
    );
}

/// Identity-domain strategy: lower to patches, multiply, add bias.
struct IdentityDomain;

impl TransformStrategy for IdentityDomain {
    fn lowered_elements(&self, geometry: &ConvGeometry) -> usize {
        geometry.positions() * geometry.patch_len()
    }

    unsafe fn transform_forward(
        &self,
        geometry: &ConvGeometry,
        input_image: *const f32,
        lowered: *mut f32,
        threadpool: Option<&ThreadPool>,
    ) {
        im2col(geometry, input_image, lowered, threadpool);
    }

    unsafe fn multiply_in_transform_domain(
        &self,
        geometry: &ConvGeometry,
        kernel_matrix: *const f32,
        lowered: *const f32,
        output_image: *mut f32,
        packed_a: *mut f32,
        packed_b: *mut f32,
        plan: &BlockingPlan,
        kernels: &ResolvedKernels,
        threadpool: Option<&ThreadPool>,
        clock: &mut PhaseClock<'_>,
    ) {
        // Engine rows are output channels, columns are positions; the
        // product lands in the output image's natural layout.
        blocked_sgemm(
            geometry.output_channels,
            geometry.patch_len(),
            geometry.positions(),
            kernel_matrix,
            lowered,
            output_image,
            geometry.positions(),
            false,
            packed_a,
            packed_b,
            plan,
            kernels,
            PackingPhases {
                pack_a: Phase::KernelTransform,
                pack_b: Phase::InputTransform,
            },
            threadpool,
            clock,
        );
    }

    unsafe fn transform_inverse(
        &self,
        geometry: &ConvGeometry,
        output_image: *mut f32,
        bias: *const f32,
        threadpool: Option<&ThreadPool>,
    ) {
        let positions = geometry.positions();
        let output_addr = output_image as usize;
        let bias_addr = bias as usize;
        compute_1d_tiled(threadpool, geometry.output_channels, 8, |start, len| {
            let output = output_addr as *mut f32;
            let bias = bias_addr as *const f32;
            for o in start..start + len {
                let channel_bias = unsafe { *bias.add(o) };
                for p in 0..positions {
                    unsafe {
                        *output.add(o * positions + p) += channel_bias;
                    }
                }
            }
        });
    }
}

/// Select the strategy for a structurally valid algorithm choice.
fn select_strategy(algorithm: Algorithm) -> Result<&'static dyn TransformStrategy> {
    static IDENTITY: IdentityDomain = IdentityDomain;
    match algorithm {
        Algorithm::Auto | Algorithm::Direct => Ok(&IDENTITY),
        // Transform families are not compiled into this build.
        Algorithm::Ft8x8 | Algorithm::Ft16x16 | Algorithm::Wt8x8 => {
            Err(Error::UnsupportedAlgorithm)
        }
    }
}

/// Lower one image to its patch matrix: row = output position, column =
/// `(input_channel, ky, kx)`. Out-of-image taps read the implicit zero
/// padding. Rows are disjoint, so the loop tiles over output rows.
unsafe fn im2col(
    geometry: &ConvGeometry,
    input_image: *const f32,
    lowered: *mut f32,
    threadpool: Option<&ThreadPool>,
) {
    let g = *geometry;
    let input_addr = input_image as usize;
    let lowered_addr = lowered as usize;
    compute_1d_tiled(threadpool, g.output_size.height, 1, |oy_start, oy_len| {
        let input = input_addr as *const f32;
        let lowered = lowered_addr as *mut f32;
        let patch_len = g.patch_len();
        let (in_w, in_h) = (g.input_size.width, g.input_size.height);
        let in_plane = g.input_size.area();
        for oy in oy_start..oy_start + oy_len {
            for ox in 0..g.output_size.width {
                let row = unsafe { lowered.add((oy * g.output_size.width + ox) * patch_len) };
                let mut j = 0;
                for ic in 0..g.input_channels {
                    for ky in 0..g.kernel_size.height {
                        for kx in 0..g.kernel_size.width {
                            let iy = (oy + ky) as isize - g.input_padding.top as isize;
                            let ix = (ox + kx) as isize - g.input_padding.left as isize;
                            let value = if iy >= 0
                                && (iy as usize) < in_h
                                && ix >= 0
                                && (ix as usize) < in_w
                            {
                                unsafe {
                                    *input.add(ic * in_plane + iy as usize * in_w + ix as usize)
                                }
                            } else {
                                0.0
                            };
                            unsafe {
                                *row.add(j) = value;
                            }
                            j += 1;
                        }
                    }
                }
            }
        }
    });
}

/// Transposed patch matrix: row = `(input_channel, ky, kx)`, column =
/// output position. Used where the patch matrix is the reduction-side
/// operand.
unsafe fn im2col_transposed(
    geometry: &ConvGeometry,
    input_image: *const f32,
    lowered: *mut f32,
    threadpool: Option<&ThreadPool>,
) {
    let g = *geometry;
    let input_addr = input_image as usize;
    let lowered_addr = lowered as usize;
    compute_1d_tiled(threadpool, g.patch_len(), 8, |j_start, j_len| {
        let input = input_addr as *const f32;
        let lowered = lowered_addr as *mut f32;
        let positions = g.positions();
        let (in_w, in_h) = (g.input_size.width, g.input_size.height);
        let in_plane = g.input_size.area();
        let kernel_area = g.kernel_size.area();
        for j in j_start..j_start + j_len {
            let ic = j / kernel_area;
            let ky = j % kernel_area / g.kernel_size.width;
            let kx = j % g.kernel_size.width;
            let row = unsafe { lowered.add(j * positions) };
            for oy in 0..g.output_size.height {
                for ox in 0..g.output_size.width {
                    let iy = (oy + ky) as isize - g.input_padding.top as isize;
                    let ix = (ox + kx) as isize - g.input_padding.left as isize;
                    let value = if iy >= 0
                        && (iy as usize) < in_h
                        && ix >= 0
                        && (ix as usize) < in_w
                    {
                        unsafe { *input.add(ic * in_plane + iy as usize * in_w + ix as usize) }
                    } else {
                        0.0
                    };
                    unsafe {
                        *row.add(oy * g.output_size.width + ox) = value;
                    }
                }
            }
        }
    });
}

/// Computes the output of a 2D convolutional layer from input and kernel
/// tensors (forward propagation, batched training form).
///
/// - `input` is `input[batch][input_channels][input_h][input_w]`.
/// - `kernel` is `kernel[output_channels][input_channels][kernel_h][kernel_w]`.
/// - `bias` is `bias[output_channels]`.
/// - `output` is `output[batch][output_channels][output_h][output_w]`
///   with `output = padded_input - (kernel - 1)` per axis.
#[allow(clippy::too_many_arguments)]
pub fn convolution_output(
    algorithm: Algorithm,
    batch_size: usize,
    input_channels: usize,
    output_channels: usize,
    input_size: Size,
    input_padding: Padding,
    kernel_size: Size,
    input: &[f32],
    kernel: &[f32],
    bias: &[f32],
    output: &mut [f32],
    threadpool: Option<&ThreadPool>,
    profile: Option<&mut Profile>,
) -> Result<()> {
    let mut clock = PhaseClock::start(profile);

    let result = (|| {
        validate_convolution(
            batch_size,
            input_channels,
            output_channels,
            input_size,
            input_padding,
            kernel_size,
        )?;
        let state = hardware::current()?;
        let strategy = select_strategy(algorithm)?;
        let geometry = ConvGeometry::new(
            input_channels,
            output_channels,
            input_size,
            input_padding,
            kernel_size,
        );

        assert_eq!(
            input.len(),
            batch_size * geometry.input_image_elements(),
            "input dimensions mismatch"
        );
        assert_eq!(
            kernel.len(),
            output_channels * geometry.patch_len(),
            "kernel dimensions mismatch"
        );
        assert_eq!(bias.len(), output_channels, "bias dimensions mismatch");
        assert_eq!(
            output.len(),
            batch_size * geometry.output_image_elements(),
            "output dimensions mismatch"
        );

        let plan = BlockingPlan::from_profile(&state.profile);
        let kernels = state.kernels.resolve()?;

        let arena = Arena::for_spans(&[
            strategy.lowered_elements(&geometry),
            packed_a_size(output_channels, geometry.patch_len(), ROW_SUBBLOCK_MAX),
            packed_b_size(
                geometry.positions(),
                plan.input_channels_block_max,
                COL_SUBBLOCK_MAX,
            ),
        ])?;

        for b in 0..batch_size {
            unsafe {
                let input_image = input.as_ptr().add(b * geometry.input_image_elements());
                let output_image = output.as_mut_ptr().add(b * geometry.output_image_elements());

                clock.run(Phase::InputTransform, || unsafe {
                    strategy.transform_forward(&geometry, input_image, arena.span(0), threadpool)
                });
                strategy.multiply_in_transform_domain(
                    &geometry,
                    kernel.as_ptr(),
                    arena.span(0),
                    output_image,
                    arena.span(1),
                    arena.span(2),
                    &plan,
                    &kernels,
                    threadpool,
                    &mut clock,
                );
                clock.run(Phase::OutputTransform, || unsafe {
                    strategy.transform_inverse(&geometry, output_image, bias.as_ptr(), threadpool)
                });
            }
        }
        Ok(())
    })();

    clock.stop();
    result
}

/// Computes the output of a 2D convolutional layer for a single input
/// image (forward propagation, inference form). Tensors are the 3D
/// single-image slices of [`convolution_output`].
#[allow(clippy::too_many_arguments)]
pub fn convolution_inference(
    algorithm: Algorithm,
    kernel_transform_strategy: KernelTransformStrategy,
    input_channels: usize,
    output_channels: usize,
    input_size: Size,
    input_padding: Padding,
    kernel_size: Size,
    input: &[f32],
    kernel: &[f32],
    bias: &[f32],
    output: &mut [f32],
    threadpool: Option<&ThreadPool>,
    profile: Option<&mut Profile>,
) -> Result<()> {
    // The identity domain has no coefficients to precompute.
    if kernel_transform_strategy == KernelTransformStrategy::Precomputed {
        return Err(Error::UnsupportedAlgorithm);
    }
    convolution_output(
        algorithm,
        1,
        input_channels,
        output_channels,
        input_size,
        input_padding,
        kernel_size,
        input,
        kernel,
        bias,
        output,
        threadpool,
        profile,
    )
}

/// Computes the gradient of the input of a 2D convolutional layer from
/// the gradient of its output and the kernel tensor (backward
/// propagation).
///
/// - `grad_output` is `[batch][output_channels][output_h][output_w]`.
/// - `kernel` is `[output_channels][input_channels][kernel_h][kernel_w]`.
/// - `grad_input` is `[batch][input_channels][input_h][input_w]`.
#[allow(clippy::too_many_arguments)]
pub fn convolution_input_gradient(
    algorithm: Algorithm,
    batch_size: usize,
    input_channels: usize,
    output_channels: usize,
    input_size: Size,
    input_padding: Padding,
    kernel_size: Size,
    grad_output: &[f32],
    kernel: &[f32],
    grad_input: &mut [f32],
    threadpool: Option<&ThreadPool>,
    profile: Option<&mut Profile>,
) -> Result<()> {
    let mut clock = PhaseClock::start(profile);

    let result = (|| {
        validate_convolution(
            batch_size,
            input_channels,
            output_channels,
            input_size,
            input_padding,
            kernel_size,
        )?;
        let state = hardware::current()?;
        select_strategy(algorithm)?;
        let geometry = ConvGeometry::new(
            input_channels,
            output_channels,
            input_size,
            input_padding,
            kernel_size,
        );
        let patch_len = geometry.patch_len();
        let positions = geometry.positions();

        assert_eq!(
            grad_output.len(),
            batch_size * geometry.output_image_elements(),
            "grad_output dimensions mismatch"
        );
        assert_eq!(
            kernel.len(),
            output_channels * patch_len,
            "kernel dimensions mismatch"
        );
        assert_eq!(
            grad_input.len(),
            batch_size * geometry.input_image_elements(),
            "grad_input dimensions mismatch"
        );

        let plan = BlockingPlan::from_profile(&state.profile);
        let kernels = state.kernels.resolve()?;

        let arena = Arena::for_spans(&[
            patch_len * output_channels,  // transposed kernel matrix
            positions * output_channels,  // transposed output gradient
            patch_len * positions,        // patch-gradient product
            packed_a_size(patch_len, output_channels, ROW_SUBBLOCK_MAX),
            packed_b_size(positions, plan.input_channels_block_max, COL_SUBBLOCK_MAX),
        ])?;

        // Kernel matrix transposed once per call: row = patch element,
        // column = output channel.
        clock.run(Phase::KernelTransform, || {
            let kernel_addr = kernel.as_ptr() as usize;
            let kernel_t_addr = arena.span(0) as usize;
            compute_1d_tiled(threadpool, patch_len, 32, |j_start, j_len| {
                let kernel = kernel_addr as *const f32;
                let kernel_t = kernel_t_addr as *mut f32;
                for j in j_start..j_start + j_len {
                    for o in 0..output_channels {
                        unsafe {
                            *kernel_t.add(j * output_channels + o) =
                                *kernel.add(o * patch_len + j);
                        }
                    }
                }
            });
        });

        for b in 0..batch_size {
            unsafe {
                let grad_output_image = grad_output.as_ptr().add(b * geometry.output_image_elements());
                let grad_input_image = grad_input
                    .as_mut_ptr()
                    .add(b * geometry.input_image_elements());

                // Output gradient transposed: row = position, column =
                // output channel.
                clock.run(Phase::OutputTransform, || {
                    let src_addr = grad_output_image as usize;
                    let dst_addr = arena.span(1) as usize;
                    compute_1d_tiled(threadpool, positions, 64, |p_start, p_len| {
                        let src = src_addr as *const f32;
                        let dst = dst_addr as *mut f32;
                        for p in p_start..p_start + p_len {
                            for o in 0..output_channels {
                                unsafe {
                                    *dst.add(p * output_channels + o) =
                                        *src.add(o * positions + p);
                                }
                            }
                        }
                    });
                });

                blocked_sgemm(
                    patch_len,
                    output_channels,
                    positions,
                    arena.span(0),
                    arena.span(1),
                    arena.span(2),
                    positions,
                    false,
                    arena.span(3),
                    arena.span(4),
                    &plan,
                    &kernels,
                    PackingPhases {
                        pack_a: Phase::KernelTransform,
                        pack_b: Phase::OutputTransform,
                    },
                    threadpool,
                    &mut clock,
                );

                // Scatter-accumulate patch gradients back onto the input
                // grid; input channels own disjoint planes.
                clock.run(Phase::InputTransform, || unsafe {
                    col2im_accumulate(&geometry, arena.span(2), grad_input_image, threadpool)
                });
            }
        }
        Ok(())
    })();

    clock.stop();
    result
}

/// Inverse of the patch lowering: sums `product[j][position]` into the
/// input-gradient plane of each channel.
unsafe fn col2im_accumulate(
    geometry: &ConvGeometry,
    product: *const f32,
    grad_input_image: *mut f32,
    threadpool: Option<&ThreadPool>,
) {
    let g = *geometry;
    let product_addr = product as usize;
    let grad_addr = grad_input_image as usize;
    compute_1d_tiled(threadpool, g.input_channels, 1, |ic_start, ic_len| {
        let product = product_addr as *const f32;
        let grad = grad_addr as *mut f32;
        let positions = g.positions();
        let (in_w, in_h) = (g.input_size.width, g.input_size.height);
        let in_plane = g.input_size.area();
        let kernel_area = g.kernel_size.area();
        for ic in ic_start..ic_start + ic_len {
            let plane = unsafe { grad.add(ic * in_plane) };
            for i in 0..in_plane {
                unsafe {
                    *plane.add(i) = 0.0;
                }
            }
            for ky in 0..g.kernel_size.height {
                for kx in 0..g.kernel_size.width {
                    let j = ic * kernel_area + ky * g.kernel_size.width + kx;
                    let row = unsafe { product.add(j * positions) };
                    for oy in 0..g.output_size.height {
                        let iy = (oy + ky) as isize - g.input_padding.top as isize;
                        if iy < 0 || iy as usize >= in_h {
                            continue;
                        }
                        for ox in 0..g.output_size.width {
                            let ix = (ox + kx) as isize - g.input_padding.left as isize;
                            if ix < 0 || ix as usize >= in_w {
                                continue;
                            }
                            unsafe {
                                *plane.add(iy as usize * in_w + ix as usize) +=
                                    *row.add(oy * g.output_size.width + ox);
                            }
                        }
                    }
                }
            }
        }
    });
}

/// Computes the gradient of the kernel of a 2D convolutional layer from
/// the gradient of its output and the input tensor (backward
/// propagation).
///
/// - `input` is `[batch][input_channels][input_h][input_w]`.
/// - `grad_output` is `[batch][output_channels][output_h][output_w]`.
/// - `grad_kernel` is `[output_channels][input_channels][kernel_h][kernel_w]`,
///   summed over the whole batch.
#[allow(clippy::too_many_arguments)]
pub fn convolution_kernel_gradient(
    algorithm: Algorithm,
    batch_size: usize,
    input_channels: usize,
    output_channels: usize,
    input_size: Size,
    input_padding: Padding,
    kernel_size: Size,
    input: &[f32],
    grad_output: &[f32],
    grad_kernel: &mut [f32],
    threadpool: Option<&ThreadPool>,
    profile: Option<&mut Profile>,
) -> Result<()> {
    let mut clock = PhaseClock::start(profile);

    let result = (|| {
        validate_convolution(
            batch_size,
            input_channels,
            output_channels,
            input_size,
            input_padding,
            kernel_size,
        )?;
        let state = hardware::current()?;
        select_strategy(algorithm)?;
        let geometry = ConvGeometry::new(
            input_channels,
            output_channels,
            input_size,
            input_padding,
            kernel_size,
        );
        let patch_len = geometry.patch_len();
        let positions = geometry.positions();

        assert_eq!(
            input.len(),
            batch_size * geometry.input_image_elements(),
            "input dimensions mismatch"
        );
        assert_eq!(
            grad_output.len(),
            batch_size * geometry.output_image_elements(),
            "grad_output dimensions mismatch"
        );
        assert_eq!(
            grad_kernel.len(),
            output_channels * patch_len,
            "grad_kernel dimensions mismatch"
        );

        let plan = BlockingPlan::from_profile(&state.profile);
        let kernels = state.kernels.resolve()?;

        let arena = Arena::for_spans(&[
            patch_len * positions, // transposed patch matrix
            packed_a_size(output_channels, positions, ROW_SUBBLOCK_MAX),
            packed_b_size(patch_len, plan.input_channels_block_max, COL_SUBBLOCK_MAX),
        ])?;

        for b in 0..batch_size {
            unsafe {
                let input_image = input.as_ptr().add(b * geometry.input_image_elements());
                let grad_output_image = grad_output.as_ptr().add(b * geometry.output_image_elements());

                clock.run(Phase::InputTransform, || unsafe {
                    im2col_transposed(&geometry, input_image, arena.span(0), threadpool)
                });

                // Rows are output channels, reduction runs over output
                // positions; image products accumulate into the kernel
                // gradient.
                blocked_sgemm(
                    output_channels,
                    positions,
                    patch_len,
                    grad_output_image,
                    arena.span(0),
                    grad_kernel.as_mut_ptr(),
                    patch_len,
                    b > 0,
                    arena.span(1),
                    arena.span(2),
                    &plan,
                    &kernels,
                    PackingPhases {
                        pack_a: Phase::OutputTransform,
                        pack_b: Phase::InputTransform,
                    },
                    threadpool,
                    &mut clock,
                );
            }
        }
        Ok(())
    })();

    clock.stop();
    result
}
