//! Cache-blocked, SIMD-dispatched CPU compute kernels for convolutional
//! neural networks.
//!
//! The crate provides the primitive tensor operators of a CNN —
//! convolution (forward and both gradients), fully connected layers,
//! max-pooling, softmax, and ReLU — each in a batched training form and
//! a single-image inference form. Clients supply raw tensors and an
//! optional [`rayon::ThreadPool`] and get peak per-call throughput on
//! the host CPU.
//!
//! At the center is one engine, instantiated per operator: packing
//! transforms reorder operands into microkernel access order, a planner
//! derives per-cache-level tile sizes from the hardware profile, a tiled
//! parallel driver runs each pipeline stage as unordered independent
//! tiles with a barrier in between, and a dispatch table indexed by
//! residual tile shape selects one of twelve SIMD inner-product
//! routines.
//!
//! # Quick start
//!
//! ```
//! use neural_kernels::{fully_connected_output, initialize};
//!
//! initialize().unwrap();
//!
//! let (batch, input_channels, output_channels) = (2, 3, 2);
//! let input = vec![1.0f32; batch * input_channels];
//! let kernel = vec![0.5f32; output_channels * input_channels];
//! let mut output = vec![0.0f32; batch * output_channels];
//!
//! fully_connected_output(
//!     batch,
//!     input_channels,
//!     output_channels,
//!     &input,
//!     &kernel,
//!     &mut output,
//!     None, // run on the calling thread
//!     None, // no profiling
//! )
//! .unwrap();
//!
//! assert_eq!(output[0], 1.5);
//! ```
//!
//! # Threading
//!
//! Every operator accepts `Option<&rayon::ThreadPool>`. With a pool,
//! independent tiles run unordered on its workers and the call blocks
//! until the stage completes; with `None`, the same tile grid runs on
//! the calling thread. The two paths produce bit-identical results.
//!
//! # Lifecycle
//!
//! Call [`initialize`] once before using any operator (or
//! [`initialize_with_profile`] to pin cache capacities); operators
//! invoked before that fail with [`Error::Uninitialized`].
//! [`deinitialize`] releases the process-wide state.

mod error;
mod geometry;
mod hardware;
mod parallel;
mod profile;
mod validation;

pub(crate) mod core;
pub mod simd;

mod ops;

pub use error::{Error, Result};
pub use geometry::{Padding, Size};
pub use hardware::{
    backend_description, deinitialize, initialize, initialize_with_profile, HardwareProfile,
};
pub use profile::Profile;

pub use ops::convolution::{
    convolution_inference, convolution_input_gradient, convolution_kernel_gradient,
    convolution_output, Algorithm, KernelTransformStrategy,
};
pub use ops::fully_connected::{fully_connected_inference, fully_connected_output};
pub use ops::pooling::max_pooling_output;
pub use ops::relu::{relu_input_gradient, relu_output};
pub use ops::softmax::softmax_output;

/// Convenient single-import surface.
pub mod prelude {
    pub use super::{
        convolution_inference, convolution_input_gradient, convolution_kernel_gradient,
        convolution_output, deinitialize, fully_connected_inference, fully_connected_output,
        initialize, initialize_with_profile, max_pooling_output, relu_input_gradient, relu_output,
        softmax_output, Algorithm, Error, HardwareProfile, KernelTransformStrategy, Padding,
        Profile, Size,
    };
}
