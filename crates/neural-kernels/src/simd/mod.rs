//! SIMD detection and microkernel dispatch.

mod detect;
pub(crate) mod dispatch;
pub(crate) mod kernels;

pub use detect::{simd_level, SimdLevel};
