//! Microkernel families, one module per implementation.

pub mod f32x8;
