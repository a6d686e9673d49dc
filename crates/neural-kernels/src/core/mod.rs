//! The blocked, packed, SIMD-dispatched compute engine.
//!
//! Shared by every operator: packing transforms, cache-aware block-size
//! derivation, the scratch arena, and the tiled multiplication driver.

pub(crate) mod arena;
pub(crate) mod blocking;
pub(crate) mod gemm;
pub(crate) mod packing;
