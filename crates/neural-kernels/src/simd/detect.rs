//! Runtime CPU feature detection for microkernel selection.

use std::sync::OnceLock;

/// Instruction-set level detected on the running CPU.
///
/// The shipped microkernel family operates on 8-lane f32 vectors; levels
/// below [`SimdLevel::Avx2`] run the same kernels through narrower
/// registers (the `wide` crate lowers them to whatever the target has),
/// so the level is informational for dispatch and diagnostics rather
/// than a hard capability gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimdLevel {
    /// No vector extension beyond the target baseline.
    Generic,
    /// x86-64 AVX2 + FMA (native 8-lane f32).
    Avx2,
    /// x86-64 AVX-512 (runs the 8-lane family).
    Avx512,
    /// AArch64 NEON (two 4-lane halves per 8-lane vector).
    Neon,
}

impl SimdLevel {
    /// Detect the best level available at runtime.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx512f") {
                return SimdLevel::Avx512;
            }
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return SimdLevel::Avx2;
            }
            SimdLevel::Generic
        }

        #[cfg(target_arch = "aarch64")]
        {
            SimdLevel::Neon
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            SimdLevel::Generic
        }
    }

    /// Short human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            SimdLevel::Generic => "portable vectors",
            SimdLevel::Avx2 => "x86-64 AVX2/FMA",
            SimdLevel::Avx512 => "x86-64 AVX-512",
            SimdLevel::Neon => "AArch64 NEON",
        }
    }
}

static SIMD_LEVEL: OnceLock<SimdLevel> = OnceLock::new();

/// Detected SIMD level, cached for the process lifetime.
pub fn simd_level() -> SimdLevel {
    *SIMD_LEVEL.get_or_init(SimdLevel::detect)
}
