//! Process-wide hardware profile and library lifecycle.

use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::simd::dispatch::{KernelTable, COL_SUBBLOCK_MAX, ROW_SUBBLOCK_MAX, SIMD_WIDTH};
use crate::simd::{simd_level, SimdLevel};

/// Effective cache capacities and SIMD width the block-size planner
/// reads. Opaque to the engine: it is consumed, never inspected for
/// topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareProfile {
    /// Effective L1 data cache capacity per core, in bytes.
    pub l1_cache_bytes: usize,
    /// Effective L2 cache capacity per core, in bytes.
    pub l2_cache_bytes: usize,
    /// Effective L3 cache share per core, in bytes.
    pub l3_cache_bytes: usize,
    /// Native SIMD width in f32 elements.
    pub simd_width: usize,
}

impl Default for HardwareProfile {
    /// Conservative capacities that hold on every mainstream x86-64 and
    /// AArch64 part of the last decade.
    fn default() -> Self {
        Self {
            l1_cache_bytes: 32 * 1024,
            l2_cache_bytes: 256 * 1024,
            l3_cache_bytes: 2 * 1024 * 1024,
            simd_width: SIMD_WIDTH,
        }
    }
}

/// Everything an operator call needs from the one-time initialization.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Initialized {
    pub(crate) profile: HardwareProfile,
    pub(crate) kernels: KernelTable,
    pub(crate) level: SimdLevel,
}

static STATE: RwLock<Option<Initialized>> = RwLock::new(None);

/// Initialize the library with the default hardware profile.
///
/// Must be called before any operator; calling it again is a no-op.
pub fn initialize() -> Result<()> {
    initialize_with_profile(HardwareProfile::default())
}

/// Initialize the library with a caller-supplied hardware profile.
///
/// Returns [`Error::UnsupportedHardware`] if the profile cannot host the
/// shipped microkernel family (mismatched SIMD width, or caches too small
/// to fit a single blocking column).
pub fn initialize_with_profile(profile: HardwareProfile) -> Result<()> {
    if profile.simd_width != SIMD_WIDTH {
        return Err(Error::UnsupportedHardware);
    }
    let min_l1_elements = ROW_SUBBLOCK_MAX + COL_SUBBLOCK_MAX;
    if profile.l1_cache_bytes / std::mem::size_of::<f32>() < min_l1_elements
        || profile.l2_cache_bytes == 0
        || profile.l3_cache_bytes == 0
    {
        return Err(Error::UnsupportedHardware);
    }

    let level = simd_level();
    let state = Initialized {
        profile,
        kernels: KernelTable::for_level(level),
        level,
    };
    *STATE.write().unwrap_or_else(|e| e.into_inner()) = Some(state);
    Ok(())
}

/// Release the process-wide state. Safe to call when not initialized.
pub fn deinitialize() -> Result<()> {
    *STATE.write().unwrap_or_else(|e| e.into_inner()) = None;
    Ok(())
}

/// Snapshot of the initialized state, or [`Error::Uninitialized`].
pub(crate) fn current() -> Result<Initialized> {
    STATE
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .ok_or(Error::Uninitialized)
}

/// Human-readable description of the active backend.
pub fn backend_description() -> Result<String> {
    let state = current()?;
    Ok(format!("f32x8 microkernels, {}", state.level.description()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_idempotent() {
        initialize().unwrap();
        initialize().unwrap();
        assert!(current().is_ok());
    }

    #[test]
    fn test_backend_description() {
        initialize().unwrap();
        assert!(backend_description().unwrap().contains("f32x8"));
    }

    #[test]
    fn test_rejects_foreign_simd_width() {
        let profile = HardwareProfile {
            simd_width: 4,
            ..HardwareProfile::default()
        };
        assert_eq!(
            initialize_with_profile(profile),
            Err(Error::UnsupportedHardware)
        );
    }

    #[test]
    fn test_rejects_degenerate_caches() {
        let profile = HardwareProfile {
            l1_cache_bytes: 16,
            ..HardwareProfile::default()
        };
        assert_eq!(
            initialize_with_profile(profile),
            Err(Error::UnsupportedHardware)
        );
    }
}
