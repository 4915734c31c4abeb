//! Execution control.
//!
//! A [`Control`] steers one or many operator calls: which backend runs
//! them, what diagnostics get logged, whether compiled kernels are cached,
//! and a few tuning hints. It is plain data; share it by reference across
//! call sites and clone it when a call needs different settings.
//!
//! ```
//! use fused_reduce::backend::Backend;
//! use fused_reduce::control::{Control, DebugFlags};
//!
//! let mut ctl = Control::with_backend(Backend::MultiCoreCpu);
//! ctl.debug = DebugFlags::COMPILE | DebugFlags::KERNEL_RUN;
//! ctl.lanes = Some(8);
//! assert!(ctl.debug.contains(DebugFlags::COMPILE));
//! ```

use core::ops::{BitOr, BitOrAssign};

use crate::backend::{get_backend, Backend};

/// Diagnostic switches. Output goes through `tracing` at `info` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DebugFlags(u32);

impl DebugFlags {
    /// No extra diagnostics.
    pub const NONE: Self = Self(0);
    /// Log every kernel compilation and cache hit.
    pub const COMPILE: Self = Self(1);
    /// Log generated device source.
    pub const SHOW_CODE: Self = Self(1 << 1);
    /// Log every kernel launch with its geometry.
    pub const KERNEL_RUN: Self = Self(1 << 2);

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for DebugFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DebugFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Work-groups launched per compute unit when no lane count is forced.
pub const DEFAULT_WG_PER_COMPUTE_UNIT: usize = 8;

/// Inputs shorter than this stay on a single host lane in automatic mode.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

/// Inputs at least this long may go to a GPU in automatic mode.
pub const DEFAULT_GPU_THRESHOLD: usize = 1 << 16;

/// Per-call accelerator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    /// Backend to run on. `Automatic` decides per call.
    pub backend: Backend,
    /// Diagnostics to emit.
    pub debug: DebugFlags,
    /// Reuse compiled kernels across calls with the same signature.
    pub cache_kernels: bool,
    /// GPU work-groups per compute unit; bounds the number of lanes.
    pub wg_per_compute_unit: usize,
    /// Forces the number of partial-reduction lanes (clamped to the input).
    pub lanes: Option<usize>,
    /// Automatic mode: minimum length for multicore execution.
    pub parallel_threshold: usize,
    /// Automatic mode: minimum length for GPU execution.
    pub gpu_threshold: usize,
    /// Upper bound on live device bytes per manager.
    pub memory_limit: Option<usize>,
}

impl Control {
    /// A control with default settings and the given backend.
    #[must_use]
    pub fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            debug: DebugFlags::NONE,
            cache_kernels: true,
            wg_per_compute_unit: DEFAULT_WG_PER_COMPUTE_UNIT,
            lanes: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            gpu_threshold: DEFAULT_GPU_THRESHOLD,
            memory_limit: None,
        }
    }

    /// Shorthand for `self.debug.contains(flag)`.
    #[must_use]
    pub const fn debugging(&self, flag: DebugFlags) -> bool {
        self.debug.contains(flag)
    }
}

impl Default for Control {
    /// Uses the process-wide default backend from [`get_backend`].
    fn default() -> Self {
        Self::with_backend(get_backend())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let mut flags = DebugFlags::COMPILE;
        assert!(!flags.contains(DebugFlags::SHOW_CODE));
        flags |= DebugFlags::SHOW_CODE;
        assert!(flags.contains(DebugFlags::COMPILE | DebugFlags::SHOW_CODE));
        assert!(!flags.contains(DebugFlags::KERNEL_RUN));
        assert!(flags.contains(DebugFlags::NONE));
        assert_eq!(flags.bits(), 0b11);
    }

    #[test]
    fn explicit_backend_defaults() {
        let ctl = Control::with_backend(Backend::SerialCpu);
        assert_eq!(ctl.backend, Backend::SerialCpu);
        assert!(ctl.cache_kernels);
        assert_eq!(ctl.lanes, None);
        assert_eq!(ctl.memory_limit, None);
        assert!(!ctl.debugging(DebugFlags::COMPILE));
    }
}
