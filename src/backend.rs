//! Backend selection module.
//!
//! This module defines the available accelerator backends and the
//! process-wide default used by [`Control::default`](crate::control::Control).
//!
//! # Supported Backends
//!
//! - `Automatic` — picks a backend per call from the input size and whether
//!   the function objects can run on a device (default).
//! - `SerialCpu` — a single host lane on the calling thread.
//! - `MultiCoreCpu` — host lanes spread over the `rayon` thread pool.
//! - `Wgpu` — GPU compute through `wgpu` (feature `wgpu`).
//! - `Cuda` — CUDA-named adapter over the `wgpu` path (feature `cuda`).
//!
//! The default is stored globally in an `AtomicU8` so it can be switched
//! at runtime without locking.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of supported accelerator backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// Chosen per call (default).
    #[default]
    Automatic = 0,
    /// One host lane.
    SerialCpu,
    /// Host lanes on the `rayon` pool.
    MultiCoreCpu,
    /// GPU compute through `wgpu`.
    Wgpu,
    /// CUDA adapter, translated onto `wgpu`.
    Cuda,
}

impl Backend {
    /// Whether this backend executes on the host.
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::SerialCpu | Self::MultiCoreCpu)
    }
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Automatic),
            1 => Ok(Self::SerialCpu),
            2 => Ok(Self::MultiCoreCpu),
            3 => Ok(Self::Wgpu),
            4 => Ok(Self::Cuda),
            _ => Err(()),
        }
    }
}

/// Global state for the default backend.
///
/// Only read when a control is default-constructed; a change never affects
/// a call already in flight.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Automatic as u8);

/// Sets the backend that default-constructed controls select.
///
/// # Example
///
/// ```
/// use fused_reduce::backend::{set_backend, get_backend, Backend};
/// set_backend(Backend::SerialCpu);
/// assert_eq!(get_backend(), Backend::SerialCpu);
/// set_backend(Backend::Automatic);
/// ```
pub fn set_backend(b: Backend) {
    tracing::debug!(backend = ?b, "default backend changed");
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the current default backend.
///
/// If the stored value is invalid, defaults to [`Backend::Automatic`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_round_trip() {
        for b in [
            Backend::Automatic,
            Backend::SerialCpu,
            Backend::MultiCoreCpu,
            Backend::Wgpu,
            Backend::Cuda,
        ] {
            assert_eq!(Backend::try_from(b as u8), Ok(b));
        }
        assert!(Backend::try_from(9).is_err());
    }

    #[test]
    fn host_backends() {
        assert!(Backend::SerialCpu.is_host());
        assert!(Backend::MultiCoreCpu.is_host());
        assert!(!Backend::Wgpu.is_host());
        assert!(!Backend::Automatic.is_host());
    }
}
