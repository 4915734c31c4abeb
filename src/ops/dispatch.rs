//! Backend dispatch.
//!
//! Turns a [`Control`] into a resource manager for one call. Forced
//! backends are honored exactly; `Automatic` decides from the input length
//! and whether the function objects have a device form:
//!
//! 1. `Wgpu` if compiled in, a device is present, everything is
//!    transportable and `len >= ctl.gpu_threshold`
//! 2. `MultiCoreCpu` if `len >= ctl.parallel_threshold`
//! 3. `SerialCpu` otherwise

use crate::backend::Backend;
use crate::control::Control;
use crate::error::Result;
use crate::resource::cpu::HostManager;
use crate::resource::ResourceManager;

/// The backend a call of `len` elements runs on under `ctl`.
#[must_use]
pub fn resolve(ctl: &Control, len: usize, transportable: bool) -> Backend {
    match ctl.backend {
        Backend::Automatic => {
            if transportable && len >= ctl.gpu_threshold && gpu_ready() {
                Backend::Wgpu
            } else if len >= ctl.parallel_threshold {
                Backend::MultiCoreCpu
            } else {
                Backend::SerialCpu
            }
        }
        forced => forced,
    }
}

/// A fresh manager for `backend`.
///
/// `Backend::Automatic` is treated as `SerialCpu`; use [`select`] to
/// resolve it.
///
/// # Errors
///
/// [`Error::Unavailable`](crate::error::Error::Unavailable) when the
/// backend is not compiled in or no device could be opened.
pub fn manager(backend: Backend, ctl: &Control) -> Result<Box<dyn ResourceManager>> {
    match backend {
        Backend::Automatic | Backend::SerialCpu => Ok(Box::new(HostManager::serial(ctl))),
        Backend::MultiCoreCpu => Ok(Box::new(HostManager::multicore(ctl))),
        Backend::Wgpu => wgpu_manager(ctl),
        Backend::Cuda => cuda_manager(ctl),
    }
}

/// Resolves `ctl` for a call of `len` elements and opens the manager.
///
/// # Errors
///
/// See [`manager`].
pub fn select(ctl: &Control, len: usize, transportable: bool) -> Result<Box<dyn ResourceManager>> {
    let backend = resolve(ctl, len, transportable);
    tracing::debug!(
        requested = ?ctl.backend,
        selected = ?backend,
        len,
        transportable,
        "backend selected"
    );
    manager(backend, ctl)
}

#[cfg(feature = "wgpu")]
fn gpu_ready() -> bool {
    let ready = crate::resource::wgpu::gpu_available();
    if !ready {
        tracing::warn!("no GPU adapter available, automatic mode stays on the host");
    }
    ready
}

#[cfg(not(feature = "wgpu"))]
const fn gpu_ready() -> bool {
    false
}

#[cfg(feature = "wgpu")]
fn wgpu_manager(ctl: &Control) -> Result<Box<dyn ResourceManager>> {
    Ok(Box::new(crate::resource::wgpu::WgpuManager::new(ctl)?))
}

#[cfg(not(feature = "wgpu"))]
fn wgpu_manager(_ctl: &Control) -> Result<Box<dyn ResourceManager>> {
    Err(crate::error::Error::Unavailable {
        backend: Backend::Wgpu,
        reason: "built without the `wgpu` feature".into(),
    })
}

#[cfg(feature = "cuda")]
fn cuda_manager(ctl: &Control) -> Result<Box<dyn ResourceManager>> {
    Ok(Box::new(crate::resource::cuda::CudaManager::new(ctl)?))
}

#[cfg(not(feature = "cuda"))]
fn cuda_manager(_ctl: &Control) -> Result<Box<dyn ResourceManager>> {
    Err(crate::error::Error::Unavailable {
        backend: Backend::Cuda,
        reason: "built without the `cuda` feature".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn forced_backends_are_kept() {
        let ctl = Control::with_backend(Backend::SerialCpu);
        assert_eq!(resolve(&ctl, 1 << 20, true), Backend::SerialCpu);
        let ctl = Control::with_backend(Backend::Cuda);
        assert_eq!(resolve(&ctl, 0, false), Backend::Cuda);
    }

    #[test]
    fn automatic_uses_thresholds() {
        let mut ctl = Control::with_backend(Backend::Automatic);
        ctl.parallel_threshold = 100;
        ctl.gpu_threshold = usize::MAX;
        assert_eq!(resolve(&ctl, 99, true), Backend::SerialCpu);
        assert_eq!(resolve(&ctl, 100, true), Backend::MultiCoreCpu);
        assert_eq!(resolve(&ctl, 1 << 20, false), Backend::MultiCoreCpu);
    }

    #[test]
    fn host_managers_report_their_backend() {
        let ctl = Control::with_backend(Backend::MultiCoreCpu);
        let rm = select(&ctl, 10, false).unwrap();
        assert_eq!(rm.backend(), Backend::MultiCoreCpu);
        assert_eq!(rm.target(), "host-multicore");
        let rm = manager(Backend::Automatic, &ctl).unwrap();
        assert_eq!(rm.backend(), Backend::SerialCpu);
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn missing_gpu_feature_is_unavailable() {
        let ctl = Control::with_backend(Backend::Wgpu);
        let err = select(&ctl, 10, true).err().unwrap();
        assert!(matches!(err, Error::Unavailable { backend: Backend::Wgpu, .. }));

        let mut ctl = Control::with_backend(Backend::Automatic);
        ctl.gpu_threshold = 0;
        assert_eq!(resolve(&ctl, 1 << 20, true), Backend::MultiCoreCpu);
    }
}
