//! CUDA backend.
//!
//! There is no native CUDA toolchain behind this module yet: every call is
//! translated onto the WGPU manager, which runs on whatever adapter the
//! platform exposes (an NVIDIA card through Vulkan on most systems). The
//! target name records the translation as `cuda->wgpu:<adapter>`.

use super::wgpu::WgpuManager;
use super::{BufferId, KernelId, KernelSignature, Launch, ManagerStats, ResourceManager};
use crate::backend::Backend;
use crate::control::Control;
use crate::device::KernelArgs;
use crate::error::Result;

/// CUDA-named manager delegating to [`WgpuManager`].
pub struct CudaManager {
    inner: WgpuManager,
}

impl CudaManager {
    /// Opens the shared GPU context under the CUDA backend name.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`](crate::error::Error::Unavailable) when no GPU
    /// could be opened.
    pub fn new(ctl: &Control) -> Result<Self> {
        let mut inner = WgpuManager::with_backend(Backend::Cuda, ctl)?;
        inner.prefix_target("cuda->");
        tracing::debug!(device = inner.target(), "cuda backend translated onto wgpu");
        Ok(Self { inner })
    }
}

impl ResourceManager for CudaManager {
    fn backend(&self) -> Backend {
        Backend::Cuda
    }

    fn target(&self) -> &str {
        self.inner.target()
    }

    fn configure(&mut self, ctl: &Control) {
        self.inner.configure(ctl);
    }

    fn lanes(&self, len: usize, ctl: &Control) -> usize {
        self.inner.lanes(len, ctl)
    }

    fn compile(&mut self, signature: &KernelSignature) -> Result<KernelId> {
        self.inner.compile(signature) // wgpu fallback
    }

    fn init(&mut self, host: Option<&[u8]>, bytes: usize) -> Result<BufferId> {
        self.inner.init(host, bytes)
    }

    fn append(&mut self, kernel: KernelId, args: &KernelArgs) -> Result<()> {
        self.inner.append(kernel, args)
    }

    fn write(&mut self, buffer: BufferId, host: &[u8]) -> Result<()> {
        self.inner.write(buffer, host)
    }

    fn dispatch(&mut self, launch: &Launch<'_>) -> Result<()> {
        self.inner.dispatch(launch) // wgpu fallback
    }

    fn read(&mut self, buffer: BufferId) -> Result<Vec<u8>> {
        self.inner.read(buffer)
    }

    fn free(&mut self, buffer: BufferId) -> Result<()> {
        self.inner.free(buffer)
    }

    fn stats(&self) -> ManagerStats {
        self.inner.stats()
    }
}
