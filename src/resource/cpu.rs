//! Host resource managers.
//!
//! "Device" memory is ordinary heap memory and kernels run through their
//! [`HostKernel`] form. Two modes exist:
//!
//! - `Serial` — a single lane on the calling thread.
//! - `MultiCore` — lanes are folded in parallel with
//!   [`rayon`](https://docs.rs/rayon); each lane still folds its own chunk
//!   left to right.
//!
//! Both modes honor [`Control::memory_limit`] as a ceiling on live bytes,
//! which makes allocation failures reproducible.

use std::collections::HashMap;

use briny::prelude::Validate;
use rayon::prelude::*;

use super::{
    chunk_len, BufferId, BufferState, BufferTable, HostKernel, KernelId, KernelSignature, Launch,
    ManagerStats, ResourceManager,
};
use crate::backend::Backend;
use crate::control::{Control, DebugFlags};
use crate::device::KernelArgs;
use crate::error::{Error, Result};

/// How host lanes are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMode {
    /// One lane on the calling thread.
    Serial,
    /// Lanes on the `rayon` pool.
    MultiCore,
}

/// Lanes per `rayon` worker when the control does not force a count.
const LANES_PER_THREAD: usize = 4;

/// What a host "compile" produces: the layout the launch will need.
#[derive(Debug, Clone, Copy)]
struct HostProgram {
    input_size: usize,
    output_size: usize,
}

/// A resource manager backed by host memory.
pub struct HostManager {
    mode: HostMode,
    target: &'static str,
    buffers: BufferTable<Vec<u8>>,
    kernels: HashMap<KernelId, HostProgram>,
    by_key: HashMap<u64, KernelId>,
    args: HashMap<KernelId, KernelArgs>,
    next_kernel: u64,
    cache_kernels: bool,
    debug: DebugFlags,
    memory_limit: Option<usize>,
    compiles: usize,
    cache_hits: usize,
    launches: usize,
}

impl HostManager {
    /// A manager in `mode`, configured from `ctl`.
    #[must_use]
    pub fn new(mode: HostMode, ctl: &Control) -> Self {
        let target = match mode {
            HostMode::Serial => "host-serial",
            HostMode::MultiCore => "host-multicore",
        };
        Self {
            mode,
            target,
            buffers: BufferTable::new(),
            kernels: HashMap::new(),
            by_key: HashMap::new(),
            args: HashMap::new(),
            next_kernel: 1,
            cache_kernels: ctl.cache_kernels,
            debug: ctl.debug,
            memory_limit: ctl.memory_limit,
            compiles: 0,
            cache_hits: 0,
            launches: 0,
        }
    }

    /// Serial manager.
    #[must_use]
    pub fn serial(ctl: &Control) -> Self {
        Self::new(HostMode::Serial, ctl)
    }

    /// Multicore manager.
    #[must_use]
    pub fn multicore(ctl: &Control) -> Self {
        Self::new(HostMode::MultiCore, ctl)
    }

    /// Execution mode.
    #[must_use]
    pub const fn mode(&self) -> HostMode {
        self.mode
    }

    /// Arguments registered for `kernel`, if any.
    #[must_use]
    pub fn appended(&self, kernel: KernelId) -> Option<&KernelArgs> {
        self.args.get(&kernel)
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let Some(limit) = self.memory_limit else {
            return Ok(());
        };
        let live = self.buffers.live_bytes();
        if live.saturating_add(bytes) > limit {
            return Err(Error::Allocation {
                bytes,
                target: self.target.to_string(),
                reason: format!("{live} of {limit} bytes already in use"),
            });
        }
        Ok(())
    }

    fn run_lanes(&self, input: &[u8], elem: usize, lanes: usize, host: &dyn HostKernel) -> Vec<Option<Vec<u8>>> {
        let len = input.len() / elem;
        let chunk = chunk_len(len, lanes) * elem;
        if chunk == 0 {
            return Vec::new();
        }
        match self.mode {
            HostMode::Serial => input.chunks(chunk).map(|c| host.fold_lane(c)).collect(),
            HostMode::MultiCore => input
                .par_chunks(chunk)
                .map(|c| host.fold_lane(c))
                .collect(),
        }
    }
}

impl ResourceManager for HostManager {
    fn backend(&self) -> Backend {
        match self.mode {
            HostMode::Serial => Backend::SerialCpu,
            HostMode::MultiCore => Backend::MultiCoreCpu,
        }
    }

    fn target(&self) -> &str {
        self.target
    }

    fn configure(&mut self, ctl: &Control) {
        self.cache_kernels = ctl.cache_kernels;
        self.debug = ctl.debug;
        self.memory_limit = ctl.memory_limit;
    }

    fn lanes(&self, len: usize, ctl: &Control) -> usize {
        match self.mode {
            HostMode::Serial => 1,
            HostMode::MultiCore => ctl
                .lanes
                .unwrap_or_else(|| rayon::current_num_threads() * LANES_PER_THREAD)
                .min(len)
                .max(1),
        }
    }

    fn compile(&mut self, signature: &KernelSignature) -> Result<KernelId> {
        let key = signature.key(self.target);
        if self.cache_kernels {
            if let Some(&id) = self.by_key.get(&key) {
                self.cache_hits += 1;
                if self.debug.contains(DebugFlags::COMPILE) {
                    tracing::info!(kernel = %signature.name, %id, device = self.target, "kernel cache hit");
                }
                return Ok(id);
            }
        }

        signature.validate().map_err(|e| Error::Compile {
            kernel: signature.name.clone(),
            target: self.target.to_string(),
            diagnostic: e.to_string(),
        })?;

        let id = KernelId(self.next_kernel);
        self.next_kernel += 1;
        self.kernels.insert(
            id,
            HostProgram {
                input_size: signature.input.size,
                output_size: signature.output.size,
            },
        );
        if self.cache_kernels {
            self.by_key.insert(key, id);
        }
        self.compiles += 1;
        if self.debug.contains(DebugFlags::COMPILE) {
            tracing::info!(kernel = %signature.name, %id, device = self.target, "kernel compiled");
        }
        Ok(id)
    }

    fn init(&mut self, host: Option<&[u8]>, bytes: usize) -> Result<BufferId> {
        if let Some(src) = host {
            if src.len() > bytes {
                return Err(Error::Overflow {
                    id: BufferId::UNALLOCATED,
                    bytes: src.len(),
                    capacity: bytes,
                });
            }
        }
        self.reserve(bytes)?;

        let mut storage = vec![0u8; bytes];
        if let Some(src) = host {
            storage[..src.len()].copy_from_slice(src);
        }
        let id = self.buffers.insert(storage, bytes, host.is_some());
        tracing::debug!(%id, bytes, seeded = host.is_some(), device = self.target, "buffer allocated");
        Ok(id)
    }

    fn append(&mut self, kernel: KernelId, args: &KernelArgs) -> Result<()> {
        if !self.kernels.contains_key(&kernel) {
            return Err(Error::UnknownKernel(kernel));
        }
        self.args.insert(kernel, args.clone());
        Ok(())
    }

    fn write(&mut self, buffer: BufferId, host: &[u8]) -> Result<()> {
        let (storage, capacity) = self.buffers.live_mut(buffer, "write")?;
        if host.len() > capacity {
            return Err(Error::Overflow {
                id: buffer,
                bytes: host.len(),
                capacity,
            });
        }
        storage[..host.len()].copy_from_slice(host);
        self.buffers.transition(buffer, BufferState::Written, "write")
    }

    fn dispatch(&mut self, launch: &Launch<'_>) -> Result<()> {
        let program = *self
            .kernels
            .get(&launch.kernel)
            .ok_or(Error::UnknownKernel(launch.kernel))?;
        let (_, partials_bytes) = self.buffers.live(launch.partials, "launch into")?;
        let (_, flags_bytes) = self.buffers.live(launch.flags, "launch into")?;
        let partials_needed = launch.lanes * program.output_size;
        if partials_bytes < partials_needed {
            return Err(Error::Overflow {
                id: launch.partials,
                bytes: partials_needed,
                capacity: partials_bytes,
            });
        }
        if flags_bytes < launch.lanes * 4 {
            return Err(Error::Overflow {
                id: launch.flags,
                bytes: launch.lanes * 4,
                capacity: flags_bytes,
            });
        }

        let results = {
            let (input, _) = self.buffers.readable(launch.input, "launch from")?;
            let elem = program.input_size;
            let start = launch.offset * elem;
            let end = start + launch.len * elem;
            if end > input.len() {
                return Err(Error::Launch {
                    kernel: launch.kernel,
                    target: self.target.to_string(),
                    reason: format!("range {start}..{end} exceeds input of {} bytes", input.len()),
                });
            }
            self.run_lanes(&input[start..end], elem, launch.lanes, launch.host)
        };

        let size = program.output_size;
        {
            let (partials, _) = self.buffers.live_mut(launch.partials, "launch into")?;
            for (lane, partial) in results.iter().enumerate() {
                if let Some(bytes) = partial {
                    if bytes.len() != size {
                        return Err(Error::Launch {
                            kernel: launch.kernel,
                            target: self.target.to_string(),
                            reason: format!("lane {lane} produced {} bytes, expected {size}", bytes.len()),
                        });
                    }
                    partials[lane * size..(lane + 1) * size].copy_from_slice(bytes);
                }
            }
        }
        {
            let (flags, _) = self.buffers.live_mut(launch.flags, "launch into")?;
            for lane in 0..launch.lanes {
                let valid = u32::from(results.get(lane).is_some_and(Option::is_some));
                flags[lane * 4..(lane + 1) * 4].copy_from_slice(&valid.to_ne_bytes());
            }
        }
        self.buffers
            .transition(launch.partials, BufferState::Written, "launch into")?;
        self.buffers
            .transition(launch.flags, BufferState::Written, "launch into")?;

        self.launches += 1;
        if self.debug.contains(DebugFlags::KERNEL_RUN) {
            tracing::info!(
                kernel = %launch.kernel,
                len = launch.len,
                lanes = launch.lanes,
                device = self.target,
                "kernel run"
            );
        }
        Ok(())
    }

    fn read(&mut self, buffer: BufferId) -> Result<Vec<u8>> {
        let out = {
            let (storage, _) = self.buffers.readable(buffer, "read")?;
            storage.clone()
        };
        self.buffers.transition(buffer, BufferState::Read, "read")?;
        Ok(out)
    }

    fn free(&mut self, buffer: BufferId) -> Result<()> {
        let (_, bytes) = self.buffers.release(buffer)?;
        tracing::debug!(id = %buffer, bytes, device = self.target, "buffer freed");
        Ok(())
    }

    fn stats(&self) -> ManagerStats {
        ManagerStats {
            compiles: self.compiles,
            cache_hits: self.cache_hits,
            launches: self.launches,
            live_buffers: self.buffers.live_count(),
            live_bytes: self.buffers.live_bytes(),
        }
    }
}
