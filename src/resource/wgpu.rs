//! GPU resource manager built on WGPU compute pipelines.
//!
//! The device and queue are initialized once per process via `lazy_static`
//! and shared by every [`WgpuManager`]. Kernels are generated from the
//! `transform_reduce.wgsl` template by splicing in the functors' WGSL
//! bodies, then compiled into compute pipelines. Built pipelines are kept
//! in a process-wide cache keyed by [`KernelSignature::key`].
//!
//! All calls block until the GPU work they submitted has finished.
//! Buffers are padded to whole 32-bit words; a write whose length is not a
//! multiple of four zero-fills the rest of its last word.

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex, PoisonError};

use briny::prelude::{Validate, ValidationError};
use wgpu::util::DeviceExt;

use super::{
    chunk_len, contains_token, BufferId, BufferState, BufferTable, KernelId, KernelSignature, Launch,
    ManagerStats, ResourceManager,
};
use crate::backend::Backend;
use crate::control::{Control, DebugFlags};
use crate::device::KernelArgs;
use crate::error::{Direction, Error, Result};

const TRANSFORM_REDUCE: &str = include_str!("shaders/transform_reduce.wgsl");

/// Threads per work-group; one work-group folds one lane.
pub const WORKGROUP_SIZE: usize = 64;

/// Failures while acquiring the GPU.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// No adapter matched the request.
    #[error("adapter error: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    /// The adapter refused to open a device.
    #[error("device error: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

/// Holds the WGPU device and queue plus the one bind group layout every
/// fused kernel uses.
pub struct GpuContext {
    /// The GPU device.
    pub device: wgpu::Device,
    /// Submission queue of `device`.
    pub queue: wgpu::Queue,
    /// Adapter name, used as the manager target.
    pub adapter: String,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuContext {
    /// Selects the default adapter and opens a device on it.
    ///
    /// # Errors
    ///
    /// [`GpuError`] when no adapter is present or the device request fails.
    pub fn new() -> core::result::Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("fused_reduce"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))?;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("transform_reduce_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, false),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("transform_reduce_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "GPU context initialized");
        Ok(Self {
            device,
            queue,
            adapter: info.name,
            layout,
            pipeline_layout,
        })
    }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: core::result::Result<GpuContext, String> =
        GpuContext::new().map_err(|e| e.to_string());

    static ref PIPELINES: Mutex<HashMap<u64, Arc<CompiledKernel>>> = Mutex::new(HashMap::new());
}

/// Whether a GPU device could be opened in this process.
#[must_use]
pub fn gpu_available() -> bool {
    GPU_CONTEXT.is_ok()
}

fn context(backend: Backend) -> Result<&'static GpuContext> {
    GPU_CONTEXT.as_ref().map_err(|reason| Error::Unavailable {
        backend,
        reason: reason.clone(),
    })
}

/// Wrapper for generated WGSL, checked before it reaches the driver.
pub struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        let src = self.0;
        if src.len() > 65536 || !src.contains("fn main") {
            return Err(ValidationError);
        }
        if src.contains("{{") || src.contains("#include") || src.contains("::") {
            return Err(ValidationError);
        }
        if contains_token(src, &["asm", "unsafe", "ptr", "import"]) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Instantiates the kernel template for `signature`.
///
/// # Errors
///
/// [`Error::NotTransportable`] when an element type or functor has no
/// WGSL form.
pub fn render(signature: &KernelSignature, target: &str) -> Result<String> {
    let not_transportable = |item: &'static str| Error::NotTransportable {
        item,
        target: target.to_string(),
    };
    let input = signature
        .input
        .wgsl
        .ok_or_else(|| not_transportable(signature.input.rust))?;
    let output = signature
        .output
        .wgsl
        .ok_or_else(|| not_transportable(signature.output.rust))?;
    let transform = signature
        .transform
        .device
        .as_ref()
        .ok_or_else(|| not_transportable(signature.transform.rust))?;
    let reduce = signature
        .reduce
        .device
        .as_ref()
        .ok_or_else(|| not_transportable(signature.reduce.rust))?;
    let (_, reduce_base) = signature.args();

    Ok(TRANSFORM_REDUCE
        .replace("{{IN}}", input)
        .replace("{{OUT}}", output)
        .replace("{{WORKGROUP}}", &WORKGROUP_SIZE.to_string())
        .replace("{{TRANSFORM_BASE}}", "0")
        .replace("{{REDUCE_BASE}}", &reduce_base.to_string())
        .replace("{{TRANSFORM}}", &transform.body_with_accessor("transform_state"))
        .replace("{{REDUCE}}", &reduce.body_with_accessor("reduce_state")))
}

/// A compiled fused kernel.
pub struct CompiledKernel {
    pipeline: wgpu::ComputePipeline,
    input_size: usize,
    output_size: usize,
    args: KernelArgs,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    padded: u64,
}

const fn padded_len(bytes: usize) -> u64 {
    let words = bytes.div_ceil(4);
    if words == 0 { 4 } else { (words * 4) as u64 }
}

fn padded_bytes(host: &[u8]) -> Vec<u8> {
    let mut out = host.to_vec();
    out.resize(padded_len(host.len()) as usize, 0);
    out
}

/// A resource manager backed by the process-wide WGPU device.
pub struct WgpuManager {
    ctx: &'static GpuContext,
    backend: Backend,
    target: String,
    buffers: BufferTable<GpuBuffer>,
    kernels: HashMap<KernelId, Arc<CompiledKernel>>,
    by_key: HashMap<u64, KernelId>,
    next_kernel: u64,
    cache_kernels: bool,
    debug: DebugFlags,
    memory_limit: Option<usize>,
    compiles: usize,
    cache_hits: usize,
    launches: usize,
}

impl WgpuManager {
    /// A manager on the shared GPU context.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] when no GPU could be opened.
    pub fn new(ctl: &Control) -> Result<Self> {
        Self::with_backend(Backend::Wgpu, ctl)
    }

    pub(crate) fn with_backend(backend: Backend, ctl: &Control) -> Result<Self> {
        let ctx = context(backend)?;
        Ok(Self {
            ctx,
            backend,
            target: format!("wgpu:{}", ctx.adapter),
            buffers: BufferTable::new(),
            kernels: HashMap::new(),
            by_key: HashMap::new(),
            next_kernel: 1,
            cache_kernels: ctl.cache_kernels,
            debug: ctl.debug,
            memory_limit: ctl.memory_limit,
            compiles: 0,
            cache_hits: 0,
            launches: 0,
        })
    }

    /// Appends a prefix to the target name.
    pub(crate) fn prefix_target(&mut self, prefix: &str) {
        self.target = format!("{prefix}{}", self.target);
    }

    fn register(&mut self, key: u64, kernel: Arc<CompiledKernel>) -> KernelId {
        let id = KernelId(self.next_kernel);
        self.next_kernel += 1;
        self.kernels.insert(id, kernel);
        if self.cache_kernels {
            self.by_key.insert(key, id);
        }
        id
    }

    fn build(&self, signature: &KernelSignature) -> Result<CompiledKernel> {
        let compile_error = |diagnostic: String| Error::Compile {
            kernel: signature.name.clone(),
            target: self.target.clone(),
            diagnostic,
        };

        signature
            .validate()
            .map_err(|e| compile_error(format!("functor bodies rejected: {e}")))?;
        let source = render(signature, &self.target)?;
        WgslSource(&source)
            .validate()
            .map_err(|e| compile_error(format!("generated source rejected: {e}")))?;
        if self.debug.contains(DebugFlags::SHOW_CODE) {
            tracing::info!(kernel = %signature.name, device = %self.target, "generated source:\n{source}");
        }

        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(signature.name.as_str()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(signature.name.as_str()),
            layout: Some(&self.ctx.pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(compile_error(err.to_string()));
        }

        Ok(CompiledKernel {
            pipeline,
            input_size: signature.input.size,
            output_size: signature.output.size,
            args: signature.args().0,
        })
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let Some(limit) = self.memory_limit else {
            return Ok(());
        };
        let live = self.buffers.live_bytes();
        if live.saturating_add(bytes) > limit {
            return Err(Error::Allocation {
                bytes,
                target: self.target.clone(),
                reason: format!("{live} of {limit} bytes already in use"),
            });
        }
        Ok(())
    }

    fn usage() -> wgpu::BufferUsages {
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
    }

    fn wait(&self, direction: Option<Direction>, kernel: Option<KernelId>) -> Result<()> {
        self.ctx
            .device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| match (direction, kernel) {
                (Some(direction), _) => Error::Transfer {
                    direction,
                    target: self.target.clone(),
                    reason: e.to_string(),
                },
                (None, Some(kernel)) => Error::Launch {
                    kernel,
                    target: self.target.clone(),
                    reason: e.to_string(),
                },
                (None, None) => Error::Unavailable {
                    backend: self.backend,
                    reason: e.to_string(),
                },
            })
    }
}

impl ResourceManager for WgpuManager {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn configure(&mut self, ctl: &Control) {
        self.cache_kernels = ctl.cache_kernels;
        self.debug = ctl.debug;
        self.memory_limit = ctl.memory_limit;
    }

    fn lanes(&self, len: usize, ctl: &Control) -> usize {
        let max = self.ctx.device.limits().max_compute_workgroups_per_dimension as usize;
        ctl.lanes
            .unwrap_or(ctl.wg_per_compute_unit * 32)
            .min(len.div_ceil(WORKGROUP_SIZE))
            .min(max)
            .max(1)
    }

    fn compile(&mut self, signature: &KernelSignature) -> Result<KernelId> {
        let key = signature.key(&self.target);
        if self.cache_kernels {
            if let Some(&id) = self.by_key.get(&key) {
                self.cache_hits += 1;
                if self.debug.contains(DebugFlags::COMPILE) {
                    tracing::info!(kernel = %signature.name, %id, device = %self.target, "kernel cache hit");
                }
                return Ok(id);
            }
            let shared = PIPELINES
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
                .cloned();
            if let Some(kernel) = shared {
                self.cache_hits += 1;
                let id = self.register(key, kernel);
                if self.debug.contains(DebugFlags::COMPILE) {
                    tracing::info!(kernel = %signature.name, %id, device = %self.target, "pipeline reused");
                }
                return Ok(id);
            }
        }

        let kernel = Arc::new(self.build(signature)?);
        if self.cache_kernels {
            PIPELINES
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, Arc::clone(&kernel));
        }
        let id = self.register(key, kernel);
        self.compiles += 1;
        if self.debug.contains(DebugFlags::COMPILE) {
            tracing::info!(kernel = %signature.name, %id, device = %self.target, "kernel compiled");
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

        let device = &self.ctx.device;
        let padded = padded_len(bytes);
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = match host {
            Some(src) => {
                let mut contents = padded_bytes(src);
                contents.resize(padded as usize, 0);
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("fused_reduce_buffer"),
                    contents: &contents,
                    usage: Self::usage(),
                })
            }
            None => device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("fused_reduce_buffer"),
                size: padded,
                usage: Self::usage(),
                mapped_at_creation: false,
            }),
        };
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            buffer.destroy();
            return Err(Error::Allocation {
                bytes,
                target: self.target.clone(),
                reason: err.to_string(),
            });
        }

        let id = self.buffers.insert(GpuBuffer { buffer, padded }, bytes, host.is_some());
        tracing::debug!(%id, bytes, seeded = host.is_some(), device = %self.target, "buffer allocated");
        Ok(id)
    }

    fn append(&mut self, kernel: KernelId, args: &KernelArgs) -> Result<()> {
        let compiled = self.kernels.get(&kernel).ok_or(Error::UnknownKernel(kernel))?;
        let updated = CompiledKernel {
            pipeline: compiled.pipeline.clone(),
            input_size: compiled.input_size,
            output_size: compiled.output_size,
            args: args.clone(),
        };
        self.kernels.insert(kernel, Arc::new(updated));
        Ok(())
    }

    fn write(&mut self, buffer: BufferId, host: &[u8]) -> Result<()> {
        {
            let (gpu, capacity) = self.buffers.live(buffer, "write")?;
            if host.len() > capacity {
                return Err(Error::Overflow {
                    id: buffer,
                    bytes: host.len(),
                    capacity,
                });
            }
            if !host.is_empty() {
                self.ctx.queue.write_buffer(&gpu.buffer, 0, &padded_bytes(host));
                self.ctx.queue.submit(None);
            }
        }
        self.wait(Some(Direction::Upload), None)?;
        self.buffers.transition(buffer, BufferState::Written, "write")
    }

    fn dispatch(&mut self, launch: &Launch<'_>) -> Result<()> {
        let kernel = Arc::clone(
            self.kernels
                .get(&launch.kernel)
                .ok_or(Error::UnknownKernel(launch.kernel))?,
        );
        let launch_error = |reason: String| Error::Launch {
            kernel: launch.kernel,
            target: self.target.clone(),
            reason,
        };

        let (input, input_bytes) = self.buffers.readable(launch.input, "launch from")?;
        let (partials, partials_bytes) = self.buffers.live(launch.partials, "launch into")?;
        let (flags, flags_bytes) = self.buffers.live(launch.flags, "launch into")?;
        if (launch.offset + launch.len) * kernel.input_size > input_bytes {
            return Err(launch_error(format!(
                "{} elements from offset {} exceed input of {input_bytes} bytes",
                launch.len, launch.offset
            )));
        }
        if partials_bytes < launch.lanes * kernel.output_size {
            return Err(Error::Overflow {
                id: launch.partials,
                bytes: launch.lanes * kernel.output_size,
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

        let to_u32 = |v: usize, what: &str| {
            u32::try_from(v).map_err(|_| launch_error(format!("{what} {v} exceeds u32")))
        };
        let geometry = [
            to_u32(launch.offset, "offset")?,
            to_u32(launch.len, "length")?,
            to_u32(chunk_len(launch.len, launch.lanes), "lane length")?,
            to_u32(launch.lanes, "lane count")?,
        ];

        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let geometry_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("transform_reduce_geometry"),
            contents: bytemuck::cast_slice(&geometry),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        // storage bindings cannot be empty
        let mut words = kernel.args.words().to_vec();
        if words.is_empty() {
            words.push(0);
        }
        let args_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("transform_reduce_args"),
            contents: bytemuck::cast_slice(&words),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("transform_reduce_bind_group"),
            layout: &self.ctx.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: geometry_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: args_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: partials.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: flags.buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("transform_reduce_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("transform_reduce_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(geometry[3], 1, 1);
        }
        self.ctx.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(launch_error(err.to_string()));
        }
        self.wait(None, Some(launch.kernel))?;

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
                workgroup = WORKGROUP_SIZE,
                device = %self.target,
                "kernel run"
            );
        }
        Ok(())
    }

    fn read(&mut self, buffer: BufferId) -> Result<Vec<u8>> {
        let transfer_error = |reason: String| Error::Transfer {
            direction: Direction::Download,
            target: self.target.clone(),
            reason,
        };
        let (gpu, bytes) = self.buffers.readable(buffer, "read")?;
        let device = &self.ctx.device;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fused_reduce_staging"),
            size: gpu.padded,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("fused_reduce_readback"),
        });
        encoder.copy_buffer_to_buffer(&gpu.buffer, 0, &staging, 0, gpu.padded);
        self.ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait(Some(Direction::Download), None)?;
        rx.recv()
            .map_err(|e| transfer_error(e.to_string()))?
            .map_err(|e| transfer_error(e.to_string()))?;

        let out = {
            let view = slice.get_mapped_range();
            view[..bytes].to_vec()
        };
        staging.unmap();
        staging.destroy();

        self.buffers.transition(buffer, BufferState::Read, "read")?;
        Ok(out)
    }

    fn free(&mut self, buffer: BufferId) -> Result<()> {
        let (gpu, bytes) = self.buffers.release(buffer)?;
        gpu.buffer.destroy();
        tracing::debug!(id = %buffer, bytes, device = %self.target, "buffer freed");
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

impl Drop for WgpuManager {
    fn drop(&mut self) {
        let live = self.buffers.live_count();
        if live > 0 {
            tracing::debug!(live, device = %self.target, "dropping manager with live buffers");
        }
    }
}
