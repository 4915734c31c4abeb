//! # Accelerator resource management
//!
//! The [`ResourceManager`] trait is the only thing the operator talks to.
//! Every backend implements it the same way, so adding an accelerator is a
//! matter of adding a module here and a match arm in
//! [`ops::dispatch`](crate::ops::dispatch).
//!
//! ## Submodules
//!
//! - [`lifecycle`] — buffer state machine shared by all backends
//! - [`cpu`] — serial and `rayon` multicore host managers
//! - [`wgpu`] *(opt-in)* — GPU manager built on `wgpu` compute pipelines
//! - [`cuda`] *(opt-in)* — CUDA-named adapter translated onto `wgpu`
//!
//! ## Launch model
//!
//! A launch splits `len` elements into `lanes` contiguous chunks. Each lane
//! folds its chunk left to right and stores one partial plus a validity
//! flag (`u32`, non-zero when the lane saw at least one element). The
//! caller combines the valid partials in lane order.

use core::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use briny::prelude::{Validate, ValidationError};

use crate::backend::Backend;
use crate::control::Control;
use crate::device::{DeviceCode, Element, KernelArgs};
use crate::error::Result;
use crate::functional::{BinaryFunction, UnaryFunction};

pub mod cpu;
pub mod lifecycle;
#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(any(feature = "wgpu", feature = "cuda"))]
pub mod wgpu;

pub use lifecycle::{BufferState, BufferTable};

/// Opaque handle to a device buffer owned by one manager.
///
/// The handle carries the owning table's process-unique tag, so a manager
/// never mistakes another manager's buffer for one of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId {
    pub(crate) owner: u64,
    pub(crate) index: u64,
}

impl BufferId {
    /// Stand-in id for errors raised before a buffer exists.
    pub const UNALLOCATED: Self = Self { owner: 0, index: 0 };
}

impl core::fmt::Display for BufferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}.{}", self.owner, self.index)
    }
}

/// Opaque handle to a compiled kernel owned by one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelId(pub(crate) u64);

impl core::fmt::Display for KernelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// Layout facts about an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementDesc {
    /// Rust type name.
    pub rust: &'static str,
    /// Size in bytes.
    pub size: usize,
    /// WGSL scalar name, if any.
    pub wgsl: Option<&'static str>,
}

impl ElementDesc {
    /// Describes `E`.
    #[must_use]
    pub fn of<E: Element>() -> Self {
        Self {
            rust: core::any::type_name::<E>(),
            size: size_of::<E>(),
            wgsl: E::WGSL,
        }
    }
}

/// A function object as seen by a compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctorDesc {
    /// Rust type name of the function object.
    pub rust: &'static str,
    /// Device form, when it has one.
    pub device: Option<DeviceCode>,
}

/// Everything a backend needs to build a fused transform-reduce kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    /// Human-readable kernel name.
    pub name: String,
    /// Input element layout.
    pub input: ElementDesc,
    /// Output (accumulator) element layout.
    pub output: ElementDesc,
    /// The transform.
    pub transform: FunctorDesc,
    /// The reduction.
    pub reduce: FunctorDesc,
}

impl KernelSignature {
    /// The signature of `transform` fused with `reduce` over `In -> T`.
    pub fn fused<In, T, U, B>(transform: &U, reduce: &B) -> Self
    where
        In: Element,
        T: Element,
        U: UnaryFunction<In, T>,
        B: BinaryFunction<T>,
    {
        let transform = FunctorDesc {
            rust: core::any::type_name::<U>(),
            device: transform.device(),
        };
        let reduce = FunctorDesc {
            rust: core::any::type_name::<B>(),
            device: reduce.device(),
        };
        let short = |f: &FunctorDesc| f.device.as_ref().map_or(f.rust, |d| d.name);
        Self {
            name: format!("transform_reduce<{}, {}>", short(&transform), short(&reduce)),
            input: ElementDesc::of::<In>(),
            output: ElementDesc::of::<T>(),
            transform,
            reduce,
        }
    }

    /// Whether both functors and both element types have a device form.
    #[must_use]
    pub fn is_transportable(&self) -> bool {
        self.transform.device.is_some()
            && self.reduce.device.is_some()
            && self.input.wgsl.is_some()
            && self.output.wgsl.is_some()
    }

    /// Packed functor state: the transform's words first, then the
    /// reduction's. Returns the arguments and the reduction's word offset.
    #[must_use]
    pub fn args(&self) -> (KernelArgs, usize) {
        let mut args = KernelArgs::new();
        if let Some(code) = &self.transform.device {
            args.extend(&code.args);
        }
        let reduce_base = args.len();
        if let Some(code) = &self.reduce.device {
            args.extend(&code.args);
        }
        (args, reduce_base)
    }

    /// Cache key for this signature on `target`. Packed state is not part
    /// of the key; it travels through [`ResourceManager::append`].
    #[must_use]
    pub fn key(&self, target: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        target.hash(&mut hasher);
        self.name.hash(&mut hasher);
        self.input.hash(&mut hasher);
        self.output.hash(&mut hasher);
        for functor in [&self.transform, &self.reduce] {
            functor.rust.hash(&mut hasher);
            if let Some(code) = &functor.device {
                code.body.hash(&mut hasher);
                code.args.len().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

/// Whether `src` contains one of `words` as a whole identifier.
pub(crate) fn contains_token(src: &str, words: &[&str]) -> bool {
    src.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|token| words.contains(&token))
}

/// Largest device body accepted, in bytes.
const MAX_BODY_LEN: usize = 16 * 1024;

impl Validate for KernelSignature {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.input.size == 0 || self.output.size == 0 {
            return Err(ValidationError);
        }
        for functor in [&self.transform, &self.reduce] {
            let Some(code) = &functor.device else {
                continue;
            };
            if code.body.len() > MAX_BODY_LEN || !code.body.contains("return") {
                return Err(ValidationError);
            }
            // bodies are spliced into a generated module; no nested items
            if contains_token(&code.body, &["fn", "enable"])
                || ["@group", "@binding", "#include"]
                    .iter()
                    .any(|bad| code.body.contains(bad))
            {
                return Err(ValidationError);
            }
        }
        Ok(())
    }
}

/// The host-invocable form of a compiled kernel.
///
/// Host backends execute through this; device backends ignore it and run
/// the code they compiled from the signature.
pub trait HostKernel: Sync {
    /// Folds one lane of packed input elements. Returns the packed partial,
    /// or `None` for an empty lane.
    fn fold_lane(&self, input: &[u8]) -> Option<Vec<u8>>;
}

/// One kernel launch.
pub struct Launch<'a> {
    /// Kernel compiled by the same manager.
    pub kernel: KernelId,
    /// Input buffer, read from `offset` for `len` elements.
    pub input: BufferId,
    /// First element of the input buffer to fold.
    pub offset: usize,
    /// Number of elements to fold.
    pub len: usize,
    /// Receives `lanes` partials.
    pub partials: BufferId,
    /// Receives `lanes` `u32` validity flags.
    pub flags: BufferId,
    /// Number of lanes.
    pub lanes: usize,
    /// Host form of the kernel.
    pub host: &'a dyn HostKernel,
}

/// Counters describing a manager's activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerStats {
    /// Kernels actually built.
    pub compiles: usize,
    /// `compile` calls answered from a cache.
    pub cache_hits: usize,
    /// Kernel launches.
    pub launches: usize,
    /// Buffers currently owning storage.
    pub live_buffers: usize,
    /// Bytes held by live buffers.
    pub live_bytes: usize,
}

/// Capability interface over one accelerator.
///
/// Every call is synchronous: it returns once the device work it started,
/// and anything it depends on, has completed.
pub trait ResourceManager {
    /// The backend this manager implements.
    fn backend(&self) -> Backend;

    /// Identifier of the device, used in diagnostics and cache keys.
    fn target(&self) -> &str;

    /// Adopts the per-call settings of `ctl`: diagnostics, kernel caching
    /// and the memory ceiling. The operator calls this before every use, so
    /// the control passed to a call wins over the one the manager was built
    /// with.
    fn configure(&mut self, ctl: &Control);

    /// Lane count for folding `len` elements.
    fn lanes(&self, len: usize, ctl: &Control) -> usize;

    /// Builds (or fetches from cache) the kernel for `signature`.
    ///
    /// # Errors
    ///
    /// [`Error::Compile`](crate::error::Error::Compile) when the kernel
    /// cannot be built, [`Error::NotTransportable`](crate::error::Error::NotTransportable)
    /// when a device backend is handed host-only code.
    fn compile(&mut self, signature: &KernelSignature) -> Result<KernelId>;

    /// Reserves `bytes` of device storage, seeded from `host` when given.
    ///
    /// # Errors
    ///
    /// Allocation or transfer failure; [`Error::Overflow`](crate::error::Error::Overflow)
    /// when `host` is longer than `bytes`.
    fn init(&mut self, host: Option<&[u8]>, bytes: usize) -> Result<BufferId>;

    /// Registers packed functor state for the next launch of `kernel`.
    ///
    /// # Errors
    ///
    /// Unknown kernels.
    fn append(&mut self, kernel: KernelId, args: &KernelArgs) -> Result<()>;

    /// Copies `host` into the start of `buffer`.
    ///
    /// # Errors
    ///
    /// Lifecycle violations and transfer failures.
    fn write(&mut self, buffer: BufferId, host: &[u8]) -> Result<()>;

    /// Runs a launch to completion.
    ///
    /// # Errors
    ///
    /// Lifecycle violations and launch failures.
    fn dispatch(&mut self, launch: &Launch<'_>) -> Result<()>;

    /// Copies the whole of `buffer` back to the host.
    ///
    /// # Errors
    ///
    /// Reading a buffer whose contents were never defined, lifecycle
    /// violations and transfer failures.
    fn read(&mut self, buffer: BufferId) -> Result<Vec<u8>>;

    /// Releases `buffer`.
    ///
    /// # Errors
    ///
    /// Double frees and unknown buffers.
    fn free(&mut self, buffer: BufferId) -> Result<()>;

    /// Activity counters.
    fn stats(&self) -> ManagerStats;
}

/// Splits `len` elements into at most `lanes` contiguous chunks and
/// returns the chunk length (zero when `len` is zero).
#[must_use]
pub fn chunk_len(len: usize, lanes: usize) -> usize {
    if len == 0 {
        0
    } else {
        len.div_ceil(lanes.max(1))
    }
}
