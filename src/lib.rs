//! fused_reduce: a fused transform-reduce operator over pluggable
//! accelerator backends.
//!
//! One call applies a unary transform to every element of a range and folds
//! the results with an associative binary function, starting from a seed,
//! without materializing the transformed sequence. Where the fold runs is
//! decided by a [`Control`](control::Control): serially on the calling
//! thread, across the `rayon` pool, or on a GPU through `wgpu`.
//!
//! # Features
//!
//! - Object-safe [`ResourceManager`](resource::ResourceManager) interface:
//!   compile, init, append, write, dispatch, read, free.
//! - Host managers (serial and multicore) that are always available.
//! - WGPU manager generating WGSL kernels from device-transportable
//!   functors (feature `wgpu`), and a CUDA-named adapter over it
//!   (feature `cuda`).
//! - Device-resident vectors that can be reduced repeatedly without
//!   re-uploading.
//!
//! # Modules
//!
//! - [`ops`] — the operator entry points and backend dispatch.
//! - [`resource`] — the resource manager trait and its backends.
//! - [`functional`] — function object traits and stock functors.
//! - [`control`] — per-call execution control.
//! - [`backend`] — backend enum and the process-wide default.
//! - [`sequence`] — host ranges and device-resident vectors.
//! - [`device`] — device-transportable data and kernel arguments.
//! - [`error`] — the crate error type.
//!
//! # Example
//!
//! ```rust
//! use fused_reduce::prelude::*;
//!
//! let data = [-5, 0, 2, 3, 2, 4, -2, 1, 2, 3];
//! let ctl = Control::with_backend(Backend::SerialCpu);
//! let sum = transform_reduce_with(&ctl, &data[..], Square, 0, Plus).unwrap();
//! assert_eq!(sum, 76);
//! ```

pub mod backend;
pub mod control;
pub mod device;
pub mod error;
pub mod functional;
pub mod ops;
pub mod resource;
pub mod sequence;

/// The names most callers need.
pub mod prelude {
    pub use crate::backend::{get_backend, set_backend, Backend};
    pub use crate::control::{Control, DebugFlags};
    pub use crate::device::{Arithmetic, Element, KernelArgs, Signed};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::functional::{
        BinaryFunction, Identity, Maximum, Minimum, Minus, Multiplies, Negate, Plus, Scale,
        Square, UnaryFunction,
    };
    pub use crate::ops::transform_reduce::{
        reduce, reduce_with, transform_reduce, transform_reduce_in, transform_reduce_resident,
        transform_reduce_with,
    };
    pub use crate::resource::ResourceManager;
    pub use crate::sequence::{DeviceVector, Sequence};
}
