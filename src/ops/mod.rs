//! # Operators
//!
//! The fused transform-reduce operator and the layer that picks a resource
//! manager for it.
//!
//! ## Submodules
//!
//! - [`transform_reduce`] — the operator entry points
//! - [`dispatch`] — resolves a [`Control`](crate::control::Control) into a
//!   boxed [`ResourceManager`](crate::resource::ResourceManager)
//!
//! ## Backend Selection
//!
//! A control with a concrete backend always runs there; if the backend is
//! not compiled in or has no device, the call fails with
//! [`Error::Unavailable`](crate::error::Error::Unavailable). Only
//! `Backend::Automatic` ever falls back.
//!
//! ```rust
//! use fused_reduce::backend::Backend;
//! use fused_reduce::control::Control;
//! use fused_reduce::functional::{Plus, Square};
//! use fused_reduce::ops::transform_reduce::transform_reduce_with;
//!
//! let data = [-5, 0, 2, 3, 2, 4, -2, 1, 2, 3];
//! let ctl = Control::with_backend(Backend::MultiCoreCpu);
//! let sum = transform_reduce_with(&ctl, &data[..], Square, 0, Plus).unwrap();
//! assert_eq!(sum, 76);
//! ```
//!
//! ## Feature Flags
//!
//! - `wgpu` — enables the WGPU manager and lets `Automatic` pick the GPU
//! - `cuda` — enables the CUDA adapter (runs on the WGPU manager)

pub mod dispatch;
pub mod transform_reduce;
