//! Fused transform-reduce.
//!
//! `transform_reduce(seq, f, init, g)` applies `f` to every element of
//! `seq` and folds the results into `init` with `g`, in one pass and
//! without materializing the transformed sequence.
//!
//! # Grouping
//!
//! The input is split into `lanes` contiguous chunks (the manager picks the
//! count; [`Control::lanes`] forces it). Each lane folds its own chunk left
//! to right starting from its first transformed element. The partials of
//! non-empty lanes are then folded into `init` in lane order:
//!
//! ```text
//! g(...g(g(init, lane_0), lane_1)..., lane_k)
//! lane_i = g(...g(f(x_a), f(x_a+1))..., f(x_b))
//! ```
//!
//! Any associative `g` gives the same value under every grouping. For a
//! non-associative `g` the result is still deterministic for a fixed
//! control and backend.
//!
//! # Example
//!
//! ```rust
//! use fused_reduce::functional::{Plus, Square};
//! use fused_reduce::ops::transform_reduce::transform_reduce;
//!
//! let data = [-5, 0, 2, 3, 2, 4, -2, 1, 2, 3];
//! let sum_of_squares = transform_reduce(&data[..], Square, 0, Plus).unwrap();
//! assert_eq!(sum_of_squares, 76);
//! ```

use core::marker::PhantomData;

use crate::control::Control;
use crate::device::Element;
use crate::error::{Error, Result};
use crate::functional::{BinaryFunction, Identity, UnaryFunction};
use crate::ops::dispatch;
use crate::resource::{BufferId, HostKernel, KernelSignature, Launch, ResourceManager};
use crate::sequence::{check_range, DeviceVector, Sequence};

/// Host form of a fused kernel.
struct FusedKernel<'f, In, T, U, B> {
    transform: &'f U,
    reduce: &'f B,
    _marker: PhantomData<fn(In) -> T>,
}

impl<In, T, U, B> HostKernel for FusedKernel<'_, In, T, U, B>
where
    In: Element,
    T: Element,
    U: UnaryFunction<In, T>,
    B: BinaryFunction<T>,
{
    fn fold_lane(&self, input: &[u8]) -> Option<Vec<u8>> {
        let mut items = input
            .chunks_exact(size_of::<In>())
            .map(|bytes| self.transform.call(bytemuck::pod_read_unaligned::<In>(bytes)));
        let first = items.next()?;
        let acc = items.fold(first, |acc, x| self.reduce.call(acc, x));
        Some(bytemuck::bytes_of(&acc).to_vec())
    }
}

/// Temporaries owned by one operator call.
///
/// Every buffer allocated through the scope is freed when the scope ends,
/// on success and error paths alike.
struct DeviceScope<'r> {
    rm: &'r mut dyn ResourceManager,
    owned: Vec<BufferId>,
}

impl<'r> DeviceScope<'r> {
    fn new(rm: &'r mut dyn ResourceManager) -> Self {
        Self {
            rm,
            owned: Vec::new(),
        }
    }

    fn init(&mut self, host: Option<&[u8]>, bytes: usize) -> Result<BufferId> {
        let id = self.rm.init(host, bytes)?;
        self.owned.push(id);
        Ok(id)
    }

    /// Frees every temporary, reporting the first failure.
    fn release(mut self) -> Result<()> {
        let mut first_err = None;
        for id in core::mem::take(&mut self.owned).into_iter().rev() {
            if let Err(e) = self.rm.free(id) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for DeviceScope<'_> {
    fn drop(&mut self) {
        for id in self.owned.drain(..).rev() {
            if let Err(e) = self.rm.free(id) {
                tracing::warn!(%id, error = %e, "failed to free temporary buffer");
            }
        }
    }
}

fn check_element<E>() -> Result<()> {
    if size_of::<E>() == 0 {
        return Err(Error::ZeroSizedElement(core::any::type_name::<E>()));
    }
    Ok(())
}

/// Compiles, launches and combines one fused reduction over `len` elements
/// of `input`, starting at element `offset`.
#[allow(clippy::too_many_arguments)]
fn launch<In, T, U, B>(
    scope: &mut DeviceScope<'_>,
    ctl: &Control,
    input: BufferId,
    offset: usize,
    len: usize,
    transform_op: &U,
    init: T,
    reduce_op: &B,
) -> Result<T>
where
    In: Element,
    T: Element,
    U: UnaryFunction<In, T>,
    B: BinaryFunction<T>,
{
    let signature = KernelSignature::fused::<In, T, U, B>(transform_op, reduce_op);
    let kernel = scope.rm.compile(&signature)?;
    let (args, _) = signature.args();
    scope.rm.append(kernel, &args)?;

    let lanes = scope.rm.lanes(len, ctl);
    let partials = scope.init(None, lanes * size_of::<T>())?;
    let flags = scope.init(None, lanes * size_of::<u32>())?;

    let host = FusedKernel::<In, T, U, B> {
        transform: transform_op,
        reduce: reduce_op,
        _marker: PhantomData,
    };
    scope.rm.dispatch(&Launch {
        kernel,
        input,
        offset,
        len,
        partials,
        flags,
        lanes,
        host: &host,
    })?;

    let partial_bytes = scope.rm.read(partials)?;
    let flag_bytes = scope.rm.read(flags)?;
    let acc = partial_bytes
        .chunks_exact(size_of::<T>())
        .zip(flag_bytes.chunks_exact(size_of::<u32>()))
        .take(lanes)
        .filter(|(_, flag)| bytemuck::pod_read_unaligned::<u32>(flag) != 0)
        .fold(init, |acc, (partial, _)| {
            reduce_op.call(acc, bytemuck::pod_read_unaligned::<T>(partial))
        });
    Ok(acc)
}

fn fold_slice<In, T, U, B>(
    rm: &mut dyn ResourceManager,
    ctl: &Control,
    data: &[In],
    transform_op: &U,
    init: T,
    reduce_op: &B,
) -> Result<T>
where
    In: Element,
    T: Element,
    U: UnaryFunction<In, T>,
    B: BinaryFunction<T>,
{
    rm.configure(ctl);
    let mut scope = DeviceScope::new(rm);
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let input = scope.init(Some(bytes), bytes.len())?;
    let value = launch(&mut scope, ctl, input, 0, data.len(), transform_op, init, reduce_op)?;
    scope.release()?;
    Ok(value)
}

/// Transform-reduce under a default-constructed [`Control`].
///
/// # Errors
///
/// - [`Error::InvalidRange`] if the range is inverted
/// - [`Error::OutOfBounds`] if it reaches past the slice
/// - [`Error::ZeroSizedElement`] for zero-sized element types
/// - device failures from the selected backend, tagged with their stage
pub fn transform_reduce<'a, In, T, U, B>(
    seq: impl Into<Sequence<'a, In>>,
    transform_op: U,
    init: T,
    reduce_op: B,
) -> Result<T>
where
    In: Element + 'a,
    T: Element,
    U: UnaryFunction<In, T>,
    B: BinaryFunction<T>,
{
    transform_reduce_with(&Control::default(), seq, transform_op, init, reduce_op)
}

/// Transform-reduce on the backend `ctl` selects.
///
/// # Errors
///
/// As [`transform_reduce`], plus [`Error::Unavailable`] when `ctl` forces a
/// backend that cannot be used.
pub fn transform_reduce_with<'a, In, T, U, B>(
    ctl: &Control,
    seq: impl Into<Sequence<'a, In>>,
    transform_op: U,
    init: T,
    reduce_op: B,
) -> Result<T>
where
    In: Element + 'a,
    T: Element,
    U: UnaryFunction<In, T>,
    B: BinaryFunction<T>,
{
    let data = seq.into().as_slice()?;
    check_element::<In>()?;
    check_element::<T>()?;
    if data.is_empty() {
        return Ok(init);
    }

    let transportable =
        KernelSignature::fused::<In, T, U, B>(&transform_op, &reduce_op).is_transportable();
    let mut rm = dispatch::select(ctl, data.len(), transportable)?;
    fold_slice(rm.as_mut(), ctl, data, &transform_op, init, &reduce_op)
}

/// Transform-reduce on an explicit resource manager.
///
/// The manager keeps its kernel cache between calls, so repeated calls with
/// the same functors compile once.
///
/// # Errors
///
/// As [`transform_reduce`]. Temporary buffers are freed before returning
/// on every path.
pub fn transform_reduce_in<'a, In, T, U, B>(
    rm: &mut dyn ResourceManager,
    ctl: &Control,
    seq: impl Into<Sequence<'a, In>>,
    transform_op: U,
    init: T,
    reduce_op: B,
) -> Result<T>
where
    In: Element + 'a,
    T: Element,
    U: UnaryFunction<In, T>,
    B: BinaryFunction<T>,
{
    let data = seq.into().as_slice()?;
    check_element::<In>()?;
    check_element::<T>()?;
    if data.is_empty() {
        return Ok(init);
    }
    fold_slice(rm, ctl, data, &transform_op, init, &reduce_op)
}

/// Transform-reduce over `[first, last)` of a device-resident vector.
///
/// The vector is read in place; only the partials are allocated.
///
/// # Errors
///
/// As [`transform_reduce`]. A `vector` allocated by another manager is
/// rejected with [`Error::UnknownBuffer`].
#[allow(clippy::too_many_arguments)]
pub fn transform_reduce_resident<In, T, U, B>(
    rm: &mut dyn ResourceManager,
    ctl: &Control,
    vector: &DeviceVector<In>,
    first: usize,
    last: usize,
    transform_op: U,
    init: T,
    reduce_op: B,
) -> Result<T>
where
    In: Element,
    T: Element,
    U: UnaryFunction<In, T>,
    B: BinaryFunction<T>,
{
    check_range(first, last, vector.len())?;
    check_element::<In>()?;
    check_element::<T>()?;
    if first == last {
        return Ok(init);
    }

    rm.configure(ctl);
    let mut scope = DeviceScope::new(rm);
    let value = launch(
        &mut scope,
        ctl,
        vector.buffer(),
        first,
        last - first,
        &transform_op,
        init,
        &reduce_op,
    )?;
    scope.release()?;
    Ok(value)
}

/// Folds `seq` into `init` with `reduce_op`.
///
/// # Errors
///
/// As [`transform_reduce`].
pub fn reduce<'a, T, B>(seq: impl Into<Sequence<'a, T>>, init: T, reduce_op: B) -> Result<T>
where
    T: Element + 'a,
    B: BinaryFunction<T>,
{
    transform_reduce(seq, Identity, init, reduce_op)
}

/// Folds `seq` into `init` with `reduce_op` on the backend `ctl` selects.
///
/// # Errors
///
/// As [`transform_reduce_with`].
pub fn reduce_with<'a, T, B>(
    ctl: &Control,
    seq: impl Into<Sequence<'a, T>>,
    init: T,
    reduce_op: B,
) -> Result<T>
where
    T: Element + 'a,
    B: BinaryFunction<T>,
{
    transform_reduce_with(ctl, seq, Identity, init, reduce_op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::functional::{Minus, Plus, Square};
    use crate::resource::cpu::HostManager;

    #[test]
    fn lane_fold_skips_init() {
        let host = FusedKernel::<i32, i32, _, _> {
            transform: &Square,
            reduce: &Plus,
            _marker: PhantomData,
        };
        let bytes: &[u8] = bytemuck::cast_slice(&[1i32, 2, 3]);
        let out = host.fold_lane(bytes).unwrap();
        assert_eq!(bytemuck::pod_read_unaligned::<i32>(&out), 14);
        assert!(host.fold_lane(&[]).is_none());
    }

    #[test]
    fn serial_grouping_is_init_then_one_lane() {
        let ctl = Control::with_backend(Backend::SerialCpu);
        let mut rm = HostManager::serial(&ctl);
        let got = transform_reduce_in(&mut rm, &ctl, &[1i32, 2, 3, 4][..], Identity, 10, Minus).unwrap();
        // 10 - (((1 - 2) - 3) - 4)
        assert_eq!(got, 18);
        assert_eq!(rm.stats().live_buffers, 0);
    }

    #[test]
    fn scope_frees_on_error() {
        let ctl = Control::with_backend(Backend::SerialCpu);
        let mut rm = HostManager::serial(&ctl);
        {
            let mut scope = DeviceScope::new(&mut rm);
            scope.init(None, 16).unwrap();
            scope.init(Some(&[1, 2, 3, 4]), 4).unwrap();
        }
        assert_eq!(rm.stats().live_buffers, 0);
    }
}
