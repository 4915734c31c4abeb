//! Input ranges.
//!
//! [`Sequence`] is the host-side range handle: a borrowed slice and a pair
//! of positions `[first, last)`. [`DeviceVector`] is its device-resident
//! counterpart, owned by the caller and backed by a buffer in a resource
//! manager.

use core::marker::PhantomData;

use crate::device::Element;
use crate::error::{Error, Result};
use crate::resource::{BufferId, ResourceManager};

/// A caller-owned range over a slice.
///
/// The positions are checked when the range is consumed, not when it is
/// built, so an inverted range surfaces as [`Error::InvalidRange`] from the
/// operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence<'a, T> {
    data: &'a [T],
    first: usize,
    last: usize,
}

impl<'a, T> Sequence<'a, T> {
    /// The range `[first, last)` of `data`.
    pub const fn new(data: &'a [T], first: usize, last: usize) -> Self {
        Self { data, first, last }
    }

    /// Start position.
    pub const fn first(&self) -> usize {
        self.first
    }

    /// One past the end position.
    pub const fn last(&self) -> usize {
        self.last
    }

    /// The selected elements.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if `last < first`
    /// - [`Error::OutOfBounds`] if `last` is past the end of the slice
    pub fn as_slice(&self) -> Result<&'a [T]> {
        check_range(self.first, self.last, self.data.len())?;
        Ok(&self.data[self.first..self.last])
    }
}

impl<'a, T> From<&'a [T]> for Sequence<'a, T> {
    fn from(data: &'a [T]) -> Self {
        Self::new(data, 0, data.len())
    }
}

impl<'a, T> From<&'a Vec<T>> for Sequence<'a, T> {
    fn from(data: &'a Vec<T>) -> Self {
        Self::new(data.as_slice(), 0, data.len())
    }
}

impl<'a, T, const N: usize> From<&'a [T; N]> for Sequence<'a, T> {
    fn from(data: &'a [T; N]) -> Self {
        Self::new(data.as_slice(), 0, N)
    }
}

pub(crate) fn check_range(first: usize, last: usize, len: usize) -> Result<()> {
    if last < first {
        return Err(Error::InvalidRange { first, last });
    }
    if last > len {
        return Err(Error::OutOfBounds { last, len });
    }
    Ok(())
}

/// A sequence resident in a resource manager's memory.
///
/// The vector does not own its manager; release it with
/// [`DeviceVector::release`] on the same manager that created it. Any other
/// manager rejects its buffer with [`Error::UnknownBuffer`]. Dropping
/// it without releasing leaves the buffer allocated until the manager
/// itself is dropped.
#[derive(Debug)]
pub struct DeviceVector<T> {
    buffer: BufferId,
    len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> DeviceVector<T> {
    /// Uploads `data` into a new device buffer.
    ///
    /// # Errors
    ///
    /// Allocation and transfer failures from `rm`.
    pub fn from_slice(rm: &mut dyn ResourceManager, data: &[T]) -> Result<Self> {
        if size_of::<T>() == 0 {
            return Err(Error::ZeroSizedElement(core::any::type_name::<T>()));
        }
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = rm.init(Some(bytes), bytes.len())?;
        Ok(Self {
            buffer,
            len: data.len(),
            _marker: PhantomData,
        })
    }

    /// Number of elements.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector holds no elements.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The backing buffer.
    pub const fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Overwrites the contents with `data`, which must have the same length.
    ///
    /// # Errors
    ///
    /// [`Error::Overflow`] on a length mismatch; transfer failures from `rm`.
    pub fn write(&self, rm: &mut dyn ResourceManager, data: &[T]) -> Result<()> {
        if data.len() != self.len {
            return Err(Error::Overflow {
                id: self.buffer,
                bytes: size_of_val(data),
                capacity: self.len * size_of::<T>(),
            });
        }
        rm.write(self.buffer, bytemuck::cast_slice(data))
    }

    /// Copies the contents back to the host.
    ///
    /// # Errors
    ///
    /// Lifecycle and transfer failures from `rm`.
    pub fn to_vec(&self, rm: &mut dyn ResourceManager) -> Result<Vec<T>> {
        let bytes = rm.read(self.buffer)?;
        Ok(bytes
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Frees the backing buffer.
    ///
    /// # Errors
    ///
    /// Lifecycle failures from `rm`, e.g. releasing through the wrong manager.
    pub fn release(self, rm: &mut dyn ResourceManager) -> Result<()> {
        rm.free(self.buffer)
    }
}
