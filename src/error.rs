//! Error types shared by the operator and every resource manager.
//!
//! Failures fall into the kinds listed by [`ErrorKind`]. Nothing in this
//! crate retries or swallows an error; a failing call never yields a
//! partially computed value.

use crate::backend::Backend;
use crate::resource::{BufferId, BufferState, KernelId};

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// The device-side stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Building or loading a kernel for the target.
    Compile,
    /// Reserving device memory.
    Allocate,
    /// Moving data between host and device.
    Transfer,
    /// Running a compiled kernel.
    Launch,
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller broke a documented precondition.
    Precondition,
    /// A kernel could not be built for the selected target.
    Compile,
    /// Device memory could not be reserved.
    Allocation,
    /// A host/device copy failed.
    Transfer,
    /// A kernel launch failed.
    Launch,
    /// The requested backend is not compiled in or has no device.
    Unavailable,
}

/// Direction of a host/device copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device.
    Upload,
    /// Device to host.
    Download,
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Upload => f.write_str("host->device"),
            Self::Download => f.write_str("device->host"),
        }
    }
}

/// Every failure this crate can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `last` precedes `first`.
    #[error("invalid range: last ({last}) precedes first ({first})")]
    InvalidRange { first: usize, last: usize },

    /// The range reaches past the end of the underlying sequence.
    #[error("range end {last} is out of bounds for a sequence of {len} elements")]
    OutOfBounds { last: usize, len: usize },

    /// Element types without a size cannot be staged in device memory.
    #[error("element type `{0}` is zero-sized")]
    ZeroSizedElement(&'static str),

    /// A buffer was used outside its lifecycle.
    #[error("cannot {op} buffer {id}: buffer is {state}")]
    BufferState {
        id: BufferId,
        state: BufferState,
        op: &'static str,
    },

    /// A buffer id the manager never handed out.
    #[error("unknown device buffer {0}")]
    UnknownBuffer(BufferId),

    /// A buffer was freed twice.
    #[error("double free of device buffer {0}")]
    DoubleFree(BufferId),

    /// A host slice does not fit the device buffer it targets.
    #[error("{bytes} bytes do not fit buffer {id} of {capacity} bytes")]
    Overflow {
        id: BufferId,
        bytes: usize,
        capacity: usize,
    },

    /// A kernel id the manager never compiled.
    #[error("unknown kernel {0}")]
    UnknownKernel(KernelId),

    /// A function object or element type has no device form.
    #[error("`{item}` has no device form and cannot be transported to {target}")]
    NotTransportable { item: &'static str, target: String },

    /// The kernel failed to build for the target.
    #[error("kernel `{kernel}` failed to compile for {target}: {diagnostic}")]
    Compile {
        kernel: String,
        target: String,
        diagnostic: String,
    },

    /// Device memory could not be reserved.
    #[error("allocation of {bytes} bytes failed on {target}: {reason}")]
    Allocation {
        bytes: usize,
        target: String,
        reason: String,
    },

    /// A copy between host and device failed.
    #[error("{direction} transfer failed on {target}: {reason}")]
    Transfer {
        direction: Direction,
        target: String,
        reason: String,
    },

    /// A kernel launch failed.
    #[error("launch of kernel {kernel} failed on {target}: {reason}")]
    Launch {
        kernel: KernelId,
        target: String,
        reason: String,
    },

    /// The requested backend cannot be used.
    #[error("backend {backend:?} is unavailable: {reason}")]
    Unavailable { backend: Backend, reason: String },
}

impl Error {
    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRange { .. }
            | Self::OutOfBounds { .. }
            | Self::ZeroSizedElement(_)
            | Self::BufferState { .. }
            | Self::UnknownBuffer(_)
            | Self::DoubleFree(_)
            | Self::Overflow { .. }
            | Self::UnknownKernel(_) => ErrorKind::Precondition,
            Self::NotTransportable { .. } | Self::Compile { .. } => ErrorKind::Compile,
            Self::Allocation { .. } => ErrorKind::Allocation,
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::Launch { .. } => ErrorKind::Launch,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
        }
    }

    /// The device stage that failed, if this is a device-side error.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self.kind() {
            ErrorKind::Compile => Some(Stage::Compile),
            ErrorKind::Allocation => Some(Stage::Allocate),
            ErrorKind::Transfer => Some(Stage::Transfer),
            ErrorKind::Launch => Some(Stage::Launch),
            ErrorKind::Precondition | ErrorKind::Unavailable => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_stages() {
        let err = Error::InvalidRange { first: 4, last: 1 };
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.stage(), None);

        let err = Error::Allocation {
            bytes: 64,
            target: "host-serial".into(),
            reason: "limit".into(),
        };
        assert_eq!(err.stage(), Some(Stage::Allocate));

        let err = Error::NotTransportable {
            item: "closure",
            target: "wgpu".into(),
        };
        assert_eq!(err.stage(), Some(Stage::Compile));
    }

    #[test]
    fn messages_name_the_failure() {
        let err = Error::InvalidRange { first: 4, last: 1 };
        assert_eq!(err.to_string(), "invalid range: last (1) precedes first (4)");

        let err = Error::Transfer {
            direction: Direction::Download,
            target: "gpu0".into(),
            reason: "lost".into(),
        };
        assert_eq!(err.to_string(), "device->host transfer failed on gpu0: lost");
    }
}
