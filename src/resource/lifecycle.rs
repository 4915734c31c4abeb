//! Per-buffer lifecycle bookkeeping shared by every backend.
//!
//! ```text
//! Unallocated --init--> Allocated --write/launch--> Written <--read--> Read
//!                   \--init(seeded)--------------->/                 |
//!                          any live state --free--> Freed (terminal)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::BufferId;
use crate::error::{Error, Result};

/// Where a buffer is in its lifecycle. Unallocated buffers have no entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Storage reserved, contents undefined.
    Allocated,
    /// Contents defined by a seeded init, a write or a kernel.
    Written,
    /// Copied back to the host at least once since the last write.
    Read,
    /// Released. Terminal; the table keeps no entry for it.
    Freed,
}

impl BufferState {
    /// Whether the buffer still owns storage.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Freed)
    }

    /// Whether the contents are defined.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::Written | Self::Read)
    }
}

impl core::fmt::Display for BufferState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Allocated => "allocated but never written",
            Self::Written => "written",
            Self::Read => "read",
            Self::Freed => "freed",
        })
    }
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

struct Entry<S> {
    state: BufferState,
    bytes: usize,
    storage: S,
}

/// Buffers owned by one manager, keyed by id.
///
/// Only live buffers have entries. Ids are handed out in increasing order
/// and tagged with the table's owner, so a missing id at or below the last
/// one issued is a freed buffer, and any other id is unknown.
pub struct BufferTable<S> {
    owner: u64,
    next: u64,
    live_bytes: usize,
    entries: HashMap<BufferId, Entry<S>>,
}

impl<S> Default for BufferTable<S> {
    fn default() -> Self {
        Self {
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            next: 1,
            live_bytes: 0,
            entries: HashMap::new(),
        }
    }
}

impl<S> BufferTable<S> {
    /// An empty table with a fresh owner tag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` was issued by this table.
    #[must_use]
    pub const fn owns(&self, id: BufferId) -> bool {
        id.owner == self.owner && id.index > 0 && id.index < self.next
    }

    /// Registers new storage of `bytes` logical bytes.
    pub fn insert(&mut self, storage: S, bytes: usize, seeded: bool) -> BufferId {
        let id = BufferId {
            owner: self.owner,
            index: self.next,
        };
        self.next += 1;
        let state = if seeded {
            BufferState::Written
        } else {
            BufferState::Allocated
        };
        self.live_bytes += bytes;
        self.entries.insert(
            id,
            Entry {
                state,
                bytes,
                storage,
            },
        );
        id
    }

    /// Current state of `id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownBuffer`] if this table never handed the id out.
    pub fn state(&self, id: BufferId) -> Result<BufferState> {
        match self.entries.get(&id) {
            Some(entry) => Ok(entry.state),
            None if self.owns(id) => Ok(BufferState::Freed),
            None => Err(Error::UnknownBuffer(id)),
        }
    }

    fn missing(&self, id: BufferId, op: &'static str) -> Error {
        if self.owns(id) {
            Error::BufferState {
                id,
                state: BufferState::Freed,
                op,
            }
        } else {
            Error::UnknownBuffer(id)
        }
    }

    /// Storage and logical size of a live buffer.
    ///
    /// # Errors
    ///
    /// Unknown, foreign or freed buffers.
    pub fn live(&self, id: BufferId, op: &'static str) -> Result<(&S, usize)> {
        self.entries
            .get(&id)
            .map(|e| (&e.storage, e.bytes))
            .ok_or_else(|| self.missing(id, op))
    }

    /// Mutable storage and logical size of a live buffer.
    ///
    /// # Errors
    ///
    /// Unknown, foreign or freed buffers.
    pub fn live_mut(&mut self, id: BufferId, op: &'static str) -> Result<(&mut S, usize)> {
        if !self.entries.contains_key(&id) {
            return Err(self.missing(id, op));
        }
        self.entries
            .get_mut(&id)
            .map(|e| (&mut e.storage, e.bytes))
            .ok_or(Error::UnknownBuffer(id))
    }

    /// Storage of a buffer whose contents are defined.
    ///
    /// # Errors
    ///
    /// Unknown, foreign, freed, or never-written buffers.
    pub fn readable(&self, id: BufferId, op: &'static str) -> Result<(&S, usize)> {
        let entry = self.entries.get(&id).ok_or_else(|| self.missing(id, op))?;
        if !entry.state.is_readable() {
            return Err(Error::BufferState {
                id,
                state: entry.state,
                op,
            });
        }
        Ok((&entry.storage, entry.bytes))
    }

    /// Moves a live buffer to `state`.
    ///
    /// # Errors
    ///
    /// Unknown, foreign or freed buffers.
    pub fn transition(&mut self, id: BufferId, state: BufferState, op: &'static str) -> Result<()> {
        if !self.entries.contains_key(&id) {
            return Err(self.missing(id, op));
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.state = state;
        }
        Ok(())
    }

    /// Drops the entry for `id` and hands its storage back for destruction.
    ///
    /// # Errors
    ///
    /// [`Error::DoubleFree`] for a freed buffer, [`Error::UnknownBuffer`]
    /// for an id this table never handed out.
    pub fn release(&mut self, id: BufferId) -> Result<(S, usize)> {
        match self.entries.remove(&id) {
            Some(entry) => {
                self.live_bytes -= entry.bytes;
                Ok((entry.storage, entry.bytes))
            }
            None if self.owns(id) => Err(Error::DoubleFree(id)),
            None => Err(Error::UnknownBuffer(id)),
        }
    }

    /// Number of buffers still owning storage.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    /// Logical bytes held by live buffers.
    #[must_use]
    pub const fn live_bytes(&self) -> usize {
        self.live_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_buffers_start_written() {
        let mut table = BufferTable::new();
        let a = table.insert((), 8, true);
        let b = table.insert((), 8, false);
        assert_ne!(a, b);
        assert_eq!(table.state(a).unwrap(), BufferState::Written);
        assert_eq!(table.state(b).unwrap(), BufferState::Allocated);
        assert!(table.readable(a, "read").is_ok());
        assert!(matches!(
            table.readable(b, "read"),
            Err(Error::BufferState {
                state: BufferState::Allocated,
                ..
            })
        ));
    }

    #[test]
    fn release_is_terminal() {
        let mut table = BufferTable::new();
        let id = table.insert(vec![0u8; 4], 4, true);
        assert_eq!(table.live_count(), 1);
        assert_eq!(table.live_bytes(), 4);

        let (storage, bytes) = table.release(id).unwrap();
        assert_eq!(storage.len(), 4);
        assert_eq!(bytes, 4);
        assert_eq!(table.live_count(), 0);

        assert!(matches!(table.release(id), Err(Error::DoubleFree(_))));
        assert!(matches!(
            table.transition(id, BufferState::Written, "write"),
            Err(Error::BufferState {
                state: BufferState::Freed,
                ..
            })
        ));
        let unissued = BufferId {
            owner: id.owner,
            index: 999,
        };
        assert!(matches!(table.release(unissued), Err(Error::UnknownBuffer(_))));
    }

    #[test]
    fn freed_buffers_leave_no_entries() {
        let mut table = BufferTable::new();
        let mut last = BufferId::UNALLOCATED;
        for i in 0..10_000 {
            last = table.insert(i, 16, false);
            table.release(last).unwrap();
        }
        assert!(table.entries.is_empty());
        assert_eq!(table.live_count(), 0);
        assert_eq!(table.live_bytes(), 0);
        assert_eq!(table.state(last).unwrap(), BufferState::Freed);
        assert!(matches!(table.release(last), Err(Error::DoubleFree(_))));
    }

    #[test]
    fn tables_reject_each_others_ids() {
        let mut a = BufferTable::new();
        let mut b = BufferTable::new();
        let ia = a.insert((), 4, true);
        let ib = b.insert((), 4, true);
        assert_ne!(ia, ib);
        assert!(matches!(b.state(ia), Err(Error::UnknownBuffer(_))));
        assert!(matches!(b.readable(ia, "read"), Err(Error::UnknownBuffer(_))));
        assert!(matches!(b.release(ia), Err(Error::UnknownBuffer(_))));
        assert_eq!(b.live_count(), 1);
    }
}
