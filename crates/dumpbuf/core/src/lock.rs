// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Buffer locks: a locked buffer is resident and cannot be dumped

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::common::BufferId;
use crate::manager::WorkerState;
use crate::worker::WorkerHandle;

/// Memory slot shared by a buffer object, its registry entry and its locks
#[derive(Debug, Default)]
pub(crate) struct BufferCell {
    pub(crate) data: RwLock<Option<Vec<u8>>>,
    pub(crate) size: AtomicUsize,
    pub(crate) token: Mutex<Weak<LockToken>>,
}

impl BufferCell {
    pub(crate) fn lock_count(&self) -> usize {
        self.token.lock().strong_count()
    }

    pub(crate) fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn set_size(&self, size: usize) {
        self.size.store(size, Ordering::Release);
    }
}

/// Shared by every lock of a buffer; the unlock event fires when the last one goes
pub(crate) struct LockToken {
    id: BufferId,
    worker: WorkerHandle<WorkerState>,
}

impl LockToken {
    pub(crate) fn new(id: BufferId, worker: WorkerHandle<WorkerState>) -> Self {
        Self { id, worker }
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        let id = self.id;
        if self.worker.is_closed() {
            return;
        }
        trace!(buffer = %id, "last lock released");
        // Fire and forget, nobody waits for the policy to run
        let _ = self.worker.post(move |state| state.unlock(id));
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockToken").field("id", &self.id).finish()
    }
}

/// Scoped access to the memory of a managed buffer
///
/// While at least one lock of a buffer is alive its memory stays resident.
/// Clones share the lock; the buffer is unlocked when the last clone is dropped.
///
/// Byte views borrow an internal read/write lock, so they must be released
/// before requesting an operation on the same buffer (reallocate, swap...)
/// and waiting on it.
#[derive(Clone)]
pub struct BufferLock {
    token: Arc<LockToken>,
    cell: Arc<BufferCell>,
}

impl BufferLock {
    pub(crate) fn new(token: Arc<LockToken>, cell: Arc<BufferCell>) -> Self {
        Self { token, cell }
    }

    pub fn id(&self) -> BufferId {
        self.token.id
    }

    /// True when the locked buffer has no memory (never allocated or destroyed)
    pub fn is_null(&self) -> bool {
        self.cell.data.read().is_none()
    }

    pub fn len(&self) -> usize {
        self.cell.data.read().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.cell.data.read(), |data| data.as_deref().unwrap_or_default())
    }

    pub fn bytes_mut(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.cell.data.write(), |data| data.as_deref_mut().unwrap_or_default())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes().to_vec()
    }

    /// Number of live locks on this buffer
    pub fn lock_count(&self) -> usize {
        Arc::strong_count(&self.token)
    }
}

impl fmt::Debug for BufferLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLock")
            .field("id", &self.token.id)
            .field("len", &self.len())
            .field("lock_count", &self.lock_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_without_token_is_unlocked() {
        let cell = BufferCell::default();
        assert_eq!(cell.lock_count(), 0);
        assert_eq!(cell.size(), 0);

        cell.set_size(12);
        assert_eq!(cell.size(), 12);
    }

    #[test]
    fn test_null_views_are_empty() {
        let cell = Arc::new(BufferCell::default());
        let view = RwLockReadGuard::map(cell.data.read(), |data| data.as_deref().unwrap_or_default());
        assert!(view.is_empty());
    }
}
