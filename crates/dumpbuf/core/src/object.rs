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

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::allocation::{SharedAllocationPolicy, default_policy};
use crate::common::{BufferError, BufferId, BufferResult, FileFormat};
use crate::file_holder::FileHolder;
use crate::lock::{BufferCell, BufferLock};
use crate::manager::BufferManager;
use crate::stream::{StreamFactory, StreamInfo};

/// Client handle on a managed, dumpable memory region
///
/// Every operation goes through the buffer manager worker and blocks until
/// it is done, so buffer objects must not be used from within an async
/// runtime; use the [`BufferManager`] API and await its results there.
pub struct BufferObject {
    id: BufferId,
    cell: Arc<BufferCell>,
    manager: Arc<BufferManager>,
}

impl BufferObject {
    /// Register a new empty buffer with the global buffer manager
    pub fn new() -> BufferResult<Self> {
        Self::with_manager(&BufferManager::global()?)
    }

    pub fn with_manager(manager: &Arc<BufferManager>) -> BufferResult<Self> {
        let id = BufferId::next();
        let cell = Arc::new(BufferCell::default());
        manager.register_buffer(id, cell.clone()).wait()?;
        Ok(Self {
            id,
            cell,
            manager: manager.clone(),
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    /// Size in bytes, whether resident or dumped
    pub fn size(&self) -> usize {
        self.cell.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn lock_count(&self) -> usize {
        self.cell.lock_count()
    }

    pub fn allocate(&self, size: usize) -> BufferResult<()> {
        self.allocate_with(size, default_policy())
    }

    pub fn allocate_with(&self, size: usize, policy: SharedAllocationPolicy) -> BufferResult<()> {
        self.manager.allocate_buffer(self.id, size, policy).wait()
    }

    pub fn reallocate(&self, new_size: usize) -> BufferResult<()> {
        self.manager.reallocate_buffer(self.id, new_size).wait()
    }

    pub fn destroy(&self) -> BufferResult<()> {
        self.manager.destroy_buffer(self.id).wait()
    }

    /// Adopt caller provided memory
    pub fn set_buffer(&self, bytes: Vec<u8>, policy: SharedAllocationPolicy) -> BufferResult<()> {
        self.manager.set_buffer(self.id, bytes, policy).wait()
    }

    /// Pin the buffer in memory, restoring it first when it was dumped
    pub fn lock(&self) -> BufferResult<BufferLock> {
        self.manager.lock_buffer(self.id).wait()
    }

    /// Exchange memory and metadata with another buffer of the same manager
    pub fn swap(&self, other: &BufferObject) -> BufferResult<()> {
        if !Arc::ptr_eq(&self.manager, &other.manager) {
            return Err(BufferError::InvalidState(format!("buffers {} and {} belong to different managers", self.id, other.id)));
        }
        self.manager.swap_buffer(self.id, other.id).wait()
    }

    pub fn stream_info(&self) -> BufferResult<StreamInfo> {
        self.manager.stream_info(self.id)
    }

    /// Declare the buffer content as readable from `factory`
    pub fn set_istream_factory(
        &self,
        factory: Arc<dyn StreamFactory>,
        size: usize,
        fs_file: FileHolder,
        format: FileFormat,
        policy: SharedAllocationPolicy,
    ) -> BufferResult<()> {
        self.manager.set_istream_factory(self.id, factory, size, fs_file, format, policy).wait()
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        if self.cell.lock_count() > 0 {
            warn!(buffer = %self.id, locks = self.cell.lock_count(), "buffer object dropped while locked");
        }
        // Not waited on, drop may run inside an async runtime
        let _ = self.manager.unregister_buffer(self.id);
    }
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("lock_count", &self.lock_count())
            .finish()
    }
}
