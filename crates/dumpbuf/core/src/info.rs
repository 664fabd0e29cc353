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

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Weak;

use crate::allocation::{SharedAllocationPolicy, default_policy};
use crate::common::{BufferId, FileFormat, LogicStamp};
use crate::file_holder::FileHolder;
use crate::lock::LockToken;
use crate::stream::StreamSource;

/// Bookkeeping kept by the buffer manager for each managed buffer
#[derive(Clone)]
pub struct BufferInfo {
    /// Size of the buffer in bytes, resident or not
    pub size: usize,
    /// Whether the buffer content is in memory
    pub loaded: bool,
    pub last_access: LogicStamp,
    pub file_format: FileFormat,
    /// File the buffer was dumped to or loaded from
    pub fs_file: FileHolder,
    /// Content comes from a caller supplied stream
    pub user_stream: bool,
    pub(crate) allocation: SharedAllocationPolicy,
    pub(crate) source: StreamSource,
    pub(crate) lock: Weak<LockToken>,
}

impl Default for BufferInfo {
    fn default() -> Self {
        Self {
            size: 0,
            loaded: true,
            last_access: LogicStamp::default(),
            file_format: FileFormat::Other,
            fs_file: FileHolder::default(),
            user_stream: false,
            allocation: default_policy(),
            source: StreamSource::Resident,
            lock: Weak::new(),
        }
    }
}

impl BufferInfo {
    /// Number of live locks on the buffer
    pub fn lock_count(&self) -> usize {
        self.lock.strong_count()
    }

    pub fn allocation_policy(&self) -> &SharedAllocationPolicy {
        &self.allocation
    }

    /// Loaded, unlocked, non empty and re-allocatable
    pub fn is_dumpable(&self) -> bool {
        self.loaded && self.lock_count() == 0 && self.size > 0 && self.allocation.can_allocate()
    }

    /// Back to the state of a buffer without memory
    pub(crate) fn clear(&mut self) {
        self.size = 0;
        self.loaded = true;
        self.file_format = FileFormat::Other;
        self.fs_file.clear();
        self.user_stream = false;
        self.source = StreamSource::Resident;
        self.last_access.modified();
    }

    /// Mark the content as resident after an allocation or a restore
    pub(crate) fn set_resident(&mut self) {
        self.loaded = true;
        self.file_format = FileFormat::Other;
        self.fs_file.clear();
        self.user_stream = false;
        self.source = StreamSource::Resident;
        self.last_access.modified();
    }
}

impl fmt::Debug for BufferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferInfo")
            .field("size", &self.size)
            .field("loaded", &self.loaded)
            .field("last_access", &self.last_access)
            .field("file_format", &self.file_format)
            .field("fs_file", &self.fs_file.path())
            .field("user_stream", &self.user_stream)
            .field("allocation", &self.allocation.name())
            .field("lock_count", &self.lock_count())
            .finish()
    }
}

/// Snapshot of the registry, ordered by buffer id
pub type BufferInfoMap = BTreeMap<BufferId, BufferInfo>;

/// Aggregated sizes over a set of buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Sum of all buffer sizes
    pub total_managed: u64,
    /// Sum of the sizes of dumped buffers
    pub total_dumped: u64,
}

impl BufferStats {
    pub fn from_infos<'a>(infos: impl IntoIterator<Item = &'a BufferInfo>) -> Self {
        infos.into_iter().fold(Self::default(), |mut stats, info| {
            stats.total_managed += info.size as u64;
            if !info.loaded {
                stats.total_dumped += info.size as u64;
            }
            stats
        })
    }

    /// Bytes currently held in memory
    pub fn resident(&self) -> u64 {
        self.total_managed.saturating_sub(self.total_dumped)
    }
}
