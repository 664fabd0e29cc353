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

//! The buffer manager.
//!
//! All buffer bookkeeping lives on a single worker thread. Public operations
//! post a task to that thread and return a [`Pending`] result, which can be
//! waited on synchronously or awaited. Operations posted from one thread run
//! in posting order.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::allocation::SharedAllocationPolicy;
use crate::common::{BufferError, BufferId, BufferResult, FileFormat, LoadingMode};
use crate::config::ManagerConfig;
use crate::file_holder::FileHolder;
use crate::info::{BufferInfo, BufferInfoMap, BufferStats};
use crate::lock::{BufferCell, BufferLock, LockToken};
use crate::policy::DumpPolicy;
use crate::raw_io;
use crate::stream::{LockedReader, StreamFactory, StreamInfo, StreamSource};
use crate::table::{BufferEntry, BufferTable};
use crate::worker::{Pending, Worker, WorkerHandle};

static GLOBAL_MANAGER: OnceLock<Arc<BufferManager>> = OnceLock::new();

/// State owned by the buffer manager worker
pub(crate) struct WorkerState {
    table: BufferTable,
    policy: Box<dyn DumpPolicy>,
}

fn expect_empty(entry: &BufferEntry, id: BufferId, operation: &str) -> BufferResult<()> {
    if entry.cell.data.read().is_some() || !entry.info.loaded {
        return Err(BufferError::InvalidState(format!("cannot {operation} buffer {id}: it already holds data")));
    }
    Ok(())
}

fn expect_allocated(entry: &BufferEntry, id: BufferId, operation: &str) -> BufferResult<()> {
    if entry.cell.data.read().is_none() && entry.info.loaded {
        return Err(BufferError::InvalidState(format!("cannot {operation} buffer {id}: it has no data")));
    }
    Ok(())
}

impl WorkerState {
    fn new(table: BufferTable, policy: Box<dyn DumpPolicy>) -> Self {
        Self { table, policy }
    }

    fn register(&mut self, id: BufferId, cell: Arc<BufferCell>) -> BufferResult<()> {
        self.table.insert(id, cell);
        debug!(buffer = %id, "buffer registered");
        Ok(())
    }

    fn unregister(&mut self, id: BufferId) -> BufferResult<()> {
        let Some(entry) = self.table.info(id) else {
            return Err(BufferError::UnknownBuffer(id));
        };
        if entry.lock_count() > 0 {
            warn!(buffer = %id, locks = entry.lock_count(), "unregistering a locked buffer");
        }
        if entry.size > 0 || !entry.loaded {
            self.policy.destroy_request(&mut self.table, id);
        }
        if let Some(BufferEntry { cell, info }) = self.table.remove(id) {
            info.allocation.destroy(&mut cell.data.write());
        }
        debug!(buffer = %id, "buffer unregistered");
        Ok(())
    }

    fn allocate(&mut self, id: BufferId, size: usize, allocation: SharedAllocationPolicy) -> BufferResult<()> {
        expect_empty(self.table.entry(id)?, id, "allocate")?;
        self.policy.allocation_request(&mut self.table, id, size);

        let BufferEntry { cell, info } = self.table.entry_mut(id)?;
        let memory = match allocation.allocate(size) {
            Ok(memory) => memory,
            Err(e) => {
                info.clear();
                self.policy.request_failed(&self.table, id);
                return Err(e);
            }
        };

        *cell.data.write() = Some(memory);
        cell.set_size(size);
        info.size = size;
        info.allocation = allocation;
        info.set_resident();
        debug!(buffer = %id, size, "buffer allocated");
        Ok(())
    }

    fn set_buffer(&mut self, id: BufferId, bytes: Vec<u8>, allocation: SharedAllocationPolicy) -> BufferResult<()> {
        expect_empty(self.table.entry(id)?, id, "set")?;
        let size = bytes.len();
        self.policy.set_request(&mut self.table, id, size);

        let BufferEntry { cell, info } = self.table.entry_mut(id)?;
        *cell.data.write() = Some(bytes);
        cell.set_size(size);
        info.size = size;
        info.allocation = allocation;
        info.set_resident();
        debug!(buffer = %id, size, "buffer set");
        Ok(())
    }

    fn reallocate(&mut self, id: BufferId, new_size: usize) -> BufferResult<()> {
        expect_allocated(self.table.entry(id)?, id, "reallocate")?;
        self.policy.reallocate_request(&mut self.table, id, new_size);

        if let Err(e) = self.resize_memory(id, new_size) {
            self.policy.request_failed(&self.table, id);
            return Err(e);
        }

        let BufferEntry { cell, info } = self.table.entry_mut(id)?;
        cell.set_size(new_size);
        info.size = new_size;
        info.last_access.modified();
        debug!(buffer = %id, size = new_size, "buffer reallocated");
        Ok(())
    }

    fn resize_memory(&mut self, id: BufferId, new_size: usize) -> BufferResult<()> {
        // The policy may have dumped this buffer
        if !self.table.entry(id)?.info.loaded {
            self.restore(id, Some(new_size))?;
            return Ok(());
        }
        let BufferEntry { cell, info } = self.table.entry_mut(id)?;
        let mut data = cell.data.write();
        match data.as_mut() {
            Some(memory) => info.allocation.reallocate(memory, new_size),
            None => {
                *data = Some(info.allocation.allocate(new_size)?);
                Ok(())
            }
        }
    }

    fn destroy(&mut self, id: BufferId) -> BufferResult<()> {
        let entry = self.table.entry(id)?;
        if entry.cell.data.read().is_none() && entry.info.loaded {
            return Ok(());
        }
        self.policy.destroy_request(&mut self.table, id);

        let BufferEntry { cell, info } = self.table.entry_mut(id)?;
        info.allocation.destroy(&mut cell.data.write());
        cell.set_size(0);
        info.clear();
        debug!(buffer = %id, "buffer destroyed");
        Ok(())
    }

    fn swap(&mut self, a: BufferId, b: BufferId) -> BufferResult<()> {
        if a == b {
            return Ok(());
        }
        // A locked buffer must stay resident, so its counterpart is restored first
        for (locked, other) in [(a, b), (b, a)] {
            if self.table.entry(locked)?.info.lock_count() > 0 && !self.table.entry(other)?.info.loaded {
                self.restore(other, None)?;
            }
        }

        let first = self.table.entry(a)?.cell.clone();
        let second = self.table.entry(b)?.cell.clone();

        std::mem::swap(&mut *first.data.write(), &mut *second.data.write());
        let size = first.size();
        first.set_size(second.size());
        second.set_size(size);

        let mut info_a = self.table.entry(a)?.info.clone();
        let mut info_b = self.table.entry(b)?.info.clone();
        std::mem::swap(&mut info_a.size, &mut info_b.size);
        std::mem::swap(&mut info_a.loaded, &mut info_b.loaded);
        std::mem::swap(&mut info_a.file_format, &mut info_b.file_format);
        std::mem::swap(&mut info_a.fs_file, &mut info_b.fs_file);
        std::mem::swap(&mut info_a.user_stream, &mut info_b.user_stream);
        std::mem::swap(&mut info_a.allocation, &mut info_b.allocation);
        std::mem::swap(&mut info_a.source, &mut info_b.source);
        info_a.last_access.modified();
        info_b.last_access.modified();
        self.table.entry_mut(a)?.info = info_a;
        self.table.entry_mut(b)?.info = info_b;

        debug!(first = %a, second = %b, "buffers swapped");
        Ok(())
    }

    fn lock(&mut self, id: BufferId, worker: WorkerHandle<WorkerState>) -> BufferResult<BufferLock> {
        self.table.entry(id)?;
        self.policy.lock_request(&mut self.table, id);

        if !self.table.entry(id)?.info.loaded {
            self.restore(id, None)?;
        }

        let existing = self.table.entry(id)?.info.lock.upgrade();
        let token = match existing {
            Some(token) => token,
            None => {
                let token = Arc::new(LockToken::new(id, worker));
                let entry = self.table.entry_mut(id)?;
                entry.info.lock = Arc::downgrade(&token);
                *entry.cell.token.lock() = Arc::downgrade(&token);
                token
            }
        };

        let entry = self.table.entry_mut(id)?;
        entry.info.last_access.modified();
        Ok(BufferLock::new(token, entry.cell.clone()))
    }

    pub(crate) fn unlock(&mut self, id: BufferId) -> BufferResult<bool> {
        if !self.table.contains(id) {
            debug!(buffer = %id, "unlock of an unregistered buffer");
            return Ok(false);
        }
        self.policy.unlock_request(&mut self.table, id);
        Ok(true)
    }

    fn dump(&mut self, id: BufferId) -> BufferResult<bool> {
        let dumped = self.table.dump_buffer(id)?;
        if dumped {
            self.policy.dump_success(&self.table, id);
        }
        Ok(dumped)
    }

    fn restore(&mut self, id: BufferId, alloc_size: Option<usize>) -> BufferResult<bool> {
        let restored = self.table.restore_buffer(id, alloc_size)?;
        if restored {
            self.policy.restore_success(&self.table, id);
        }
        Ok(restored)
    }

    fn set_stream_factory(&mut self, id: BufferId, source: UserStream, mode: LoadingMode) -> BufferResult<()> {
        expect_empty(self.table.entry(id)?, id, "set a stream factory on")?;
        self.policy.set_request(&mut self.table, id, source.size);

        let BufferEntry { cell, info } = self.table.entry_mut(id)?;
        cell.set_size(source.size);
        info.size = source.size;
        info.allocation = source.allocation;
        info.source = StreamSource::Factory(source.factory);
        info.fs_file = source.fs_file;
        info.file_format = source.format;
        info.user_stream = true;
        info.loaded = false;
        info.last_access.modified();
        self.policy.dump_success(&self.table, id);

        debug!(buffer = %id, size = source.size, ?mode, "stream factory set");
        if mode == LoadingMode::Direct {
            self.restore(id, None)?;
        }
        Ok(())
    }

    fn stream_source(&self, id: BufferId) -> BufferResult<(StreamMeta, StreamSource)> {
        let info = &self.table.entry(id)?.info;
        let meta = StreamMeta {
            size: info.size,
            format: info.file_format,
            fs_file: info.fs_file.clone(),
            user_stream: info.user_stream,
        };
        Ok((meta, info.source.clone()))
    }

    fn set_policy(&mut self, policy: Box<dyn DumpPolicy>) {
        info!(policy = policy.name(), "dump policy changed");
        self.policy = policy;
        self.policy.refresh(&mut self.table);
    }
}

/// Everything describing a caller supplied stream
struct UserStream {
    factory: Arc<dyn StreamFactory>,
    size: usize,
    fs_file: FileHolder,
    format: FileFormat,
    allocation: SharedAllocationPolicy,
}

struct StreamMeta {
    size: usize,
    format: FileFormat,
    fs_file: FileHolder,
    user_stream: bool,
}

/// Memory manager of dumpable buffers
///
/// Keeps track of every registered buffer and applies the installed dump
/// policy. Buffer objects normally use the process-wide instance returned by
/// [`BufferManager::global`]; isolated instances can be created with
/// [`BufferManager::new`].
pub struct BufferManager {
    worker: Worker<WorkerState>,
    loading_mode: Mutex<LoadingMode>,
    dump_dir: PathBuf,
}

impl BufferManager {
    pub fn new(config: ManagerConfig) -> BufferResult<Arc<Self>> {
        fs::create_dir_all(&config.dump_dir)?;
        let policy = config.build_policy()?;
        let state = WorkerState::new(BufferTable::new(config.dump_dir.clone()), policy);
        let worker = Worker::spawn(&config.worker_name, state)?;

        info!(dump_dir = %config.dump_dir.display(), policy = %config.policy.name, "buffer manager started");
        Ok(Arc::new(Self {
            worker,
            loading_mode: Mutex::new(config.loading_mode),
            dump_dir: config.dump_dir,
        }))
    }

    pub fn with_defaults() -> BufferResult<Arc<Self>> {
        Self::new(ManagerConfig::default())
    }

    /// The process-wide buffer manager, created with the default configuration on first use
    pub fn global() -> BufferResult<Arc<Self>> {
        if let Some(manager) = GLOBAL_MANAGER.get() {
            return Ok(manager.clone());
        }
        let manager = Self::with_defaults()?;
        Ok(GLOBAL_MANAGER.get_or_init(|| manager).clone())
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    pub(crate) fn register_buffer(&self, id: BufferId, cell: Arc<BufferCell>) -> Pending<()> {
        self.worker.post(move |state| state.register(id, cell))
    }

    pub fn unregister_buffer(&self, id: BufferId) -> Pending<()> {
        self.worker.post(move |state| state.unregister(id))
    }

    pub fn allocate_buffer(&self, id: BufferId, size: usize, allocation: SharedAllocationPolicy) -> Pending<()> {
        self.worker.post(move |state| state.allocate(id, size, allocation))
    }

    /// Hand caller owned bytes over to the manager
    pub fn set_buffer(&self, id: BufferId, bytes: Vec<u8>, allocation: SharedAllocationPolicy) -> Pending<()> {
        self.worker.post(move |state| state.set_buffer(id, bytes, allocation))
    }

    pub fn reallocate_buffer(&self, id: BufferId, new_size: usize) -> Pending<()> {
        self.worker.post(move |state| state.reallocate(id, new_size))
    }

    pub fn destroy_buffer(&self, id: BufferId) -> Pending<()> {
        self.worker.post(move |state| state.destroy(id))
    }

    pub fn swap_buffer(&self, a: BufferId, b: BufferId) -> Pending<()> {
        self.worker.post(move |state| state.swap(a, b))
    }

    /// Lock a buffer, restoring it first when it was dumped
    pub fn lock_buffer(&self, id: BufferId) -> Pending<BufferLock> {
        let worker = self.worker.handle().clone();
        self.worker.post(move |state| state.lock(id, worker))
    }

    /// Notify the dump policy that a buffer was released. Sent by the last
    /// lock of a buffer when it is dropped.
    pub fn unlock_buffer(&self, id: BufferId) -> Pending<bool> {
        self.worker.post(move |state| state.unlock(id))
    }

    /// Dump a buffer on request. Resolves to `false` when the buffer cannot be dumped.
    pub fn dump_buffer(&self, id: BufferId) -> Pending<bool> {
        self.worker.post(move |state| state.dump(id))
    }

    /// Read a dumped buffer back. Resolves to `false` when it was already loaded.
    pub fn restore_buffer(&self, id: BufferId) -> Pending<bool> {
        self.worker.post(move |state| state.restore(id, None))
    }

    /// Write raw bytes to `path`, on the worker thread
    pub fn write_buffer(&self, bytes: Vec<u8>, path: impl Into<PathBuf>) -> Pending<()> {
        let path = path.into();
        self.worker.post(move |_| raw_io::write_raw(&bytes, &path))
    }

    /// Read exactly `size` raw bytes from `path`, on the worker thread
    pub fn read_buffer(&self, size: usize, path: impl Into<PathBuf>) -> Pending<Vec<u8>> {
        let path = path.into();
        self.worker.post(move |_| raw_io::read_raw(size, &path))
    }

    /// Give a buffer its content through a stream, read according to the loading mode
    pub fn set_istream_factory(
        &self,
        id: BufferId,
        factory: Arc<dyn StreamFactory>,
        size: usize,
        fs_file: FileHolder,
        format: FileFormat,
        allocation: SharedAllocationPolicy,
    ) -> Pending<()> {
        let mode = self.loading_mode();
        let source = UserStream {
            factory,
            size,
            fs_file,
            format,
            allocation,
        };
        self.worker.post(move |state| state.set_stream_factory(id, source, mode))
    }

    /// Open a stream on the current content of a buffer.
    ///
    /// Resident buffers are read through a lock held by the returned stream,
    /// dumped ones straight from their file. Blocks the calling thread like
    /// [`Pending::wait`], so it panics when called from within an async
    /// runtime; use `spawn_blocking` there.
    pub fn stream_info(&self, id: BufferId) -> BufferResult<StreamInfo> {
        let (meta, source) = self.worker.post(move |state| state.stream_source(id)).wait()?;
        let stream: Box<dyn Read + Send> = match source {
            StreamSource::Resident if meta.size == 0 => Box::new(io::empty()),
            StreamSource::Resident => Box::new(LockedReader::new(self.lock_buffer(id).wait()?)),
            StreamSource::Factory(factory) => factory.open()?,
        };
        Ok(StreamInfo {
            size: meta.size,
            stream,
            format: meta.format,
            fs_file: meta.fs_file,
            user_stream: meta.user_stream,
        })
    }

    pub fn buffer_info(&self, id: BufferId) -> Pending<BufferInfo> {
        self.worker.post(move |state| state.table.info(id).cloned().ok_or(BufferError::UnknownBuffer(id)))
    }

    /// Copy of every buffer info, keyed by buffer id
    pub fn buffer_infos(&self) -> Pending<BufferInfoMap> {
        self.worker.post(|state| Ok(state.table.snapshot()))
    }

    pub fn buffer_stats(&self) -> Pending<BufferStats> {
        self.worker.post(|state| Ok(state.table.stats()))
    }

    pub fn report(&self) -> Pending<String> {
        self.worker.post(|state| Ok(state.table.report()))
    }

    /// Install a new dump policy; it is refreshed against the current buffers
    pub fn set_dump_policy(&self, policy: Box<dyn DumpPolicy>) -> Pending<()> {
        self.worker.post(move |state| {
            state.set_policy(policy);
            Ok(())
        })
    }

    pub fn dump_policy_name(&self) -> Pending<&'static str> {
        self.worker.post(|state| Ok(state.policy.name()))
    }

    pub fn set_policy_param(&self, name: &str, value: &str) -> Pending<bool> {
        let (name, value) = (name.to_string(), value.to_string());
        self.worker.post(move |state| Ok(state.policy.set_param(&name, &value)))
    }

    pub fn policy_param(&self, name: &str) -> Pending<Option<String>> {
        let name = name.to_string();
        self.worker.post(move |state| Ok(state.policy.param(&name)))
    }

    pub fn policy_param_names(&self) -> Pending<&'static [&'static str]> {
        self.worker.post(|state| Ok(state.policy.param_names()))
    }

    pub fn loading_mode(&self) -> LoadingMode {
        *self.loading_mode.lock()
    }

    pub fn set_loading_mode(&self, mode: LoadingMode) {
        *self.loading_mode.lock() = mode;
    }
}
