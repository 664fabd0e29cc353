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

//! Registry of managed buffers.
//!
//! The table is owned by the buffer manager worker. Dump policies receive it
//! mutably so they can inspect buffers and dump them, always from the worker
//! thread.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::common::{BufferError, BufferId, BufferResult, FileFormat};
use crate::file_holder::FileHolder;
use crate::info::{BufferInfo, BufferInfoMap, BufferStats};
use crate::lock::BufferCell;
use crate::raw_io;
use crate::stream::{RawFileStream, StreamSource};

pub(crate) struct BufferEntry {
    pub(crate) cell: Arc<BufferCell>,
    pub(crate) info: BufferInfo,
}

pub struct BufferTable {
    entries: HashMap<BufferId, BufferEntry>,
    dump_dir: PathBuf,
}

impl BufferTable {
    pub(crate) fn new(dump_dir: PathBuf) -> Self {
        Self {
            entries: HashMap::new(),
            dump_dir,
        }
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    pub(crate) fn insert(&mut self, id: BufferId, cell: Arc<BufferCell>) {
        self.entries.insert(id, BufferEntry { cell, info: BufferInfo::default() });
    }

    pub(crate) fn remove(&mut self, id: BufferId) -> Option<BufferEntry> {
        self.entries.remove(&id)
    }

    pub(crate) fn entry(&self, id: BufferId) -> BufferResult<&BufferEntry> {
        self.entries.get(&id).ok_or(BufferError::UnknownBuffer(id))
    }

    pub(crate) fn entry_mut(&mut self, id: BufferId) -> BufferResult<&mut BufferEntry> {
        self.entries.get_mut(&id).ok_or(BufferError::UnknownBuffer(id))
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn info(&self, id: BufferId) -> Option<&BufferInfo> {
        self.entries.get(&id).map(|entry| &entry.info)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BufferId, &BufferInfo)> {
        self.entries.iter().map(|(id, entry)| (*id, &entry.info))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats::from_infos(self.entries.values().map(|entry| &entry.info))
    }

    pub fn snapshot(&self) -> BufferInfoMap {
        self.entries.iter().map(|(id, entry)| (*id, entry.info.clone())).collect()
    }

    /// Dumpable buffers with their size, least recently accessed first
    pub fn dump_candidates(&self) -> Vec<(BufferId, usize)> {
        let mut candidates: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.info.is_dumpable())
            .map(|(id, entry)| (entry.info.last_access, *id, entry.info.size))
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().map(|(_, id, size)| (id, size)).collect()
    }

    /// Dump least recently accessed buffers until at least `nb_bytes` bytes
    /// have been released, or no candidate is left. Returns the dumped size.
    pub fn dump_least_recently_used(&mut self, nb_bytes: u64) -> u64 {
        let mut dumped = 0u64;
        for (id, size) in self.dump_candidates() {
            if dumped >= nb_bytes {
                break;
            }
            match self.dump_buffer(id) {
                Ok(true) => dumped += size as u64,
                Ok(false) => {}
                Err(e) => {
                    warn!(buffer = %id, error = %e, "failed to dump buffer");
                    break;
                }
            }
        }
        dumped
    }

    /// Write the buffer content to a fresh file of the dump directory and
    /// release its memory.
    ///
    /// Returns `false` without doing anything when the buffer is not loaded,
    /// locked, empty or its memory could not be allocated again.
    pub fn dump_buffer(&mut self, id: BufferId) -> BufferResult<bool> {
        let BufferEntry { cell, info } = self.entries.get_mut(&id).ok_or(BufferError::UnknownBuffer(id))?;
        if !info.is_dumpable() {
            return Ok(false);
        }

        let mut data = cell.data.write();
        let Some(bytes) = data.as_deref() else {
            return Ok(false);
        };

        let len = info.size.min(bytes.len());
        let path = raw_io::dump_to_temp_file(&bytes[..len], &self.dump_dir)?;
        let file = FileHolder::from_temp_path(path);

        info.allocation.destroy(&mut data);
        info.source = StreamSource::Factory(Arc::new(RawFileStream::new(file.clone())));
        info.fs_file = file;
        info.file_format = FileFormat::Raw;
        info.user_stream = false;
        info.loaded = false;

        debug!(buffer = %id, size = info.size, file = ?info.fs_file.path(), "buffer dumped");
        Ok(true)
    }

    /// Read a dumped buffer back into `alloc_size` bytes of memory (the
    /// buffer size when `None`). Returns `false` when the buffer is already loaded.
    pub(crate) fn restore_buffer(&mut self, id: BufferId, alloc_size: Option<usize>) -> BufferResult<bool> {
        let BufferEntry { cell, info } = self.entry_mut(id)?;
        if info.loaded {
            return Ok(false);
        }

        let StreamSource::Factory(factory) = &info.source else {
            return Err(BufferError::InvalidState(format!("buffer {id} is not loaded but has no stream")));
        };
        let factory = factory.clone();

        let alloc_size = alloc_size.unwrap_or(info.size);
        let mut data = cell.data.write();
        let mut buffer = match data.take() {
            Some(mut existing) => match info.allocation.reallocate(&mut existing, alloc_size) {
                Ok(()) => existing,
                Err(e) => {
                    *data = Some(existing);
                    return Err(e);
                }
            },
            None => info.allocation.allocate(alloc_size)?,
        };

        let expected = alloc_size.min(info.size);
        let mut stream = factory.open()?;
        let read = raw_io::read_up_to(&mut *stream, &mut buffer[..expected])?;
        if read != expected {
            return Err(BufferError::StreamSize { expected, read });
        }

        *data = Some(buffer);
        info.set_resident();

        debug!(buffer = %id, size = info.size, "buffer restored");
        Ok(true)
    }

    /// One line per buffer, for diagnostics
    pub fn report(&self) -> String {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();

        let mut out = String::new();
        let _ = writeln!(out, "nb Elem = {}", ids.len());
        let _ = writeln!(
            out,
            "    {:>8} {:>12} {:>10} {:>8} {:>5} {:>8} {}",
            "Buffer", "Size", "Policy", "Access", "Lock", "Status", "File"
        );
        for id in ids {
            let Some(info) = self.info(id) else { continue };
            let status = if info.loaded { "loaded" } else { "dumped" };
            let file = info.fs_file.path().map(|path| path.display().to_string()).unwrap_or_default();
            let _ = writeln!(
                out,
                "    {:>8} {:>12} {:>10} {:>8} {:>5} {:>8} {}",
                id.to_string(),
                info.size,
                info.allocation.name(),
                info.last_access.value(),
                info.lock_count(),
                status,
                file
            );
        }
        out
    }
}
