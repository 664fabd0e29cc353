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

// Input streams a buffer can be restored from or read through

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use crate::common::{BufferError, BufferResult, FileFormat};
use crate::file_holder::FileHolder;
use crate::lock::BufferLock;

/// Produces a fresh input stream on each call
pub trait StreamFactory: Send + Sync + fmt::Debug {
    fn open(&self) -> BufferResult<Box<dyn Read + Send>>;
}

/// Reads the raw file a buffer was dumped to
#[derive(Debug, Clone)]
pub struct RawFileStream {
    file: FileHolder,
}

impl RawFileStream {
    pub fn new(file: FileHolder) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &FileHolder {
        &self.file
    }
}

impl StreamFactory for RawFileStream {
    fn open(&self) -> BufferResult<Box<dyn Read + Send>> {
        let path = self.file.path().ok_or_else(|| BufferError::InvalidState("raw stream without file".to_string()))?;
        Ok(Box::new(File::open(path)?))
    }
}

/// In-memory bytes served as a stream
#[derive(Debug, Clone)]
pub struct BytesStream {
    bytes: Arc<[u8]>,
}

impl BytesStream {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { bytes: bytes.into() }
    }
}

impl StreamFactory for BytesStream {
    fn open(&self) -> BufferResult<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(SharedBytes(self.bytes.clone()))))
    }
}

struct SharedBytes(Arc<[u8]>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Where the content of a buffer currently lives
#[derive(Debug, Clone, Default)]
pub(crate) enum StreamSource {
    /// In memory
    #[default]
    Resident,
    /// Behind a stream factory, either a dump file or a user stream
    Factory(Arc<dyn StreamFactory>),
}

/// Reads the memory of a buffer, keeping it locked until dropped
pub struct LockedReader {
    lock: BufferLock,
    position: usize,
}

impl LockedReader {
    pub fn new(lock: BufferLock) -> Self {
        Self { lock, position: 0 }
    }
}

impl Read for LockedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.lock.bytes();
        let remaining = bytes.get(self.position..).unwrap_or_default();
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }
}

/// Everything needed to read back the content of a buffer
pub struct StreamInfo {
    pub size: usize,
    pub stream: Box<dyn Read + Send>,
    pub format: FileFormat,
    pub fs_file: FileHolder,
    pub user_stream: bool,
}

impl StreamInfo {
    /// Read the whole stream into memory
    pub fn read_to_vec(mut self) -> BufferResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.size);
        self.stream.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl fmt::Debug for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInfo")
            .field("size", &self.size)
            .field("format", &self.format)
            .field("fs_file", &self.fs_file)
            .field("user_stream", &self.user_stream)
            .finish_non_exhaustive()
    }
}
