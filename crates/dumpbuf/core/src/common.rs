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

// Common types and utilities for the buffer manager

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);
static LOGIC_CLOCK: AtomicU64 = AtomicU64::new(0);

/// Identifies a managed buffer inside a buffer manager registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl BufferId {
    /// Allocate a fresh, process-wide unique identifier
    pub fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-wide monotonic stamp used to order buffers by last access
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicStamp(u64);

impl LogicStamp {
    /// Bump the stamp to the next value of the logic clock
    pub fn modified(&mut self) {
        self.0 = LOGIC_CLOCK.fetch_add(1, Ordering::Relaxed) + 1;
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogicStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Format of the data a buffer can be restored from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// Raw bytes written by the buffer manager
    Raw,
    /// Anything else (resident memory, user supplied streams)
    #[default]
    Other,
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Raw => write!(f, "raw"),
            FileFormat::Other => write!(f, "other"),
        }
    }
}

/// When user provided streams are read back into memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingMode {
    /// Restore as soon as the stream factory is set
    Direct,
    /// Restore on the first lock
    #[default]
    Lazy,
}

/// Error types of the buffer manager
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unable to allocate {size} bytes")]
    Allocation { size: usize },

    #[error("Allocation policy '{0}' does not allocate memory")]
    AllocationUnsupported(&'static str),

    #[error("Buffer {0} is not managed by this buffer manager")]
    UnknownBuffer(BufferId),

    #[error("Invalid buffer state: {0}")]
    InvalidState(String),

    #[error("Bad stream size, expected: {expected}, was: {read}")]
    StreamSize { expected: usize, read: usize },

    #[error("Unknown dump policy: {0}")]
    UnknownPolicy(String),

    #[error("Invalid value '{value}' for policy parameter '{name}'")]
    InvalidParameter { name: String, value: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Buffer manager worker has stopped")]
    WorkerStopped,

    #[error("Buffer manager task panicked")]
    TaskPanicked,
}

/// Result type for buffer manager operations
pub type BufferResult<T> = std::result::Result<T, BufferError>;
