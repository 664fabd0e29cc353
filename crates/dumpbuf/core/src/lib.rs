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

/// Dumpable buffer management
///
/// This crate keeps large buffers in memory while they are in use and lets a
/// dump policy write inactive ones to disk:
/// - Buffer objects and locks pinning their memory
/// - A buffer manager serializing all bookkeeping on one worker thread
/// - Pluggable dump policies driven by buffer events and memory monitors
/// - Raw file I/O for dumped content and user supplied streams
pub mod allocation; // Allocation policies
pub mod byte_size; // Human readable sizes
pub mod common; // Ids, stamps, errors
pub mod config; // Manager configuration
pub mod file_holder; // Backing files of buffers
pub mod info; // Per buffer bookkeeping
pub mod lock; // Buffer locks
pub mod manager; // The buffer manager
pub mod monitor; // System memory figures
pub mod object; // Client buffer handles
pub mod policy; // Dump policies
pub mod raw_io; // Raw buffer files
pub mod stream; // Input streams
pub mod table; // Buffer registry
pub mod worker; // Worker thread

// Re-export main components for easier access
pub use allocation::{AllocationPolicy, NoAllocPolicy, SharedAllocationPolicy, ZeroedPolicy, default_policy};
pub use byte_size::{ByteSize, ByteSizeError};
pub use common::{BufferError, BufferId, BufferResult, FileFormat, LoadingMode, LogicStamp};
pub use config::{ManagerConfig, PolicyConfig};
pub use file_holder::FileHolder;
pub use info::{BufferInfo, BufferInfoMap, BufferStats};
pub use lock::BufferLock;
pub use manager::BufferManager;
pub use monitor::{FixedMonitor, MemoryMonitor, MemoryReport, SystemMonitor};
pub use object::BufferObject;
pub use policy::{AlwaysDump, BarrierDump, DumpPolicy, NeverDump, ValveDump};
pub use stream::{BytesStream, LockedReader, RawFileStream, StreamFactory, StreamInfo};
pub use table::BufferTable;
pub use worker::Pending;
