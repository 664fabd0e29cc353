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

// Memory monitors report system and process memory usage to dump policies

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{ProcessesToUpdate, System};

use crate::byte_size::ByteSize;

/// Source of memory figures, in bytes
pub trait MemoryMonitor: Send + fmt::Debug {
    fn free_system_memory(&self) -> u64;

    fn total_system_memory(&self) -> u64;

    fn used_system_memory(&self) -> u64 {
        self.total_system_memory().saturating_sub(self.free_system_memory())
    }

    /// Resident memory of the current process, when it can be measured
    fn used_process_memory(&self) -> Option<u64> {
        None
    }

    fn report(&self) -> MemoryReport {
        MemoryReport {
            total: self.total_system_memory(),
            free: self.free_system_memory(),
            used: self.used_system_memory(),
            process: self.used_process_memory(),
        }
    }
}

/// Reads the figures of the running system
pub struct SystemMonitor {
    system: Mutex<System>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self { system: Mutex::new(system) }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemMonitor").finish_non_exhaustive()
    }
}

impl MemoryMonitor for SystemMonitor {
    fn free_system_memory(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.available_memory()
    }

    fn total_system_memory(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.total_memory()
    }

    fn used_process_memory(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|process| process.memory())
    }
}

/// Monitor with settable figures. Clones share the same values.
#[derive(Debug, Clone)]
pub struct FixedMonitor {
    free: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
}

impl FixedMonitor {
    pub fn new(free: u64, total: u64) -> Self {
        Self {
            free: Arc::new(AtomicU64::new(free)),
            total: Arc::new(AtomicU64::new(total)),
        }
    }

    pub fn set_free(&self, free: u64) {
        self.free.store(free, Ordering::SeqCst);
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }
}

impl MemoryMonitor for FixedMonitor {
    fn free_system_memory(&self) -> u64 {
        self.free.load(Ordering::SeqCst)
    }

    fn total_system_memory(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

/// Point in time memory figures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReport {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub process: Option<u64>,
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total system memory: {}", ByteSize(self.total))?;
        writeln!(f, "Free system memory:  {}", ByteSize(self.free))?;
        write!(f, "Used system memory:  {}", ByteSize(self.used))?;
        if let Some(process) = self.process {
            write!(f, "\nUsed process memory: {}", ByteSize(process))?;
        }
        Ok(())
    }
}
