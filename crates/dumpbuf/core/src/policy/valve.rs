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

use tracing::debug;

use super::{DumpPolicy, parse_size};
use crate::byte_size::{ByteSize, MIB};
use crate::common::BufferId;
use crate::monitor::{MemoryMonitor, SystemMonitor};
use crate::table::BufferTable;

const MIN_FREE_MEM: &str = "min_free_mem";
const HYSTERESIS_OFFSET: &str = "hysteresis_offset";

/// Dumps buffers when free system memory runs low
///
/// Once free memory drops to `min_free_mem` (counting the memory about to be
/// requested), least recently used buffers are dumped until
/// `min_free_mem + hysteresis_offset` bytes would be free again.
#[derive(Debug)]
pub struct ValveDump<M: MemoryMonitor = SystemMonitor> {
    monitor: M,
    min_free_mem: u64,
    hysteresis_offset: u64,
}

impl ValveDump<SystemMonitor> {
    pub fn new() -> Self {
        Self::with_monitor(SystemMonitor::new())
    }
}

impl Default for ValveDump<SystemMonitor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: MemoryMonitor> ValveDump<M> {
    pub fn with_monitor(monitor: M) -> Self {
        Self {
            monitor,
            min_free_mem: 500 * MIB,
            hysteresis_offset: 0,
        }
    }

    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    pub fn min_free_mem(&self) -> u64 {
        self.min_free_mem
    }

    pub fn hysteresis_offset(&self) -> u64 {
        self.hysteresis_offset
    }

    /// Free memory when it is at or below the threshold, counting `supplement`
    /// bytes about to be requested
    fn need_dump(&self, supplement: u64) -> Option<u64> {
        let free = self.monitor.free_system_memory();
        (free <= self.min_free_mem.saturating_add(supplement)).then_some(free)
    }

    fn apply(&mut self, table: &mut BufferTable, supplement: u64) -> u64 {
        let Some(free) = self.need_dump(supplement) else {
            return 0;
        };

        let target = self.min_free_mem.saturating_add(self.hysteresis_offset).saturating_add(supplement).saturating_sub(free);
        let dumped = table.dump_least_recently_used(target);
        debug!(free, target, dumped, "low free memory");
        dumped
    }

    fn growth(table: &BufferTable, id: BufferId, size: usize) -> u64 {
        let old_size = table.info(id).map_or(0, |info| info.size);
        size.saturating_sub(old_size) as u64
    }
}

impl<M: MemoryMonitor> DumpPolicy for ValveDump<M> {
    fn allocation_request(&mut self, table: &mut BufferTable, id: BufferId, size: usize) {
        let supplement = Self::growth(table, id, size);
        self.apply(table, supplement);
    }

    fn set_request(&mut self, table: &mut BufferTable, id: BufferId, size: usize) {
        let supplement = Self::growth(table, id, size);
        self.apply(table, supplement);
    }

    fn reallocate_request(&mut self, table: &mut BufferTable, id: BufferId, new_size: usize) {
        let supplement = Self::growth(table, id, new_size);
        self.apply(table, supplement);
    }

    fn unlock_request(&mut self, table: &mut BufferTable, _id: BufferId) {
        self.apply(table, 0);
    }

    fn refresh(&mut self, table: &mut BufferTable) {
        debug!(report = %self.monitor.report(), "valve refresh");
        self.apply(table, 0);
    }

    fn param_names(&self) -> &'static [&'static str] {
        &[MIN_FREE_MEM, HYSTERESIS_OFFSET]
    }

    fn set_param(&mut self, name: &str, value: &str) -> bool {
        let Some(size) = parse_size(value) else {
            return false;
        };
        match name {
            MIN_FREE_MEM => self.min_free_mem = size,
            HYSTERESIS_OFFSET => self.hysteresis_offset = size,
            _ => return false,
        }
        true
    }

    fn param(&self, name: &str) -> Option<String> {
        let value = match name {
            MIN_FREE_MEM => self.min_free_mem,
            HYSTERESIS_OFFSET => self.hysteresis_offset,
            _ => return None,
        };
        Some(ByteSize(value).human_readable())
    }

    fn name(&self) -> &'static str {
        "valve"
    }
}
