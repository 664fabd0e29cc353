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
use crate::byte_size::{ByteSize, GIB};
use crate::common::BufferId;
use crate::table::BufferTable;

const BARRIER: &str = "barrier";

/// Keeps resident buffer memory under a fixed barrier
///
/// Allocated and dumped totals are tracked incrementally from the manager
/// notifications. When resident memory goes over the barrier, least recently
/// used buffers are dumped until it fits again.
#[derive(Debug, Clone)]
pub struct BarrierDump {
    barrier: u64,
    total_allocated: u64,
    total_dumped: u64,
}

impl Default for BarrierDump {
    fn default() -> Self {
        Self::new(GIB)
    }
}

impl BarrierDump {
    pub fn new(barrier: u64) -> Self {
        Self {
            barrier,
            total_allocated: 0,
            total_dumped: 0,
        }
    }

    pub fn barrier(&self) -> u64 {
        self.barrier
    }

    pub fn set_barrier(&mut self, barrier: u64) {
        self.barrier = barrier;
    }

    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    pub fn total_dumped(&self) -> u64 {
        self.total_dumped
    }

    fn resident(&self) -> u64 {
        self.total_allocated.saturating_sub(self.total_dumped)
    }

    fn apply(&mut self, table: &mut BufferTable) -> u64 {
        let resident = self.resident();
        if resident <= self.barrier {
            return 0;
        }

        let excess = resident - self.barrier;
        let dumped = table.dump_least_recently_used(excess);
        self.total_dumped = self.total_dumped.saturating_add(dumped);
        debug!(excess, dumped, barrier = self.barrier, "barrier exceeded");
        dumped
    }

    fn sync_totals(&mut self, table: &BufferTable) {
        let stats = table.stats();
        self.total_allocated = stats.total_managed;
        self.total_dumped = stats.total_dumped;
    }

    fn resize(&mut self, table: &mut BufferTable, id: BufferId, size: usize) {
        let old_size = table.info(id).map_or(0, |info| info.size as u64);
        self.total_allocated = self.total_allocated.saturating_sub(old_size).saturating_add(size as u64);
        self.apply(table);
    }
}

impl DumpPolicy for BarrierDump {
    fn allocation_request(&mut self, table: &mut BufferTable, id: BufferId, size: usize) {
        self.resize(table, id, size);
    }

    fn set_request(&mut self, table: &mut BufferTable, id: BufferId, size: usize) {
        self.resize(table, id, size);
    }

    fn reallocate_request(&mut self, table: &mut BufferTable, id: BufferId, new_size: usize) {
        // A dumped buffer is restored by the reallocation, restore_success
        // accounts for it
        self.resize(table, id, new_size);
    }

    fn destroy_request(&mut self, table: &mut BufferTable, id: BufferId) {
        let Some(info) = table.info(id) else { return };
        let size = info.size as u64;
        if !info.loaded {
            self.total_dumped = self.total_dumped.saturating_sub(size);
        }
        self.total_allocated = self.total_allocated.saturating_sub(size);
    }

    fn unlock_request(&mut self, table: &mut BufferTable, _id: BufferId) {
        self.apply(table);
    }

    fn dump_success(&mut self, table: &BufferTable, id: BufferId) {
        if let Some(info) = table.info(id) {
            self.total_dumped = self.total_dumped.saturating_add(info.size as u64);
        }
    }

    fn restore_success(&mut self, table: &BufferTable, id: BufferId) {
        if let Some(info) = table.info(id) {
            self.total_dumped = self.total_dumped.saturating_sub(info.size as u64);
        }
    }

    fn request_failed(&mut self, table: &BufferTable, _id: BufferId) {
        self.sync_totals(table);
    }

    fn refresh(&mut self, table: &mut BufferTable) {
        self.sync_totals(table);
        self.apply(table);
    }

    fn param_names(&self) -> &'static [&'static str] {
        &[BARRIER]
    }

    fn set_param(&mut self, name: &str, value: &str) -> bool {
        match (name, parse_size(value)) {
            (BARRIER, Some(barrier)) => {
                self.barrier = barrier;
                true
            }
            _ => false,
        }
    }

    fn param(&self, name: &str) -> Option<String> {
        (name == BARRIER).then(|| ByteSize(self.barrier).human_readable())
    }

    fn name(&self) -> &'static str {
        "barrier"
    }
}
