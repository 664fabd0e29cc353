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

use tracing::{debug, warn};

use super::DumpPolicy;
use crate::common::BufferId;
use crate::table::BufferTable;

/// Every unlocked buffer is dumped as soon as it is released
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDump;

impl AlwaysDump {
    fn apply(table: &mut BufferTable) -> usize {
        let mut count = 0;
        for (id, _) in table.dump_candidates() {
            match table.dump_buffer(id) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => warn!(buffer = %id, error = %e, "failed to dump buffer"),
            }
        }
        if count > 0 {
            debug!(count, "dumped buffers");
        }
        count
    }
}

impl DumpPolicy for AlwaysDump {
    fn unlock_request(&mut self, table: &mut BufferTable, _id: BufferId) {
        Self::apply(table);
    }

    fn refresh(&mut self, table: &mut BufferTable) {
        Self::apply(table);
    }

    fn name(&self) -> &'static str {
        "always"
    }
}
