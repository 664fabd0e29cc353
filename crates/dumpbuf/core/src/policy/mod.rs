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

//! Dump policies decide when resident buffers are written to disk.
//!
//! The buffer manager notifies its policy before each memory request and
//! after each lock release, always from the worker thread. A policy may dump
//! any unlocked buffer of the table it is handed.

pub mod always; // Dump everything as soon as possible
pub mod barrier; // Keep resident memory under a fixed amount
pub mod never; // Keep everything in memory
pub mod valve; // Keep a minimum of free system memory

use std::fmt;

pub use always::AlwaysDump;
pub use barrier::BarrierDump;
pub use never::NeverDump;
pub use valve::ValveDump;

use crate::byte_size::ByteSize;
use crate::common::{BufferError, BufferId, BufferResult};
use crate::table::BufferTable;

/// Hooks called by the buffer manager around buffer operations
///
/// Request hooks run before the operation takes place, so the buffer info
/// still describes the previous state.
pub trait DumpPolicy: Send + fmt::Debug {
    fn allocation_request(&mut self, _table: &mut BufferTable, _id: BufferId, _size: usize) {}

    fn set_request(&mut self, _table: &mut BufferTable, _id: BufferId, _size: usize) {}

    fn reallocate_request(&mut self, _table: &mut BufferTable, _id: BufferId, _new_size: usize) {}

    fn destroy_request(&mut self, _table: &mut BufferTable, _id: BufferId) {}

    fn lock_request(&mut self, _table: &mut BufferTable, _id: BufferId) {}

    fn unlock_request(&mut self, _table: &mut BufferTable, _id: BufferId) {}

    /// A buffer was dumped by the manager on request
    fn dump_success(&mut self, _table: &BufferTable, _id: BufferId) {}

    /// A buffer was read back into memory
    fn restore_success(&mut self, _table: &BufferTable, _id: BufferId) {}

    /// An allocation or reallocation announced by a request hook failed; the
    /// buffer info still describes the state before the request
    fn request_failed(&mut self, _table: &BufferTable, _id: BufferId) {}

    /// Called when the policy is installed on a manager
    fn refresh(&mut self, _table: &mut BufferTable) {}

    fn param_names(&self) -> &'static [&'static str] {
        &[]
    }

    /// Set a parameter from its textual value; false when the name or the value is rejected
    fn set_param(&mut self, _name: &str, _value: &str) -> bool {
        false
    }

    /// Current value of a parameter, human readable
    fn param(&self, _name: &str) -> Option<String> {
        None
    }

    fn name(&self) -> &'static str;
}

const POLICY_NAMES: [&str; 4] = ["never", "always", "barrier", "valve"];

/// Names accepted by [`create`]
pub fn names() -> &'static [&'static str] {
    &POLICY_NAMES
}

/// Build a policy with its default parameters
pub fn create(name: &str) -> BufferResult<Box<dyn DumpPolicy>> {
    let policy: Box<dyn DumpPolicy> = match name {
        "never" => Box::new(NeverDump),
        "always" => Box::new(AlwaysDump),
        "barrier" => Box::new(BarrierDump::default()),
        "valve" => Box::new(ValveDump::new()),
        other => return Err(BufferError::UnknownPolicy(other.to_string())),
    };
    Ok(policy)
}

/// Build a policy and apply `params` in order, failing on the first rejected one
pub fn create_with_params<'a>(name: &str, params: impl IntoIterator<Item = (&'a str, &'a str)>) -> BufferResult<Box<dyn DumpPolicy>> {
    let mut policy = create(name)?;
    for (key, value) in params {
        if !policy.set_param(key, value) {
            return Err(BufferError::InvalidParameter {
                name: key.to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(policy)
}

/// Parse a size parameter; negative or malformed values are rejected
pub(crate) fn parse_size(value: &str) -> Option<u64> {
    value.parse::<ByteSize>().ok().map(ByteSize::bytes)
}
