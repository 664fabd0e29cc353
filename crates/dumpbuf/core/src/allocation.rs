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

// Allocation policies used by the buffer manager to obtain, resize and release
// the memory backing a managed buffer.

use std::fmt;
use std::sync::Arc;

use crate::common::{BufferError, BufferResult};

/// Strategy used to (re)allocate the resident memory of a buffer
pub trait AllocationPolicy: Send + Sync + fmt::Debug {
    /// Allocate `size` bytes
    fn allocate(&self, size: usize) -> BufferResult<Vec<u8>>;

    /// Resize `buffer` to `new_size` bytes, keeping the common prefix
    fn reallocate(&self, buffer: &mut Vec<u8>, new_size: usize) -> BufferResult<()>;

    /// Release the memory held by `buffer`
    fn destroy(&self, buffer: &mut Option<Vec<u8>>) {
        *buffer = None;
    }

    /// Whether this policy can allocate memory on its own. Buffers whose memory
    /// cannot be allocated again are never dumped.
    fn can_allocate(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Zero-filled heap allocation that reports failures instead of aborting
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroedPolicy;

impl AllocationPolicy for ZeroedPolicy {
    fn allocate(&self, size: usize) -> BufferResult<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(size).map_err(|_| BufferError::Allocation { size })?;
        buffer.resize(size, 0);
        Ok(buffer)
    }

    fn reallocate(&self, buffer: &mut Vec<u8>, new_size: usize) -> BufferResult<()> {
        if new_size > buffer.len() {
            buffer.try_reserve_exact(new_size - buffer.len()).map_err(|_| BufferError::Allocation { size: new_size })?;
        }
        buffer.resize(new_size, 0);
        buffer.shrink_to_fit();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "zeroed"
    }
}

/// Policy for caller provided memory the manager must never (re)allocate
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAllocPolicy;

impl AllocationPolicy for NoAllocPolicy {
    fn allocate(&self, _size: usize) -> BufferResult<Vec<u8>> {
        Err(BufferError::AllocationUnsupported(self.name()))
    }

    fn reallocate(&self, _buffer: &mut Vec<u8>, _new_size: usize) -> BufferResult<()> {
        Err(BufferError::AllocationUnsupported(self.name()))
    }

    fn can_allocate(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "no-alloc"
    }
}

/// Shared handle on an allocation policy
pub type SharedAllocationPolicy = Arc<dyn AllocationPolicy>;

/// The policy used when none is given
pub fn default_policy() -> SharedAllocationPolicy {
    Arc::new(ZeroedPolicy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_allocation() {
        let policy = ZeroedPolicy;
        let buffer = policy.allocate(16).unwrap();
        assert_eq!(buffer.len(), 16);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zeroed_reallocation_keeps_prefix() {
        let policy = ZeroedPolicy;
        let mut buffer = vec![1, 2, 3, 4];

        policy.reallocate(&mut buffer, 6).unwrap();
        assert_eq!(buffer, vec![1, 2, 3, 4, 0, 0]);

        policy.reallocate(&mut buffer, 2).unwrap();
        assert_eq!(buffer, vec![1, 2]);
    }

    #[test]
    fn test_zeroed_allocation_failure_is_reported() {
        let policy = ZeroedPolicy;
        let size = usize::MAX;
        match policy.allocate(size) {
            Err(BufferError::Allocation { size: failed }) => assert_eq!(failed, size),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_no_alloc_policy() {
        let policy = NoAllocPolicy;
        assert!(!policy.can_allocate());
        assert!(matches!(policy.allocate(4), Err(BufferError::AllocationUnsupported("no-alloc"))));

        let mut buffer = vec![1u8; 4];
        assert!(policy.reallocate(&mut buffer, 8).is_err());

        let mut held = Some(buffer);
        policy.destroy(&mut held);
        assert!(held.is_none());
    }
}
