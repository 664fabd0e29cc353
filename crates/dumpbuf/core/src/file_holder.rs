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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;

#[derive(Debug)]
enum HeldFile {
    /// Deleted when the last holder is dropped
    AutoDelete(TempPath),
    /// Left untouched on disk
    Keep(PathBuf),
}

/// Shared handle on a file backing a buffer
///
/// Clones share the same file. When the file was created by the buffer manager
/// (or declared as auto-delete) it is removed once the last clone is dropped.
#[derive(Debug, Clone, Default)]
pub struct FileHolder {
    inner: Option<Arc<HeldFile>>,
}

impl FileHolder {
    pub fn new(path: impl Into<PathBuf>, auto_delete: bool) -> Self {
        let path = path.into();
        let held = if auto_delete { HeldFile::AutoDelete(TempPath::from_path(path)) } else { HeldFile::Keep(path) };
        Self { inner: Some(Arc::new(held)) }
    }

    pub fn from_temp_path(path: TempPath) -> Self {
        Self {
            inner: Some(Arc::new(HeldFile::AutoDelete(path))),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.as_deref().map(|held| match held {
            HeldFile::AutoDelete(path) => path.as_ref(),
            HeldFile::Keep(path) => path.as_path(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub fn auto_delete(&self) -> bool {
        matches!(self.inner.as_deref(), Some(HeldFile::AutoDelete(_)))
    }

    /// Release this handle on the file
    pub fn clear(&mut self) {
        self.inner = None;
    }
}
