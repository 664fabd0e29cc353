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

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::{BufferError, BufferResult, LoadingMode};
use crate::policy::{self, DumpPolicy};

/// Configuration for a buffer manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory dumped buffers are written to
    pub dump_dir: PathBuf,
    pub loading_mode: LoadingMode,
    pub policy: PolicyConfig,
    /// Name of the worker thread
    pub worker_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            dump_dir: std::env::temp_dir().join("dumpbuf"),
            loading_mode: LoadingMode::Lazy,
            policy: PolicyConfig::default(),
            worker_name: "buffer-manager".to_string(),
        }
    }
}

/// Dump policy selection and parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            name: "never".to_string(),
            params: BTreeMap::new(),
        }
    }
}

impl ManagerConfig {
    pub fn with_dump_dir(dump_dir: impl AsRef<Path>) -> Self {
        Self {
            dump_dir: dump_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> BufferResult<Self> {
        serde_json::from_str(json).map_err(|e| BufferError::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> BufferResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| BufferError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> BufferResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BufferError::Config(e.to_string()))
    }

    /// Instantiate the configured dump policy with its parameters
    pub fn build_policy(&self) -> BufferResult<Box<dyn DumpPolicy>> {
        policy::create_with_params(&self.policy.name, self.policy.params.iter().map(|(name, value)| (name.as_str(), value.as_str())))
    }
}
