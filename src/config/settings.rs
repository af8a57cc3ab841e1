//! User settings for chainback
//!
//! Settings live in `config.json` inside the backup root. Every field has a
//! default, so a missing file or a partial file is always valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::BackupPaths;
use crate::error::BackupError;
use crate::storage::file_io::write_json_atomic;

/// How symbolic links found during a walk are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Ignore links entirely (default)
    #[default]
    Skip,
    /// Dereference links and back up the target's content under the link path
    Follow,
}

/// User settings for chainback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Symbolic link handling during the walk
    #[serde(default)]
    pub symlink_policy: SymlinkPolicy,

    /// Unreadable files tolerated per source before the backup fails
    #[serde(default = "default_max_unreadable_files")]
    pub max_unreadable_files: usize,

    /// How long a mutating command waits for the index lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Number of sources processed concurrently by `create`
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_schema_version() -> u32 {
    1
}

fn default_max_unreadable_files() -> usize {
    16
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_parallelism() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            symlink_policy: SymlinkPolicy::default(),
            max_unreadable_files: default_max_unreadable_files(),
            lock_timeout_ms: default_lock_timeout_ms(),
            parallelism: default_parallelism(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or fall back to defaults if the file doesn't exist
    pub fn load_or_default(paths: &BackupPaths) -> Result<Self, BackupError> {
        let settings_path = paths.settings_file();

        if !settings_path.exists() {
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(&settings_path)
            .map_err(|e| BackupError::Io(format!("Failed to read settings file: {}", e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| BackupError::Config(format!("Failed to parse settings file: {}", e)))
    }

    /// Save settings to disk
    pub fn save(&self, paths: &BackupPaths) -> Result<(), BackupError> {
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }

    /// Lock wait as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Worker count for `create`, never zero
    pub fn worker_count(&self) -> usize {
        self.parallelism.max(1)
    }
}
