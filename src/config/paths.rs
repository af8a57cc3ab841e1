//! Path management for chainback
//!
//! Everything chainback persists lives under a single backup root.
//!
//! ## Path Resolution Order
//!
//! 1. Explicit `--output` directory (if given)
//! 2. `CHAINBACK_ROOT` environment variable (if set)
//! 3. `~/.backup`

use std::path::{Path, PathBuf};

use directories::BaseDirs;

use crate::error::BackupError;

/// Environment variable that overrides the default backup root
pub const ROOT_ENV_VAR: &str = "CHAINBACK_ROOT";

/// Manages all paths used by chainback
#[derive(Debug, Clone)]
pub struct BackupPaths {
    /// Backup root holding the index, the lock marker and all artifacts
    root: PathBuf,
}

impl BackupPaths {
    /// Resolve the backup root
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined and no
    /// override was given, or if the current directory is unavailable for a
    /// relative root.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, BackupError> {
        let root = match explicit {
            Some(dir) => dir,
            None => match std::env::var_os(ROOT_ENV_VAR) {
                Some(custom) if !custom.is_empty() => PathBuf::from(custom),
                _ => resolve_default_root()?,
            },
        };

        Ok(Self {
            root: make_absolute(&root)?,
        })
    }

    /// Create BackupPaths with a custom root (useful for testing)
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the backup root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `<id>.tar.gz` artifacts
    pub fn archives_dir(&self) -> PathBuf {
        self.root.join("archives")
    }

    /// Path of a named artifact
    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.archives_dir().join(file_name)
    }

    /// Get the path to the persisted index
    pub fn index_file(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Get the path to the optional settings file
    pub fn settings_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Get the path to the cross-process lock marker
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Ensure the root and archive directories exist
    pub fn ensure_directories(&self) -> Result<(), BackupError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| BackupError::Io(format!("Failed to create backup root: {}", e)))?;

        std::fs::create_dir_all(self.archives_dir())
            .map_err(|e| BackupError::Io(format!("Failed to create archive directory: {}", e)))?;

        Ok(())
    }
}

fn resolve_default_root() -> Result<PathBuf, BackupError> {
    let dirs = BaseDirs::new()
        .ok_or_else(|| BackupError::Config("Could not determine home directory".into()))?;
    Ok(dirs.home_dir().join(".backup"))
}

fn make_absolute(path: &Path) -> Result<PathBuf, BackupError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| BackupError::Config(format!("Could not determine current directory: {}", e)))?;
    Ok(cwd.join(path))
}
