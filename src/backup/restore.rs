//! Backup restoration for chainback
//!
//! Rebuilds the state of a source directory as of a given backup by
//! replaying its chain, oldest first, into a destination directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::paths::BackupPaths;
use crate::error::{BackupError, BackupResult};
use crate::models::BackupId;
use crate::storage::BackupIndex;

use super::archive;

/// Summary of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub target: PathBuf,
    pub entries_applied: usize,
    pub files_written: usize,
    pub files_removed: usize,
}

impl RestoreReport {
    /// Get a summary string
    pub fn summary(&self) -> String {
        format!(
            "{} backup(s) applied, {} file(s) written, {} removed",
            self.entries_applied, self.files_written, self.files_removed
        )
    }
}

/// Handles restoring from backup chains
pub struct RestoreManager {
    paths: BackupPaths,
}

impl RestoreManager {
    /// Create a new RestoreManager
    pub fn new(paths: BackupPaths) -> Self {
        Self { paths }
    }

    /// Where a restore lands when no destination is given
    pub fn default_destination(id: BackupId) -> PathBuf {
        PathBuf::from(format!("restore-{}", id))
    }

    /// Restore backup `id` into `dest`
    ///
    /// Every artifact of the chain is checked before the destination is
    /// touched. A non-empty destination is refused unless `overwrite` is set;
    /// files in it that no backup mentions are left alone.
    pub fn restore(&self, id: BackupId, dest: &Path, overwrite: bool) -> BackupResult<RestoreReport> {
        let index = BackupIndex::load(self.paths.index_file())?;
        let ancestry = index.resolve_ancestry(id)?;

        for entry in &ancestry {
            let path = self.paths.artifact_path(&entry.artifact);
            archive::verify_artifact(entry.id, &path, &entry.checksum)?;
        }
        tracing::debug!("Verified {} artifact(s) for {}", ancestry.len(), id);

        prepare_destination(dest, overwrite)?;

        let mut report = RestoreReport {
            target: dest.to_path_buf(),
            entries_applied: 0,
            files_written: 0,
            files_removed: 0,
        };

        for entry in &ancestry {
            for key in &entry.deleted {
                if remove_restored(dest, key)? {
                    tracing::debug!("removed {}", key);
                    report.files_removed += 1;
                }
            }

            let path = self.paths.artifact_path(&entry.artifact);
            let written = archive::extract_into(&path, dest)?;
            tracing::debug!("Applied {} {} ({} files)", entry.kind, entry.id, written);

            report.files_written += written;
            report.entries_applied += 1;
        }

        tracing::info!("Restored {} into {}", id, dest.display());
        Ok(report)
    }
}

fn prepare_destination(dest: &Path, overwrite: bool) -> BackupResult<()> {
    match fs::read_dir(dest) {
        Ok(mut entries) => {
            if entries.next().is_some() && !overwrite {
                return Err(BackupError::DestinationNotEmpty(dest.to_path_buf()));
            }
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(dest).map_err(|e| {
            BackupError::Io(format!("Failed to create {}: {}", dest.display(), e))
        }),
        Err(e) => Err(BackupError::Io(format!(
            "Cannot use {} as restore destination: {}",
            dest.display(),
            e
        ))),
    }
}

/// Remove a path recorded as deleted; returns whether anything was there
fn remove_restored(dest: &Path, key: &str) -> BackupResult<bool> {
    let path = dest.join(key);
    let metadata = match fs::symlink_metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(BackupError::Io(format!(
                "Failed to inspect {}: {}",
                path.display(),
                e
            )))
        }
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(&path)
    } else {
        fs::remove_file(&path)
    };
    removed.map_err(|e| BackupError::Io(format!("Failed to remove {}: {}", path.display(), e)))?;

    // Drop directories the deletion left empty.
    let mut parent = path.parent();
    while let Some(dir) = parent {
        if dir == dest || !dir.starts_with(dest) || fs::remove_dir(dir).is_err() {
            break;
        }
        parent = dir.parent();
    }

    Ok(true)
}
