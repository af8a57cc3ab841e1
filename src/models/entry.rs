//! Backup entry model
//!
//! One entry per successful `create` for a source directory. Entries are
//! immutable once recorded in the index.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::BackupId;
use super::manifest::Manifest;

/// Kind of backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Every file of the source at backup time
    Full,
    /// Only files added or modified since the chain head
    Incremental,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

/// A recorded backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Unique identifier
    pub id: BackupId,

    /// Canonical absolute path of the backed-up directory
    pub source: PathBuf,

    /// Full or incremental
    pub kind: BackupKind,

    /// Previous entry of the chain; `None` for a full backup
    #[serde(default)]
    pub parent: Option<BackupId>,

    /// When the backup was taken
    pub created_at: DateTime<Utc>,

    /// Artifact file name inside the archives directory
    pub artifact: String,

    /// Hex SHA-256 of the artifact bytes
    pub checksum: String,

    /// Artifact size in bytes
    #[serde(default)]
    pub size_bytes: u64,

    /// Number of files stored in the artifact
    #[serde(default)]
    pub file_count: usize,

    /// Complete snapshot of the source at backup time
    #[serde(default)]
    pub manifest: Manifest,

    /// Paths removed from the source since the parent entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::manifest::FileStat;

    fn sample_entry() -> BackupEntry {
        let mut manifest = Manifest::new();
        manifest.insert(
            "a.txt".into(),
            FileStat {
                size: 1,
                mtime_secs: 1_700_000_000,
                mtime_nanos: 5,
            },
        );
        BackupEntry {
            id: BackupId::from_raw(0x0102_0304),
            source: PathBuf::from("/tmp/src"),
            kind: BackupKind::Full,
            parent: None,
            created_at: Utc::now(),
            artifact: "01020304.tar.gz".into(),
            checksum: "00".repeat(32),
            size_bytes: 120,
            file_count: 1,
            manifest,
            deleted: Vec::new(),
        }
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&BackupKind::Incremental).unwrap(),
            "\"incremental\""
        );
        assert_eq!(BackupKind::Full.to_string(), "full");
    }

    #[test]
    fn test_entry_ignores_unknown_fields() {
        let entry = sample_entry();
        let mut value = serde_json::to_value(&entry).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("added_in_a_later_version".into(), serde_json::json!([1, 2]));

        let back: BackupEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, entry.id);
        assert_eq!(back.kind, BackupKind::Full);
        assert_eq!(back.manifest.len(), 1);
    }

    #[test]
    fn test_empty_deleted_list_is_omitted() {
        let json = serde_json::to_string(&sample_entry()).unwrap();
        assert!(!json.contains("\"deleted\""));
    }
}
