//! Custom error types for chainback
//!
//! This module defines the error hierarchy for the application using thiserror
//! for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for chainback operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors (disk full, permission denied on write, ...)
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Index storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed user input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Dangling parent, disagreeing order or other chain damage
    #[error("Corrupt chain: {0}")]
    CorruptChain(String),

    /// Identifier already present in the index
    #[error("Identifier collision: {0}")]
    IdentifierCollision(String),

    /// Removing the entry would orphan incrementals built on it
    #[error("Backup {id} has dependent backups: {}", .dependents.join(", "))]
    DependentBackupsExist { id: String, dependents: Vec<String> },

    /// Restore destination already has content
    #[error("Destination is not empty: {}", .0.display())]
    DestinationNotEmpty(PathBuf),

    /// Another process holds the index lock
    #[error("Backup root is busy (lock held): {}", .0.display())]
    BackupBusy(PathBuf),

    /// Some files were unreadable but the threshold was not exceeded
    #[error("{unreadable} unreadable file(s) skipped in {}", .path.display())]
    PartialWalkFailure { path: PathBuf, unreadable: usize },

    /// More files were unreadable than the configured threshold allows
    #[error("{unreadable} unreadable file(s) in {} exceeds threshold of {threshold}", .path.display())]
    TooManyUnreadable {
        path: PathBuf,
        unreadable: usize,
        threshold: usize,
    },

    /// Artifact bytes do not match the recorded checksum
    #[error("Checksum mismatch for backup {id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    /// Operation aborted through its cancel token
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl BackupError {
    /// Create a "not found" error for backups
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for source directories
    pub fn source_not_found(path: &std::path::Path) -> Self {
        Self::NotFound {
            entity_type: "Source directory",
            identifier: path.display().to_string(),
        }
    }

    /// Create a "not found" error for artifacts
    pub fn artifact_not_found(path: &std::path::Path) -> Self {
        Self::NotFound {
            entity_type: "Artifact",
            identifier: path.display().to_string(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error means the index itself can no longer be trusted
    pub fn is_index_fatal(&self) -> bool {
        matches!(self, Self::CorruptChain(_) | Self::IdentifierCollision(_))
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidArgument(_) => 2,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<walkdir::Error> for BackupError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias for chainback operations
pub type BackupResult<T> = Result<T, BackupError>;
