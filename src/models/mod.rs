//! Core data models for chainback
//!
//! Backup entries, their identifiers and the file manifests used for change
//! detection.

pub mod entry;
pub mod ids;
pub mod manifest;

pub use entry::{BackupEntry, BackupKind};
pub use ids::BackupId;
pub use manifest::{manifest_key, FileStat, Manifest};
