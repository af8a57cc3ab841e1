//! Configuration module for chainback
//!
//! This module provides configuration management including:
//! - Backup root resolution
//! - Settings persistence (symlink policy, thresholds, lock timeout)

pub mod paths;
pub mod settings;

pub use paths::BackupPaths;
pub use settings::{Settings, SymlinkPolicy};
