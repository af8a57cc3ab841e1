//! chainback - incremental directory backups
//!
//! This library provides the core functionality for the chainback backup
//! tool. Every backed-up directory gets a chain: one full backup followed by
//! incrementals holding only what changed since the previous backup.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Backup root resolution and settings
//! - `error`: Custom error types
//! - `models`: Backup entries, identifiers and file manifests
//! - `storage`: Atomic JSON storage, the backup index and its lock
//! - `backup`: Change detection, archives, chain management and restore
//! - `cli`: Command handlers
//! - `display`: Terminal output formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use chainback::config::{paths::BackupPaths, settings::Settings};
//!
//! let paths = BackupPaths::resolve(None)?;
//! let settings = Settings::load_or_default(&paths)?;
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod models;
pub mod storage;

pub use error::BackupError;
