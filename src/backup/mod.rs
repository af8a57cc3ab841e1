//! Incremental backup engine
//!
//! # Architecture
//!
//! - `detector`: walks a source and classifies files against the chain head
//! - `archive`: writes and reads the `tar.gz` artifacts
//! - `BackupManager`: creates, lists, removes and verifies backups
//! - `RestoreManager`: replays a chain into a destination directory
//!
//! # Chains
//!
//! The first backup of a directory is a full backup holding every file.
//! Each later backup of the same directory is an incremental holding only
//! files added or modified since the previous one, plus the list of paths
//! that disappeared. Restoring backup N applies the full backup and every
//! incremental up to N in order.
//!
//! # Example
//!
//! ```rust,ignore
//! use chainback::backup::{BackupManager, CancelToken};
//!
//! let manager = BackupManager::new(paths, settings);
//! let report = manager.create(&[PathBuf::from("docs")], &CancelToken::none())?;
//! ```

pub mod archive;
pub mod cancel;
pub mod detector;
pub mod manager;
pub mod restore;

pub use cancel::{CancelHandle, CancelToken};
pub use manager::{
    BackupManager, BackupSummary, ChangeSummary, CreateReport, SourceOutcome, VerifyProblem,
    VerifyReport,
};
pub use restore::{RestoreManager, RestoreReport};
