//! Display formatting for terminal output
//!
//! Provides utilities for formatting backups and command results for
//! terminal display.

pub mod backup;

pub use backup::{
    format_backup_list, format_create_report, format_removed, format_restore_report,
    format_size, format_verify_report,
};
