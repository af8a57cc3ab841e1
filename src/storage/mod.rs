//! Storage layer for chainback
//!
//! Provides JSON file storage with atomic writes, the backup index and the
//! cross-process lock that guards it.

pub mod file_io;
pub mod index;
pub mod lock;

pub use file_io::{read_json, write_json_atomic};
pub use index::{BackupIndex, Chain};
pub use lock::IndexLock;
