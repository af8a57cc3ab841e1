//! File manifests
//!
//! A manifest records, for every regular file of a source directory, the
//! size and modification time seen at backup time. Keys are relative paths
//! with `/` separators so the index stays portable.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Component, Path};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Size and modification time of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mtime_secs: i64,
    #[serde(default)]
    pub mtime_nanos: u32,
}

impl FileStat {
    /// Capture size and mtime from filesystem metadata
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let (mtime_secs, mtime_nanos) = match metadata.modified() {
            Ok(time) => split_mtime(time),
            Err(_) => (0, 0),
        };

        Self {
            size: metadata.len(),
            mtime_secs,
            mtime_nanos,
        }
    }
}

/// Seconds (floored) and non-negative nanoseconds relative to the epoch
fn split_mtime(time: SystemTime) -> (i64, u32) {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => (after.as_secs() as i64, after.subsec_nanos()),
        Err(before) => {
            let d = before.duration();
            let secs = -(d.as_secs() as i64);
            match d.subsec_nanos() {
                0 => (secs, 0),
                nanos => (secs - 1, 1_000_000_000 - nanos),
            }
        }
    }
}

/// Relative path → stat for a whole source tree
pub type Manifest = BTreeMap<String, FileStat>;

/// Convert a path relative to a source root into a manifest key
///
/// Returns `None` for paths that are not valid UTF-8 or that contain
/// anything but normal components.
pub fn manifest_key(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
