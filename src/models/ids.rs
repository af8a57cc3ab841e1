//! Short backup identifiers
//!
//! A backup is addressed by eight hex characters. The value is drawn from a
//! random v4 UUID; uniqueness is checked by the index before an id is
//! accepted, never assumed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BackupError;

/// Identifier of a single backup entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupId(u32);

impl BackupId {
    /// Number of characters in the textual form
    pub const LEN: usize = 8;

    /// Create a new random ID
    pub fn generate() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        Self(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Create an ID from its raw value
    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Parse an ID from user input
    pub fn parse(s: &str) -> Result<Self, BackupError> {
        let trimmed = s.trim();
        if trimmed.len() != Self::LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BackupError::InvalidArgument(format!(
                "'{}' is not a backup identifier (expected {} hex characters)",
                s,
                Self::LEN
            )));
        }
        u32::from_str_radix(trimmed, 16)
            .map(Self)
            .map_err(|e| BackupError::InvalidArgument(format!("'{}': {}", s, e)))
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl FromStr for BackupId {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BackupId {
    type Error = BackupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BackupId> for String {
    fn from(id: BackupId) -> Self {
        id.to_string()
    }
}
