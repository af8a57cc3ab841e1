//! Backup index
//!
//! The index is the single registry of backup entries. It is loaded once per
//! invocation, mutated in memory through `&mut self` and written back with
//! [`write_json_atomic`] at the end of a mutating command, so a crash never
//! leaves a half-written index behind.
//!
//! Entries sharing a source path form a chain: one full backup followed by
//! incrementals, each pointing at its predecessor. The derived head map
//! points every source at the newest entry of its chain.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};
use crate::models::{BackupEntry, BackupId, BackupKind};

use super::file_io::{read_json, write_json_atomic};

/// Current on-disk index version
pub const INDEX_VERSION: u32 = 1;

/// Attempts at drawing an unused identifier before giving up
pub const MAX_ID_ATTEMPTS: usize = 8;

/// Serializable index file structure
#[derive(Debug, Default, Deserialize)]
struct IndexFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: Vec<BackupEntry>,
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    version: u32,
    entries: Vec<&'a BackupEntry>,
}

/// The ordered entries of one source directory
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    pub source: &'a Path,
    /// Oldest (the full backup) first
    pub entries: Vec<&'a BackupEntry>,
}

/// Persistent registry of backup entries
#[derive(Debug)]
pub struct BackupIndex {
    path: PathBuf,
    entries: BTreeMap<BackupId, BackupEntry>,
    heads: HashMap<PathBuf, BackupId>,
}

impl BackupIndex {
    /// Create an empty index that will persist to `path`
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            entries: BTreeMap::new(),
            heads: HashMap::new(),
        }
    }

    /// Load the index from disk; a missing file is an empty index
    pub fn load(path: PathBuf) -> BackupResult<Self> {
        let file: IndexFile = read_json(&path)?;

        if file.version > INDEX_VERSION {
            tracing::warn!(
                "Index {} was written by a newer version (v{}); unknown fields are ignored",
                path.display(),
                file.version
            );
        }

        let mut index = Self::empty(path);
        for entry in file.entries {
            let id = entry.id;
            if index.entries.insert(id, entry).is_some() {
                return Err(BackupError::CorruptChain(format!(
                    "identifier {} appears more than once in the index",
                    id
                )));
            }
        }
        index.rebuild_heads();

        tracing::debug!(
            "Loaded {} entries from {}",
            index.entries.len(),
            index.path.display()
        );
        Ok(index)
    }

    /// Write the whole index atomically
    pub fn persist(&self) -> BackupResult<()> {
        let mut entries: Vec<&BackupEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        write_json_atomic(
            &self.path,
            &IndexFileRef {
                version: INDEX_VERSION,
                entries,
            },
        )?;

        tracing::debug!("Persisted index {}", self.path.display());
        Ok(())
    }

    /// Location of the index file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get an entry by ID
    pub fn get(&self, id: BackupId) -> Option<&BackupEntry> {
        self.entries.get(&id)
    }

    /// Check if an entry exists
    pub fn contains(&self, id: BackupId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Newest entry of the chain for `source`
    pub fn head(&self, source: &Path) -> Option<&BackupEntry> {
        self.heads.get(source).and_then(|id| self.entries.get(id))
    }

    /// All source paths with a chain, sorted
    pub fn sources(&self) -> Vec<&Path> {
        let mut sources: Vec<&Path> = self.heads.keys().map(PathBuf::as_path).collect();
        sources.sort();
        sources
    }

    /// Artifact file names referenced by any entry
    pub fn artifact_names(&self) -> HashSet<&str> {
        self.entries.values().map(|e| e.artifact.as_str()).collect()
    }

    /// Draw an identifier that is neither in the index nor in `reserved`
    pub fn allocate_id(&self, reserved: &HashSet<BackupId>) -> BackupResult<BackupId> {
        self.allocate_id_with(reserved, BackupId::generate)
    }

    /// [`allocate_id`](Self::allocate_id) with a custom generator
    pub fn allocate_id_with<F>(
        &self,
        reserved: &HashSet<BackupId>,
        mut generate: F,
    ) -> BackupResult<BackupId>
    where
        F: FnMut() -> BackupId,
    {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let candidate = generate();
            if !self.contains(candidate) && !reserved.contains(&candidate) {
                return Ok(candidate);
            }
            tracing::debug!("Identifier {} already taken (attempt {})", candidate, attempt);
        }

        Err(BackupError::IdentifierCollision(format!(
            "no free identifier after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }

    /// Record a new entry and make it the head of its chain
    pub fn insert(&mut self, entry: BackupEntry) -> BackupResult<()> {
        if self.contains(entry.id) {
            return Err(BackupError::IdentifierCollision(entry.id.to_string()));
        }

        match entry.kind {
            BackupKind::Full => {
                if entry.parent.is_some() {
                    return Err(BackupError::CorruptChain(format!(
                        "full backup {} must not have a parent",
                        entry.id
                    )));
                }
                if let Some(existing) = self.heads.get(&entry.source) {
                    return Err(BackupError::CorruptChain(format!(
                        "{} already has a chain (head {})",
                        entry.source.display(),
                        existing
                    )));
                }
            }
            BackupKind::Incremental => {
                let parent_id = entry.parent.ok_or_else(|| {
                    BackupError::CorruptChain(format!(
                        "incremental backup {} has no parent",
                        entry.id
                    ))
                })?;
                let parent = self.get(parent_id).ok_or_else(|| {
                    BackupError::CorruptChain(format!(
                        "parent {} of {} does not exist",
                        parent_id, entry.id
                    ))
                })?;
                if parent.source != entry.source {
                    return Err(BackupError::CorruptChain(format!(
                        "parent {} belongs to {}, not {}",
                        parent_id,
                        parent.source.display(),
                        entry.source.display()
                    )));
                }
                if self.heads.get(&entry.source) != Some(&parent_id) {
                    return Err(BackupError::CorruptChain(format!(
                        "parent {} is not the head of the chain for {}",
                        parent_id,
                        entry.source.display()
                    )));
                }
                if entry.created_at <= parent.created_at {
                    return Err(BackupError::CorruptChain(format!(
                        "{} is not newer than its parent {}",
                        entry.id, parent_id
                    )));
                }
            }
        }

        self.heads.insert(entry.source.clone(), entry.id);
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    /// Ordered chain for `source`; empty if there is none
    ///
    /// Timestamp order and parent linkage must agree, otherwise the chain is
    /// reported as corrupt.
    pub fn lookup_chain(&self, source: &Path) -> BackupResult<Vec<&BackupEntry>> {
        let mut chain: Vec<&BackupEntry> = self
            .entries
            .values()
            .filter(|e| e.source == source)
            .collect();
        chain.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut previous: Option<&BackupEntry> = None;
        for entry in chain.iter().copied() {
            match previous {
                None => {
                    if entry.kind != BackupKind::Full || entry.parent.is_some() {
                        return Err(BackupError::CorruptChain(format!(
                            "oldest backup {} of {} is not a full backup",
                            entry.id,
                            source.display()
                        )));
                    }
                }
                Some(prev) => {
                    if entry.kind != BackupKind::Incremental {
                        return Err(BackupError::CorruptChain(format!(
                            "{} has a second full backup {}",
                            source.display(),
                            entry.id
                        )));
                    }
                    if entry.parent != Some(prev.id) {
                        return Err(BackupError::CorruptChain(format!(
                            "timestamp order puts {} after {} but its parent is {}",
                            entry.id,
                            prev.id,
                            entry
                                .parent
                                .map(|p| p.to_string())
                                .unwrap_or_else(|| "missing".into())
                        )));
                    }
                    if entry.created_at <= prev.created_at {
                        return Err(BackupError::CorruptChain(format!(
                            "{} and {} share a timestamp",
                            prev.id, entry.id
                        )));
                    }
                }
            }
            previous = Some(entry);
        }

        Ok(chain)
    }

    /// Every chain in the index, sorted by source path
    pub fn chains(&self) -> BackupResult<Vec<Chain<'_>>> {
        let mut chains = Vec::new();
        for source in self.sources() {
            chains.push(Chain {
                source,
                entries: self.lookup_chain(source)?,
            });
        }
        Ok(chains)
    }

    /// Entries from the chain's full backup up to and including `id`
    pub fn resolve_ancestry(&self, id: BackupId) -> BackupResult<Vec<&BackupEntry>> {
        let mut current = self
            .get(id)
            .ok_or_else(|| BackupError::backup_not_found(id.to_string()))?;

        let mut visited = HashSet::new();
        let mut ancestry = Vec::new();

        loop {
            visited.insert(current.id);
            ancestry.push(current);

            match current.kind {
                BackupKind::Full => {
                    if current.parent.is_some() {
                        return Err(BackupError::CorruptChain(format!(
                            "full backup {} has a parent",
                            current.id
                        )));
                    }
                    break;
                }
                BackupKind::Incremental => {
                    let parent_id = current.parent.ok_or_else(|| {
                        BackupError::CorruptChain(format!(
                            "incremental backup {} has no parent",
                            current.id
                        ))
                    })?;
                    if visited.contains(&parent_id) {
                        return Err(BackupError::CorruptChain(format!(
                            "parent loop through {}",
                            parent_id
                        )));
                    }
                    let parent = self.get(parent_id).ok_or_else(|| {
                        BackupError::CorruptChain(format!(
                            "{} references missing parent {}",
                            current.id, parent_id
                        ))
                    })?;
                    if parent.source != current.source {
                        return Err(BackupError::CorruptChain(format!(
                            "{} and its parent {} back up different sources",
                            current.id, parent_id
                        )));
                    }
                    if parent.created_at >= current.created_at {
                        return Err(BackupError::CorruptChain(format!(
                            "parent {} is not older than {}",
                            parent_id, current.id
                        )));
                    }
                    current = parent;
                }
            }
        }

        ancestry.reverse();
        Ok(ancestry)
    }

    /// Entries whose parent is `id`
    pub fn dependents(&self, id: BackupId) -> Vec<BackupId> {
        self.entries
            .values()
            .filter(|e| e.parent == Some(id))
            .map(|e| e.id)
            .collect()
    }

    /// Remove an entry, or with `cascade` its whole chain
    ///
    /// Without `cascade` an entry that other backups build on is refused and
    /// the index is left untouched. Returns the removed entries, oldest first.
    pub fn remove(&mut self, id: BackupId, cascade: bool) -> BackupResult<Vec<BackupEntry>> {
        let entry = self
            .get(id)
            .ok_or_else(|| BackupError::backup_not_found(id.to_string()))?;
        let source = entry.source.clone();
        let parent = entry.parent;

        if cascade {
            let ids: Vec<BackupId> = self
                .entries
                .values()
                .filter(|e| e.source == source)
                .map(|e| e.id)
                .collect();
            let mut removed: Vec<BackupEntry> = ids
                .into_iter()
                .filter_map(|id| self.entries.remove(&id))
                .collect();
            removed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            self.heads.remove(&source);
            return Ok(removed);
        }

        let dependents = self.dependents(id);
        if !dependents.is_empty() {
            return Err(BackupError::DependentBackupsExist {
                id: id.to_string(),
                dependents: dependents.iter().map(|d| d.to_string()).collect(),
            });
        }

        let removed = match self.entries.remove(&id) {
            Some(entry) => entry,
            None => return Err(BackupError::backup_not_found(id.to_string())),
        };

        if self.heads.get(&source) == Some(&id) {
            match parent.filter(|p| self.entries.contains_key(p)) {
                Some(parent) => {
                    self.heads.insert(source, parent);
                }
                None => {
                    self.heads.remove(&source);
                }
            }
        }

        Ok(vec![removed])
    }

    fn rebuild_heads(&mut self) {
        self.heads.clear();
        for entry in self.entries.values() {
            let newer = match self.heads.get(&entry.source) {
                Some(current) => {
                    let current = &self.entries[current];
                    (entry.created_at, entry.id) > (current.created_at, current.id)
                }
                None => true,
            };
            if newer {
                self.heads.insert(entry.source.clone(), entry.id);
            }
        }
    }
}
