//! Change detection
//!
//! Walks a source directory and compares every regular file against the
//! manifest of the chain head. Only size and modification time are compared;
//! directory timestamps are never used as a shortcut.
//!
//! The walk itself is a lazy iterator of [`WalkItem`]s. Files that cannot be
//! read come through as tagged failures rather than aborting the walk, and
//! [`detect_changes`] decides when there are too many of them.

use std::fs::File;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::settings::{Settings, SymlinkPolicy};
use crate::error::{BackupError, BackupResult};
use crate::models::{manifest_key, FileStat, Manifest};

use super::cancel::CancelToken;

/// A readable regular file found by the walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Manifest key (relative, `/`-separated)
    pub key: String,
    pub stat: FileStat,
}

/// A path the walk could not read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableFile {
    pub path: PathBuf,
    /// Manifest key when the path lies inside the source
    pub key: Option<String>,
    pub reason: String,
}

/// One result of walking a source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkItem {
    File(FileRecord),
    Unreadable(UnreadableFile),
}

/// Walk behaviour derived from settings
#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub symlink_policy: SymlinkPolicy,
    pub max_unreadable: usize,
    /// Subtree never backed up (the backup root when it sits inside a source)
    pub exclude: Option<PathBuf>,
}

impl DetectOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            symlink_policy: settings.symlink_policy,
            max_unreadable: settings.max_unreadable_files,
            exclude: None,
        }
    }

    pub fn excluding(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude = Some(path.into());
        self
    }
}

/// Lazy walk over the regular files of a source directory
pub struct SourceWalk {
    root: PathBuf,
    inner: walkdir::IntoIter,
    policy: SymlinkPolicy,
    exclude: Option<PathBuf>,
}

impl SourceWalk {
    pub fn new(root: &Path, options: &DetectOptions) -> Self {
        let inner = WalkDir::new(root)
            .follow_links(options.symlink_policy == SymlinkPolicy::Follow)
            .sort_by_file_name()
            .into_iter();

        Self {
            root: root.to_path_buf(),
            inner,
            policy: options.symlink_policy,
            exclude: options.exclude.clone(),
        }
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root).ok().and_then(manifest_key)
    }

    fn unreadable(&self, path: PathBuf, reason: String) -> WalkItem {
        let key = self.key_for(&path);
        WalkItem::Unreadable(UnreadableFile { path, key, reason })
    }
}

impl Iterator for SourceWalk {
    type Item = WalkItem;

    fn next(&mut self) -> Option<WalkItem> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    return Some(self.unreadable(path, err.to_string()));
                }
            };

            let path = entry.path();

            if let Some(exclude) = &self.exclude {
                if path.starts_with(exclude) {
                    if entry.file_type().is_dir() {
                        self.inner.skip_current_dir();
                    }
                    continue;
                }
            }

            if entry.path_is_symlink() && self.policy == SymlinkPolicy::Skip {
                tracing::debug!("skipped symlink {}", path.display());
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            let key = match self.key_for(path) {
                Some(key) => key,
                None => {
                    return Some(self.unreadable(
                        path.to_path_buf(),
                        "path is not valid UTF-8".to_string(),
                    ))
                }
            };

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => return Some(self.unreadable(path.to_path_buf(), err.to_string())),
            };

            if let Err(err) = File::open(path) {
                return Some(self.unreadable(path.to_path_buf(), err.to_string()));
            }

            return Some(WalkItem::File(FileRecord {
                key,
                stat: FileStat::from_metadata(&metadata),
            }));
        }
    }
}

/// Classified differences between a source and its prior manifest
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
    /// Snapshot to store with the new backup
    pub manifest: Manifest,
    pub unreadable: Vec<UnreadableFile>,
}

impl ChangeSet {
    /// Files whose content goes into the archive, sorted
    pub fn files_to_archive(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .added
            .iter()
            .chain(self.modified.iter())
            .cloned()
            .collect();
        files.sort();
        files
    }

    /// Whether nothing changed since the prior manifest
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Compare `source` against `prior` (none for a first backup)
pub fn detect_changes(
    source: &Path,
    prior: Option<&Manifest>,
    options: &DetectOptions,
    cancel: &CancelToken,
) -> BackupResult<ChangeSet> {
    if !source.is_dir() {
        return Err(BackupError::source_not_found(source));
    }

    let empty = Manifest::new();
    let prior = prior.unwrap_or(&empty);
    let mut changes = ChangeSet::default();

    for item in SourceWalk::new(source, options) {
        cancel.check(&format!("walking {}", source.display()))?;

        match item {
            WalkItem::File(record) => {
                match prior.get(&record.key) {
                    None => {
                        tracing::debug!("added {}", record.key);
                        changes.added.push(record.key.clone());
                    }
                    Some(previous) if *previous != record.stat => {
                        tracing::debug!("modified {}", record.key);
                        changes.modified.push(record.key.clone());
                    }
                    Some(_) => changes.unchanged += 1,
                }
                changes.manifest.insert(record.key, record.stat);
            }
            WalkItem::Unreadable(file) => {
                tracing::warn!("unreadable {}: {}", file.path.display(), file.reason);
                changes.unreadable.push(file);
                if changes.unreadable.len() > options.max_unreadable {
                    return Err(BackupError::TooManyUnreadable {
                        path: source.to_path_buf(),
                        unreadable: changes.unreadable.len(),
                        threshold: options.max_unreadable,
                    });
                }
            }
        }
    }

    // Whatever could not be read keeps its previous stat so it is neither
    // reported as deleted nor lost from the next delta.
    for file in &changes.unreadable {
        let Some(key) = &file.key else { continue };
        let prefix = format!("{}/", key);
        for (path, stat) in prior.range(key.clone()..) {
            if path != key && !path.starts_with(&prefix) {
                if path.as_str() > prefix.as_str() {
                    break;
                }
                continue;
            }
            changes.manifest.entry(path.clone()).or_insert(*stat);
        }
    }

    for path in prior.keys() {
        if !changes.manifest.contains_key(path) {
            tracing::debug!("deleted {}", path);
            changes.deleted.push(path.clone());
        }
    }

    Ok(changes)
}
