//! Backup manager for chainback
//!
//! Decides between full and incremental backups, runs change detection and
//! archiving for every requested source, and records the results in the
//! index. Also implements listing, removal and verification.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::config::paths::BackupPaths;
use crate::config::settings::Settings;
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupEntry, BackupId, BackupKind, Manifest};
use crate::storage::{BackupIndex, IndexLock};

use super::archive::{self, ArchiveReport, PARTIAL_SUFFIX};
use super::cancel::CancelToken;
use super::detector::{self, ChangeSet, DetectOptions, UnreadableFile};

/// Counts of what changed in one source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ChangeSummary {
    fn from_changes(changes: &ChangeSet) -> Self {
        Self {
            added: changes.added.len(),
            modified: changes.modified.len(),
            deleted: changes.deleted.len(),
            unchanged: changes.unchanged,
        }
    }

    /// Whether nothing was added, modified or deleted
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.modified == 0 && self.deleted == 0
    }
}

/// Result of backing up one source
#[derive(Debug)]
pub enum SourceOutcome {
    /// Entry recorded, every file read
    Completed {
        entry: BackupEntry,
        changes: ChangeSummary,
    },
    /// Entry recorded, some files could not be read
    Partial {
        entry: BackupEntry,
        changes: ChangeSummary,
        unreadable: Vec<UnreadableFile>,
    },
    /// Nothing recorded for this source
    Failed { source: PathBuf, error: BackupError },
}

impl SourceOutcome {
    /// The recorded entry, if any
    pub fn entry(&self) -> Option<&BackupEntry> {
        match self {
            Self::Completed { entry, .. } | Self::Partial { entry, .. } => Some(entry),
            Self::Failed { .. } => None,
        }
    }
}

/// Per-source results of a `create` run, in argument order
#[derive(Debug, Default)]
pub struct CreateReport {
    pub outcomes: Vec<SourceOutcome>,
}

impl CreateReport {
    /// Number of sources with a recorded entry
    pub fn committed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.entry().is_some()).count()
    }

    /// Process exit code: 0 clean, 3 partial, 1 nothing recorded
    pub fn exit_code(&self) -> u8 {
        let committed = self.committed();
        if committed == 0 {
            return 1;
        }
        let clean = self
            .outcomes
            .iter()
            .all(|o| matches!(o, SourceOutcome::Completed { .. }));
        if clean {
            0
        } else {
            3
        }
    }
}

/// One row of `list`
#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub id: BackupId,
    pub kind: BackupKind,
    pub parent: Option<BackupId>,
    pub source: PathBuf,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    pub size_bytes: u64,
}

impl From<&BackupEntry> for BackupSummary {
    fn from(entry: &BackupEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            parent: entry.parent,
            source: entry.source.clone(),
            created_at: entry.created_at,
            file_count: entry.file_count,
            size_bytes: entry.size_bytes,
        }
    }
}

/// Something `verify` found wrong
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyProblem {
    /// A chain failed validation
    BrokenChain { source: PathBuf, reason: String },
    /// Indexed artifact is gone
    MissingArtifact { id: BackupId, path: PathBuf },
    /// Artifact bytes changed since the backup
    ChecksumMismatch {
        id: BackupId,
        expected: String,
        actual: String,
    },
    /// Artifact could not be read
    Unreadable { id: BackupId, reason: String },
    /// File in the archives directory that no entry references
    Orphan { path: PathBuf },
}

/// Outcome of `verify`
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub chains: usize,
    pub artifacts_checked: usize,
    pub problems: Vec<VerifyProblem>,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Work for one source, fixed before the parallel phase
struct Job {
    slot: usize,
    source: PathBuf,
    id: BackupId,
    parent: Option<BackupId>,
    prior: Option<Manifest>,
}

struct Prepared {
    changes: ChangeSet,
    archive: ArchiveReport,
}

/// Manages backup chains
pub struct BackupManager {
    paths: BackupPaths,
    settings: Settings,
}

impl BackupManager {
    /// Create a new BackupManager
    pub fn new(paths: BackupPaths, settings: Settings) -> Self {
        Self { paths, settings }
    }

    pub fn paths(&self) -> &BackupPaths {
        &self.paths
    }

    /// Back up every directory in `sources`
    ///
    /// Sources are processed independently: a failing source is reported in
    /// its outcome and never stops the others. Only problems with the index
    /// itself fail the whole call.
    pub fn create(&self, sources: &[PathBuf], cancel: &CancelToken) -> BackupResult<CreateReport> {
        if sources.is_empty() {
            return Err(BackupError::InvalidArgument(
                "at least one source directory is required".into(),
            ));
        }

        self.paths.ensure_directories()?;
        let _lock = IndexLock::acquire(&self.paths.lock_file(), self.settings.lock_timeout())?;
        if !self.paths.settings_file().exists() {
            self.settings.save(&self.paths)?;
        }
        let mut index = BackupIndex::load(self.paths.index_file())?;

        let mut slots: Vec<Option<SourceOutcome>> = Vec::with_capacity(sources.len());
        let mut pending: Vec<(usize, PathBuf)> = Vec::new();
        let mut seen = HashSet::new();

        for source in sources {
            match canonical_source(source) {
                Ok(canonical) => {
                    if !seen.insert(canonical.clone()) {
                        tracing::warn!("Skipping repeated source {}", canonical.display());
                        continue;
                    }
                    pending.push((slots.len(), canonical));
                    slots.push(None);
                }
                Err(error) => {
                    tracing::error!("{}", error);
                    slots.push(Some(SourceOutcome::Failed {
                        source: source.clone(),
                        error,
                    }));
                }
            }
        }

        let mut reserved = HashSet::new();
        let mut jobs = Vec::with_capacity(pending.len());
        for (slot, source) in pending {
            let chain = index.lookup_chain(&source)?;
            let head = chain.last().copied();
            let id = index.allocate_id(&reserved)?;
            reserved.insert(id);
            jobs.push(Job {
                slot,
                id,
                parent: head.map(|h| h.id),
                prior: head.map(|h| h.manifest.clone()),
                source,
            });
        }

        let options = DetectOptions::from_settings(&self.settings);
        let root = fs::canonicalize(self.paths.root())
            .unwrap_or_else(|_| self.paths.root().to_path_buf());
        let archives_dir = self.paths.archives_dir();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.worker_count())
            .build()
            .map_err(|e| BackupError::Config(format!("Failed to start worker pool: {}", e)))?;

        let results: Vec<BackupResult<Prepared>> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let options = if root.starts_with(&job.source) {
                        options.clone().excluding(root.clone())
                    } else {
                        options.clone()
                    };
                    prepare(job, &options, &archives_dir, cancel)
                })
                .collect()
        });

        // Any abort below must take every finished artifact with it, not only
        // the ones already committed to the index.
        let produced = produced_artifacts(&results);
        let mut committed = 0;

        for (job, result) in jobs.into_iter().zip(results) {
            let prepared = match result {
                Ok(prepared) => prepared,
                Err(error) if error.is_index_fatal() => {
                    discard_artifacts(&produced);
                    return Err(error);
                }
                Err(error) => {
                    tracing::error!("Backup of {} failed: {}", job.source.display(), error);
                    slots[job.slot] = Some(SourceOutcome::Failed {
                        source: job.source,
                        error,
                    });
                    continue;
                }
            };
            let entry = build_entry(&index, &job, &prepared);
            let summary = ChangeSummary::from_changes(&prepared.changes);

            if let Err(e) = index.insert(entry.clone()) {
                discard_artifacts(&produced);
                return Err(e);
            }
            committed += 1;

            if summary.is_empty() {
                tracing::info!(
                    "No files have been added or updated in {}",
                    entry.source.display()
                );
            }
            tracing::info!(
                "Created {} backup {} of {} ({} files)",
                entry.kind,
                entry.id,
                entry.source.display(),
                entry.file_count
            );

            let unreadable = prepared.changes.unreadable;
            slots[job.slot] = Some(if unreadable.is_empty() {
                SourceOutcome::Completed {
                    entry,
                    changes: summary,
                }
            } else {
                tracing::warn!(
                    "{}",
                    BackupError::PartialWalkFailure {
                        path: entry.source.clone(),
                        unreadable: unreadable.len(),
                    }
                );
                SourceOutcome::Partial {
                    entry,
                    changes: summary,
                    unreadable,
                }
            });
        }

        if committed > 0 {
            if let Err(e) = index.persist() {
                discard_artifacts(&produced);
                return Err(e);
            }
        }

        Ok(CreateReport {
            outcomes: slots.into_iter().flatten().collect(),
        })
    }

    /// Every backup, grouped by chain and oldest first within a chain
    pub fn list(&self) -> BackupResult<Vec<BackupSummary>> {
        let index = BackupIndex::load(self.paths.index_file())?;
        let mut rows = Vec::with_capacity(index.len());
        for chain in index.chains()? {
            rows.extend(chain.entries.into_iter().map(BackupSummary::from));
        }
        Ok(rows)
    }

    /// Remove a backup, or with `all` every backup of its source
    ///
    /// The index is persisted before any artifact is deleted, so an
    /// interruption leaves at worst an unreferenced file behind.
    pub fn remove(&self, id: BackupId, all: bool) -> BackupResult<Vec<BackupEntry>> {
        let _lock = IndexLock::acquire(&self.paths.lock_file(), self.settings.lock_timeout())?;
        let mut index = BackupIndex::load(self.paths.index_file())?;

        let removed = index.remove(id, all)?;
        index.persist()?;

        for entry in &removed {
            let path = self.paths.artifact_path(&entry.artifact);
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Deleted {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!("Artifact {} was already gone", path.display())
                }
                Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
            }
            tracing::info!("Removed backup {} of {}", entry.id, entry.source.display());
        }

        Ok(removed)
    }

    /// Check every chain and artifact against the index
    pub fn verify(&self) -> BackupResult<VerifyReport> {
        let _lock = IndexLock::acquire(&self.paths.lock_file(), self.settings.lock_timeout())?;
        let index = BackupIndex::load(self.paths.index_file())?;
        let mut report = VerifyReport::default();

        for source in index.sources() {
            report.chains += 1;
            let chain = match index.lookup_chain(source) {
                Ok(chain) => chain,
                Err(e) => {
                    report.problems.push(VerifyProblem::BrokenChain {
                        source: source.to_path_buf(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for entry in chain {
                report.artifacts_checked += 1;
                let path = self.paths.artifact_path(&entry.artifact);
                match archive::verify_artifact(entry.id, &path, &entry.checksum) {
                    Ok(()) => tracing::debug!("{} ok", entry.id),
                    Err(BackupError::NotFound { .. }) => {
                        report
                            .problems
                            .push(VerifyProblem::MissingArtifact { id: entry.id, path });
                    }
                    Err(BackupError::ChecksumMismatch {
                        expected, actual, ..
                    }) => {
                        report.problems.push(VerifyProblem::ChecksumMismatch {
                            id: entry.id,
                            expected,
                            actual,
                        });
                    }
                    Err(e) => report.problems.push(VerifyProblem::Unreadable {
                        id: entry.id,
                        reason: e.to_string(),
                    }),
                }
            }
        }

        let archives_dir = self.paths.archives_dir();
        if archives_dir.is_dir() {
            let referenced = index.artifact_names();
            let mut orphans = Vec::new();
            for dir_entry in fs::read_dir(&archives_dir)? {
                let dir_entry = dir_entry?;
                let name = dir_entry.file_name();
                let known = name.to_str().map_or(false, |n| referenced.contains(n));
                if !known {
                    orphans.push(dir_entry.path());
                }
            }
            orphans.sort();
            report
                .problems
                .extend(orphans.into_iter().map(|path| VerifyProblem::Orphan { path }));
        }

        Ok(report)
    }
}

fn canonical_source(source: &Path) -> BackupResult<PathBuf> {
    let canonical = fs::canonicalize(source).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            BackupError::source_not_found(source)
        } else {
            BackupError::Io(format!("Failed to resolve {}: {}", source.display(), e))
        }
    })?;
    if !canonical.is_dir() {
        return Err(BackupError::InvalidArgument(format!(
            "{} is not a directory",
            source.display()
        )));
    }
    Ok(canonical)
}

fn prepare(
    job: &Job,
    options: &DetectOptions,
    archives_dir: &Path,
    cancel: &CancelToken,
) -> BackupResult<Prepared> {
    let changes = detector::detect_changes(&job.source, job.prior.as_ref(), options, cancel)?;
    let files = changes.files_to_archive();
    let archive = archive::write_archive(&job.source, &files, archives_dir, job.id, cancel)?;
    Ok(Prepared { changes, archive })
}

fn build_entry(index: &BackupIndex, job: &Job, prepared: &Prepared) -> BackupEntry {
    let mut created_at = Utc::now();
    if let Some(head) = index.head(&job.source) {
        let floor = head.created_at + chrono::Duration::microseconds(1);
        if created_at < floor {
            created_at = floor;
        }
    }

    let kind = if job.parent.is_some() {
        BackupKind::Incremental
    } else {
        BackupKind::Full
    };

    BackupEntry {
        id: job.id,
        source: job.source.clone(),
        kind,
        parent: job.parent,
        created_at,
        artifact: prepared.archive.file_name.clone(),
        checksum: prepared.archive.checksum.clone(),
        size_bytes: prepared.archive.size_bytes,
        file_count: prepared.archive.file_count,
        manifest: prepared.changes.manifest.clone(),
        deleted: prepared.changes.deleted.clone(),
    }
}

fn produced_artifacts(results: &[BackupResult<Prepared>]) -> Vec<PathBuf> {
    results
        .iter()
        .filter_map(|result| result.as_ref().ok())
        .map(|prepared| prepared.archive.path.clone())
        .collect()
}

fn discard_artifacts(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to clean up {}: {}", path.display(), e);
        }
    }
}

/// Whether a file in the archives directory is a leftover partial write
pub fn is_partial_artifact(path: &Path) -> bool {
    path.to_str().map_or(false, |p| p.ends_with(PARTIAL_SUFFIX))
}
