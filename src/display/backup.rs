//! Backup display formatting
//!
//! Formats backup listings and command summaries for terminal output.

use chrono::Local;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::backup::manager::is_partial_artifact;
use crate::backup::{BackupSummary, CreateReport, RestoreReport, SourceOutcome, VerifyProblem, VerifyReport};
use crate::models::BackupEntry;

/// Widest directory shown in the list before it is shortened
pub const DIRECTORY_WIDTH: usize = 60;

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "BACKUP ID")]
    id: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "DIRECTORY")]
    directory: String,
    #[tabled(rename = "DATE")]
    date: String,
    #[tabled(rename = "FILES")]
    files: usize,
    #[tabled(rename = "SIZE")]
    size: String,
}

/// Format all backups as a table
pub fn format_backup_list(backups: &[BackupSummary]) -> String {
    if backups.is_empty() {
        return "No backups found".to_string();
    }

    let rows = backups.iter().map(|b| BackupRow {
        id: b.id.to_string(),
        kind: b.kind.to_string(),
        directory: shorten_directory(&b.source.display().to_string(), DIRECTORY_WIDTH),
        date: b
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        files: b.file_count,
        size: format_size(b.size_bytes),
    });

    Table::new(rows).with(Style::blank()).to_string()
}

/// Keep the tail of a long path, marking the cut with `...`
pub fn shorten_directory(directory: &str, width: usize) -> String {
    let len = directory.chars().count();
    if len <= width {
        return directory.to_string();
    }
    let keep = width.saturating_sub(3);
    let tail: String = directory.chars().skip(len - keep).collect();
    format!("...{}", tail)
}

/// One line per source of a `create` run
pub fn format_create_report(report: &CreateReport) -> String {
    let mut output = String::new();

    for outcome in &report.outcomes {
        match outcome {
            SourceOutcome::Completed { entry, changes } => {
                output.push_str(&format!(
                    "{}  {:<11}  {}  (+{} ~{} -{})\n",
                    entry.id,
                    entry.kind,
                    entry.source.display(),
                    changes.added,
                    changes.modified,
                    changes.deleted
                ));
            }
            SourceOutcome::Partial {
                entry,
                changes,
                unreadable,
            } => {
                output.push_str(&format!(
                    "{}  {:<11}  {}  (+{} ~{} -{}, {} unreadable)\n",
                    entry.id,
                    entry.kind,
                    entry.source.display(),
                    changes.added,
                    changes.modified,
                    changes.deleted,
                    unreadable.len()
                ));
                for file in unreadable {
                    output.push_str(&format!("    skipped {}: {}\n", file.path.display(), file.reason));
                }
            }
            SourceOutcome::Failed { source, error } => {
                output.push_str(&format!("FAILED    {}: {}\n", source.display(), error));
            }
        }
    }

    output.push_str(&format!(
        "{} of {} source(s) backed up",
        report.committed(),
        report.outcomes.len()
    ));
    output
}

/// Summary of removed entries
pub fn format_removed(entries: &[BackupEntry]) -> String {
    let ids: Vec<String> = entries.iter().map(|e| e.id.to_string()).collect();
    let freed: u64 = entries.iter().map(|e| e.size_bytes).sum();
    format!(
        "Removed {} backup(s): {} ({} freed)",
        entries.len(),
        ids.join(", "),
        format_size(freed)
    )
}

pub fn format_restore_report(report: &RestoreReport) -> String {
    format!(
        "Restored into {}\n{}",
        report.target.display(),
        report.summary()
    )
}

/// Verification summary followed by one line per problem
pub fn format_verify_report(report: &VerifyReport) -> String {
    let mut output = format!(
        "Checked {} chain(s), {} artifact(s)\n",
        report.chains, report.artifacts_checked
    );

    if report.is_healthy() {
        output.push_str("No problems found");
        return output;
    }

    for problem in &report.problems {
        let line = match problem {
            VerifyProblem::BrokenChain { source, reason } => {
                format!("broken chain   {}: {}", source.display(), reason)
            }
            VerifyProblem::MissingArtifact { id, path } => {
                format!("missing        {}: {}", id, path.display())
            }
            VerifyProblem::ChecksumMismatch {
                id,
                expected,
                actual,
            } => format!("checksum       {}: expected {}, got {}", id, expected, actual),
            VerifyProblem::Unreadable { id, reason } => format!("unreadable     {}: {}", id, reason),
            VerifyProblem::Orphan { path } if is_partial_artifact(path) => {
                format!("partial write  {}", path.display())
            }
            VerifyProblem::Orphan { path } => format!("orphan         {}", path.display()),
        };
        output.push_str(&line);
        output.push('\n');
    }

    output.push_str(&format!("{} problem(s) found", report.problems.len()));
    output
}

/// Format a file size in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::ChangeSummary;
    use crate::error::BackupError;
    use crate::models::{BackupId, BackupKind, Manifest};
    use chrono::Utc;
    use std::path::PathBuf;

    fn summary(id: u32, source: &str) -> BackupSummary {
        BackupSummary {
            id: BackupId::from_raw(id),
            kind: BackupKind::Full,
            parent: None,
            source: PathBuf::from(source),
            created_at: Utc::now(),
            file_count: 3,
            size_bytes: 2048,
        }
    }

    fn entry(id: u32) -> BackupEntry {
        BackupEntry {
            id: BackupId::from_raw(id),
            source: PathBuf::from("/data/docs"),
            kind: BackupKind::Full,
            parent: None,
            created_at: Utc::now(),
            artifact: format!("{}.tar.gz", BackupId::from_raw(id)),
            checksum: "00".into(),
            size_bytes: 1024,
            file_count: 1,
            manifest: Manifest::new(),
            deleted: Vec::new(),
        }
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(format_backup_list(&[]), "No backups found");
    }

    #[test]
    fn test_list_has_headers_and_rows() {
        let table = format_backup_list(&[summary(0xab, "/data/docs")]);
        for header in ["BACKUP ID", "KIND", "DIRECTORY", "DATE", "FILES", "SIZE"] {
            assert!(table.contains(header), "missing {header}");
        }
        assert!(table.contains("000000ab"));
        assert!(table.contains("/data/docs"));
        assert!(table.contains("2.0 KB"));
    }

    #[test]
    fn test_shorten_directory() {
        assert_eq!(shorten_directory("/short", 60), "/short");

        let long = format!("/{}", "x".repeat(80));
        let short = shorten_directory(&long, 60);
        assert_eq!(short.chars().count(), 60);
        assert!(short.starts_with("..."));
        assert!(long.ends_with(&short[3..]));
    }

    #[test]
    fn test_create_report_lists_failures() {
        let report = CreateReport {
            outcomes: vec![
                SourceOutcome::Completed {
                    entry: entry(1),
                    changes: ChangeSummary {
                        added: 1,
                        ..ChangeSummary::default()
                    },
                },
                SourceOutcome::Failed {
                    source: PathBuf::from("/missing"),
                    error: BackupError::source_not_found(std::path::Path::new("/missing")),
                },
            ],
        };

        let text = format_create_report(&report);
        assert!(text.contains("00000001"));
        assert!(text.contains("FAILED    /missing"));
        assert!(text.ends_with("1 of 2 source(s) backed up"));
    }

    #[test]
    fn test_removed_summary() {
        let text = format_removed(&[entry(1), entry(2)]);
        assert_eq!(text, "Removed 2 backup(s): 00000001, 00000002 (2.0 KB freed)");
    }

    #[test]
    fn test_verify_report_labels_partial_writes() {
        let report = VerifyReport {
            chains: 1,
            artifacts_checked: 1,
            problems: vec![
                VerifyProblem::Orphan {
                    path: PathBuf::from("/store/archives/00000001.tar.gz.partial"),
                },
                VerifyProblem::Orphan {
                    path: PathBuf::from("/store/archives/stray.bin"),
                },
            ],
        };

        let text = format_verify_report(&report);
        assert!(text.contains("partial write  /store/archives/00000001.tar.gz.partial"));
        assert!(text.contains("orphan         /store/archives/stray.bin"));
        assert!(text.ends_with("2 problem(s) found"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
