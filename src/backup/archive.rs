//! Archive artifacts
//!
//! Every backup is one `tar.gz` file named after its identifier. The archive
//! is streamed through a SHA-256 hasher while it is written, so the checksum
//! covers the exact bytes on disk without reading them back. Until it is
//! complete and synced the artifact only exists as `<name>.partial`.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tar::{Archive, Builder};

use crate::error::{BackupError, BackupResult};
use crate::models::BackupId;
use crate::storage::file_io::sync_parent_dir;

use super::cancel::CancelToken;

/// Suffix of artifacts still being written
pub const PARTIAL_SUFFIX: &str = ".partial";

/// What the writer hands back to the index
#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub file_name: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub file_count: usize,
}

/// Artifact file name for a backup
pub fn artifact_file_name(id: BackupId) -> String {
    format!("{}.tar.gz", id)
}

/// Writer that hashes and counts everything passing through it
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(self) -> (W, String, u64) {
        (self.inner, format!("{:x}", self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Package `files` (relative to `source`) into `<archives_dir>/<id>.tar.gz`
///
/// An empty `files` list yields a valid archive with no entries.
pub fn write_archive(
    source: &Path,
    files: &[String],
    archives_dir: &Path,
    id: BackupId,
    cancel: &CancelToken,
) -> BackupResult<ArchiveReport> {
    fs::create_dir_all(archives_dir).map_err(|e| {
        BackupError::Io(format!(
            "Failed to create archive directory {}: {}",
            archives_dir.display(),
            e
        ))
    })?;

    let file_name = artifact_file_name(id);
    let final_path = archives_dir.join(&file_name);
    let temp_path = archives_dir.join(format!("{}{}", file_name, PARTIAL_SUFFIX));

    if final_path.exists() {
        return Err(BackupError::IdentifierCollision(format!(
            "artifact {} already exists",
            final_path.display()
        )));
    }

    let (checksum, size_bytes) = match write_partial(source, files, &temp_path, cancel) {
        Ok(done) => done,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    };

    fs::rename(&temp_path, &final_path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        BackupError::Io(format!(
            "Failed to move artifact into place {}: {}",
            final_path.display(),
            e
        ))
    })?;
    sync_parent_dir(&final_path);

    tracing::debug!(
        "Wrote {} ({} files, {} bytes)",
        final_path.display(),
        files.len(),
        size_bytes
    );

    Ok(ArchiveReport {
        path: final_path,
        file_name,
        checksum,
        size_bytes,
        file_count: files.len(),
    })
}

fn write_partial(
    source: &Path,
    files: &[String],
    temp_path: &Path,
    cancel: &CancelToken,
) -> BackupResult<(String, u64)> {
    let file = File::create(temp_path).map_err(|e| {
        BackupError::Io(format!(
            "Failed to create artifact {}: {}",
            temp_path.display(),
            e
        ))
    })?;

    let hashing = HashingWriter::new(BufWriter::new(file));
    let encoder = GzEncoder::new(hashing, Compression::default());
    let mut builder = Builder::new(encoder);

    for rel in files {
        cancel.check(&format!("archiving {}", source.display()))?;

        let abs = source.join(rel);
        let mut src = File::open(&abs)
            .map_err(|e| BackupError::Io(format!("Failed to open {}: {}", abs.display(), e)))?;
        builder.append_file(rel, &mut src).map_err(|e| {
            BackupError::Io(format!("Failed to append {} to archive: {}", abs.display(), e))
        })?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| BackupError::Io(format!("Failed to finish archive: {}", e)))?;
    let hashing = encoder
        .finish()
        .map_err(|e| BackupError::Io(format!("Failed to finish compression: {}", e)))?;
    let (writer, checksum, size_bytes) = hashing.finish();

    let file = writer
        .into_inner()
        .map_err(|e| BackupError::Io(format!("Failed to flush artifact: {}", e.error())))?;
    file.sync_all()
        .map_err(|e| BackupError::Io(format!("Failed to sync artifact: {}", e)))?;

    Ok((checksum, size_bytes))
}

/// Stream a file through SHA-256
pub fn file_checksum(path: &Path) -> BackupResult<String> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            BackupError::artifact_not_found(path)
        } else {
            BackupError::Io(format!("Failed to open {}: {}", path.display(), e))
        }
    })?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| BackupError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Fail unless the artifact of backup `id` still matches `expected`
pub fn verify_artifact(id: BackupId, path: &Path, expected: &str) -> BackupResult<()> {
    let actual = file_checksum(path)?;
    if actual != expected {
        return Err(BackupError::ChecksumMismatch {
            id: id.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Unpack an artifact into `dest`, overwriting existing files
///
/// Returns the number of entries written. Entries that would land outside
/// `dest` are refused.
pub fn extract_into(artifact: &Path, dest: &Path) -> BackupResult<usize> {
    let file = File::open(artifact).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            BackupError::artifact_not_found(artifact)
        } else {
            BackupError::Io(format!("Failed to open {}: {}", artifact.display(), e))
        }
    })?;

    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_overwrite(true);
    archive.set_preserve_mtime(true);

    let mut count = 0;
    let entries = archive
        .entries()
        .map_err(|e| BackupError::Io(format!("Failed to read {}: {}", artifact.display(), e)))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| {
            BackupError::Io(format!("Corrupt entry in {}: {}", artifact.display(), e))
        })?;
        let unpacked = entry.unpack_in(dest).map_err(|e| {
            BackupError::Io(format!("Failed to extract into {}: {}", dest.display(), e))
        })?;
        if !unpacked {
            return Err(BackupError::Io(format!(
                "{} contains an entry outside the destination",
                artifact.display()
            )));
        }
        count += 1;
    }

    Ok(count)
}
