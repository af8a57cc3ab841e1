//! Cross-process lock for mutating commands
//!
//! `create`, `rm` and `verify` hold an exclusive advisory lock on a marker
//! file in the backup root for their whole run. The operating system drops
//! the lock when its holder exits or dies, so a crashed run never leaves the
//! root locked. A second invocation polls for a bounded time and then gives
//! up with `BackupBusy` instead of blocking forever.
//!
//! The marker file itself is never removed: deleting it while another
//! process waits on the same path would let two holders lock two different
//! files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{BackupError, BackupResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Held lock; released on drop
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
    file: File,
}

impl IndexLock {
    /// Acquire the lock at `path`, waiting at most `timeout`
    pub fn acquire(path: &Path, timeout: Duration) -> BackupResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                BackupError::Io(format!("Failed to open lock {}: {}", path.display(), e))
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(BackupError::BackupBusy(path.to_path_buf()));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(BackupError::Io(format!(
                        "Failed to acquire lock {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        let mut lock = Self {
            path: path.to_path_buf(),
            file,
        };
        if let Err(e) = lock.record_owner() {
            tracing::debug!("Could not record owner in {}: {}", path.display(), e);
        }
        tracing::debug!("Acquired lock {}", path.display());
        Ok(lock)
    }

    /// Informational only; the advisory lock is what excludes other writers
    fn record_owner(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.rewind()?;
        writeln!(self.file, "{}", std::process::id())?;
        self.file.flush()
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        tracing::debug!("Released lock {}", self.path.display());
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_records_owner() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        let _lock = IndexLock::acquire(&path, Duration::from_millis(100)).unwrap();

        let owner = fs::read_to_string(&path).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_second_acquire_is_busy() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        let _held = IndexLock::acquire(&path, Duration::from_millis(100)).unwrap();
        let err = IndexLock::acquire(&path, Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, BackupError::BackupBusy(_)));
    }

    #[test]
    fn test_lock_available_again_after_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        drop(IndexLock::acquire(&path, Duration::from_millis(100)).unwrap());
        assert!(path.exists());
        assert!(IndexLock::acquire(&path, Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_leftover_marker_from_dead_run_is_taken_over() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        // A crashed run leaves the file behind but no lock on it.
        fs::write(&path, "4294967294\n").unwrap();

        let _lock = IndexLock::acquire(&path, Duration::from_millis(100)).unwrap();
        let owner = fs::read_to_string(&path).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_waiter_gets_lock_when_holder_closes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        // Closing the handle is what the kernel does for a holder that dies.
        let holder = File::create(&path).unwrap();
        holder.lock_exclusive().unwrap();

        let waiter = {
            let path = path.clone();
            std::thread::spawn(move || IndexLock::acquire(&path, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(150));
        drop(holder);

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_only_one_of_many_contenders_holds_the_lock() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");
        fs::write(&path, "4294967294\n").unwrap();

        let barrier = std::sync::Arc::new(std::sync::Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let lock = IndexLock::acquire(&path, Duration::ZERO);
                    // Keep a winner's lock alive until every contender has tried.
                    std::thread::sleep(Duration::from_millis(200));
                    lock.is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
