//! Platform primitives the storage engine consumes (`spec.md` §4.1): a
//! whole-file advisory exclusive lock and a free-space query. Both are thin
//! wrappers with no state beyond the returned handle, built on the `fs4`
//! crate — the same crate the `toydb` bitcask engine in the retrieval pack
//! uses for its own exclusive log-file lock.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use common::{DiskStat, StorageError};
use fs4::FileExt;

/// A held advisory lock on a file. Dropping it releases the lock and closes
/// the file descriptor, matching `spec.md`'s "closes on drop" ownership
/// rule for directory/volume-group locks.
pub struct LockHandle {
    path: std::path::PathBuf,
    file: File,
}

impl LockHandle {
    /// Explicit release, in case a caller wants the unlock to happen at a
    /// known point rather than whenever the handle is dropped.
    pub fn unlock(self) -> Result<(), StorageError> {
        FileExt::unlock(&self.file)?;
        tracing::debug!(path = %self.path.display(), "released advisory lock");
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Platform-specific primitives abstracted behind a trait so the engine
/// itself stays OS-agnostic; `spec.md` §9 calls for a POSIX flock-based
/// variant and a LockFileEx-based variant behind this same seam.
pub trait Platform: Send + Sync {
    /// Creates `path` if absent, acquires a non-blocking whole-file
    /// exclusive lock, and writes the current process id into it
    /// (truncating any prior contents). Returns `StorageError::Busy` if the
    /// lock is already held by another process.
    fn try_lock_exclusive(&self, path: &Path) -> Result<LockHandle, StorageError>;

    /// Filesystem statistics for the directory containing `path`.
    fn disk_stat(&self, path: &Path) -> Result<DiskStat, StorageError>;
}

/// POSIX (`flock(2)`-backed, via `fs4`) implementation of [`Platform`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPlatform;

impl Platform for UnixPlatform {
    fn try_lock_exclusive(&self, path: &Path) -> Result<LockHandle, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        FileExt::try_lock_exclusive(&file).map_err(|_| {
            tracing::debug!(path = %path.display(), "lock held by another process");
            StorageError::busy(path.display().to_string())
        })?;

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), "acquired advisory lock");
        Ok(LockHandle {
            path: path.to_path_buf(),
            file,
        })
    }

    fn disk_stat(&self, path: &Path) -> Result<DiskStat, StorageError> {
        let dir = if path.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        let free = fs4::available_space(dir)?;
        let size = fs4::total_space(dir)?;
        Ok(DiskStat {
            size,
            free,
            used: size.saturating_sub(free),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_relock_from_same_handle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("lock");
        let platform = UnixPlatform;

        let handle = platform.try_lock_exclusive(&lock_path).unwrap();
        // A second, independent file descriptor to the same path must see it busy.
        let second = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&lock_path)
            .unwrap();
        assert!(FileExt::try_lock_exclusive(&second).is_err());

        drop(handle);
        assert!(FileExt::try_lock_exclusive(&second).is_ok());
    }

    #[test]
    fn disk_stat_reports_positive_size() {
        let dir = tempfile::tempdir().unwrap();
        let stat = UnixPlatform.disk_stat(dir.path()).unwrap();
        assert!(stat.size > 0);
        assert_eq!(stat.size, stat.free + stat.used);
    }
}
