//! A single append-only volume file (`spec.md` §3 "Volume file", §4.2).
//!
//! On disk a volume is a raw concatenation of object payloads: no headers,
//! no per-object framing. `size` tracks the in-memory view of the file's
//! length (invariant V1: it always equals the on-disk length) and is only
//! ever advanced by a successful, fully-flushed `append`.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use common::{StorageError, VolumeId};

pub struct VolumeFile {
    id: VolumeId,
    size: AtomicU64,
    read_handle: File,
    write_handle: Mutex<File>,
}

impl VolumeFile {
    /// Opens an existing volume file, seeding `size` from its on-disk
    /// length.
    pub fn open(id: VolumeId, path: &Path) -> Result<Self, StorageError> {
        let read_handle = OpenOptions::new().read(true).open(path)?;
        let write_handle = OpenOptions::new().write(true).open(path)?;
        let size = read_handle.metadata()?.len();
        Ok(VolumeFile {
            id,
            size: AtomicU64::new(size),
            read_handle,
            write_handle: Mutex::new(write_handle),
        })
    }

    /// Creates a new, empty volume file and opens it.
    pub fn create(id: VolumeId, path: &Path) -> Result<Self, StorageError> {
        OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)?;
        Self::open(id, path)
    }

    pub fn id(&self) -> VolumeId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Positional read of `len` bytes starting at `offset`. Safe to call
    /// concurrently with other reads and with a writer appending to the
    /// same volume — it uses its own read handle, independent of the
    /// write-serialization mutex.
    pub fn read_at(&self, offset: u64, len: u32) -> Result<Vec<u8>, StorageError> {
        let mut buf = vec![0u8; len as usize];
        self.read_handle.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Appends `data` at the current size, fsyncs, and advances `size` by
    /// exactly the number of bytes written. A failed append never advances
    /// `size` (invariant: partial writes are surfaced as `io` errors, not
    /// partially applied).
    pub fn append(&self, data: &[u8]) -> Result<u64, StorageError> {
        let guard = self.write_handle.lock().expect("volume write mutex poisoned");
        let offset = self.size.load(Ordering::Acquire);
        guard.write_all_at(data, offset)?;
        guard.sync_all()?;
        self.size.fetch_add(data.len() as u64, Ordering::AcqRel);
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume-1");
        let vol = VolumeFile::create(1, &path).unwrap();

        let offset = vol.append(b"hello").unwrap();
        assert_eq!(offset, 0);
        assert_eq!(vol.size(), 5);

        let offset2 = vol.append(b"world!").unwrap();
        assert_eq!(offset2, 5);
        assert_eq!(vol.size(), 11);

        assert_eq!(vol.read_at(0, 5).unwrap(), b"hello");
        assert_eq!(vol.read_at(5, 6).unwrap(), b"world!");
    }

    #[test]
    fn open_recovers_size_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume-1");
        {
            let vol = VolumeFile::create(1, &path).unwrap();
            vol.append(b"0123456789").unwrap();
        }
        let reopened = VolumeFile::open(1, &path).unwrap();
        assert_eq!(reopened.size(), 10);
        assert_eq!(reopened.read_at(2, 4).unwrap(), b"2345");
    }

    #[test]
    fn read_past_end_of_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume-1");
        let vol = VolumeFile::create(1, &path).unwrap();
        vol.append(b"short").unwrap();
        assert!(vol.read_at(0, 100).is_err());
    }
}
