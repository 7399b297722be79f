//! Embedded ordered key-value store backing the file/hash/tombstone
//! namespaces (`spec.md` §3, §4.4): a BitCask-style append-only log plus an
//! in-memory keydir rebuilt by scanning the log on open. Directly grounded
//! in the `toydb` bitcask engines in the retrieval pack — same length-
//! prefixed record shape, same recovery-by-truncation behavior on a torn
//! trailing record.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use common::{FileEntry, HashEntry, Namespace, StorageError, TombstoneEntry};
use platform::{LockHandle, Platform};

#[derive(Debug, Clone, Copy)]
struct Location {
    offset: u64,
    len: u32,
}

/// One write to apply atomically alongside any other ops in the same
/// `apply` call: a single `write_all` + `fsync`, a single keydir update.
pub enum Op<'a> {
    Put {
        namespace: Namespace,
        key: &'a [u8],
        value: &'a [u8],
    },
    Delete {
        namespace: Namespace,
        key: &'a [u8],
    },
}

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;

pub struct IndexStore {
    path: PathBuf,
    write_handle: Mutex<File>,
    read_handle: File,
    keydir: RwLock<BTreeMap<(Namespace, Vec<u8>), Location>>,
    committed_len: AtomicU64,
    lock: Mutex<Option<LockHandle>>,
}

impl IndexStore {
    /// Opens `path` (creating it if absent), acquires a `<path>.lock`
    /// advisory lock, and rebuilds the keydir by scanning the log. A
    /// truncated trailing record (a crash mid-append) is dropped rather
    /// than failing the open.
    pub fn open(path: &Path, platform: Arc<dyn Platform>) -> Result<Self, StorageError> {
        let lock_path = lock_path_for(path);
        let lock = platform.try_lock_exclusive(&lock_path)?;

        if !path.exists() {
            File::create(path)?;
        }
        let data = std::fs::read(path)?;
        let (keydir, committed_len) = build_keydir(&data);

        if (committed_len as usize) < data.len() {
            tracing::warn!(
                path = %path.display(),
                kept = committed_len,
                discarded = data.len() as u64 - committed_len,
                "index store: truncating incomplete trailing record"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(committed_len)?;
            file.sync_all()?;
        }

        let write_handle = OpenOptions::new().write(true).open(path)?;
        let read_handle = OpenOptions::new().read(true).open(path)?;

        tracing::debug!(path = %path.display(), entries = keydir.len(), "index store: opened");

        Ok(IndexStore {
            path: path.to_path_buf(),
            write_handle: Mutex::new(write_handle),
            read_handle,
            keydir: RwLock::new(keydir),
            committed_len: AtomicU64::new(committed_len),
            lock: Mutex::new(Some(lock)),
        })
    }

    /// Applies one or more ops as a single transaction: one buffered
    /// `write_all_at`, one `fsync`, one keydir update under the write
    /// guard. Readers never observe a partially-applied batch.
    pub fn apply(&self, ops: &[Op<'_>]) -> Result<(), StorageError> {
        let write_handle = self.write_handle.lock().expect("index store write mutex poisoned");
        let base = self.committed_len.load(Ordering::Acquire);

        let mut buf = Vec::new();
        let mut staged = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                Op::Put { namespace, key, value } => {
                    buf.push(OP_PUT);
                    buf.push(namespace.tag());
                    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    buf.extend_from_slice(key);
                    let value_offset = base + buf.len() as u64;
                    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
                    buf.extend_from_slice(value);
                    staged.push(StagedOp::Put {
                        namespace: *namespace,
                        key: key.to_vec(),
                        location: Location {
                            offset: value_offset + 4,
                            len: value.len() as u32,
                        },
                    });
                }
                Op::Delete { namespace, key } => {
                    buf.push(OP_DELETE);
                    buf.push(namespace.tag());
                    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    buf.extend_from_slice(key);
                    staged.push(StagedOp::Delete {
                        namespace: *namespace,
                        key: key.to_vec(),
                    });
                }
            }
        }

        write_handle.write_all_at(&buf, base)?;
        write_handle.sync_all()?;

        {
            let mut keydir = self.keydir.write().expect("index store keydir lock poisoned");
            for op in staged {
                match op {
                    StagedOp::Put { namespace, key, location } => {
                        keydir.insert((namespace, key), location);
                    }
                    StagedOp::Delete { namespace, key } => {
                        keydir.remove(&(namespace, key));
                    }
                }
            }
        }
        self.committed_len.store(base + buf.len() as u64, Ordering::Release);
        Ok(())
    }

    /// Raw value lookup. Takes only a read guard over the keydir, released
    /// before the positional read, so concurrent readers never block on
    /// each other or on a writer building up a batch.
    pub fn get(&self, namespace: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let location = {
            let keydir = self.keydir.read().expect("index store keydir lock poisoned");
            keydir.get(&(namespace, key.to_vec())).copied()
        };
        match location {
            Some(loc) => {
                let mut buf = vec![0u8; loc.len as usize];
                self.read_handle.read_exact_at(&mut buf, loc.offset)?;
                Ok(Some(buf))
            }
            None => Ok(None),
        }
    }

    pub fn get_file_entry(&self, path: &str) -> Result<Option<FileEntry>, StorageError> {
        self.get_json(Namespace::Files, path.as_bytes())
    }

    pub fn put_file_entry(&self, path: &str, entry: &FileEntry) -> Result<(), StorageError> {
        let value = serde_json::to_vec(entry).map_err(json_err)?;
        self.apply(&[Op::Put {
            namespace: Namespace::Files,
            key: path.as_bytes(),
            value: &value,
        }])
    }

    pub fn get_hash_entry(&self, hash: &[u8]) -> Result<Option<HashEntry>, StorageError> {
        self.get_json(Namespace::Hashes, hash)
    }

    pub fn put_hash_entry(&self, hash: &[u8], entry: &HashEntry) -> Result<(), StorageError> {
        let value = serde_json::to_vec(entry).map_err(json_err)?;
        self.apply(&[Op::Put {
            namespace: Namespace::Hashes,
            key: hash,
            value: &value,
        }])
    }

    /// Writes a tombstone record without touching the file namespace. Used
    /// by `write_file`'s overwrite path, where the new file entry is put
    /// separately right after.
    pub fn put_tombstone(&self, key: &str, tombstone: &TombstoneEntry) -> Result<(), StorageError> {
        let value = serde_json::to_vec(tombstone).map_err(json_err)?;
        self.apply(&[Op::Put {
            namespace: Namespace::Tombstones,
            key: key.as_bytes(),
            value: &value,
        }])
    }

    /// Removes the file entry at `path` and writes its prior value to the
    /// tombstone namespace, as a single committed transaction.
    pub fn delete_file_entry(
        &self,
        path: &str,
        tombstone_key: &str,
        tombstone: &TombstoneEntry,
    ) -> Result<(), StorageError> {
        let value = serde_json::to_vec(tombstone).map_err(json_err)?;
        self.apply(&[
            Op::Put {
                namespace: Namespace::Tombstones,
                key: tombstone_key.as_bytes(),
                value: &value,
            },
            Op::Delete {
                namespace: Namespace::Files,
                key: path.as_bytes(),
            },
        ])
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &[u8],
    ) -> Result<Option<T>, StorageError> {
        match self.get(namespace, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(json_err)?)),
            None => Ok(None),
        }
    }

    /// Gzip-streams a consistent point-in-time copy of the log, up to the
    /// currently committed length, into `sink`. Only a fresh read handle is
    /// used, so concurrent writers are never blocked.
    pub fn snapshot_to<W: Write>(&self, sink: W) -> Result<u64, StorageError> {
        let len = self.committed_len.load(Ordering::Acquire);
        let file = File::open(&self.path)?;
        let limited = std::io::Read::take(file, len);
        Ok(compression::gzip_stream(limited, sink)?)
    }

    pub fn close(&self) {
        let mut guard = self.lock.lock().expect("index store lock mutex poisoned");
        if let Some(handle) = guard.take() {
            let _ = handle.unlock();
        }
    }
}

enum StagedOp {
    Put {
        namespace: Namespace,
        key: Vec<u8>,
        location: Location,
    },
    Delete {
        namespace: Namespace,
        key: Vec<u8>,
    },
}

fn json_err(e: serde_json::Error) -> StorageError {
    StorageError::bad_param(e.to_string())
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn tag_to_namespace(tag: u8) -> Option<Namespace> {
    match tag {
        0 => Some(Namespace::Files),
        1 => Some(Namespace::Hashes),
        2 => Some(Namespace::Tombstones),
        _ => None,
    }
}

/// Scans `data` for a sequence of well-formed records and replays them
/// into a fresh keydir. Returns the byte offset of the last fully-formed
/// record boundary, which becomes the recovered file length — any bytes
/// after that are a torn write from an unclean shutdown.
fn build_keydir(data: &[u8]) -> (BTreeMap<(Namespace, Vec<u8>), Location>, u64) {
    let mut keydir = BTreeMap::new();
    let mut pos = 0usize;

    loop {
        match parse_record(data, pos) {
            Some((op, next_pos)) => {
                match op {
                    StagedOp::Put { namespace, key, location } => {
                        keydir.insert((namespace, key), location);
                    }
                    StagedOp::Delete { namespace, key } => {
                        keydir.remove(&(namespace, key));
                    }
                }
                pos = next_pos;
            }
            None => break,
        }
    }
    (keydir, pos as u64)
}

fn parse_record(data: &[u8], pos: usize) -> Option<(StagedOp, usize)> {
    if pos >= data.len() {
        return None;
    }
    let mut cursor = pos;
    let op_byte = *data.get(cursor)?;
    cursor += 1;
    let tag = *data.get(cursor)?;
    cursor += 1;
    let namespace = tag_to_namespace(tag)?;

    let key_len = u32::from_le_bytes(data.get(cursor..cursor + 4)?.try_into().ok()?) as usize;
    cursor += 4;
    let key = data.get(cursor..cursor + key_len)?.to_vec();
    cursor += key_len;

    match op_byte {
        OP_PUT => {
            let value_len = u32::from_le_bytes(data.get(cursor..cursor + 4)?.try_into().ok()?) as usize;
            let value_offset = cursor + 4;
            cursor = value_offset + value_len;
            if cursor > data.len() {
                return None;
            }
            Some((
                StagedOp::Put {
                    namespace,
                    key,
                    location: Location {
                        offset: value_offset as u64,
                        len: value_len as u32,
                    },
                },
                cursor,
            ))
        }
        OP_DELETE => Some((StagedOp::Delete { namespace, key }, cursor)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::UnixPlatform;

    fn open(dir: &Path) -> IndexStore {
        IndexStore::open(&dir.join("storage.db"), Arc::new(UnixPlatform)).unwrap()
    }

    #[test]
    fn put_then_get_file_entry_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let entry = FileEntry {
            size: 9,
            mime: "text/plain".into(),
            metadata: String::new(),
            group_id: 0,
            volume_id: common::MIN_VOLUME_ID,
            volume_offset: 0,
        };
        store.put_file_entry("/a/b", &entry).unwrap();
        let fetched = store.get_file_entry("/a/b").unwrap().unwrap();
        assert_eq!(fetched, entry);
    }

    #[test]
    fn delete_file_entry_removes_it_and_writes_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let entry = FileEntry {
            size: 1,
            mime: String::new(),
            metadata: String::new(),
            group_id: 0,
            volume_id: common::MIN_VOLUME_ID,
            volume_offset: 0,
        };
        store.put_file_entry("/a", &entry).unwrap();
        let tombstone = TombstoneEntry {
            path: "/a".into(),
            replaced_at_nanos: 1,
            prior: entry,
        };
        store.delete_file_entry("/a", "/a\r\n1", &tombstone).unwrap();
        assert!(store.get_file_entry("/a").unwrap().is_none());
        assert!(store.get(Namespace::Tombstones, b"/a\r\n1").unwrap().is_some());
    }

    #[test]
    fn reopen_recovers_keydir_from_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.db");
        let entry = FileEntry {
            size: 1,
            mime: String::new(),
            metadata: String::new(),
            group_id: 0,
            volume_id: common::MIN_VOLUME_ID,
            volume_offset: 0,
        };
        {
            let store = IndexStore::open(&path, Arc::new(UnixPlatform)).unwrap();
            store.put_file_entry("/a", &entry).unwrap();
            store.close();
        }
        let reopened = IndexStore::open(&path, Arc::new(UnixPlatform)).unwrap();
        assert_eq!(reopened.get_file_entry("/a").unwrap(), Some(entry));
    }

    #[test]
    fn reopen_after_torn_trailing_write_drops_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.db");
        let entry = FileEntry {
            size: 1,
            mime: String::new(),
            metadata: String::new(),
            group_id: 0,
            volume_id: common::MIN_VOLUME_ID,
            volume_offset: 0,
        };
        {
            let store = IndexStore::open(&path, Arc::new(UnixPlatform)).unwrap();
            store.put_file_entry("/a", &entry).unwrap();
            store.close();
        }
        {
            use std::io::Write as _;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[OP_PUT, 0, 5, 0, 0, 0]).unwrap();
        }
        let reopened = IndexStore::open(&path, Arc::new(UnixPlatform)).unwrap();
        assert_eq!(reopened.get_file_entry("/a").unwrap(), Some(entry));
    }

    #[test]
    fn snapshot_to_produces_gzip_of_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let entry = FileEntry {
            size: 1,
            mime: String::new(),
            metadata: String::new(),
            group_id: 0,
            volume_id: common::MIN_VOLUME_ID,
            volume_offset: 0,
        };
        store.put_file_entry("/a", &entry).unwrap();
        let mut out = Vec::new();
        let copied = store.snapshot_to(&mut out).unwrap();
        assert!(copied > 0);
        assert!(!out.is_empty());
    }
}
