//! A directory of volume files sharing a size cap and a cross-process lock
//! (`spec.md` §3 "Volume group", §4.3).

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use common::{GroupId, StorageError, VolumeId};
use platform::{LockHandle, Platform};

use crate::volume::VolumeFile;

struct Inner {
    all: BTreeMap<VolumeId, Arc<VolumeFile>>,
    writable: BTreeSet<VolumeId>,
    next_id: u64,
}

pub struct VolumeGroup {
    group_id: GroupId,
    root: PathBuf,
    cap: u64,
    reserved: u64,
    platform: Arc<dyn Platform>,
    lock: Mutex<Option<LockHandle>>,
    inner: Mutex<Inner>,
}

impl VolumeGroup {
    /// Opens (creating if absent) the directory at `root`, acquires its
    /// `volume.lock`, and scans for existing `volume-<digits>` files.
    /// Unparseable names and ids below `common::MIN_VOLUME_ID` are logged
    /// and skipped rather than failing the whole open.
    pub fn open(
        group_id: GroupId,
        root: PathBuf,
        cap: u64,
        reserved: u64,
        platform: Arc<dyn Platform>,
    ) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        let lock = platform.try_lock_exclusive(&root.join("volume.lock"))?;

        let mut all = BTreeMap::new();
        let mut writable = BTreeSet::new();
        let mut max_id = 0u64;

        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(digits) = name.strip_prefix("volume-") else {
                continue;
            };
            let Ok(id) = digits.parse::<u64>() else {
                tracing::warn!(name = %name, "volume group: unparseable volume file name, skipping");
                continue;
            };
            if id < common::MIN_VOLUME_ID {
                tracing::warn!(id, "volume group: pre-epoch volume id, skipping");
                continue;
            }

            let volume = VolumeFile::open(id, &entry.path())?;
            if volume.size() < cap {
                writable.insert(id);
            }
            max_id = max_id.max(id);
            all.insert(id, Arc::new(volume));
        }

        let next_id = (max_id + 1).max(common::MIN_VOLUME_ID);

        tracing::debug!(group = group_id, volumes = all.len(), "volume group: opened");

        Ok(VolumeGroup {
            group_id,
            root,
            cap,
            reserved,
            platform,
            lock: Mutex::new(Some(lock)),
            inner: Mutex::new(Inner {
                all,
                writable,
                next_id,
            }),
        })
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Returns a volume whose size is still under the cap, creating a new
    /// one if none qualifies. Ascending-id order so small writes pack into
    /// the oldest non-full volume first.
    pub fn require_writable(&self) -> Result<Arc<VolumeFile>, StorageError> {
        let mut inner = self.inner.lock().expect("volume group mutex poisoned");
        if let Some(&id) = inner.writable.iter().next() {
            return Ok(Arc::clone(&inner.all[&id]));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let path = self.root.join(format!("volume-{id}"));
        let volume = Arc::new(VolumeFile::create(id, &path)?);
        inner.all.insert(id, Arc::clone(&volume));
        inner.writable.insert(id);
        tracing::debug!(group = self.group_id, id, "volume group: created new volume");
        Ok(volume)
    }

    /// Removes `volume_id` from `writable` once its size has reached the
    /// cap. Called after an append completes, never while the append's
    /// write mutex is held.
    pub fn note_append(&self, volume_id: VolumeId) {
        let mut inner = self.inner.lock().expect("volume group mutex poisoned");
        if let Some(volume) = inner.all.get(&volume_id) {
            if volume.size() >= self.cap {
                inner.writable.remove(&volume_id);
            }
        }
    }

    pub fn get(&self, volume_id: VolumeId) -> Option<Arc<VolumeFile>> {
        let inner = self.inner.lock().expect("volume group mutex poisoned");
        inner.all.get(&volume_id).cloned()
    }

    pub fn all_volume_count(&self) -> usize {
        self.inner.lock().expect("volume group mutex poisoned").all.len()
    }

    pub fn writable_volume_count(&self) -> usize {
        self.inner
            .lock()
            .expect("volume group mutex poisoned")
            .writable
            .len()
    }

    pub fn is_full(&self) -> Result<bool, StorageError> {
        let stat = self.platform.disk_stat(&self.root)?;
        Ok(stat.free < self.reserved)
    }

    pub fn close(&self) {
        let mut guard = self.lock.lock().expect("volume group lock mutex poisoned");
        if let Some(handle) = guard.take() {
            let _ = handle.unlock();
        }
    }
}
