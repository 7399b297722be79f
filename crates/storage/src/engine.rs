//! Public `read_file`/`write_file`/`delete_file`/`snapshot` surface over the
//! index store, one-or-more volume groups, and the dedup branch
//! (`spec.md` §4.5).

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::{Config, FileEntry, GroupId, StorageError, TombstoneEntry, VolumeId};
use dedup::ContentHash;
use platform::Platform;

use crate::index::IndexStore;
use crate::volume_group::VolumeGroup;

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64
}

struct AppendResult {
    group_id: GroupId,
    volume_id: VolumeId,
    offset: u64,
    size: u32,
}

pub struct BlobEngine {
    root: PathBuf,
    config: Config,
    platform: Arc<dyn Platform>,
    index: IndexStore,
    groups: Vec<VolumeGroup>,
    last_update: AtomicU64,
    last_snapshot: AtomicU64,
}

impl BlobEngine {
    /// Opens (or initializes) the engine's data directory: the index store
    /// at `<root>/storage.db`, and one `VolumeGroup` per configured file
    /// group, in the order `config.file_groups` lists them (this becomes
    /// the preference order `write_file` step 4 walks).
    pub fn open(root: PathBuf, config: Config, platform: Arc<dyn Platform>) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        let index = IndexStore::open(&root.join("storage.db"), Arc::clone(&platform))?;

        let mut groups = Vec::with_capacity(config.file_groups.len());
        for fg in &config.file_groups {
            let group = VolumeGroup::open(
                fg.group_id,
                fg.path.clone(),
                config.volume_slice_size,
                config.disk_remain,
                Arc::clone(&platform),
            )?;
            groups.push(group);
        }

        tracing::debug!(root = %root.display(), groups = groups.len(), "blob engine: opened");

        Ok(BlobEngine {
            root,
            config,
            platform,
            index,
            groups,
            last_update: AtomicU64::new(0),
            last_snapshot: AtomicU64::new(0),
        })
    }

    pub fn dedup_enabled(&self) -> bool {
        self.config.dedup_enabled
    }

    #[tracing::instrument(skip(self))]
    pub fn read_file(&self, path: &str) -> Result<(String, String, Vec<u8>), StorageError> {
        let entry = self
            .index
            .get_file_entry(path)?
            .ok_or_else(|| StorageError::not_exist(path))?;
        let bytes = self.read_entry(&entry)?;
        Ok((entry.mime, entry.metadata, bytes))
    }

    pub(crate) fn read_entry(&self, entry: &FileEntry) -> Result<Vec<u8>, StorageError> {
        let group = self
            .groups
            .iter()
            .find(|g| g.group_id() == entry.group_id)
            .ok_or_else(|| StorageError::not_exist(format!("group {}", entry.group_id)))?;
        let volume = group
            .get(entry.volume_id)
            .ok_or_else(|| StorageError::not_exist(format!("volume {}", entry.volume_id)))?;
        volume.read_at(entry.volume_offset, entry.size)
    }

    #[tracing::instrument(skip(self, data))]
    pub fn write_file(
        &self,
        path: &str,
        mime: &str,
        metadata: &str,
        data: &[u8],
        overwrite: bool,
    ) -> Result<(), StorageError> {
        if path.is_empty() || !path.starts_with('/') {
            return Err(StorageError::bad_param("path must begin with '/'"));
        }

        // Step 1: admission.
        let stat = self.platform.disk_stat(&self.root)?;
        if stat.free < self.config.disk_remain {
            tracing::warn!(free = stat.free, reserved = self.config.disk_remain, "write_file: storage full");
            return Err(StorageError::storage_full(stat.free, self.config.disk_remain));
        }

        // Step 2: overwrite gate.
        let prior = self.index.get_file_entry(path)?;
        if !overwrite && prior.is_some() {
            return Err(StorageError::exists(path));
        }

        // Steps 3/4: dedup branch, else fresh append.
        let hash = self.config.dedup_enabled.then(|| ContentHash::of(data));
        let result = match &hash {
            Some(hash) => match self.index.get_hash_entry(hash.as_bytes())? {
                Some(existing) => AppendResult {
                    group_id: existing.group_id,
                    volume_id: existing.volume_id,
                    offset: existing.volume_offset,
                    size: existing.size,
                },
                None => self.append_new(data, Some(hash))?,
            },
            None => self.append_new(data, None)?,
        };

        // Step 5: put the file entry, tombstoning any prior one.
        if let Some(prior_entry) = prior {
            let ts = now_nanos();
            let tombstone_key = format!("{path}\r\n{ts}");
            let tombstone = TombstoneEntry {
                path: path.to_string(),
                replaced_at_nanos: ts,
                prior: prior_entry,
            };
            self.index.put_tombstone(&tombstone_key, &tombstone)?;
        }
        let entry = FileEntry {
            size: result.size,
            mime: mime.to_string(),
            metadata: metadata.to_string(),
            group_id: result.group_id,
            volume_id: result.volume_id,
            volume_offset: result.offset,
        };
        self.index.put_file_entry(path, &entry)?;

        // Step 6.
        self.last_update.store(now_nanos(), Ordering::Release);
        Ok(())
    }

    /// Ordering rule R1: when a hash is supplied, its hash entry is
    /// committed before this function returns, so the file entry put in
    /// `write_file` step 5 never precedes it. Ordering rule R2: the
    /// append+fsync (inside `VolumeFile::append`) happens before either
    /// index put.
    fn append_new(&self, data: &[u8], hash: Option<&ContentHash>) -> Result<AppendResult, StorageError> {
        let group = self.pick_writable_group()?;
        let volume = group.require_writable()?;
        let offset = volume.append(data)?;
        group.note_append(volume.id());
        let size = data.len() as u32;

        if let Some(hash) = hash {
            let hash_entry = common::HashEntry {
                size,
                group_id: group.group_id(),
                volume_id: volume.id(),
                volume_offset: offset,
            };
            self.index.put_hash_entry(hash.as_bytes(), &hash_entry)?;
        }

        Ok(AppendResult {
            group_id: group.group_id(),
            volume_id: volume.id(),
            offset,
            size,
        })
    }

    fn pick_writable_group(&self) -> Result<&VolumeGroup, StorageError> {
        for group in &self.groups {
            if !group.is_full()? {
                return Ok(group);
            }
        }
        Err(StorageError::storage_full(0, self.config.disk_remain))
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let prior = self
            .index
            .get_file_entry(path)?
            .ok_or_else(|| StorageError::not_exist(path))?;
        let ts = now_nanos();
        let tombstone_key = format!("{path}\r\n{ts}");
        let tombstone = TombstoneEntry {
            path: path.to_string(),
            replaced_at_nanos: ts,
            prior,
        };
        self.index.delete_file_entry(path, &tombstone_key, &tombstone)?;
        self.last_update.store(now_nanos(), Ordering::Release);
        Ok(())
    }

    /// `snapshot(false)` is a no-op unless the index has mutated since the
    /// last snapshot AND the configured interval has elapsed; `snapshot(true)`
    /// bypasses both checks. The watermark sampled at the start (not the
    /// end) becomes the new `last_snapshot`, per §9's "snapshot watermark"
    /// note.
    #[tracing::instrument(skip(self))]
    pub fn snapshot(&self, force: bool) -> Result<Option<String>, StorageError> {
        let watermark = self.last_update.load(Ordering::Acquire);
        let last_snapshot = self.last_snapshot.load(Ordering::Acquire);

        if !force {
            if last_snapshot >= watermark {
                return Ok(None);
            }
            let interval_nanos = self.config.snapshot_interval_secs.saturating_mul(1_000_000_000);
            if now_nanos().saturating_sub(last_snapshot) < interval_nanos {
                return Ok(None);
            }
        }

        let snapshots_dir = self.root.join("snapshots");
        std::fs::create_dir_all(&snapshots_dir)?;
        let name = format!("storage.db.{}.gz", now_nanos());
        let path = snapshots_dir.join(&name);

        let outcome = (|| -> Result<(), StorageError> {
            let file = File::create(&path)?;
            self.index.snapshot_to(file)?;
            Ok(())
        })();

        if let Err(err) = outcome {
            let _ = std::fs::remove_file(&path);
            tracing::warn!(error = %err, "snapshot: failed, removed partial artifact");
            return Err(err);
        }

        self.last_snapshot.store(watermark, Ordering::Release);
        self.prune_snapshots(&snapshots_dir)?;
        tracing::debug!(name, "snapshot: wrote artifact");
        Ok(Some(name))
    }

    fn prune_snapshots(&self, dir: &std::path::Path) -> Result<(), StorageError> {
        let mut names: Vec<String> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("storage.db.") && n.ends_with(".gz"))
            .collect();
        names.sort();

        let reserve = self.config.snapshot_reserve;
        if names.len() > reserve {
            for name in &names[..names.len() - reserve] {
                let _ = std::fs::remove_file(dir.join(name));
            }
        }
        Ok(())
    }

    /// Closes the index store and every volume group's lock. Safe to call
    /// more than once.
    pub fn close(&self) {
        self.index.close();
        for group in &self.groups {
            group.close();
        }
    }
}
