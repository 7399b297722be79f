pub mod config;
pub mod error;
pub mod model;

pub use config::{Config, FileGroupConfig};
pub use error::StorageError;
pub use model::{
    derived_path, parse_wxh, split_thumbnail_suffix, DiskStat, FileEntry, GroupId, HashEntry,
    Namespace, TombstoneEntry, VolumeId,
};

/// Volume ids below this floor predate the epoch used by the nanosecond-clock
/// issuer this engine's id allocator replaces; an id below it can only mean a
/// corrupt or foreign directory (see `spec.md` §6).
pub const MIN_VOLUME_ID: u64 = 1_530_000_000_000_000_000;
