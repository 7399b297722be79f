use serde::{Deserialize, Serialize};

/// Small integer identifying a configured volume group.
pub type GroupId = u16;

/// Monotonically issued 64-bit volume identifier (see `common::MIN_VOLUME_ID`).
pub type VolumeId = u64;

/// Logical namespace a key belongs to inside the index store. Folded into
/// the physical key so one append-only log can serve all three namespaces
/// while staying a single ordered keyspace (see `storage::index`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    Files,
    Hashes,
    Tombstones,
}

impl Namespace {
    pub fn tag(self) -> u8 {
        match self {
            Namespace::Files => 0,
            Namespace::Hashes => 1,
            Namespace::Tombstones => 2,
        }
    }
}

/// Index record for a logical path (`spec.md` §3 "Index record — file
/// entry"). Field names are part of the on-disk wire format and must not be
/// renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub size: u32,
    pub mime: String,
    pub metadata: String,
    pub group_id: GroupId,
    pub volume_id: VolumeId,
    pub volume_offset: u64,
}

/// Index record for a content hash (`spec.md` §3 "Index record — hash
/// entry"). Field names are part of the on-disk wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashEntry {
    pub size: u32,
    pub group_id: GroupId,
    pub volume_id: VolumeId,
    pub volume_offset: u64,
}

/// Value stored under the tombstone namespace: the prior record a
/// replace/delete pushed out, recorded only for a future compaction pass
/// that the core never reads back (`spec.md` §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TombstoneEntry {
    pub path: String,
    pub replaced_at_nanos: u64,
    pub prior: FileEntry,
}

/// Filesystem free-space snapshot returned by `Platform::disk_stat`.
#[derive(Debug, Clone, Copy)]
pub struct DiskStat {
    pub size: u64,
    pub free: u64,
    pub used: u64,
}

/// Builds the synthetic derived-path key for a materialized thumbnail:
/// `"<origin>_<W>x<H>"`.
pub fn derived_path(origin: &str, width: u32, height: u32) -> String {
    format!("{origin}_{width}x{height}")
}

/// Parses a trailing `"_<W>x<H>"` suffix off a requested path, returning the
/// origin path and the requested `(width, height)` if the suffix matches the
/// `_[0-9]+x[0-9]+$` shape the original HTTP image server recognizes.
pub fn split_thumbnail_suffix(path: &str) -> Option<(&str, u32, u32)> {
    let underscore = path.rfind('_')?;
    let suffix = &path[underscore + 1..];
    let (w, h) = parse_wxh(suffix)?;
    Some((&path[..underscore], w, h))
}

/// Parses a `"WxH"` string, e.g. metadata stored on a file entry.
pub fn parse_wxh(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    if w.is_empty() || h.is_empty() || !w.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !h.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((w.parse().ok()?, h.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_path_format() {
        assert_eq!(derived_path("/pic", 192, 192), "/pic_192x192");
    }

    #[test]
    fn split_thumbnail_suffix_matches() {
        assert_eq!(
            split_thumbnail_suffix("/pic_192x192"),
            Some(("/pic", 192, 192))
        );
        assert_eq!(split_thumbnail_suffix("/pic"), None);
        assert_eq!(split_thumbnail_suffix("/pic_192xNaN"), None);
    }

    #[test]
    fn parse_wxh_rejects_garbage() {
        assert_eq!(parse_wxh("800x600"), Some((800, 600)));
        assert_eq!(parse_wxh("x600"), None);
        assert_eq!(parse_wxh("800x"), None);
        assert_eq!(parse_wxh(""), None);
    }
}
