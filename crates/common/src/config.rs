//! Loader for the engine's `key=value` configuration format (`spec.md` §6):
//! `#` comments, blank lines ignored, `{{DATA}}` substituted with the data
//! root, repeated keys accumulate, unrecognized keys are logged and
//! skipped rather than rejected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// One `group_id:path` entry from a repeated `storage.volume.filegroups` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroupConfig {
    pub group_id: u16,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Reserved free-disk threshold; writes fail `storage_full` below this.
    pub disk_remain: u64,
    /// Minimum elapsed seconds between non-forced snapshots.
    pub snapshot_interval_secs: u64,
    /// Newest N snapshots to keep.
    pub snapshot_reserve: usize,
    /// Per-volume size cap, in bytes.
    pub volume_slice_size: u64,
    /// Volume groups in configured (preference) order.
    pub file_groups: Vec<FileGroupConfig>,
    /// Allow-listed `WxH` thumbnail sizes.
    pub thumbnail_sizes: Vec<(u32, u32)>,
    /// Whether the hash namespace (content-hash dedup) is active. The
    /// original loader calls this `enableHash`; generalized here to a
    /// config switch rather than a compile-time constant.
    pub dedup_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            disk_remain: 1024 * 1024 * 1024,
            snapshot_interval_secs: 3600,
            snapshot_reserve: 5,
            volume_slice_size: 4 * 1024 * 1024 * 1024,
            file_groups: Vec::new(),
            thumbnail_sizes: Vec::new(),
            dedup_enabled: true,
        }
    }
}

impl Config {
    /// Parses a config file, substituting `{{DATA}}` in path-valued keys
    /// with `data_root`.
    pub fn load(path: &Path, data_root: &Path) -> Result<Config, StorageError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text, data_root))
    }

    pub fn parse(text: &str, data_root: &Path) -> Config {
        let mut config = Config::default();
        let mut multi: HashMap<&str, Vec<String>> = HashMap::new();

        for raw_line in text.lines() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!(line = raw_line, "config: ignoring line with no '='");
                continue;
            };
            let key = key.trim();
            let value = substitute_data(value.trim(), data_root);

            match key {
                "storage.disk.remain" => match parse_size(&value) {
                    Some(v) => config.disk_remain = v,
                    None => tracing::warn!(key, value, "config: bad size value"),
                },
                "storage.snapshot.interval" => match value.parse() {
                    Ok(v) => config.snapshot_interval_secs = v,
                    Err(_) => tracing::warn!(key, value, "config: bad integer value"),
                },
                "storage.snapshot.reserve" => match value.parse() {
                    Ok(v) => config.snapshot_reserve = v,
                    Err(_) => tracing::warn!(key, value, "config: bad integer value"),
                },
                "storage.volume.slicesize" => match parse_size(&value) {
                    Some(v) => config.volume_slice_size = v,
                    None => tracing::warn!(key, value, "config: bad size value"),
                },
                "storage.volume.filegroups" => {
                    multi.entry("filegroups").or_default().push(value);
                }
                "network.image.thumbnail.sizes" => {
                    multi.entry("sizes").or_default().push(value);
                }
                "storage.dedup.enable" => match value.as_str() {
                    "1" | "true" | "yes" => config.dedup_enabled = true,
                    "0" | "false" | "no" => config.dedup_enabled = false,
                    _ => tracing::warn!(key, value, "config: bad boolean value"),
                },
                other => {
                    tracing::warn!(key = other, "config: unrecognized key, ignoring");
                }
            }
        }

        if let Some(values) = multi.get("filegroups") {
            for v in values {
                match parse_file_group(v) {
                    Some(fg) => config.file_groups.push(fg),
                    None => tracing::warn!(value = v.as_str(), "config: bad filegroups entry"),
                }
            }
        }
        if let Some(values) = multi.get("sizes") {
            for v in values {
                for entry in v.split(',') {
                    match crate::model::parse_wxh(entry.trim()) {
                        Some(wh) => config.thumbnail_sizes.push(wh),
                        None => tracing::warn!(value = entry, "config: bad thumbnail size"),
                    }
                }
            }
        }

        config
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn substitute_data(value: &str, data_root: &Path) -> String {
    value.replace("{{DATA}}", &data_root.to_string_lossy())
}

fn parse_file_group(s: &str) -> Option<FileGroupConfig> {
    let (id, path) = s.split_once(':')?;
    Some(FileGroupConfig {
        group_id: id.trim().parse().ok()?,
        path: PathBuf::from(path.trim()),
    })
}

/// Parses the size-suffix grammar from `spec.md` §6:
/// `^[0-9]+(M|m|G|g|K|k)?(B|b)?$`, 1024-based units.
pub fn parse_size(s: &str) -> Option<u64> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return None;
    }
    let mut end = bytes.len();
    if matches!(bytes[end - 1], b'B' | b'b') {
        end -= 1;
    }
    if end == 0 {
        return None;
    }
    let (digits, multiplier) = match bytes[end - 1] {
        b'K' | b'k' => (&s[..end - 1], 1024u64),
        b'M' | b'm' => (&s[..end - 1], 1024 * 1024),
        b'G' | b'g' => (&s[..end - 1], 1024 * 1024 * 1024),
        b'0'..=b'9' => (&s[..end], 1),
        _ => return None,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("64"), Some(64));
        assert_eq!(parse_size("64B"), Some(64));
        assert_eq!(parse_size("64K"), Some(64 * 1024));
        assert_eq!(parse_size("64k"), Some(64 * 1024));
        assert_eq!(parse_size("2M"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("1Gb"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("abc"), None);
    }

    #[test]
    fn parse_substitutes_data_root() {
        let text = "storage.volume.filegroups=0:{{DATA}}/group0/\n";
        let cfg = Config::parse(text, Path::new("/var/tinynfs"));
        assert_eq!(
            cfg.file_groups,
            vec![FileGroupConfig {
                group_id: 0,
                path: PathBuf::from("/var/tinynfs/group0/"),
            }]
        );
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let text = "\n# a comment\nstorage.disk.remain = 64M  # trailing note\n\n";
        let cfg = Config::parse(text, Path::new("/data"));
        assert_eq!(cfg.disk_remain, 64 * 1024 * 1024);
    }

    #[test]
    fn parse_collects_repeated_thumbnail_sizes() {
        let text = "network.image.thumbnail.sizes=192x192\nnetwork.image.thumbnail.sizes=96x96\n";
        let cfg = Config::parse(text, Path::new("/data"));
        assert_eq!(cfg.thumbnail_sizes, vec![(192, 192), (96, 96)]);
    }

    #[test]
    fn parse_ignores_unrecognized_keys() {
        let text = "made.up.key=1\nstorage.snapshot.reserve=3\n";
        let cfg = Config::parse(text, Path::new("/data"));
        assert_eq!(cfg.snapshot_reserve, 3);
    }

    #[test]
    fn parse_reads_dedup_toggle() {
        let cfg = Config::parse("storage.dedup.enable=false\n", Path::new("/data"));
        assert!(!cfg.dedup_enabled);
        let cfg = Config::parse("storage.dedup.enable=true\n", Path::new("/data"));
        assert!(cfg.dedup_enabled);
    }
}
