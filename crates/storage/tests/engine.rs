//! Cross-component scenarios from the literal end-to-end list: volume
//! rollover, dedup, overwrite semantics, and the snapshot cycle, driven
//! entirely through `storage`'s public API.

use std::sync::Arc;

use common::{Config, FileGroupConfig};
use platform::UnixPlatform;
use storage::BlobEngine;

fn open_engine(root: &std::path::Path, cap: u64, reserve: usize, dedup: bool) -> BlobEngine {
    let mut config = Config::default();
    config.volume_slice_size = cap;
    config.disk_remain = 0;
    config.snapshot_reserve = reserve;
    config.dedup_enabled = dedup;
    config.file_groups = vec![FileGroupConfig {
        group_id: 0,
        path: root.join("group0"),
    }];
    BlobEngine::open(root.to_path_buf(), config, Arc::new(UnixPlatform)).unwrap()
}

#[test]
fn scenario_empty_engine_write_read() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 64, 5, false);

    engine
        .write_file("/a/b", "text/plain", "", b"hello\ngo\n", true)
        .unwrap();
    let (mime, metadata, bytes) = engine.read_file("/a/b").unwrap();
    assert_eq!(mime, "text/plain");
    assert_eq!(metadata, "");
    assert_eq!(bytes, b"hello\ngo\n");
}

#[test]
fn scenario_dedup_distinct_paths_share_storage() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024, 5, true);

    engine.write_file("/x", "", "", b"DATA", true).unwrap();
    engine.write_file("/y", "", "", b"DATA", true).unwrap();

    let group_dir = dir.path().join("group0");
    let total: u64 = std::fs::read_dir(&group_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("volume-"))
        .map(|e| e.metadata().unwrap().len())
        .sum();
    assert_eq!(total, 4);
}

#[test]
fn scenario_volume_rollover() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 8, 5, false);

    engine.write_file("/1", "", "", b"12345678", true).unwrap();
    engine.write_file("/2", "", "", b"9", true).unwrap();

    let group_dir = dir.path().join("group0");
    let volumes: Vec<_> = std::fs::read_dir(&group_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("volume-"))
        .collect();
    assert_eq!(volumes.len(), 2);
}

#[test]
fn scenario_overwrite_false_collision() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 64, 5, false);

    engine
        .write_file("/a/b", "text/plain", "", b"hello\ngo\n", true)
        .unwrap();
    let err = engine.write_file("/a/b", "", "", b"x", false).unwrap_err();
    assert_eq!(err.code(), common::StorageError::exists("").code());

    let (_, _, bytes) = engine.read_file("/a/b").unwrap();
    assert_eq!(bytes, b"hello\ngo\n");
}

#[test]
fn scenario_snapshot_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024, 1, false);

    engine.write_file("/1", "", "", b"a", true).unwrap();
    engine.write_file("/2", "", "", b"b", true).unwrap();
    engine.write_file("/3", "", "", b"c", true).unwrap();

    let name = engine.snapshot(true).unwrap().expect("forced snapshot writes an artifact");
    assert!(dir.path().join("snapshots").join(&name).exists());

    assert!(engine.snapshot(false).unwrap().is_none());

    engine.write_file("/4", "", "", b"d", true).unwrap();
    engine.snapshot(true).unwrap().expect("second forced snapshot writes an artifact");

    let remaining: Vec<_> = std::fs::read_dir(dir.path().join("snapshots"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(remaining.len(), 1, "reserve=1 keeps only the newest snapshot");
}
