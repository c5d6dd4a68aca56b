//! Tests for compaction
//!
//! These tests verify:
//! - Superseded records and tombstones are reclaimed
//! - Liveness preservation (visible data is unchanged)
//! - Merge artifacts are cleaned up
//! - Disk usage shrinks when garbage exists
//! - Writes issued during compaction survive
//! - Recovery from an interrupted merge

use std::collections::HashMap;
use std::fs;

use emberkv::{Compactor, Config, EmberError, Engine};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open(temp_dir: &TempDir, max_segment_size: u64) -> Engine {
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .max_segment_size(max_segment_size)
        .build();
    Engine::open(config, "test").unwrap()
}

/// (id, size) of every numeric data segment, ascending
fn data_segments(temp_dir: &TempDir) -> Vec<(u64, u64)> {
    let mut segments: Vec<(u64, u64)> = fs::read_dir(temp_dir.path())
        .unwrap()
        .filter_map(|entry| {
            let entry = entry.unwrap();
            let name = entry.file_name().to_string_lossy().into_owned();
            let id = name.strip_suffix(".dat")?.parse::<u64>().ok()?;
            Some((id, entry.metadata().unwrap().len()))
        })
        .collect();
    segments.sort();
    segments
}

fn disk_usage(temp_dir: &TempDir) -> u64 {
    data_segments(temp_dir).iter().map(|(_, size)| size).sum()
}

fn merge_artifacts(temp_dir: &TempDir) -> Vec<String> {
    fs::read_dir(temp_dir.path())
        .unwrap()
        .filter_map(|entry| {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            (name.starts_with("merge_") || name == "merge.json").then_some(name)
        })
        .collect()
}

// =============================================================================
// Basic Compaction Tests
// =============================================================================

#[test]
fn test_compact_drops_tombstones_and_stale_versions() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(&temp_dir, 1024 * 1024);

    engine.set(b"a", b"x").unwrap();
    engine.set(b"b", b"y").unwrap();
    engine.delete(b"a").unwrap();

    Compactor::new(&engine).execute().unwrap();

    assert!(merge_artifacts(&temp_dir).is_empty());
    assert!(matches!(engine.get(b"a").unwrap_err(), EmberError::KeyNotFound));
    assert_eq!(engine.get(b"b").unwrap().value, b"y");
    assert_eq!(engine.len(), 1);

    // Survives a reopen
    engine.close().unwrap();
    let engine = open(&temp_dir, 1024 * 1024);
    assert!(!engine.has(b"a"));
    assert_eq!(engine.get(b"b").unwrap().value, b"y");
}

#[test]
fn test_compact_preserves_all_live_pairs() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(&temp_dir, 8 * 1024);

    let mut expected: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
    for i in 0..200u32 {
        let key = format!("key{i}").into_bytes();
        let value = format!("value{i}-{}", "x".repeat(i as usize % 64)).into_bytes();
        engine.set(&key, &value).unwrap();
        expected.insert(key, value);
    }
    // Churn: overwrite some, delete some
    for i in (0..200u32).step_by(3) {
        let key = format!("key{i}").into_bytes();
        let value = format!("updated{i}").into_bytes();
        engine.set(&key, &value).unwrap();
        expected.insert(key, value);
    }
    for i in (0..200u32).step_by(7) {
        let key = format!("key{i}").into_bytes();
        engine.delete(&key).unwrap();
        expected.remove(&key);
    }

    Compactor::new(&engine).execute().unwrap();

    assert_eq!(engine.len(), expected.len());
    for (key, value) in &expected {
        assert_eq!(&engine.get(key).unwrap().value, value);
    }

    // And the same after recovery from disk
    engine.close().unwrap();
    let engine = open(&temp_dir, 8 * 1024);
    assert_eq!(engine.len(), expected.len());
    for (key, value) in &expected {
        assert_eq!(&engine.get(key).unwrap().value, value);
    }
}

#[test]
fn test_compact_reclaims_disk_space() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(&temp_dir, 1024 * 1024);

    // 40 keys of 100 KiB forces several segments at the 1 MiB threshold
    let value = vec![b'v'; 100 * 1024];
    for i in 0..40u32 {
        engine.set(format!("key{i}").as_bytes(), &value).unwrap();
    }
    assert!(data_segments(&temp_dir).len() >= 4);

    for i in 0..10u32 {
        engine.delete(format!("key{i}").as_bytes()).unwrap();
    }
    let updated = vec![b'u'; 100 * 1024];
    for i in 10..20u32 {
        engine.set(format!("key{i}").as_bytes(), &updated).unwrap();
    }

    let before = disk_usage(&temp_dir);
    Compactor::new(&engine).execute().unwrap();
    let after = disk_usage(&temp_dir);

    assert!(after < before, "expected {after} < {before}");
    assert_eq!(engine.len(), 30);
    for i in 10..20u32 {
        assert_eq!(engine.get(format!("key{i}").as_bytes()).unwrap().value, updated);
    }
    for i in 20..40u32 {
        assert_eq!(engine.get(format!("key{i}").as_bytes()).unwrap().value, value);
    }
}

#[test]
fn test_compact_twice_is_stable() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(&temp_dir, 4 * 1024);

    for i in 0..100u32 {
        engine.set(format!("key{i}").as_bytes(), b"some stable value").unwrap();
    }
    for i in (0..100u32).step_by(2) {
        engine.delete(format!("key{i}").as_bytes()).unwrap();
    }

    Compactor::new(&engine).execute().unwrap();
    let first: Vec<(u64, u64)> = data_segments(&temp_dir)
        .into_iter()
        .filter(|(_, size)| *size > 0)
        .collect();

    Compactor::new(&engine).execute().unwrap();
    let second: Vec<(u64, u64)> = data_segments(&temp_dir)
        .into_iter()
        .filter(|(_, size)| *size > 0)
        .collect();

    // A quiescent database compacts to the same merged layout again; only
    // the (empty) frontier segment id moves forward
    assert_eq!(first, second);
    assert_eq!(engine.len(), 50);
}

#[test]
fn test_compact_everything_deleted() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(&temp_dir, 1024 * 1024);

    engine.set(b"a", b"1").unwrap();
    engine.set(b"b", b"2").unwrap();
    engine.delete(b"a").unwrap();
    engine.delete(b"b").unwrap();

    Compactor::new(&engine).execute().unwrap();

    assert_eq!(engine.len(), 0);
    assert!(merge_artifacts(&temp_dir).is_empty());

    engine.close().unwrap();
    let engine = open(&temp_dir, 1024 * 1024);
    assert_eq!(engine.len(), 0);
}

#[test]
fn test_compact_on_closed_engine_fails() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(&temp_dir, 1024 * 1024);
    engine.close().unwrap();

    let err = Compactor::new(&engine).execute().unwrap_err();
    assert!(matches!(err, EmberError::Closed));
}

// =============================================================================
// Online Compaction Tests
// =============================================================================

#[test]
fn test_writes_during_compaction_survive() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open(&temp_dir, 4 * 1024);

    for i in 0..100u32 {
        engine.set(format!("base{i}").as_bytes(), b"original").unwrap();
    }

    std::thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for i in 0..100u32 {
                let key = format!("online{i}");
                engine.set(key.as_bytes(), key.as_bytes()).unwrap();
            }
            // Some churn against pre-existing keys too
            for i in 0..20u32 {
                engine.set(format!("base{i}").as_bytes(), b"rewritten").unwrap();
            }
        });

        Compactor::new(&engine).execute().unwrap();
        writer.join().unwrap();
    });

    for i in 0..100u32 {
        let key = format!("online{i}");
        assert_eq!(engine.get(key.as_bytes()).unwrap().value, key.as_bytes());
    }
    for i in 0..20u32 {
        assert_eq!(engine.get(format!("base{i}").as_bytes()).unwrap().value, b"rewritten");
    }

    // All of it survives a reopen
    engine.close().unwrap();
    let engine = open(&temp_dir, 4 * 1024);
    assert_eq!(engine.len(), 200);
    assert_eq!(engine.get(b"online99").unwrap().value, b"online99");
}

// =============================================================================
// Interrupted Merge Recovery Tests
// =============================================================================

#[test]
fn test_open_discards_in_progress_merge() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open(&temp_dir, 1024 * 1024);
        engine.set(b"k1", b"v1").unwrap();
        engine.set(b"k2", b"v2").unwrap();
        engine.close().unwrap();
    }

    // Simulate a crash mid-merge: leftovers plus an in-progress state file
    fs::write(temp_dir.path().join("merge_0.dat"), b"partial merge output").unwrap();
    fs::write(temp_dir.path().join("merge_1.dat"), b"").unwrap();
    fs::write(
        temp_dir.path().join("merge.json"),
        br#"{"status":"in_progress","maxFileId":0}"#,
    )
    .unwrap();

    let engine = open(&temp_dir, 1024 * 1024);

    assert!(merge_artifacts(&temp_dir).is_empty());
    assert_eq!(engine.get(b"k1").unwrap().value, b"v1");
    assert_eq!(engine.get(b"k2").unwrap().value, b"v2");
}

#[test]
fn test_open_discards_merge_with_corrupt_state() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open(&temp_dir, 1024 * 1024);
        engine.set(b"k", b"v").unwrap();
        engine.close().unwrap();
    }

    fs::write(temp_dir.path().join("merge_0.dat"), b"junk").unwrap();
    fs::write(temp_dir.path().join("merge.json"), b"{not json").unwrap();

    let engine = open(&temp_dir, 1024 * 1024);

    assert!(merge_artifacts(&temp_dir).is_empty());
    assert_eq!(engine.get(b"k").unwrap().value, b"v");
}

#[test]
fn test_open_removes_completed_state_file() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open(&temp_dir, 1024 * 1024);
        engine.set(b"k", b"v").unwrap();
        engine.close().unwrap();
    }

    fs::write(
        temp_dir.path().join("merge.json"),
        br#"{"status":"completed","maxFileId":0}"#,
    )
    .unwrap();

    let engine = open(&temp_dir, 1024 * 1024);

    assert!(merge_artifacts(&temp_dir).is_empty());
    assert_eq!(engine.get(b"k").unwrap().value, b"v");
}
