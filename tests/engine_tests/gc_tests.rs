//! Tests for log file GC
//!
//! These tests verify:
//! - Live entries move out of compacted files with unchanged values
//! - Compacted files are deleted and their discard records cleared
//! - Writes racing with GC keep the newest value
//! - Tombstones that still shadow older files survive compaction
//! - Dropping an expired entry keeps older values shadowed
//! - Files with a corrupt entry are removed only when no key points into them
//! - Overlapping runs on one data type and runs on different data types

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use lotuskv::config::Config;
use lotuskv::engine::Engine;
use lotuskv::error::LotusError;
use lotuskv::index::Location;
use lotuskv::logfile::{log_file_path, DataType, LogEntry};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_small_engine(temp_dir: &TempDir) -> Engine {
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .log_file_size_threshold(1024)
        .log_file_gc_interval(None)
        .build();
    Engine::open(config).unwrap()
}

fn value_for(key: usize, round: usize) -> Vec<u8> {
    format!("{key:04}-{round:035}").into_bytes()
}

/// Writes keys 0..100 once, then overwrites the even ones.
fn write_half_stale(engine: &Engine) {
    for i in 0..100 {
        engine.set(format!("key-{i:03}").as_bytes(), &value_for(i, 0)).unwrap();
    }
    for i in (0..100).step_by(2) {
        engine.set(format!("key-{i:03}").as_bytes(), &value_for(i, 1)).unwrap();
    }
}

/// Writes keys until the first log file is full. The last key returned
/// already sits in the second file.
fn fill_first_file(engine: &Engine) -> Vec<String> {
    let store = engine.store(DataType::String);
    let mut keys = Vec::new();
    while store.active_fid() == 1 {
        let key = format!("key-{:03}", keys.len());
        engine.set(key.as_bytes(), &value_for(keys.len(), 0)).unwrap();
        keys.push(key);
    }
    keys
}

/// Flip the last byte of the entry at `location`
fn corrupt_entry(path: &Path, location: &Location) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let offset = location.offset + u64::from(location.entry_size) - 1;

    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
    file.sync_all().unwrap();
}

fn expected_value(i: usize) -> Vec<u8> {
    if i % 2 == 0 {
        value_for(i, 1)
    } else {
        value_for(i, 0)
    }
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_gc_moves_live_entries() {
    let temp = TempDir::new().unwrap();
    let engine = setup_small_engine(&temp);
    let store = engine.store(DataType::String);
    write_half_stale(&engine);

    let archived_before = store.archived_fids();
    let stats = engine.run_log_file_gc(DataType::String, 0.3).unwrap();
    assert!(stats.files_compacted > 0);
    assert!(stats.entries_rewritten > 0);
    assert!(stats.entries_dropped > 0);

    let archived_after = store.archived_fids();
    let compacted: Vec<u32> = archived_before
        .iter()
        .copied()
        .filter(|fid| !archived_after.contains(fid))
        .collect();
    assert_eq!(compacted.len(), stats.files_compacted);

    for fid in &compacted {
        assert!(!temp.path().join(format!("log.strs.{fid:09}")).exists());
        assert_eq!(store.discard_record(*fid).unwrap(), None);
    }

    for i in 0..100 {
        let key = format!("key-{i:03}");
        assert_eq!(engine.get(key.as_bytes()).unwrap(), expected_value(i));
        let location = store.location(key.as_bytes()).unwrap();
        assert!(!compacted.contains(&location.fid));
    }
}

#[test]
fn test_gc_skips_files_under_ratio() {
    let temp = TempDir::new().unwrap();
    let engine = setup_small_engine(&temp);
    let store = engine.store(DataType::String);

    for i in 0..100 {
        engine.set(format!("key-{i:03}").as_bytes(), &value_for(i, 0)).unwrap();
    }
    let archived = store.archived_fids();
    assert!(!archived.is_empty());

    let stats = engine.run_log_file_gc(DataType::String, 0.5).unwrap();
    assert_eq!(stats.files_compacted, 0);
    assert_eq!(store.archived_fids(), archived);
}

#[test]
fn test_gc_never_touches_active_file() {
    let temp = TempDir::new().unwrap();
    let engine = setup_small_engine(&temp);
    let store = engine.store(DataType::String);

    for round in 0..5 {
        engine.set(b"only", &value_for(0, round)).unwrap();
    }
    assert_eq!(store.active_fid(), 1);

    let stats = engine.run_log_file_gc(DataType::String, 0.01).unwrap();
    assert_eq!(stats.files_compacted, 0);
    assert_eq!(engine.get(b"only").unwrap(), value_for(0, 4));
}

#[test]
fn test_gc_result_survives_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let engine = setup_small_engine(&temp);
        write_half_stale(&engine);
        engine.run_log_file_gc(DataType::String, 0.3).unwrap();
        engine.close().unwrap();
    }

    let engine = setup_small_engine(&temp);
    assert_eq!(engine.store(DataType::String).len(), 100);
    for i in 0..100 {
        assert_eq!(engine.get(format!("key-{i:03}").as_bytes()).unwrap(), expected_value(i));
    }
}

#[test]
fn test_gc_keeps_needed_tombstone() {
    let temp = TempDir::new().unwrap();
    {
        let engine = setup_small_engine(&temp);
        let store = engine.store(DataType::String);

        // fid 1: the victim plus live filler
        engine.set(b"victim", &value_for(0, 0)).unwrap();
        let mut i = 0;
        while store.active_fid() == 1 {
            engine.set(format!("filler-{i:02}").as_bytes(), &value_for(i, 0)).unwrap();
            i += 1;
        }

        // fid 2: the tombstone plus churn that goes stale
        engine.delete(b"victim").unwrap();
        let mut round = 0;
        while store.active_fid() == 2 {
            engine.set(b"churn", &value_for(0, round)).unwrap();
            round += 1;
        }

        let stats = engine.run_log_file_gc(DataType::String, 0.5).unwrap();
        assert_eq!(stats.files_compacted, 1);
        assert_eq!(store.archived_fids(), vec![1]);
        assert!(matches!(engine.get(b"victim"), Err(LotusError::KeyNotFound)));
        engine.close().unwrap();
    }

    // The tombstone was carried forward, so fid 1 cannot resurrect the victim
    let engine = setup_small_engine(&temp);
    assert!(matches!(engine.get(b"victim"), Err(LotusError::KeyNotFound)));
    assert!(engine.get(b"churn").is_ok());
    assert!(engine.get(b"filler-00").is_ok());
}

#[test]
fn test_gc_of_expired_entry_keeps_older_value_shadowed() {
    let temp = TempDir::new().unwrap();
    {
        let engine = setup_small_engine(&temp);
        let store = engine.store(DataType::String);

        // fid 1: the first value plus live filler
        engine.set(b"victim", &value_for(0, 0)).unwrap();
        let mut i = 0;
        while store.active_fid() == 1 {
            engine.set(format!("filler-{i:02}").as_bytes(), &value_for(i, 0)).unwrap();
            i += 1;
        }

        // fid 2: an overwrite that has already expired, plus churn that goes stale
        store.put(b"victim", &value_for(0, 1), 1).unwrap();
        let mut round = 0;
        while store.active_fid() == 2 {
            engine.set(b"churn", &value_for(0, round)).unwrap();
            round += 1;
        }

        let stats = engine.run_log_file_gc(DataType::String, 0.5).unwrap();
        assert_eq!(stats.files_compacted, 1);
        assert_eq!(store.archived_fids(), vec![1]);
        assert!(matches!(engine.get(b"victim"), Err(LotusError::KeyNotFound)));

        // The tombstone written for the expired entry is stale on arrival
        let tombstone_size = LogEntry::tombstone(&b"victim"[..]).encode().1 as u32;
        assert_eq!(store.discard_record(3).unwrap().unwrap().discard, tombstone_size);
        engine.close().unwrap();
    }

    let engine = setup_small_engine(&temp);
    assert!(matches!(engine.get(b"victim"), Err(LotusError::KeyNotFound)));
    assert!(engine.get(b"churn").is_ok());
    assert!(engine.get(b"filler-00").is_ok());
}

#[test]
fn test_gc_removes_corrupt_file_without_live_keys() {
    let temp = TempDir::new().unwrap();
    let engine = setup_small_engine(&temp);
    let store = engine.store(DataType::String);

    let keys = fill_first_file(&engine);
    let second = store.location(keys[1].as_bytes()).unwrap();
    assert_eq!(second.fid, 1);
    for (i, key) in keys.iter().enumerate() {
        engine.set(key.as_bytes(), &value_for(i, 1)).unwrap();
    }

    let path = log_file_path(temp.path(), DataType::String, 1);
    corrupt_entry(&path, &second);

    let stats = engine.run_log_file_gc(DataType::String, 0.5).unwrap();
    assert!(stats.files_compacted >= 1);
    assert!(!store.archived_fids().contains(&1));
    assert!(!path.exists());
    assert_eq!(store.discard_record(1).unwrap(), None);

    for (i, key) in keys.iter().enumerate() {
        assert_eq!(engine.get(key.as_bytes()).unwrap(), value_for(i, 1));
    }
}

#[test]
fn test_gc_keeps_corrupt_file_with_live_keys() {
    let temp = TempDir::new().unwrap();
    let engine = setup_small_engine(&temp);
    let store = engine.store(DataType::String);

    let keys = fill_first_file(&engine);
    assert!(keys.len() > 3);
    let live = keys.len() - 2;
    let second = store.location(keys[1].as_bytes()).unwrap();
    for (i, key) in keys.iter().enumerate().filter(|(i, _)| *i != live) {
        engine.set(key.as_bytes(), &value_for(i, 1)).unwrap();
    }

    let path = log_file_path(temp.path(), DataType::String, 1);
    corrupt_entry(&path, &second);

    engine.run_log_file_gc(DataType::String, 0.5).unwrap();
    assert!(store.archived_fids().contains(&1));
    assert!(path.exists());

    let location = store.location(keys[live].as_bytes()).unwrap();
    assert_eq!(location.fid, 1);
    assert_eq!(engine.get(keys[live].as_bytes()).unwrap(), value_for(live, 0));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_overlapping_gc_same_type_keeps_values() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(setup_small_engine(&temp));
    write_half_stale(&engine);

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.run_log_file_gc(DataType::String, 0.3)
            })
        })
        .collect();

    // Runs either finish or are turned away, never fail otherwise
    let mut succeeded = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => succeeded += 1,
            Err(LotusError::GcRunning) => {}
            Err(e) => panic!("unexpected gc error: {e}"),
        }
    }
    assert!(succeeded >= 1);
    assert!(!engine.store(DataType::String).is_gc_running());

    for i in 0..100 {
        assert_eq!(engine.get(format!("key-{i:03}").as_bytes()).unwrap(), expected_value(i));
    }
}

#[test]
fn test_writes_during_gc_keep_newest_value() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(setup_small_engine(&temp));
    write_half_stale(&engine);

    let gc = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..5 {
                match engine.run_log_file_gc(DataType::String, 0.1) {
                    Ok(_) | Err(LotusError::GcRunning) => {}
                    Err(e) => panic!("unexpected gc error: {e}"),
                }
            }
        })
    };

    let writers: Vec<_> = (0..2)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 2..6 {
                    for i in (t..100).step_by(2) {
                        engine.set(format!("key-{i:03}").as_bytes(), &value_for(i, round)).unwrap();
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..5 {
                    for i in 0..100 {
                        engine.get(format!("key-{i:03}").as_bytes()).unwrap();
                    }
                }
            })
        })
        .collect();

    gc.join().unwrap();
    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    for i in 0..100 {
        assert_eq!(engine.get(format!("key-{i:03}").as_bytes()).unwrap(), value_for(i, 5));
    }
}

#[test]
fn test_gc_different_types_concurrently() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(setup_small_engine(&temp));

    for data_type in [DataType::String, DataType::Hash] {
        let store = engine.store(data_type);
        for round in 0..3 {
            for i in 0..60 {
                store.put(format!("key-{i:03}").as_bytes(), &value_for(i, round), 0).unwrap();
            }
        }
    }

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [DataType::String, DataType::Hash]
        .into_iter()
        .map(|data_type| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.run_log_file_gc(data_type, 0.5).unwrap()
            })
        })
        .collect();

    for handle in handles {
        let stats = handle.join().unwrap();
        assert!(stats.files_compacted > 0);
    }

    for data_type in [DataType::String, DataType::Hash] {
        let store = engine.store(data_type);
        for i in 0..60 {
            assert_eq!(store.get(format!("key-{i:03}").as_bytes()).unwrap(), value_for(i, 2));
        }
    }
}
