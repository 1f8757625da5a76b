//! Tests for LogFile
//!
//! These tests verify:
//! - Appends return their offset and advance the cursor
//! - Entries read back at their offsets under both I/O strategies
//! - The zeroed tail reads as end of entries
//! - Corrupt entries surface as InvalidCrc
//! - Headers with impossible sizes are torn, not allocated

use lotuskv::config::IoType;
use lotuskv::error::LotusError;
use lotuskv::logfile::{log_file_path, put_varint, DataType, LogEntry, LogFile};
use tempfile::TempDir;

const SIZE: u64 = 8192;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_log(temp: &TempDir, io_type: IoType) -> LogFile {
    LogFile::open(temp.path(), 1, SIZE, DataType::String, io_type).unwrap()
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_zero_size_rejected() {
    let temp = TempDir::new().unwrap();
    let result = LogFile::open(temp.path(), 1, 0, DataType::String, IoType::FileIo);
    assert!(matches!(result, Err(LotusError::InvalidFileSize(0))));
}

#[test]
fn test_open_uses_type_and_fid_in_name() {
    let temp = TempDir::new().unwrap();
    let log = LogFile::open(temp.path(), 7, SIZE, DataType::ZSet, IoType::Mmap).unwrap();

    assert_eq!(log.path(), log_file_path(temp.path(), DataType::ZSet, 7));
    assert!(temp.path().join("log.zset.000000007").exists());
    assert_eq!(log.fid(), 7);
    assert_eq!(log.data_type(), DataType::ZSet);
    assert_eq!(log.write_at(), 0);
}

// =============================================================================
// Write / Read Tests
// =============================================================================

#[test]
fn test_write_advances_cursor() {
    let temp = TempDir::new().unwrap();
    let log = open_log(&temp, IoType::FileIo);

    assert_eq!(log.write(b"hello").unwrap(), 0);
    assert_eq!(log.write(b"world!").unwrap(), 5);
    assert_eq!(log.write_at(), 11);

    assert_eq!(log.read(0, 5).unwrap(), b"hello");
    assert_eq!(log.read(5, 6).unwrap(), b"world!");
}

#[test]
fn test_failed_write_keeps_cursor() {
    let temp = TempDir::new().unwrap();
    let log = LogFile::open(temp.path(), 1, 16, DataType::String, IoType::Mmap).unwrap();

    log.write(&[1u8; 10]).unwrap();
    assert!(matches!(
        log.write(&[2u8; 10]),
        Err(LotusError::OutOfRange { .. })
    ));
    assert_eq!(log.write_at(), 10);
}

#[test]
fn test_read_past_end_fails() {
    let temp = TempDir::new().unwrap();
    let log = open_log(&temp, IoType::Mmap);

    assert!(matches!(
        log.read(SIZE - 2, 4),
        Err(LotusError::OutOfRange { .. })
    ));
}

#[test]
fn test_entries_read_back_under_both_strategies() {
    for io_type in [IoType::FileIo, IoType::Mmap] {
        let temp = TempDir::new().unwrap();
        let log = open_log(&temp, io_type);

        let entries: Vec<LogEntry> = (0..50)
            .map(|i| {
                LogEntry::with_expiry(
                    format!("key-{i}").into_bytes(),
                    vec![i as u8; i * 3],
                    if i % 5 == 0 { 1_800_000_000 } else { 0 },
                )
            })
            .collect();

        let mut positions = Vec::new();
        for entry in &entries {
            let (buf, size) = entry.encode();
            positions.push((log.write(&buf).unwrap(), size as u64));
        }

        for (entry, (offset, size)) in entries.iter().zip(&positions) {
            let (read, read_size) = log.read_entry(*offset).unwrap().unwrap();
            assert_eq!(&read, entry);
            assert_eq!(read_size, *size);
        }

        // First byte after the last entry is the zeroed preallocated tail
        assert!(log.read_entry(log.write_at()).unwrap().is_none());
    }
}

#[test]
fn test_read_entry_end_of_file() {
    let temp = TempDir::new().unwrap();
    let log = open_log(&temp, IoType::FileIo);

    assert!(log.read_entry(0).unwrap().is_none());
    assert!(log.read_entry(SIZE).unwrap().is_none());
    assert!(log.read_entry(SIZE - 3).unwrap().is_none());
}

#[test]
fn test_read_entry_detects_corruption() {
    let temp = TempDir::new().unwrap();
    let log = open_log(&temp, IoType::FileIo);

    let (buf, size) = LogEntry::new(b"key".to_vec(), b"value".to_vec()).encode();
    let mut corrupted = buf.to_vec();
    corrupted[size - 1] ^= 0x01;
    log.write(&corrupted).unwrap();

    assert!(matches!(
        log.read_entry(0),
        Err(LotusError::InvalidCrc { .. })
    ));
}

#[test]
fn test_entry_claiming_past_end_is_torn() {
    let temp = TempDir::new().unwrap();
    let log = LogFile::open(temp.path(), 1, 64, DataType::String, IoType::FileIo).unwrap();

    let (buf, _) = LogEntry::new(b"key".to_vec(), vec![1u8; 100]).encode();
    log.write(&buf[..40]).unwrap();

    let err = log.read_entry(0).unwrap_err();
    assert!(err.is_torn_entry());
}

#[test]
fn test_huge_sizes_in_header_are_torn() {
    for io_type in [IoType::FileIo, IoType::Mmap] {
        let temp = TempDir::new().unwrap();
        let log = LogFile::open(temp.path(), 1, 4096, DataType::String, io_type).unwrap();

        let mut header = vec![0xAA, 0xBB, 0xCC, 0xDD, 0];
        let mut varint = [0u8; 10];
        for value in [i64::from(u32::MAX), i64::from(u32::MAX), 0] {
            let n = put_varint(&mut varint, value);
            header.extend_from_slice(&varint[..n]);
        }
        log.write(&header).unwrap();

        let err = log.read_entry(0).unwrap_err();
        assert!(matches!(err, LotusError::OutOfRange { .. }));
        assert!(err.is_torn_entry());
    }
}

#[test]
fn test_read_checks_range_before_reading() {
    let temp = TempDir::new().unwrap();
    let log = open_log(&temp, IoType::FileIo);

    assert!(matches!(
        log.read(0, usize::MAX),
        Err(LotusError::OutOfRange { .. })
    ));
    assert!(matches!(
        log.read(u64::MAX, 1),
        Err(LotusError::OutOfRange { .. })
    ));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_reopen_keeps_bytes() {
    let temp = TempDir::new().unwrap();
    let (buf, _) = LogEntry::new(b"k".to_vec(), b"v".to_vec()).encode();
    {
        let log = open_log(&temp, IoType::Mmap);
        log.write(&buf).unwrap();
        log.sync().unwrap();
        log.close().unwrap();
    }

    let log = open_log(&temp, IoType::FileIo);
    let (entry, _) = log.read_entry(0).unwrap().unwrap();
    assert_eq!(entry.value, b"v");
}

#[test]
fn test_delete_removes_file() {
    let temp = TempDir::new().unwrap();
    let log = open_log(&temp, IoType::FileIo);
    let path = log.path().to_path_buf();

    log.delete().unwrap();
    assert!(!path.exists());
    assert!(matches!(log.read(0, 1), Err(LotusError::Closed)));
}
