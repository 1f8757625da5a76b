//! Error types for LotusKV
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using LotusError
pub type Result<T> = std::result::Result<T, LotusError>;

/// Unified error type for LotusKV operations
#[derive(Debug, Error)]
pub enum LotusError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("offset {offset} with length {len} is out of range (capacity {capacity})")]
    OutOfRange { offset: u64, len: usize, capacity: u64 },

    #[error("invalid file size {0}, must be greater than zero")]
    InvalidFileSize(u64),

    #[error("file is closed")]
    Closed,

    #[error("data directory {0:?} is locked by another process")]
    DirectoryLocked(PathBuf),

    // -------------------------------------------------------------------------
    // Log File Errors
    // -------------------------------------------------------------------------
    #[error("invalid crc: expected {expected:#010x}, got {actual:#010x}")]
    InvalidCrc { expected: u32, actual: u32 },

    #[error("entry of {size} bytes exceeds the log file size threshold {limit}")]
    EntryTooLarge { size: usize, limit: u64 },

    #[error("log file {0} not found")]
    LogFileNotFound(u32),

    // -------------------------------------------------------------------------
    // Discard / GC Errors
    // -------------------------------------------------------------------------
    #[error("not enough space can be allocated for the discard file")]
    DiscardNoSpace,

    #[error("log file gc is running, retry later")]
    GcRunning,

    // -------------------------------------------------------------------------
    // Command Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    #[error("wrong number of arguments")]
    WrongNumberOfArgs,

    #[error("value is not an integer")]
    WrongValueType,

    #[error("increment or decrement overflow")]
    IntegerOverflow,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LotusError {
    /// True for errors that mark the end of trustworthy data in a log file
    /// (a torn or corrupted entry) rather than a device failure.
    pub fn is_torn_entry(&self) -> bool {
        matches!(
            self,
            LotusError::InvalidCrc { .. } | LotusError::OutOfRange { .. }
        )
    }
}
