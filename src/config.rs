//! Configuration for LotusKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LotusError, Result};

/// Main configuration for a LotusKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── FLOCK                  (directory lock)
    ///     ├── log.strs.000000001     (log files, one series per data type)
    ///     └── DISCARD/discard.strs   (stale byte records, one per data type)
    pub data_dir: PathBuf,

    /// What the in-memory index keeps for every key
    pub index_mode: IndexMode,

    /// I/O strategy used for log files
    pub io_type: IoType,

    /// fsync the active log file after every write
    pub sync_writes: bool,

    /// Size at which the active log file is archived and a new one opened
    /// (also the preallocated size of every log file)
    pub log_file_size_threshold: u64,

    // -------------------------------------------------------------------------
    // GC Configuration
    // -------------------------------------------------------------------------
    /// Interval of the background GC worker; `None` disables it
    pub log_file_gc_interval: Option<Duration>,

    /// Minimum stale/total ratio for a file to be compacted
    pub log_file_gc_ratio: f64,

    /// Capacity of each discard tracker's update queue
    pub discard_buffer_size: usize,
}

/// Index memory mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Keys and values are both held in memory; reads never touch disk
    KeyValueMem,

    /// Only keys and locations are held in memory; values are read from disk
    KeyOnlyMem,
}

/// Log file I/O strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Positioned reads/writes on a regular file descriptor
    FileIo,

    /// Memory-mapped file of fixed size
    Mmap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./lotuskv_data"),
            index_mode: IndexMode::KeyOnlyMem,
            io_type: IoType::FileIo,
            sync_writes: false,
            log_file_size_threshold: 512 << 20, // 512 MB
            log_file_gc_interval: Some(Duration::from_secs(8 * 60 * 60)),
            log_file_gc_ratio: 0.5,
            discard_buffer_size: 8 << 12,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the storage layer cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.log_file_size_threshold == 0
            || self.log_file_size_threshold > u64::from(u32::MAX)
        {
            return Err(LotusError::Config(format!(
                "log_file_size_threshold must be in 1..={}, got {}",
                u32::MAX,
                self.log_file_size_threshold
            )));
        }
        if !(self.log_file_gc_ratio > 0.0 && self.log_file_gc_ratio <= 1.0) {
            return Err(LotusError::Config(format!(
                "log_file_gc_ratio must be in (0, 1], got {}",
                self.log_file_gc_ratio
            )));
        }
        if self.discard_buffer_size == 0 {
            return Err(LotusError::Config(
                "discard_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.log_file_gc_interval == Some(Duration::ZERO) {
            return Err(LotusError::Config(
                "log_file_gc_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the index memory mode
    pub fn index_mode(mut self, mode: IndexMode) -> Self {
        self.config.index_mode = mode;
        self
    }

    /// Set the log file I/O strategy
    pub fn io_type(mut self, io_type: IoType) -> Self {
        self.config.io_type = io_type;
        self
    }

    /// Sync the active log file after every write
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.config.sync_writes = sync;
        self
    }

    /// Set the log file size threshold (in bytes)
    pub fn log_file_size_threshold(mut self, size: u64) -> Self {
        self.config.log_file_size_threshold = size;
        self
    }

    /// Set the background GC interval (`None` disables the worker)
    pub fn log_file_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.log_file_gc_interval = interval;
        self
    }

    /// Set the stale ratio above which a file is compacted
    pub fn log_file_gc_ratio(mut self, ratio: f64) -> Self {
        self.config.log_file_gc_ratio = ratio;
        self
    }

    /// Set the capacity of the discard update queue
    pub fn discard_buffer_size(mut self, size: usize) -> Self {
        self.config.discard_buffer_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
