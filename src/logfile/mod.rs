//! Log File Module
//!
//! Append-only files holding encoded entries, one series per data type.
//!
//! ## Responsibilities
//! - Binary entry framing with CRC32 checksums
//! - Append cursor per file, advanced only after a successful write
//! - Sequential entry reads for recovery and compaction
//!
//! ## Entry Format
//! ```text
//! ┌─────────┬──────────┬──────────────┬────────────────┬───────────────┬─────┬───────┐
//! │ CRC (4) │ Type (1) │ KeySize (≤5) │ ValueSize (≤5) │ ExpiredAt(≤10)│ Key │ Value │
//! └─────────┴──────────┴──────────────┴────────────────┴───────────────┴─────┴───────┘
//! |◄──────────────────── header (≤25) ─────────────────────────────────►|
//!           |◄──────────────────────── crc covered ──────────────────────────────────►|
//! ```
//!
//! Sizes and the expiry are signed zig-zag varints. The CRC is stored
//! little-endian.
//!
//! ## File Naming
//! `log.<suffix>.<fid:09>`, e.g. `log.strs.000000001`.

mod entry;
mod log_file;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use entry::{
    decode_entry, decode_header, encode_entry, put_varint, read_varint, EntryHeader, EntryType,
    LogEntry, CRC_SIZE, MAX_HEADER_SIZE,
};
pub(crate) use entry::entry_crc;
pub use log_file::LogFile;

/// Prefix shared by every log file name
pub const FILE_PREFIX: &str = "log.";

/// Logical data types, each with its own series of log files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    String,
    List,
    Hash,
    Set,
    ZSet,
}

impl DataType {
    /// Every data type, in file-type order
    pub const ALL: [DataType; 5] = [
        DataType::String,
        DataType::List,
        DataType::Hash,
        DataType::Set,
        DataType::ZSet,
    ];

    /// File name suffix for this type
    pub fn suffix(self) -> &'static str {
        match self {
            DataType::String => "strs",
            DataType::List => "list",
            DataType::Hash => "hash",
            DataType::Set => "sets",
            DataType::ZSet => "zset",
        }
    }

    /// Inverse of [`DataType::suffix`]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        DataType::ALL.into_iter().find(|t| t.suffix() == suffix)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DataType::from_suffix(s).ok_or_else(|| {
            format!("unknown data type {s:?}, expected one of strs, list, hash, sets, zset")
        })
    }
}

/// Path of the log file with id `fid` for `data_type` inside `dir`
pub fn log_file_path(dir: &Path, data_type: DataType, fid: u32) -> PathBuf {
    dir.join(format!("{}{}.{:09}", FILE_PREFIX, data_type.suffix(), fid))
}

/// Parse a log file name
/// "log.strs.000000042" → Some((String, 42))
pub fn parse_log_file_name(name: &str) -> Option<(DataType, u32)> {
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let (suffix, fid) = rest.split_once('.')?;
    let data_type = DataType::from_suffix(suffix)?;
    Some((data_type, fid.parse().ok()?))
}
