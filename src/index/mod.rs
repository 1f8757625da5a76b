//! Index Module
//!
//! In-memory map from key bytes to the on-disk location of their latest entry.
//!
//! ## Responsibilities
//! - Point lookups for reads and liveness checks during compaction
//! - Report replaced locations so their bytes can be counted as discard
//! - Ordered prefix scans and full iteration
//!
//! ## Data Structure Choice
//! A BTreeMap wrapped in RwLock:
//! - Ordered keys for prefix scans
//! - Many concurrent readers, one writer at a time
//! - Compare-and-swap helpers so compaction never clobbers a newer write

mod tree;

use bytes::Bytes;

pub use tree::{Index, IndexIter};

/// Where the current entry of a key lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Log file id
    pub fid: u32,

    /// Offset of the entry inside the file
    pub offset: u64,

    /// Encoded size of the entry
    pub entry_size: u32,

    /// Unix seconds, 0 means no expiry
    pub expired_at: i64,

    /// Cached value, only kept in key-value memory mode
    pub value: Option<Bytes>,
}

impl Location {
    pub fn new(fid: u32, offset: u64, entry_size: u32, expired_at: i64) -> Self {
        Self {
            fid,
            offset,
            entry_size,
            expired_at,
            value: None,
        }
    }

    /// True if both point at the same entry
    pub fn same_position(&self, other: &Location) -> bool {
        self.fid == other.fid && self.offset == other.offset
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expired_at != 0 && self.expired_at <= now
    }
}
