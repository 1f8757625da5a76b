//! Log Manager
//!
//! Manages the log files, index and discard tracker of one data type and
//! coordinates reads and writes across them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU8;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn, Span};

use crate::config::{Config, IndexMode};
use crate::discard::{Discard, DiscardRecord};
use crate::error::{LotusError, Result};
use crate::index::{Index, IndexIter, Location};
use crate::logfile::{DataType, EntryType, LogEntry, LogFile};

use super::unix_now;

/// Active and archived files of one data type
pub(super) struct LogFiles {
    pub(super) active: Arc<LogFile>,
    pub(super) archived: BTreeMap<u32, Arc<LogFile>>,
}

/// Storage for one data type
///
/// ## Concurrency:
/// - `write_lock`: serializes append + index update, so the index always
///   reflects arrival order
/// - `files`: RwLock; readers resolve a fid and drop the lock before reading
/// - `index`: internal RwLock, lookups never wait on disk I/O
/// - `discard`: updates are queued, never applied on the caller's thread
/// - `gc_state`: idle/running flag, one compaction at a time
pub struct LogManager {
    pub(super) data_type: DataType,
    pub(super) dir: PathBuf,
    pub(super) config: Arc<Config>,
    pub(super) files: RwLock<LogFiles>,
    pub(super) index: Index,
    pub(super) discard: Discard,
    pub(super) write_lock: Mutex<()>,
    pub(super) gc_state: AtomicU8,
    pub(super) span: Span,
}

impl LogManager {
    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` under `key`. `expired_at` is unix seconds, 0 for none.
    pub fn put(&self, key: &[u8], value: &[u8], expired_at: i64) -> Result<()> {
        self.write_entry(LogEntry::with_expiry(key, value, expired_at))
    }

    /// Append an entry and point the index at it.
    ///
    /// A `Delete` entry behaves like [`LogManager::delete`].
    pub fn write_entry(&self, entry: LogEntry) -> Result<()> {
        if entry.entry_type == EntryType::Delete {
            return self.delete(&entry.key);
        }

        let _guard = self.write_lock.lock();
        let mut location = self.append(&entry)?;
        if self.config.index_mode == IndexMode::KeyValueMem {
            location.value = Some(Bytes::from(entry.value));
        }

        let (old, _) = self.index.put(entry.key, location);
        if let Some(old) = old {
            self.discard.incr_discard(old.fid, old.entry_size)?;
        }
        Ok(())
    }

    /// Remove `key`, writing a tombstone if it currently has a value
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.index.get(key).is_none() {
            return Ok(());
        }

        let tombstone = self.append(&LogEntry::tombstone(key))?;
        let (old, _) = self.index.delete(key);
        if let Some(old) = old {
            self.discard.incr_discard(old.fid, old.entry_size)?;
        }
        // A tombstone is stale as soon as it is written
        self.discard
            .incr_discard(tombstone.fid, tombstone.entry_size)?;
        Ok(())
    }

    /// Append `entry` to the active file, rotating first if it does not fit.
    ///
    /// Callers must hold `write_lock`.
    pub(super) fn append(&self, entry: &LogEntry) -> Result<Location> {
        let (buf, size) = entry.encode();
        let threshold = self.config.log_file_size_threshold;
        if size as u64 > threshold {
            return Err(LotusError::EntryTooLarge {
                size,
                limit: threshold,
            });
        }

        let mut active = self.active_file();
        if active.write_at() + size as u64 > threshold {
            active = self.rotate()?;
        }

        let offset = active.write(&buf)?;
        if self.config.sync_writes {
            active.sync()?;
        }
        Ok(Location::new(active.fid(), offset, size as u32, entry.expired_at))
    }

    /// Archive the active file and open the next one
    fn rotate(&self) -> Result<Arc<LogFile>> {
        let mut files = self.files.write();
        files.active.sync()?;

        let fid = files.active.fid() + 1;
        let threshold = self.config.log_file_size_threshold;
        let next = Arc::new(LogFile::open(
            &self.dir,
            fid,
            threshold,
            self.data_type,
            self.config.io_type,
        )?);
        if let Err(e) = self.discard.set_total(fid, threshold as u32) {
            let _ = next.delete();
            return Err(e);
        }

        let previous = std::mem::replace(&mut files.active, Arc::clone(&next));
        {
            let _enter = self.span.enter();
            info!(archived = previous.fid(), active = fid, "log file rotated");
        }
        files.archived.insert(previous.fid(), previous);
        Ok(next)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Value of `key`, or `KeyNotFound` if it is absent or expired
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut location = self.index.get(key).ok_or(LotusError::KeyNotFound)?;

        loop {
            if location.is_expired(unix_now()) {
                self.expire(key, &location)?;
                return Err(LotusError::KeyNotFound);
            }
            if let Some(value) = &location.value {
                return Ok(value.to_vec());
            }

            match self.read_value(&location) {
                Ok(value) => return Ok(value),
                Err(e @ (LotusError::LogFileNotFound(_) | LotusError::Closed)) => {
                    // Compaction may have moved the key and removed the file
                    // between the lookup and the read
                    match self.index.get(key) {
                        Some(current) if !current.same_position(&location) => location = current,
                        Some(_) => return Err(e),
                        None => return Err(LotusError::KeyNotFound),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_value(&self, location: &Location) -> Result<Vec<u8>> {
        let file = self
            .log_file(location.fid)
            .ok_or(LotusError::LogFileNotFound(location.fid))?;

        match file.read_entry(location.offset)? {
            Some((entry, _)) if entry.entry_type != EntryType::Delete => Ok(entry.value),
            _ => {
                let _enter = self.span.enter();
                warn!(
                    fid = location.fid,
                    offset = location.offset,
                    "index points at a position without a live entry"
                );
                Err(LotusError::KeyNotFound)
            }
        }
    }

    /// Drop an expired key, counting its bytes as stale exactly once
    fn expire(&self, key: &[u8], location: &Location) -> Result<()> {
        if let Some(removed) = self.index.compare_and_delete(key, location) {
            self.discard
                .incr_discard(removed.fid, removed.entry_size)?;
        }
        Ok(())
    }

    /// Resolve a file id against the active and archived files
    pub(super) fn log_file(&self, fid: u32) -> Option<Arc<LogFile>> {
        let files = self.files.read();
        if files.active.fid() == fid {
            return Some(Arc::clone(&files.active));
        }
        files.archived.get(&fid).cloned()
    }

    pub(super) fn active_file(&self) -> Arc<LogFile> {
        Arc::clone(&self.files.read().active)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush the active file and the discard records to disk
    pub fn sync(&self) -> Result<()> {
        self.active_file().sync()?;
        self.discard.sync()
    }

    /// Sync and close every file
    pub fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        {
            let files = self.files.read();
            files.active.sync()?;
            files.active.close()?;
            for file in files.archived.values() {
                file.close()?;
            }
        }
        self.discard.close()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current location of `key`
    pub fn location(&self, key: &[u8]) -> Option<Location> {
        self.index.get(key)
    }

    /// Up to `limit` keys starting with `prefix`, in key order
    pub fn scan_keys(&self, prefix: &[u8], limit: usize) -> Vec<Vec<u8>> {
        self.index.prefix_scan(prefix, limit)
    }

    /// Iterate all indexed keys and locations in key order
    pub fn iter(&self) -> IndexIter {
        self.index.iter()
    }

    /// Number of indexed keys
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn active_fid(&self) -> u32 {
        self.files.read().active.fid()
    }

    /// Archived file ids in ascending order
    pub fn archived_fids(&self) -> Vec<u32> {
        self.files.read().archived.keys().copied().collect()
    }

    /// Stale byte record of `fid`, after applying queued updates
    pub fn discard_record(&self, fid: u32) -> Result<Option<DiscardRecord>> {
        self.discard.record(fid)
    }
}
