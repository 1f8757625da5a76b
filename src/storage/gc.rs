//! Log file compaction
//!
//! Rewrites the live entries of stale-heavy archived files into the active
//! file, then deletes the old files.
//!
//! ```text
//!  candidates(active, ratio) ─► for each archived fid:
//!      scan entries from 0
//!        ├─ live (index points here) ─► append + compare_and_put
//!        ├─ overwritten               ─► drop
//!        └─ tombstone or expired,
//!           older file may shadow     ─► append tombstone, counted as discard
//!      sync active ─► unlink from archived ─► delete file ─► clear record
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::config::IndexMode;
use crate::error::{LotusError, Result};
use crate::index::Location;
use crate::logfile::{EntryType, LogEntry, LogFile};

use super::{unix_now, LogManager};

const GC_IDLE: u8 = 0;
const GC_RUNNING: u8 = 1;

/// Outcome of one compaction run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    /// Files deleted after their live entries were moved
    pub files_compacted: usize,

    /// Entries written again to the active file
    pub entries_rewritten: usize,

    /// Entries found stale (overwritten, deleted or expired)
    pub entries_dropped: usize,
}

/// Puts the state flag back to idle when compaction ends, however it ends
pub(crate) struct GcGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for GcGuard<'_> {
    fn drop(&mut self) {
        self.state.store(GC_IDLE, Ordering::Release);
    }
}

impl LogManager {
    /// Claim the compaction slot of this data type
    pub(crate) fn begin_gc(&self) -> Result<GcGuard<'_>> {
        self.gc_state
            .compare_exchange(GC_IDLE, GC_RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LotusError::GcRunning)?;
        Ok(GcGuard {
            state: &self.gc_state,
        })
    }

    pub fn is_gc_running(&self) -> bool {
        self.gc_state.load(Ordering::Acquire) == GC_RUNNING
    }

    /// Compact every archived file whose stale ratio is at least `ratio`.
    ///
    /// Fails with `GcRunning` if a compaction of this data type is already
    /// in progress.
    pub fn run_gc(&self, ratio: f64) -> Result<GcStats> {
        let _gc = self.begin_gc()?;
        let _enter = self.span.enter();

        let active_fid = self.active_fid();
        let candidates = self.discard.candidates(active_fid, ratio)?;
        debug!(active_fid, ratio, candidates = ?candidates, "log file gc started");

        let mut stats = GcStats::default();
        for fid in candidates {
            if fid >= active_fid {
                continue;
            }

            let file = self.files.read().archived.get(&fid).cloned();
            let Some(file) = file else {
                // Left behind by a crash between delete and clear
                debug!(fid, "clearing discard record of a missing log file");
                self.discard.clear(fid)?;
                continue;
            };

            if self.compact_file(&file, &mut stats)? {
                self.active_file().sync()?;
                self.remove_archived(fid)?;
                stats.files_compacted += 1;
                info!(fid, "log file compacted");
            } else if !self.index.references(fid) {
                // Nothing past the corrupt entry is reachable
                self.active_file().sync()?;
                self.remove_archived(fid)?;
                stats.files_compacted += 1;
                warn!(fid, "log file with a corrupt entry compacted, no keys point into it");
            } else {
                error!(fid, "log file has a corrupt entry, kept after compaction");
            }
        }

        info!(
            files = stats.files_compacted,
            rewritten = stats.entries_rewritten,
            dropped = stats.entries_dropped,
            "log file gc finished"
        );
        Ok(stats)
    }

    /// Move the live entries of `file` forward.
    ///
    /// Returns false if the scan stopped on a corrupt entry before the end
    /// of data.
    fn compact_file(&self, file: &LogFile, stats: &mut GcStats) -> Result<bool> {
        let fid = file.fid();
        let now = unix_now();
        let mut offset = 0u64;

        loop {
            let (entry, size) = match file.read_entry(offset) {
                Ok(Some(found)) => found,
                Ok(None) => return Ok(true),
                Err(e) if e.is_torn_entry() => {
                    warn!(fid, offset, error = %e, "compaction scan stopped");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            let observed = Location::new(fid, offset, size as u32, entry.expired_at);
            offset += size;

            let kept = match entry.entry_type {
                EntryType::Delete => self.rewrite_tombstone(&entry.key, fid)?,
                EntryType::Normal | EntryType::ListMeta => {
                    if entry.is_expired(now) {
                        // Replay reads an expired entry as a delete
                        self.index.compare_and_delete(&entry.key, &observed);
                        self.rewrite_tombstone(&entry.key, fid)?;
                        false
                    } else {
                        self.rewrite_if_live(entry, &observed)?
                    }
                }
            };

            if kept {
                stats.entries_rewritten += 1;
            } else {
                stats.entries_dropped += 1;
            }
        }
    }

    /// Append `entry` again if the index still points at `observed`.
    ///
    /// The swap is a compare-and-put, so a write that lands between the
    /// check and the swap wins and the rewritten copy is counted as discard.
    pub(super) fn rewrite_if_live(&self, entry: LogEntry, observed: &Location) -> Result<bool> {
        match self.index.get(&entry.key) {
            Some(current) if current.same_position(observed) => {}
            _ => return Ok(false),
        }

        let _guard = self.write_lock.lock();
        let mut location = self.append(&entry)?;
        if self.config.index_mode == IndexMode::KeyValueMem {
            location.value = Some(Bytes::from(entry.value));
        }

        let (fid, entry_size) = (location.fid, location.entry_size);
        if self.index.compare_and_put(&entry.key, observed, location) {
            Ok(true)
        } else {
            self.discard.incr_discard(fid, entry_size)?;
            Ok(false)
        }
    }

    /// Write a tombstone for `key` while an older file than `fid` may still
    /// hold a value it shadows.
    fn rewrite_tombstone(&self, key: &[u8], fid: u32) -> Result<bool> {
        if self.index.get(key).is_some() || !self.has_older_archived(fid) {
            return Ok(false);
        }

        let _guard = self.write_lock.lock();
        if self.index.get(key).is_some() {
            return Ok(false);
        }
        let location = self.append(&LogEntry::tombstone(key))?;
        self.discard
            .incr_discard(location.fid, location.entry_size)?;
        Ok(true)
    }

    fn has_older_archived(&self, fid: u32) -> bool {
        self.files.read().archived.range(..fid).next().is_some()
    }

    fn remove_archived(&self, fid: u32) -> Result<()> {
        let removed: Option<Arc<LogFile>> = self.files.write().archived.remove(&fid);
        if let Some(file) = removed {
            file.delete()?;
        }
        self.discard.clear(fid)
    }
}
