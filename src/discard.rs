//! Discard Tracker
//!
//! Per data type bookkeeping of stale bytes in each log file, used to pick
//! compaction candidates without rescanning live files.
//!
//! ## Record Format
//! ```text
//! ┌──────────┬────────────┬──────────────┐
//! │ Fid (4)  │ Total (4)  │ Discard (4)  │   little-endian, 12 bytes
//! └──────────┴────────────┴──────────────┘
//! ```
//! The discard file is 8 KiB and memory mapped, so it holds 682 records.
//! A slot with `fid == 0 && total == 0` is free.
//!
//! ## Update Path
//! ```text
//!  writers ──incr_discard──► bounded channel ──► applier thread ──► table (Mutex) ──► mmap
//! ```
//! Writers only block when the channel is full.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, Span};

use crate::error::{LotusError, Result};
use crate::ioselector::{IoSelector, MmapSelector};
use crate::logfile::DataType;

/// Directory (under the data directory) holding the discard files
pub const DISCARD_DIR: &str = "DISCARD";

/// Size of the discard file: 8 KiB
pub const DISCARD_FILE_SIZE: u64 = 2 << 12;

/// Size of one record
pub const DISCARD_RECORD_SIZE: usize = 12;

/// Stale byte record of one log file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscardRecord {
    pub fid: u32,
    pub total: u32,
    pub discard: u32,
}

impl DiscardRecord {
    /// Stale fraction of the file, 0 when nothing is known
    pub fn ratio(&self) -> f64 {
        if self.total == 0 || self.discard == 0 {
            return 0.0;
        }
        f64::from(self.discard) / f64::from(self.total)
    }

    fn encode(&self) -> [u8; DISCARD_RECORD_SIZE] {
        let mut buf = [0u8; DISCARD_RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.fid.to_le_bytes());
        buf[4..8].copy_from_slice(&self.total.to_le_bytes());
        buf[8..12].copy_from_slice(&self.discard.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; DISCARD_RECORD_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self {
            fid: word(0),
            total: word(4),
            discard: word(8),
        }
    }
}

// =============================================================================
// On-disk table
// =============================================================================

/// Records plus the in-memory slot maps, always accessed under one mutex
struct DiscardTable {
    file: MmapSelector,
    /// Free slot offsets; the last one is handed out next
    free_list: Vec<u64>,
    /// Slot offset of each tracked fid
    location: HashMap<u32, u64>,
}

impl DiscardTable {
    fn load(path: &Path) -> Result<Self> {
        let file = MmapSelector::open(path, DISCARD_FILE_SIZE)?;
        let mut free_list = Vec::new();
        let mut location = HashMap::new();

        let mut offset = 0u64;
        loop {
            let mut buf = [0u8; DISCARD_RECORD_SIZE];
            match file.read(&mut buf, offset) {
                Ok(_) => {}
                Err(LotusError::OutOfRange { .. }) => break,
                Err(e) => return Err(e),
            }

            let record = DiscardRecord::decode(&buf);
            if record.fid == 0 && record.total == 0 {
                free_list.push(offset);
            } else {
                location.insert(record.fid, offset);
            }
            offset += DISCARD_RECORD_SIZE as u64;
        }

        // Hand out the lowest offsets first
        free_list.reverse();

        Ok(Self {
            file,
            free_list,
            location,
        })
    }

    fn alloc(&mut self, fid: u32) -> Result<u64> {
        if let Some(&offset) = self.location.get(&fid) {
            return Ok(offset);
        }
        let offset = self.free_list.pop().ok_or(LotusError::DiscardNoSpace)?;
        self.location.insert(fid, offset);
        Ok(offset)
    }

    fn set_total(&mut self, fid: u32, total: u32) -> Result<()> {
        if self.location.contains_key(&fid) {
            return Ok(());
        }

        let offset = self.alloc(fid)?;
        let record = DiscardRecord {
            fid,
            total,
            discard: 0,
        };
        if let Err(e) = self.file.write(&record.encode(), offset) {
            self.location.remove(&fid);
            self.free_list.push(offset);
            return Err(e);
        }
        Ok(())
    }

    /// Returns false when `fid` has no slot (its file was already reclaimed)
    fn incr(&mut self, fid: u32, delta: u32) -> Result<bool> {
        let Some(&offset) = self.location.get(&fid) else {
            return Ok(false);
        };

        let mut buf = [0u8; 4];
        self.file.read(&mut buf, offset + 8)?;
        let discard = u32::from_le_bytes(buf).saturating_add(delta);
        self.file.write(&discard.to_le_bytes(), offset + 8)?;
        Ok(true)
    }

    fn clear(&mut self, fid: u32) -> Result<()> {
        if let Some(offset) = self.location.remove(&fid) {
            self.file.write(&[0u8; DISCARD_RECORD_SIZE], offset)?;
            self.free_list.push(offset);
        }
        Ok(())
    }

    fn record_at(&self, offset: u64) -> Result<DiscardRecord> {
        let mut buf = [0u8; DISCARD_RECORD_SIZE];
        self.file.read(&mut buf, offset)?;
        Ok(DiscardRecord::decode(&buf))
    }

    fn records(&self) -> Result<Vec<DiscardRecord>> {
        self.location
            .values()
            .map(|&offset| self.record_at(offset))
            .collect()
    }
}

// =============================================================================
// Tracker
// =============================================================================

enum DiscardOp {
    Incr { fid: u32, delta: u32 },
    Flush(Sender<()>),
}

/// Stale byte tracker for one data type
///
/// ## Concurrency:
/// - `table`: one mutex over the mapped records and slot maps
/// - `sender`: bounded queue to the single applier thread; `incr_discard`
///   blocks only while the queue is full
/// - `failure`: first error hit by the applier, reported by the next
///   `flush_pending`
pub struct Discard {
    data_type: DataType,
    table: Arc<Mutex<DiscardTable>>,
    sender: RwLock<Option<Sender<DiscardOp>>>,
    applier: Mutex<Option<JoinHandle<()>>>,
    failure: Arc<Mutex<Option<LotusError>>>,
    span: Span,
}

impl Discard {
    /// Open the discard file of `data_type` under `{data_dir}/DISCARD` and
    /// start its applier thread.
    pub fn open(data_dir: &Path, data_type: DataType, buffer_size: usize, span: Span) -> Result<Self> {
        let dir = data_dir.join(DISCARD_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("discard.{}", data_type.suffix()));

        let table = Arc::new(Mutex::new(DiscardTable::load(&path)?));
        let failure = Arc::new(Mutex::new(None));
        let (sender, receiver) = channel::bounded(buffer_size.max(1));

        let applier = {
            let table = Arc::clone(&table);
            let failure = Arc::clone(&failure);
            let span = span.clone();
            thread::Builder::new()
                .name(format!("lotuskv-discard-{}", data_type.suffix()))
                .spawn(move || apply_updates(receiver, table, failure, span))?
        };

        {
            let _enter = span.enter();
            let table = table.lock();
            debug!(
                tracked = table.location.len(),
                free = table.free_list.len(),
                "discard file opened"
            );
        }

        Ok(Self {
            data_type,
            table,
            sender: RwLock::new(Some(sender)),
            applier: Mutex::new(Some(applier)),
            failure,
            span,
        })
    }

    /// Start tracking `fid` with a byte budget of `total`.
    ///
    /// No-op if the file is already tracked. Fails with `DiscardNoSpace`
    /// when every slot is taken.
    pub fn set_total(&self, fid: u32, total: u32) -> Result<()> {
        self.table.lock().set_total(fid, total)
    }

    /// Queue `delta` stale bytes for `fid`
    pub fn incr_discard(&self, fid: u32, delta: u32) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        self.send(DiscardOp::Incr { fid, delta })
    }

    /// Wait until every update queued so far has been applied
    pub fn flush_pending(&self) -> Result<()> {
        let (ack, done) = channel::bounded(1);
        self.send(DiscardOp::Flush(ack))?;
        done.recv().map_err(|_| LotusError::Closed)?;

        match self.failure.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Compaction candidates: files other than `active_fid` whose stale
    /// ratio is at least `ratio`, most reclaimable first.
    pub fn candidates(&self, active_fid: u32, ratio: f64) -> Result<Vec<u32>> {
        self.flush_pending()?;

        let mut records: Vec<DiscardRecord> = self
            .table
            .lock()
            .records()?
            .into_iter()
            .filter(|r| r.fid != active_fid && r.discard > 0 && r.ratio() >= ratio)
            .collect();

        records.sort_by(|a, b| {
            b.ratio()
                .total_cmp(&a.ratio())
                .then_with(|| a.fid.cmp(&b.fid))
        });
        Ok(records.into_iter().map(|r| r.fid).collect())
    }

    /// Forget `fid` and free its slot
    pub fn clear(&self, fid: u32) -> Result<()> {
        self.table.lock().clear(fid)
    }

    /// Current record of `fid`, after applying queued updates
    pub fn record(&self, fid: u32) -> Result<Option<DiscardRecord>> {
        self.flush_pending()?;
        let table = self.table.lock();
        match table.location.get(&fid) {
            Some(&offset) => Ok(Some(table.record_at(offset)?)),
            None => Ok(None),
        }
    }

    /// Slot offset of `fid` in the discard file
    pub fn slot(&self, fid: u32) -> Option<u64> {
        self.table.lock().location.get(&fid).copied()
    }

    /// Number of unallocated slots
    pub fn free_slots(&self) -> usize {
        self.table.lock().free_list.len()
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn sync(&self) -> Result<()> {
        self.table.lock().file.sync()
    }

    /// Drain the queue, stop the applier and close the file. Idempotent.
    pub fn close(&self) -> Result<()> {
        // Dropping the only sender ends the applier loop once it drains
        drop(self.sender.write().take());

        if let Some(handle) = self.applier.lock().take() {
            if handle.join().is_err() {
                let _enter = self.span.enter();
                error!("discard applier thread panicked");
            }
        }
        self.table.lock().file.close()
    }

    fn send(&self, op: DiscardOp) -> Result<()> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(LotusError::Closed)?;
        sender.send(op).map_err(|_| LotusError::Closed)
    }
}

impl Drop for Discard {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn apply_updates(
    receiver: Receiver<DiscardOp>,
    table: Arc<Mutex<DiscardTable>>,
    failure: Arc<Mutex<Option<LotusError>>>,
    span: Span,
) {
    let _enter = span.enter();

    for op in receiver.iter() {
        match op {
            DiscardOp::Incr { fid, delta } => match table.lock().incr(fid, delta) {
                Ok(true) => {}
                Ok(false) => debug!(fid, delta, "discard update for untracked file skipped"),
                Err(e) => {
                    error!(fid, delta, error = %e, "failed to apply discard update");
                    failure.lock().get_or_insert(e);
                }
            },
            DiscardOp::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    debug!("discard applier stopped");
}
