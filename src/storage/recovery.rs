//! Startup recovery
//!
//! Opens the log files of one data type and rebuilds the index by replaying
//! them in file id order.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, info_span, warn};

use crate::config::{Config, IndexMode};
use crate::discard::Discard;
use crate::error::Result;
use crate::index::{Index, Location};
use crate::logfile::{log_file_path, parse_log_file_name, DataType, EntryType, LogFile};

use super::manager::LogFiles;
use super::{unix_now, LogManager};

impl LogManager {
    /// Open (or create) the storage of `data_type` inside `dir`.
    ///
    /// Every existing log file is replayed into the index. The newest file
    /// becomes the active one with its cursor at the end of valid data.
    pub fn open(dir: &Path, data_type: DataType, config: Arc<Config>) -> Result<Self> {
        let span = info_span!("log_manager", data_type = %data_type);
        let discard = Discard::open(dir, data_type, config.discard_buffer_size, span.clone())?;
        let index = Index::new();
        let threshold = config.log_file_size_threshold;

        let enter = span.enter();
        let fids = list_fids(dir, data_type)?;

        let mut archived = BTreeMap::new();
        let mut active = None;
        for (i, &fid) in fids.iter().enumerate() {
            let len = fs::metadata(log_file_path(dir, data_type, fid))?.len();
            let size = threshold.max(len);
            let file = LogFile::open(dir, fid, size, data_type, config.io_type)?;
            discard.set_total(fid, u32::try_from(size).unwrap_or(u32::MAX))?;

            let end = replay(&file, &index, config.index_mode)?;
            if i + 1 == fids.len() {
                file.set_write_at(end);
                active = Some(Arc::new(file));
            } else {
                archived.insert(fid, Arc::new(file));
            }
        }

        let active = match active {
            Some(file) => file,
            None => {
                let file = LogFile::open(dir, 1, threshold, data_type, config.io_type)?;
                discard.set_total(1, u32::try_from(threshold).unwrap_or(u32::MAX))?;
                Arc::new(file)
            }
        };

        info!(
            files = fids.len(),
            keys = index.len(),
            active = active.fid(),
            write_at = active.write_at(),
            "log manager opened"
        );
        drop(enter);

        Ok(Self {
            data_type,
            dir: dir.to_path_buf(),
            config,
            files: RwLock::new(LogFiles { active, archived }),
            index,
            discard,
            write_lock: Mutex::new(()),
            gc_state: AtomicU8::new(0),
            span,
        })
    }
}

/// Ids of the log files of `data_type` in `dir`, ascending
fn list_fids(dir: &Path, data_type: DataType) -> Result<Vec<u32>> {
    let mut fids = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        if !dirent.file_type()?.is_file() {
            continue;
        }
        let name = dirent.file_name();
        if let Some((dt, fid)) = name.to_str().and_then(parse_log_file_name) {
            if dt == data_type {
                fids.push(fid);
            }
        }
    }
    fids.sort_unstable();
    Ok(fids)
}

/// Apply every entry of `file` to `index`, returning the end of valid data
fn replay(file: &LogFile, index: &Index, mode: IndexMode) -> Result<u64> {
    let now = unix_now();
    let mut offset = 0u64;
    let mut entries = 0usize;

    loop {
        let (entry, size) = match file.read_entry(offset) {
            Ok(Some(found)) => found,
            Ok(None) => break,
            Err(e) if e.is_torn_entry() => {
                warn!(fid = file.fid(), offset, error = %e, "stopped replay at a corrupt entry");
                break;
            }
            Err(e) => return Err(e),
        };

        if entry.entry_type == EntryType::Delete || entry.is_expired(now) {
            index.delete(&entry.key);
        } else {
            let mut location = Location::new(file.fid(), offset, size as u32, entry.expired_at);
            if mode == IndexMode::KeyValueMem {
                location.value = Some(Bytes::from(entry.value));
            }
            index.put(entry.key, location);
        }

        offset += size;
        entries += 1;
    }

    debug!(fid = file.fid(), entries, end = offset, "log file replayed");
    Ok(offset)
}
