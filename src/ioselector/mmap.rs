//! Memory-mapped I/O selector

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;

use crate::error::{LotusError, Result};

use super::{check_range, open_file, IoSelector};

struct Mapping {
    file: File,
    map: MmapMut,
}

/// IoSelector over a fixed-size writable mapping
///
/// The file is preallocated to `capacity` bytes at open and never grows.
/// Reads share the lock; writes, close and delete take it exclusively, so
/// the mapping is never unmapped under a reader.
pub struct MmapSelector {
    path: PathBuf,
    mapping: RwLock<Option<Mapping>>,
    capacity: u64,
}

impl MmapSelector {
    /// Map the first `size` bytes of `path`, creating and extending it as needed
    pub fn open(path: &Path, size: u64) -> Result<Self> {
        let file = open_file(path, size)?;

        // SAFETY: the file is owned by this selector for the lifetime of the
        // mapping, and every access goes through a bounds-checked copy while
        // the lock is held.
        let map = unsafe { MmapOptions::new().len(size as usize).map_mut(&file)? };

        Ok(Self {
            path: path.to_path_buf(),
            mapping: RwLock::new(Some(Mapping { file, map })),
            capacity: size,
        })
    }
}

impl IoSelector for MmapSelector {
    fn write(&self, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut guard = self.mapping.write();
        let mapping = guard.as_mut().ok_or(LotusError::Closed)?;
        check_range(offset, buf.len(), self.capacity)?;

        let start = offset as usize;
        mapping.map[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let guard = self.mapping.read();
        let mapping = guard.as_ref().ok_or(LotusError::Closed)?;
        check_range(offset, buf.len(), self.capacity)?;

        let start = offset as usize;
        buf.copy_from_slice(&mapping.map[start..start + buf.len()]);
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        let guard = self.mapping.read();
        let mapping = guard.as_ref().ok_or(LotusError::Closed)?;
        mapping.map.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(Mapping { file, map }) = self.mapping.write().take() {
            map.flush()?;
            drop(map);
            drop(file);
        }
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        if let Some(Mapping { file, map }) = self.mapping.write().take() {
            drop(map);
            file.set_len(0)?;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn size(&self) -> u64 {
        self.capacity
    }
}
