//! IO Selector Module
//!
//! Byte-addressable file abstraction used by log files and discard records.
//!
//! ## Responsibilities
//! - Positioned reads and writes at caller-chosen offsets
//! - Bounds checks against the current extent of the file
//! - Explicit sync, idempotent close, and delete once a file is reclaimed
//!
//! ## Implementations
//! ```text
//! ┌──────────────────┬──────────────────────────────────────────┐
//! │ FileIoSelector   │ pread/pwrite on a file descriptor,       │
//! │                  │ extent grows when writing past the end   │
//! ├──────────────────┼──────────────────────────────────────────┤
//! │ MmapSelector     │ fixed-size writable mapping, every access│
//! │                  │ is a bounds-checked copy                 │
//! └──────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Both preallocate the file to the requested size, so the same write
//! sequence leaves identical bytes on disk.

mod file_io;
mod mmap;

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::config::IoType;
use crate::error::{LotusError, Result};

pub use file_io::FileIoSelector;
pub use mmap::MmapSelector;

/// Positioned I/O over a single file.
///
/// Implementations must allow concurrent `read` calls. Callers serialize
/// writes that target overlapping ranges.
pub trait IoSelector: Send + Sync {
    /// Copy `buf` into the file at `offset`, returning the bytes written.
    fn write(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Fill `buf` from the file at `offset`. Fails with `OutOfRange` if the
    /// range is not fully inside the current extent.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Flush written data to stable storage.
    fn sync(&self) -> Result<()>;

    /// Flush and release the underlying file. Calling it twice is a no-op.
    fn close(&self) -> Result<()>;

    /// Release, truncate and remove the underlying file.
    fn delete(&self) -> Result<()>;

    /// Current readable extent in bytes.
    fn size(&self) -> u64;
}

/// Open a selector of the requested kind over `path`.
pub fn new_selector(path: &Path, size: u64, io_type: IoType) -> Result<Box<dyn IoSelector>> {
    let selector: Box<dyn IoSelector> = match io_type {
        IoType::FileIo => Box::new(FileIoSelector::open(path, size)?),
        IoType::Mmap => Box::new(MmapSelector::open(path, size)?),
    };
    Ok(selector)
}

/// Open (or create) `path` for read/write and make sure it is at least `size` bytes.
pub(crate) fn open_file(path: &Path, size: u64) -> Result<File> {
    if size == 0 {
        return Err(LotusError::InvalidFileSize(size));
    }

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    if file.metadata()?.len() < size {
        file.set_len(size)?;
    }
    Ok(file)
}

/// Check that `[offset, offset + len)` lies inside `capacity`.
pub(crate) fn check_range(offset: u64, len: usize, capacity: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(LotusError::OutOfRange {
            offset,
            len,
            capacity,
        }),
    }
}
