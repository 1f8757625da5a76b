//! Standard file I/O selector
//!
//! Positioned reads and writes on a regular file descriptor.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{LotusError, Result};

use super::{check_range, open_file, IoSelector};

/// IoSelector backed by `pread`/`pwrite`
///
/// ## Concurrency:
/// - `file`: RwLock so reads and writes share the descriptor while
///   `close`/`delete` take it exclusively
/// - `extent`: highest byte ever made readable, raised after each write
pub struct FileIoSelector {
    path: PathBuf,
    file: RwLock<Option<File>>,
    extent: AtomicU64,
}

impl FileIoSelector {
    /// Open `path`, preallocating it to `size` bytes
    pub fn open(path: &Path, size: u64) -> Result<Self> {
        let file = open_file(path, size)?;
        let extent = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(Some(file)),
            extent: AtomicU64::new(extent),
        })
    }
}

impl IoSelector for FileIoSelector {
    fn write(&self, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let guard = self.file.read();
        let file = guard.as_ref().ok_or(LotusError::Closed)?;
        write_all_at(file, buf, offset)?;

        // Writing past the end grows the file
        self.extent
            .fetch_max(offset + buf.len() as u64, Ordering::AcqRel);
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or(LotusError::Closed)?;
        check_range(offset, buf.len(), self.extent.load(Ordering::Acquire))?;

        if !buf.is_empty() {
            read_exact_at(file, buf, offset)?;
        }
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or(LotusError::Closed)?;
        file.sync_all()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(file) = self.file.write().take() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        if let Some(file) = self.file.write().take() {
            file.set_len(0)?;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn size(&self) -> u64 {
        self.extent.load(Ordering::Acquire)
    }
}

// =============================================================================
// Positioned I/O
// =============================================================================

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
