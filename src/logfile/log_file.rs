//! Log file
//!
//! One append-only file: an IoSelector plus an atomic append cursor.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::IoType;
use crate::error::{LotusError, Result};
use crate::ioselector::{check_range, new_selector, IoSelector};

use super::{decode_header, entry_crc, log_file_path, DataType, LogEntry, CRC_SIZE, MAX_HEADER_SIZE};

/// An append-only log file for one data type
///
/// ## Concurrency:
/// - `write_at`: atomic cursor, readable without locking
/// - `append_lock`: serializes appends so two writers never share a range
/// - reads go straight to the IoSelector and may run concurrently
pub struct LogFile {
    fid: u32,
    data_type: DataType,
    path: PathBuf,
    io: Box<dyn IoSelector>,
    write_at: AtomicU64,
    append_lock: Mutex<()>,
}

impl LogFile {
    /// Open or create the log file `fid` of `data_type` inside `dir`,
    /// preallocated to `size` bytes. The cursor starts at 0.
    pub fn open(
        dir: &Path,
        fid: u32,
        size: u64,
        data_type: DataType,
        io_type: IoType,
    ) -> Result<Self> {
        if size == 0 {
            return Err(LotusError::InvalidFileSize(size));
        }

        let path = log_file_path(dir, data_type, fid);
        let io = new_selector(&path, size, io_type)?;

        Ok(Self {
            fid,
            data_type,
            path,
            io,
            write_at: AtomicU64::new(0),
            append_lock: Mutex::new(()),
        })
    }

    /// Append `buf` at the cursor, returning the offset it was written at.
    ///
    /// The cursor only moves once the write succeeded.
    pub fn write(&self, buf: &[u8]) -> Result<u64> {
        let _guard = self.append_lock.lock();
        let offset = self.write_at.load(Ordering::Acquire);
        if buf.is_empty() {
            return Ok(offset);
        }

        self.io.write(buf, offset)?;
        self.write_at
            .store(offset + buf.len() as u64, Ordering::Release);
        Ok(offset)
    }

    /// Read exactly `size` bytes at `offset`.
    ///
    /// Fails with `OutOfRange` before allocating if the range does not fit
    /// inside the file.
    pub fn read(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        check_range(offset, size, self.io.size())?;
        let mut buf = vec![0u8; size];
        self.io.read(&mut buf, offset)?;
        Ok(buf)
    }

    /// Read the entry stored at `offset`, returning it with its encoded size.
    ///
    /// Returns:
    /// - `Ok(Some((entry, size)))`: a valid entry
    /// - `Ok(None)`: end of entries (no room for a header, an undecodable
    ///   header, or the zeroed preallocated tail)
    /// - `Err(InvalidCrc)`: checksum mismatch
    /// - `Err(OutOfRange)`: the header claims more bytes than the file has
    pub fn read_entry(&self, offset: u64) -> Result<Option<(LogEntry, u64)>> {
        let capacity = self.io.size();
        if offset >= capacity {
            return Ok(None);
        }

        let header_len = (capacity - offset).min(MAX_HEADER_SIZE as u64) as usize;
        let header_buf = self.read(offset, header_len)?;
        let Some((header, header_size)) = decode_header(&header_buf) else {
            return Ok(None);
        };
        if header.crc32 == 0 && header.key_size == 0 && header.value_size == 0 {
            return Ok(None);
        }

        let key_size = header.key_size as usize;
        let kv_size = key_size + header.value_size as usize;
        check_range(offset + header_size as u64, kv_size, capacity)?;
        let mut kv = if kv_size > 0 {
            self.read(offset + header_size as u64, kv_size)?
        } else {
            Vec::new()
        };

        let actual = entry_crc(&header_buf[CRC_SIZE..header_size], &kv[..key_size], &kv[key_size..]);
        if actual != header.crc32 {
            return Err(LotusError::InvalidCrc {
                expected: header.crc32,
                actual,
            });
        }

        let value = kv.split_off(key_size);
        let entry = LogEntry {
            key: kv,
            value,
            expired_at: header.expired_at,
            entry_type: header.entry_type,
        };
        Ok(Some((entry, (header_size + kv_size) as u64)))
    }

    /// Flush written data to stable storage
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Close the file (idempotent)
    pub fn close(&self) -> Result<()> {
        self.io.close()
    }

    /// Close and remove the file from disk
    pub fn delete(&self) -> Result<()> {
        self.io.delete()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn fid(&self) -> u32 {
        self.fid
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current append offset
    pub fn write_at(&self) -> u64 {
        self.write_at.load(Ordering::Acquire)
    }

    /// Move the append cursor, used after recovery finds the end of valid data
    pub fn set_write_at(&self, offset: u64) {
        let _guard = self.append_lock.lock();
        self.write_at.store(offset, Ordering::Release);
    }

    /// Readable extent of the file
    pub fn capacity(&self) -> u64 {
        self.io.size()
    }
}

impl fmt::Debug for LogFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogFile")
            .field("fid", &self.fid)
            .field("data_type", &self.data_type)
            .field("path", &self.path)
            .field("write_at", &self.write_at())
            .finish()
    }
}
