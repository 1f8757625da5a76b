//! Directory lock
//!
//! An exclusive advisory lock on `{data_dir}/FLOCK`, held for as long as the
//! engine is open so two processes never share a data directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::error::{LotusError, Result};

/// Name of the lock file inside the data directory
pub const LOCK_FILE_NAME: &str = "FLOCK";

/// Held lock; released when dropped
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Create `path` if needed and lock it.
    ///
    /// Fails with `DirectoryLocked` if another handle already holds it. The
    /// file holds the owner's process id.
    pub fn lock<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = Self::try_lock(&file) {
            return Err(match e.kind() {
                io::ErrorKind::WouldBlock => LotusError::DirectoryLocked(path),
                _ => LotusError::Io(e),
            });
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        // SAFETY: the descriptor belongs to `file`, which outlives the call
        let result = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No advisory locking outside unix
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
