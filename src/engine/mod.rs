//! Engine Module
//!
//! The embedded database: one LogManager per data type behind a directory
//! lock, plus the background GC worker.
//!
//! ## Responsibilities
//! - Lock the data directory against a second process
//! - Open (and recover) the storage of every data type
//! - Run log file GC periodically when an interval is configured
//! - Expose string commands and the per-type storage handles

mod strings;

use std::fs;
use std::panic;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{LotusError, Result};
use crate::flock::{FileLock, LOCK_FILE_NAME};
use crate::logfile::DataType;
use crate::storage::{GcStats, LogManager};

/// The main database handle
///
/// ## Concurrency Model:
/// - Share by reference (or `Arc<Engine>`) across threads; every method
///   takes `&self`
/// - Each data type has its own write lock, so writes to different types
///   never contend
/// - `strs_lock` serializes read-modify-write string commands
///   (`incr_by`/`decr_by`)
/// - GC runs per data type and only excludes other GC runs of that type
pub struct Engine {
    config: Arc<Config>,

    /// Indexed by `DataType::index()`
    managers: Vec<Arc<LogManager>>,

    gc_worker: Mutex<Option<GcWorker>>,

    closed: AtomicBool,

    strs_lock: Mutex<()>,

    /// Held for the lifetime of the engine
    _lock: FileLock,
}

/// Background thread running GC for every data type on a fixed interval
struct GcWorker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl Engine {
    /// Open or create a database with the given config
    ///
    /// On startup:
    /// 1. Validate the config and create the data directory
    /// 2. Lock the directory
    /// 3. Open every data type in parallel (replaying its log files)
    /// 4. Start the GC worker if an interval is configured
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let lock = FileLock::lock(config.data_dir.join(LOCK_FILE_NAME))?;
        let config = Arc::new(config);

        let managers = thread::scope(|s| {
            let handles: Vec<_> = DataType::ALL
                .iter()
                .map(|&data_type| {
                    let config = Arc::clone(&config);
                    s.spawn(move || LogManager::open(&config.data_dir, data_type, Arc::clone(&config)))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result.map(Arc::new),
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let gc_worker = config
            .log_file_gc_interval
            .map(|interval| GcWorker::spawn(interval, config.log_file_gc_ratio, managers.clone()))
            .transpose()?;

        info!(data_dir = %config.data_dir.display(), "engine opened");

        Ok(Self {
            config,
            managers,
            gc_worker: Mutex::new(gc_worker),
            closed: AtomicBool::new(false),
            strs_lock: Mutex::new(()),
            _lock: lock,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Storage of one data type
    pub fn store(&self, data_type: DataType) -> &LogManager {
        &self.managers[data_type.index()]
    }

    /// Compact the log files of `data_type` whose stale ratio is at least
    /// `ratio`. Fails with `GcRunning` if one is already in progress.
    pub fn run_log_file_gc(&self, data_type: DataType, ratio: f64) -> Result<GcStats> {
        self.ensure_open()?;
        self.store(data_type).run_gc(ratio)
    }

    /// Flush every data type to stable storage
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        for manager in &self.managers {
            manager.sync()?;
        }
        Ok(())
    }

    /// Stop the GC worker, then sync and close every data type.
    ///
    /// Later calls are no-ops; other operations fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(worker) = self.gc_worker.lock().take() {
            worker.stop();
        }

        let mut first_error = None;
        for manager in &self.managers {
            if let Err(e) = manager.close() {
                error!(data_type = %manager.data_type(), error = %e, "failed to close log manager");
                first_error.get_or_insert(e);
            }
        }

        info!(data_dir = %self.config.data_dir.display(), "engine closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LotusError::Closed);
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl GcWorker {
    fn spawn(interval: Duration, ratio: f64, managers: Vec<Arc<LogManager>>) -> Result<Self> {
        // Zero capacity: nothing is ever sent, dropping the sender stops the loop
        let (shutdown, stopped) = channel::bounded(0);
        let handle = thread::Builder::new()
            .name("lotuskv-gc".to_string())
            .spawn(move || run_periodic_gc(interval, ratio, &managers, stopped))?;
        Ok(Self { shutdown, handle })
    }

    fn stop(self) {
        drop(self.shutdown);
        if self.handle.join().is_err() {
            error!("gc worker panicked");
        }
    }
}

fn run_periodic_gc(interval: Duration, ratio: f64, managers: &[Arc<LogManager>], stopped: Receiver<()>) {
    let ticker = channel::tick(interval);
    debug!(?interval, ratio, "gc worker started");

    loop {
        select! {
            recv(ticker) -> _ => {
                for manager in managers {
                    match manager.run_gc(ratio) {
                        Ok(_) => {}
                        Err(LotusError::GcRunning) => {
                            warn!(data_type = %manager.data_type(), "gc already running, skipped");
                        }
                        Err(e) => {
                            error!(data_type = %manager.data_type(), error = %e, "periodic gc failed");
                        }
                    }
                }
            }
            recv(stopped) -> _ => break,
        }
    }

    debug!("gc worker stopped");
}
