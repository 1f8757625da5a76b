//! Storage Module
//!
//! Log-structured storage for one data type.
//!
//! ## Responsibilities
//! - Own the active log file and the archived ones
//! - Append entries, rotating the active file at the size threshold
//! - Keep the index and the discard tracker in step with every write
//! - Rebuild the index from the log files on startup
//! - Compact stale-heavy files (GC)
//!
//! ## Layout
//! ```text
//!          ┌──────────────────────────── LogManager ───────────────────────────┐
//!  put ──► │ write_lock ─► active LogFile ─► Index ─► Discard (stale old loc)  │
//!  get ──► │ Index ─► active / archived LogFile ─► read_entry                  │
//!  gc  ──► │ Discard candidates ─► scan archived ─► rewrite live ─► delete     │
//!          └───────────────────────────────────────────────────────────────────┘
//! ```

mod gc;
mod manager;
mod recovery;

use std::time::{SystemTime, UNIX_EPOCH};

pub use gc::GcStats;
pub use manager::LogManager;

/// Current unix time in seconds
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
