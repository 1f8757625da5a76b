//! # LotusKV
//!
//! An embedded, log-structured key-value store with:
//! - Append-only log files per data type, rotated at a size threshold
//! - CRC-32 framed entries and crash recovery that stops at a torn tail
//! - Stale byte tracking that drives log file compaction (GC)
//! - Positioned file I/O or memory-mapped I/O, chosen per config
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │        (directory lock, string commands, GC worker)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ one per data type
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       LogManager                             │
//! │          (write lock, rotation, recovery, GC)                │
//! └───────┬──────────────────────┬──────────────────────┬───────┘
//!         │                      │                      │
//!         ▼                      ▼                      ▼
//!   ┌───────────┐          ┌───────────┐          ┌───────────┐
//!   │  LogFile  │          │   Index   │          │  Discard  │
//!   │ (append)  │          │ (RwLock)  │          │ (applier) │
//!   └─────┬─────┘          └───────────┘          └───────────┘
//!         │
//!         ▼
//!   ┌───────────┐
//!   │IoSelector │
//!   │file / mmap│
//!   └───────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod ioselector;
pub mod logfile;
pub mod discard;
pub mod index;
pub mod storage;
pub mod engine;
pub mod flock;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LotusError, Result};
pub use config::{Config, IndexMode, IoType};
pub use engine::Engine;
pub use logfile::DataType;
pub use storage::{GcStats, LogManager};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of LotusKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
