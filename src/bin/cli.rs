//! LotusKV CLI
//!
//! Command-line interface over an on-disk LotusKV directory.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lotuskv::{Config, DataType, Engine, LotusError};
use tracing_subscriber::{fmt, EnvFilter};

/// LotusKV CLI
#[derive(Parser, Debug)]
#[command(name = "lotuskv-cli")]
#[command(about = "CLI for the LotusKV embedded key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./lotuskv_data")]
    data_dir: String,

    /// Use memory-mapped log files
    #[arg(long)]
    mmap: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Expire the key after this many seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List key-value pairs by prefix
    Scan {
        /// Key prefix, empty for every key
        #[arg(default_value = "")]
        prefix: String,

        /// Maximum number of pairs
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Compact log files of one data type
    Gc {
        /// Data type suffix (strs, list, hash, sets, zset)
        #[arg(short = 't', long, default_value = "strs")]
        data_type: DataType,

        /// Minimum stale ratio of a file to compact
        #[arg(short, long, default_value = "0.5")]
        ratio: f64,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lotuskv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let io_type = if args.mmap {
        lotuskv::IoType::Mmap
    } else {
        lotuskv::IoType::FileIo
    };
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .io_type(io_type)
        .log_file_gc_interval(None)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&engine, args.command).and_then(|_| engine.close());
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("(error) {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &Engine, command: Commands) -> lotuskv::Result<()> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes()) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(LotusError::KeyNotFound) => println!("(nil)"),
            Err(e) => return Err(e),
        },
        Commands::Set { key, value, ttl } => {
            match ttl {
                Some(secs) => engine.set_ex(key.as_bytes(), value.as_bytes(), Duration::from_secs(secs))?,
                None => engine.set(key.as_bytes(), value.as_bytes())?,
            }
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { prefix, limit } => {
            for (key, value) in engine.scan(prefix.as_bytes(), limit)? {
                println!(
                    "{} => {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Gc { data_type, ratio } => {
            let stats = engine.run_log_file_gc(data_type, ratio)?;
            println!(
                "compacted {} file(s), rewrote {} entries, dropped {}",
                stats.files_compacted, stats.entries_rewritten, stats.entries_dropped
            );
        }
    }
    Ok(())
}
