//! burrowdb - inspect and edit a store from the command line

use std::path::PathBuf;

use anyhow::{Context, Result};
use burrowdb::config::OpenMode;
use burrowdb::{Database, StoreConfig};
use clap::{Parser as ClapParser, Subcommand};

/// burrowdb - an embedded page-oriented key/value store
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Store file
    path: PathBuf,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pages kept in the buffer cache
    #[arg(long)]
    cache_pages: Option<usize>,

    /// Do not fsync the log on commit
    #[arg(long)]
    no_sync: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under a key
    Get { key: String },
    /// Store a value, replacing any existing one
    Put { key: String, value: String },
    /// Remove a key
    Delete { key: String },
    /// List entries in key order
    Scan {
        /// First key to include
        #[arg(long)]
        from: Option<String>,
        /// Last key to include
        #[arg(long)]
        to: Option<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Fold the log into the store file
    Checkpoint,
    /// Print cache, log and recovery counters as JSON
    Stats,
    /// Check the tree and free list, printing a JSON report
    Verify,
}

impl Command {
    fn writes(&self) -> bool {
        matches!(
            self,
            Command::Put { .. } | Command::Delete { .. } | Command::Checkpoint
        )
    }
}

fn load_config(args: &Args) -> Result<StoreConfig> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(pages) = args.cache_pages {
        config.cache_capacity = pages;
    }
    if args.no_sync {
        config.sync_on_commit = false;
    }
    if !args.command.writes() && args.path.exists() {
        config.mode = OpenMode::ReadOnly;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = load_config(&args)?;
    let db = Database::open_with(&args.path, config)
        .with_context(|| format!("Failed to open store {}", args.path.display()))?;

    match &args.command {
        Command::Get { key } => match db.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => {
                eprintln!("{}: not found", key);
                std::process::exit(1);
            }
        },
        Command::Put { key, value } => {
            let old = db
                .insert(key.as_bytes(), value.as_bytes())
                .with_context(|| format!("Failed to store {}", key))?;
            if old.is_some() {
                println!("replaced {}", key);
            } else {
                println!("inserted {}", key);
            }
        }
        Command::Delete { key } => {
            if db.delete(key.as_bytes())? {
                println!("deleted {}", key);
            } else {
                println!("{}: not found", key);
            }
        }
        Command::Scan { from, to, limit } => {
            let low = from.as_deref().map(str::as_bytes);
            let high = to.as_deref().map(str::as_bytes);
            let limit = limit.unwrap_or(usize::MAX);
            let mut printed = 0usize;
            db.view(|txn| {
                txn.scan_with(bound(low), bound(high), |key, value| {
                    if printed >= limit {
                        return false;
                    }
                    println!(
                        "{}\t{}",
                        String::from_utf8_lossy(key),
                        String::from_utf8_lossy(value)
                    );
                    printed += 1;
                    true
                })
            })?;
        }
        Command::Checkpoint => {
            let stats = db.checkpoint().context("Checkpoint failed")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&db.stats())?);
        }
        Command::Verify => {
            let report = db.verify().context("Verification failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    if !db.is_read_only() {
        db.close().context("Failed to close store")?;
    }
    Ok(())
}

fn bound(key: Option<&[u8]>) -> std::ops::Bound<&[u8]> {
    match key {
        Some(k) => std::ops::Bound::Included(k),
        None => std::ops::Bound::Unbounded,
    }
}
