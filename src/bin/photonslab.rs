//! PhotonSlab command-line driver
//!
//! Small front end over a `HybridKv` of fixed-size `u64 → u64` entries.
//!
//! # Examples
//!
//! ```bash
//! # Create a store
//! photonslab data/kv create --capacity 4096
//!
//! # Store and read back a key
//! photonslab data/kv put 7 700
//! photonslab data/kv get 7
//!
//! # Walk through insert / reopen / remove / reuse
//! photonslab data/demo demo
//! ```

use anyhow::Context;
use bytemuck::{Pod, Zeroable};
use clap::{Parser, Subcommand};
use photonslab::{HybridKv, Record, SlabConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// PhotonSlab - crash-consistent slab storage
#[derive(Parser, Debug)]
#[command(name = "photonslab")]
#[command(version = photonslab::VERSION)]
#[command(about = "PhotonSlab - crash-consistent slab storage with a DRAM key index", long_about = None)]
#[command(author = "Anton Feldmann <afeldman@lynqtech.com>")]
struct Cli {
    /// Store directory
    dir: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (defaults come from PHOTONSLAB_* variables)
    #[arg(long, global = true, env = "PHOTONSLAB_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true, env = "PHOTONSLAB_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty store
    Create {
        /// Slots to reserve up front
        #[arg(short, long, default_value = "1024")]
        capacity: u64,
    },

    /// Insert a key (fails if it already exists)
    Put { key: u64, value: u64 },

    /// Print the value stored under a key
    Get { key: u64 },

    /// Remove a key
    Remove { key: u64 },

    /// Run the slot reuse walkthrough
    Demo,

    /// Print store statistics
    Stats,

    /// Check the free list against the slot tags
    Verify,
}

/// One stored entry
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
struct Entry {
    key: u64,
    value: u64,
}

impl Record for Entry {
    type Key = u64;

    fn key(&self) -> u64 {
        self.key
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
        // --help / --version
        Err(e) => e.exit(),
    };

    if let Err(e) = setup_logging(&cli) {
        eprintln!("Failed to set up logging: {:#}", e);
        return ExitCode::from(1);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => SlabConfig::from_toml_file(path)?,
        None => SlabConfig::from_env(),
    };

    match cli.command {
        Commands::Create { capacity } => create_command(&cli.dir, capacity, config),
        Commands::Put { key, value } => put_command(&cli.dir, key, value, config),
        Commands::Get { key } => get_command(&cli.dir, key, config),
        Commands::Remove { key } => remove_command(&cli.dir, key, config),
        Commands::Demo => demo_command(&cli.dir, config),
        Commands::Stats => stats_command(&cli.dir, config),
        Commands::Verify => verify_command(&cli.dir, config),
    }
}

/// Setup logging on stderr, plus rolling files when a log directory is given
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let file_layer = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "photonslab.log");
            Some(fmt::layer().with_writer(file_appender).with_ansi(false))
        }
        None => None,
    };

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color)
                .compact(),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .try_init()?;

    Ok(())
}

fn open(dir: &Path, config: SlabConfig) -> anyhow::Result<HybridKv<Entry>> {
    HybridKv::open(dir, config).with_context(|| format!("Failed to open store at {}", dir.display()))
}

fn create_command(dir: &Path, capacity: u64, config: SlabConfig) -> anyhow::Result<()> {
    let kv = HybridKv::<Entry>::create(dir, capacity, config)
        .with_context(|| format!("Failed to create store at {}", dir.display()))?;
    let stats = kv.stats();
    println!(
        "Created {} (id {}, capacity {} slots of {} bytes)",
        dir.display(),
        kv.slab().store_id(),
        stats.slab.capacity,
        stats.slab.slot_size
    );
    Ok(())
}

fn put_command(dir: &Path, key: u64, value: u64, config: SlabConfig) -> anyhow::Result<()> {
    let kv = open(dir, config)?;
    if !kv.insert(Entry { key, value })? {
        anyhow::bail!("Key {} already exists", key);
    }
    kv.flush()?;
    println!("{} -> {}", key, value);
    Ok(())
}

fn get_command(dir: &Path, key: u64, config: SlabConfig) -> anyhow::Result<()> {
    let kv = open(dir, config)?;
    match kv.get(&key)? {
        Some(entry) => {
            println!("{}", entry.value);
            Ok(())
        }
        None => anyhow::bail!("Key {} not found", key),
    }
}

fn remove_command(dir: &Path, key: u64, config: SlabConfig) -> anyhow::Result<()> {
    let kv = open(dir, config)?;
    if !kv.remove(&key)? {
        anyhow::bail!("Key {} not found", key);
    }
    kv.flush()?;
    println!("Removed {}", key);
    Ok(())
}

/// Insert two keys, reopen, remove both, then show the freed slots coming
/// back most-recent-first before the slab grows again.
fn demo_command(dir: &Path, config: SlabConfig) -> anyhow::Result<()> {
    let kv = if dir.join(photonslab::storage::slab::DATA_FILE).exists() {
        open(dir, config.clone())?
    } else {
        HybridKv::<Entry>::create(dir, 0, config.clone())?
    };
    info!(path = ?dir, "Running demo");

    for key in [5, 15] {
        kv.insert(Entry { key, value: key * 10 })?;
        print_placement(&kv, "insert", key);
    }
    kv.flush()?;
    drop(kv);

    let kv = open(dir, config)?;
    println!("reopened: {} keys indexed", kv.len());

    for key in [5, 15] {
        let slot = kv.slot_of(&key);
        kv.remove(&key)?;
        match slot {
            Some(slot) => println!("remove {:>3} freed   {}", key, slot),
            None => println!("remove {:>3} (absent)", key),
        }
    }

    for key in [5, 15, 20] {
        kv.insert(Entry { key, value: key * 10 })?;
        print_placement(&kv, "insert", key);
    }

    let stats = kv.slab().verify()?;
    println!(
        "slots: {} used, {} occupied, {} vacant",
        stats.len, stats.occupied, stats.vacant
    );
    kv.flush()?;
    Ok(())
}

fn print_placement(kv: &HybridKv<Entry>, verb: &str, key: u64) {
    match kv.slot_of(&key) {
        Some(slot) => println!("{} {:>3} -> {}", verb, key, slot),
        None => println!("{} {:>3} -> (not indexed)", verb, key),
    }
}

fn stats_command(dir: &Path, config: SlabConfig) -> anyhow::Result<()> {
    let kv = open(dir, config)?;
    let stats = kv.stats();
    println!("store id:   {}", kv.slab().store_id());
    println!("keys:       {}", stats.keys);
    println!("slots used: {}", stats.slab.len);
    println!("occupied:   {}", stats.slab.occupied);
    println!("vacant:     {}", stats.slab.vacant);
    println!("capacity:   {}", stats.slab.capacity);
    println!("slot size:  {} bytes", stats.slab.slot_size);
    Ok(())
}

fn verify_command(dir: &Path, config: SlabConfig) -> anyhow::Result<()> {
    let kv = open(dir, config)?;
    let stats = kv.slab().verify()?;
    if stats.occupied as usize != kv.len() {
        anyhow::bail!(
            "Index holds {} keys but {} slots are occupied",
            kv.len(),
            stats.occupied
        );
    }
    println!(
        "OK: {} occupied, {} vacant, free list consistent",
        stats.occupied, stats.vacant
    );
    Ok(())
}
