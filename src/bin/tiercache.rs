//! tiercache command-line tool
//!
//! Exercises a tiered object cache built from configuration and prints
//! the effective settings.
//!
//! # Examples
//!
//! ```bash
//! # Run a parallel tile workload with a 64 MiB budget
//! TIERCACHE_MEMORY_BUDGET=67108864 tiercache bench --tiles 2048
//!
//! # Show the effective configuration
//! tiercache --config cache.toml config
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Instant;
use tiercache::cache::SampleFormat;
use tiercache::metrics::{export_metrics, init_metrics};
use tiercache::{CacheConfig, ObjectCache, TileBroker, TileData, TileLayout};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// tiercache - Tiered object cache
#[derive(Parser, Debug)]
#[command(name = "tiercache")]
#[command(version = tiercache::VERSION)]
#[command(about = "Tiered object cache with LRU spill to a scratch store", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path; console only when absent
    #[arg(long, global = true, env = "TIERCACHE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a parallel put/get-once tile workload
    Bench(BenchArgs),

    /// Print the effective configuration as TOML
    Config,

    /// Show version
    Version,
}

/// Sample type of the synthetic tiles
#[derive(ValueEnum, Clone, Copy, Debug)]
enum TileFormat {
    U8,
    U16,
    I32,
}

impl From<TileFormat> for SampleFormat {
    fn from(format: TileFormat) -> Self {
        match format {
            TileFormat::U8 => SampleFormat::U8,
            TileFormat::U16 => SampleFormat::U16,
            TileFormat::I32 => SampleFormat::I32,
        }
    }
}

/// Workload arguments
#[derive(Args, Debug)]
struct BenchArgs {
    /// Number of tiles put and then taken back
    #[arg(short, long, default_value = "1024")]
    tiles: u64,

    /// Samples per tile
    #[arg(short, long, default_value = "65536")]
    samples: usize,

    /// Sample type
    #[arg(short, long, value_enum, default_value = "u16")]
    format: TileFormat,

    /// Worker threads (0 = one per core)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Override the configured memory budget (bytes)
    #[arg(long)]
    memory_budget: Option<usize>,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match cli.command {
        Commands::Bench(ref args) => bench_command(cli.config.as_deref(), args),
        Commands::Config => {
            let config = CacheConfig::load(cli.config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("tiercache {}", tiercache::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with console output and optional rolling files
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    let file_layer = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "tiercache.log");
            Some(fmt::layer().with_writer(file_appender).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn synthetic_tile(layout: TileLayout, seed: u64) -> TileData {
    match layout.format {
        SampleFormat::U8 => {
            TileData::U8((0..layout.samples).map(|i| (seed as usize + i) as u8).collect())
        }
        SampleFormat::U16 => {
            TileData::U16((0..layout.samples).map(|i| (seed as usize + i) as u16).collect())
        }
        SampleFormat::I32 => {
            TileData::I32((0..layout.samples).map(|i| (seed as usize + i) as i32).collect())
        }
    }
}

/// Bench command - put every tile, then take every tile back
fn bench_command(config_path: Option<&std::path::Path>, args: &BenchArgs) -> anyhow::Result<()> {
    init_metrics();

    let mut config = CacheConfig::load(config_path)?;
    if let Some(budget) = args.memory_budget {
        config.memory_budget = budget;
    }

    let layout = TileLayout::new(args.format.into(), args.samples);
    let cache: ObjectCache<u64, TileBroker> = ObjectCache::from_config(TileBroker, &config)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build()?;

    info!(
        tiles = args.tiles,
        tile_bytes = layout.encoded_len(),
        threads = pool.current_num_threads(),
        write_through = config.uses_write_through(),
        "Starting tile workload"
    );

    let started = Instant::now();
    pool.install(|| {
        (0..args.tiles)
            .into_par_iter()
            .try_for_each(|key| cache.put(key, &synthetic_tile(layout, key)))
    })?;
    let put_elapsed = started.elapsed();

    let started = Instant::now();
    let missing = pool.install(|| -> tiercache::error::Result<usize> {
        (0..args.tiles)
            .into_par_iter()
            .map(|key| match cache.get_once(&key, layout)? {
                Some(tile) if tile == synthetic_tile(layout, key) => Ok(0),
                Some(_) => Err(tiercache::error::Error::Consistency(format!(
                    "Tile {} came back altered",
                    key
                ))),
                None => Ok(1),
            })
            .try_reduce(|| 0, |a, b| Ok(a + b))
    })?;
    let get_elapsed = started.elapsed();

    let stats = cache.stats();
    cache.dispose()?;

    println!("tiles:            {}", args.tiles);
    println!("tile bytes:       {}", layout.encoded_len());
    println!("put:              {:?}", put_elapsed);
    println!("get-once:         {:?}", get_elapsed);
    println!("missing:          {}", missing);
    println!("resident entries: {}", stats.map.resident_entries);
    println!("resident bytes:   {}", stats.map.resident_bytes);
    println!("hits / misses:    {} / {}", stats.map.hits, stats.map.misses);
    println!("hit rate:         {:.3}", stats.map.hit_rate);
    println!("spills:           {}", stats.map.spills);
    println!("stored records:   {}", stats.store.records);
    println!("stored bytes:     {}", stats.store.stored_bytes);
    if let Some(allocator) = stats.map.allocator {
        println!("chunks:           {}", allocator.chunk_count);
    }

    if args.metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}
