// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![deny(
    warnings,
    clippy::all,
    clippy::pedantic,
    rust_2018_idioms,
    missing_docs,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
// The CLI is expected to print to stdout/stderr.
#![allow(clippy::print_stdout, clippy::print_stderr)]
//! `arbor` developer CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use arbor_config_fs::FsConfigStore;
use arbor_core::{ConfigService, ConfigStore, PoolConfig, POOL_CONFIG_KEY};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn, Level};

mod reduce;

use reduce::{OpKind, Workload};

#[derive(Parser, Debug)]
#[command(name = "arbor", author, version, about = "Run and time arrival-order reductions")]
struct Cli {
    /// Maximum log level written to stderr.
    #[arg(long, global = true, default_value_t = Level::WARN)]
    log_level: Level,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce values asynchronously and reduce them as they arrive.
    Reduce(ReduceArgs),
    /// Inspect the stored pool settings.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective pool config as JSON.
    Show(PoolArgs),
}

#[derive(Args, Debug)]
struct ReduceArgs {
    /// Number of values to produce.
    #[arg(long, default_value_t = 1_000)]
    count: u32,
    /// Microseconds each producer task sleeps before resolving its value.
    #[arg(long, default_value_t = 0)]
    delay_us: u64,
    /// Threads in the producer pool.
    #[arg(long, default_value_t = 4)]
    producers: usize,
    /// Reduction operator.
    #[arg(long, value_enum, default_value_t = OpKind::Sum)]
    op: OpKind,
    #[command(flatten)]
    pool: PoolArgs,
}

#[derive(Args, Debug)]
struct PoolArgs {
    /// Reduction pool worker threads (overrides the stored config).
    #[arg(long)]
    workers: Option<usize>,
    /// Reduction pool queue bound (overrides the stored config).
    #[arg(long)]
    queue_capacity: Option<usize>,
    /// Directory holding `pool.json` instead of the platform config dir.
    #[arg(long, conflicts_with = "no_config")]
    config_dir: Option<PathBuf>,
    /// Ignore stored settings and start from the defaults.
    #[arg(long)]
    no_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Reduce(args) => {
            let pool = effective_pool(&args.pool);
            let workload = Workload {
                count: args.count,
                delay: Duration::from_micros(args.delay_us),
                producers: args.producers,
            };
            let report = reduce::run(args.op, &workload, &pool)?;
            println!("{report}");
        }
        Command::Config(ConfigCommand::Show(args)) => {
            let pool = effective_pool(&args);
            println!("{}", serde_json::to_string_pretty(&pool)?);
        }
    }
    Ok(())
}

/// Stored settings (or defaults) with command-line overrides applied.
fn effective_pool(args: &PoolArgs) -> PoolConfig {
    let mut pool = if args.no_config {
        PoolConfig::default()
    } else {
        stored_pool(args.config_dir.as_deref())
    };
    if let Some(workers) = args.workers {
        pool.workers = workers;
    }
    if let Some(capacity) = args.queue_capacity {
        pool.queue_capacity = Some(capacity);
    }
    pool
}

/// Opens the pool settings store. Every failure degrades to
/// [`PoolConfig::default`].
fn stored_pool(dir: Option<&Path>) -> PoolConfig {
    let store = match dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    match store {
        Ok(store) => load_or_init(&ConfigService::new(store)),
        Err(err) => {
            warn!(%err, "config store unavailable; using defaults");
            PoolConfig::default()
        }
    }
}

/// Loads the `pool` key, writing the defaults on first use.
fn load_or_init<S: ConfigStore>(service: &ConfigService<S>) -> PoolConfig {
    match service.load::<PoolConfig>(POOL_CONFIG_KEY) {
        Ok(Some(pool)) => {
            debug!(?pool, "loaded pool config");
            pool
        }
        Ok(None) => {
            let pool = PoolConfig::default();
            if let Err(err) = service.save(POOL_CONFIG_KEY, &pool) {
                warn!(%err, "could not persist default pool config");
            }
            pool
        }
        Err(err) => {
            warn!(%err, "unreadable pool config; using defaults");
            PoolConfig::default()
        }
    }
}
