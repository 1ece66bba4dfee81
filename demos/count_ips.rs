use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use ipv4_cardinality::config::default_workers;
use ipv4_cardinality::hyperloglog::{error_for_precision, DEFAULT_PRECISION};
use ipv4_cardinality::{Cardinality, Config, DistinctCounter, MalformedPolicy, Strategy};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Bitset,
    DiskBitset,
    Hyperloglog,
}

/// Count distinct IPv4 addresses in a file with one address per line.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Input log.
    path: PathBuf,

    #[arg(long, value_enum, default_value_t = StrategyArg::Bitset)]
    strategy: StrategyArg,

    #[arg(long, env = "IPV4_WORKERS", default_value_t = default_workers())]
    workers: usize,

    /// HyperLogLog precision, `2^precision` registers.
    #[arg(long, default_value_t = DEFAULT_PRECISION)]
    precision: u8,

    /// HyperLogLog hash seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Bitmap file used by the disk-bitset strategy.
    #[arg(long, default_value = "bitmap.bin")]
    bitmap: PathBuf,

    /// Recreate the bitmap file instead of resuming from it.
    #[arg(long)]
    reset: bool,

    /// Skip lines that are not dotted quads instead of failing.
    #[arg(long)]
    skip_malformed: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let strategy = match args.strategy {
        StrategyArg::Bitset => Strategy::Bitset,
        StrategyArg::DiskBitset => Strategy::DiskBitset {
            path: args.bitmap,
            reset: args.reset,
        },
        StrategyArg::Hyperloglog => Strategy::HyperLogLog,
    };
    let malformed = if args.skip_malformed {
        MalformedPolicy::Skip
    } else {
        MalformedPolicy::Fail
    };
    let config = Config::default()
        .with_workers(args.workers)
        .with_strategy(strategy)
        .with_precision(args.precision)
        .with_hash_seed(args.seed)
        .with_malformed(malformed);

    let counter = DistinctCounter::new(config)?;
    let started = Instant::now();
    let report = counter.count(&args.path)?;

    println!("distinct addresses: {}", report.cardinality);
    if let Cardinality::Estimate(_) = report.cardinality {
        println!(
            "expected relative error: {:.2}%",
            100.0 * error_for_precision(args.precision)
        );
    }
    println!("lines: {}, malformed: {}", report.lines, report.malformed);
    println!("newly observed: {}", report.newly_observed);
    println!("chunks: {}, elapsed: {:?}", report.chunks, started.elapsed());
    Ok(())
}
