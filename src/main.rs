//! Sweeps Zipf skew values and prints the average cost per increment of
//! each synchronization primitive as a brace-delimited block on stdout.
//!
//! Logs go to stderr; filter them with `RUST_LOG` (default `skewbench=info`).
//!
//! ```bash
//! cargo run --release -- --dataset small --skews 0.0,0.5,0.99
//! ```

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use tracing_subscriber::EnvFilter;

use skewbench::{
    BenchmarkConfig, BenchmarkOrchestrator, BraceBlockWriter, DatasetSize, PrimitiveKind,
    SkewPreset,
};

fn cli() -> Command {
    Command::new("skewbench")
        .about("Cycles per increment of spinlock, atomic and unsynchronized counters under Zipf skew")
        .arg(
            Arg::new("dataset")
                .long("dataset")
                .short('d')
                .value_parser(|s: &str| s.parse::<DatasetSize>().map_err(|e| e.to_string()))
                .default_value("large")
                .help("Arena size: small (32 MiB) or large (1 GiB)"),
        )
        .arg(
            Arg::new("dataset-bytes")
                .long("dataset-bytes")
                .value_parser(value_parser!(usize))
                .conflicts_with("dataset")
                .help("Arena size in bytes; must be a power-of-two multiple of 64"),
        )
        .arg(
            Arg::new("skews")
                .long("skews")
                .short('s')
                .value_parser(value_parser!(f64))
                .value_delimiter(',')
                .num_args(1..)
                .help("Skew values to sweep, in order"),
        )
        .arg(
            Arg::new("preset")
                .long("preset")
                .value_parser(|s: &str| s.parse::<SkewPreset>().map_err(|e| e.to_string()))
                .conflicts_with("skews")
                .default_value("fine")
                .help("Canned sweep when --skews is absent: fine (0.2..1.09) or full (0.0..0.99)"),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .short('t')
                .value_parser(value_parser!(usize))
                .help("Participants per run (default: hardware threads)"),
        )
        .arg(
            Arg::new("increments")
                .long("increments")
                .short('n')
                .value_parser(value_parser!(u64))
                .help("Increments per phase, split evenly across participants"),
        )
        .arg(
            Arg::new("key-buffer")
                .long("key-buffer")
                .value_parser(value_parser!(usize))
                .help("Precomputed keys per worker (power of two; default: one per slot)"),
        )
        .arg(
            Arg::new("per-thread-lock")
                .long("per-thread-lock")
                .action(ArgAction::SetTrue)
                .help("Add a fourth phase timing an uncontended private lock"),
        )
        .arg(
            Arg::new("no-pause")
                .long("no-pause")
                .action(ArgAction::SetTrue)
                .help("Spin on held locks without the relax hint"),
        )
        .arg(
            Arg::new("no-pin")
                .long("no-pin")
                .action(ArgAction::SetTrue)
                .help("Leave thread placement to the OS scheduler"),
        )
        .arg(
            Arg::new("verify")
                .long("verify")
                .action(ArgAction::SetTrue)
                .help("Check arena counters after every phase (always on in debug builds)"),
        )
}

fn config_from(matches: &ArgMatches) -> BenchmarkConfig {
    let mut config = BenchmarkConfig::default();

    config.dataset = match matches.get_one::<usize>("dataset-bytes") {
        Some(&bytes) => DatasetSize::Bytes(bytes),
        None => matches
            .get_one::<DatasetSize>("dataset")
            .copied()
            .unwrap_or(DatasetSize::Large),
    };

    config.skews = match matches.get_many::<f64>("skews") {
        Some(skews) => skews.copied().collect(),
        None => matches
            .get_one::<SkewPreset>("preset")
            .copied()
            .unwrap_or(SkewPreset::Fine)
            .values(),
    };

    if let Some(&threads) = matches.get_one::<usize>("threads") {
        config.participants = threads;
    }
    if let Some(&increments) = matches.get_one::<u64>("increments") {
        config.total_increments = increments;
    }
    config.key_buffer_len = matches.get_one::<usize>("key-buffer").copied();

    if matches.get_flag("per-thread-lock") {
        config.primitives.push(PrimitiveKind::PerThreadLock);
    }
    config.pause = !matches.get_flag("no-pause");
    config.pin_threads = !matches.get_flag("no-pin");
    config.verify_counts |= matches.get_flag("verify");

    config
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skewbench=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_thread_names(true)
        .init();
}

fn run() -> Result<()> {
    let config = config_from(&cli().get_matches());
    let orchestrator = BenchmarkOrchestrator::new(config)?;

    let mut sink = BraceBlockWriter::new(io::stdout().lock());
    orchestrator.sweep(&mut sink).context("benchmark sweep failed")
}

fn main() -> ExitCode {
    init_tracing();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> BenchmarkConfig {
        let argv = std::iter::once("skewbench").chain(args.iter().copied());
        config_from(&cli().try_get_matches_from(argv).unwrap())
    }

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn defaults_follow_config_defaults() {
        let config = parse(&[]);
        assert_eq!(config.dataset, DatasetSize::Large);
        assert_eq!(config.skews, SkewPreset::Fine.values());
        assert_eq!(config.primitives, PrimitiveKind::DEFAULT_SET.to_vec());
        assert!(config.pause);
        assert!(config.pin_threads);
    }

    #[test]
    fn flags_fill_the_config() {
        let config = parse(&[
            "--dataset",
            "small",
            "--skews",
            "0.0,0.5,1.09",
            "--threads",
            "4",
            "--increments",
            "100",
            "--key-buffer",
            "1024",
            "--per-thread-lock",
            "--no-pause",
            "--no-pin",
            "--verify",
        ]);

        assert_eq!(config.dataset, DatasetSize::Small);
        assert_eq!(config.skews, vec![0.0, 0.5, 1.09]);
        assert_eq!(config.participants, 4);
        assert_eq!(config.total_increments, 100);
        assert_eq!(config.key_buffer_len, Some(1024));
        assert_eq!(config.primitives.last(), Some(&PrimitiveKind::PerThreadLock));
        assert!(!config.pause);
        assert!(!config.pin_threads);
        assert!(config.verify_counts);
        config.validate().unwrap();
    }

    #[test]
    fn explicit_bytes_and_preset() {
        let config = parse(&["--dataset-bytes", "65536", "--preset", "full"]);
        assert_eq!(config.dataset, DatasetSize::Bytes(65536));
        assert_eq!(config.skews.len(), 100);
    }
}
