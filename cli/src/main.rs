//! tensorfuzz CLI: list harness targets, replay reproducers, inspect inputs

mod commands;
mod utils;

use anyhow::{Result, bail};
use clap::CommandFactory;
use clap::{Parser, Subcommand};
use tensorfuzz::DecodeLimits;
use tensorfuzz::models::{MAX_DIM, MAX_RANK, MIN_DIM, MIN_RANK};

use commands::{print_decoded_file, print_replay_summary, print_targets_table, replay};

#[derive(Parser)]
#[command(
    name = "tensorfuzz",
    version,
    about = "tensorfuzz CLI: list harness targets, replay reproducers, inspect inputs",
    long_about = "tensorfuzz CLI drives the tensor operator fuzz harnesses outside of a fuzzing engine.\n\nUse it to list the registered targets, replay crash reproducers against a target with panics caught, and see how the decoder reads an input file.\n\nSet RUST_LOG to control log verbosity (default: warn).",
    author,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered fuzz targets
    #[command(
        about = "List the registered fuzz targets.",
        long_about = "List every registered fuzz target with the minimum input size it needs and the operators it exercises.\n\nExample:\n  tensorfuzz list\n"
    )]
    List,
    /// Replay inputs against a target
    #[command(
        about = "Replay reproducer files against a target.",
        long_about = "Replay one or more input files, or directories of them, against a target. Panics are caught and reported as discarded inputs.\n\nExits with an error if any input was discarded.\n\nExamples:\n  tensorfuzz run binary crash-1234\n  tensorfuzz run --triage-dir triage reduce corpus/reduce\n"
    )]
    Run {
        /// Target name
        #[arg(help = "Name of the target to run (see `tensorfuzz list`)")]
        target: String,
        /// Input files or directories
        #[arg(help = "Paths to input files or directories of inputs", required = true)]
        paths: Vec<String>,
        /// Directory for triage logs
        #[arg(
            long,
            value_name = "DIR",
            help = "Write error.log, error_inputs.log and diff_inputs/ under DIR (overrides TENSORFUZZ_TRIAGE_DIR)"
        )]
        triage_dir: Option<String>,
    },
    /// Show the tensors the decoder extracts from a file
    #[command(
        about = "Show the tensors the decoder extracts from a file.",
        long_about = "Decode tensors from a file in sequence, the way a target reads its inputs, and print dtype, shape, size and leading values of each.\n\nExamples:\n  tensorfuzz decode crash-1234\n  tensorfuzz decode --max-rank 2 --max-dim 4 input.bin\n"
    )]
    Decode {
        /// Input file
        #[arg(help = "Path to the input file")]
        file: String,
        /// Maximum number of tensors to decode
        #[arg(long, default_value_t = 16, help = "Stop after this many tensors")]
        max_tensors: usize,
        #[arg(long, default_value_t = MIN_RANK, help = "Smallest rank the decoder produces")]
        min_rank: u8,
        #[arg(long, default_value_t = MAX_RANK, help = "Largest rank the decoder produces")]
        max_rank: u8,
        #[arg(long, default_value_t = MIN_DIM, help = "Smallest dimension the decoder produces")]
        min_dim: i64,
        #[arg(long, default_value_t = MAX_DIM, help = "Largest dimension the decoder produces")]
        max_dim: i64,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::List) => {
            print_targets_table();
        }
        Some(Commands::Run { target, paths, triage_dir }) => {
            let summary = replay(target, paths, triage_dir.as_deref())?;
            print_replay_summary(target, &summary);
            if !summary.discarded.is_empty() {
                bail!("{} input(s) were discarded by '{}'", summary.discarded.len(), target);
            }
        }
        Some(Commands::Decode {
            file,
            max_tensors,
            min_rank,
            max_rank,
            min_dim,
            max_dim,
        }) => {
            if min_rank > max_rank {
                bail!("--min-rank ({}) must not exceed --max-rank ({})", min_rank, max_rank);
            }
            let limits = DecodeLimits::default()
                .with_rank(*min_rank, *max_rank)
                .with_dims(*min_dim, *max_dim);
            print_decoded_file(file, limits, *max_tensors)?;
        }
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
