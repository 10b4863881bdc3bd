use clap::Parser;
use std::path::PathBuf;

use crate::{ErrorPolicy, StageArg};

/// Run lines through a pipeline of worker-pool stages.
#[derive(Clone, Parser)]
#[command(name = "stagepool")]
#[command(about = "Run lines through a pipeline of worker-pool stages; settings also load from .stagepool.toml.")]
pub struct Cli {
    /// Input file, one item per line. Default: stdin.
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Write results here instead of stdout.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Stage as name[=arg][:workers], in order. Repeat: -s trim -s upper:4 -s hash
    #[arg(long = "stage", short = 's', value_name = "STAGE")]
    pub stages: Vec<StageArg>,

    /// Capacity of each channel between stages.
    #[arg(long, short = 'c', value_parser = clap::value_parser!(usize))]
    pub channel_cap: Option<usize>,

    /// What to do when a transform fails.
    #[arg(long, short = 'p', value_enum)]
    pub error_policy: Option<ErrorPolicy>,

    /// Give up waiting for shutdown after this many seconds (workers are not killed).
    #[arg(long, short = 't', value_parser = clap::value_parser!(u64))]
    pub timeout: Option<u64>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Print the run report as JSON on stderr.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub json: Option<bool>,

    /// List built-in transforms and exit.
    #[arg(long)]
    pub list_transforms: bool,
}
