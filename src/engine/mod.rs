//! CLI engine: argument parsing, built-in transforms, progress, and the run handler.

pub mod arg_parser;
pub mod handlers;
pub mod progress;
pub mod runner;
pub mod transforms;

// Re-export commonly used functions
pub use arg_parser::Cli;
pub use handlers::{apply_cli_to_opts, handle_run, setup_opts};
pub use runner::{RunOutcome, build_stage_specs, pipeline_opts, run_lines};
pub use transforms::{BUILTIN_TRANSFORMS, hash_line, line_transform};
