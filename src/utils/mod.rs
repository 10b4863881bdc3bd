pub mod config;
pub mod logger;
pub mod pipeline_toml;

pub use config::*;
pub use logger::{Colors, setup_logging, thread_label};
pub use pipeline_toml::{
    PipelineToml, StageEntry, apply_file_to_opts, load_pipeline_toml, parse_pipeline_toml,
};
