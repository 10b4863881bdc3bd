//! Load `.stagepool.toml` from a directory (CLI only). The library takes [`PipelineOpts`](crate::PipelineOpts) directly.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::utils::config::PackagePaths;
use crate::{ErrorPolicy, RunOpts, StageArg};

#[derive(Debug, Default, Deserialize)]
pub struct PipelineToml {
    #[serde(default)]
    settings: SettingsSection,
    #[serde(default)]
    stages: Vec<StageEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    input: Option<String>,
    output: Option<String>,
    channel_cap: Option<usize>,
    error_policy: Option<ErrorPolicy>,
    timeout_secs: Option<u64>,
    verbose: Option<bool>,
    json: Option<bool>,
}

/// One `[[stages]]` table: a built-in transform name (`name` or `name=arg`) and optional worker count.
#[derive(Debug, Clone, Deserialize)]
pub struct StageEntry {
    pub transform: String,
    pub workers: Option<usize>,
}

impl From<&StageEntry> for StageArg {
    fn from(e: &StageEntry) -> Self {
        StageArg {
            transform: e.transform.clone(),
            workers: e.workers,
        }
    }
}

/// Load the config file from `dir`. `Ok(None)` when there is no file.
pub fn load_pipeline_toml(dir: &Path) -> Result<Option<PipelineToml>> {
    let path = dir.join(PackagePaths::get().config_filename());
    if !path.is_file() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let file = parse_pipeline_toml(&s).with_context(|| format!("parse {}", path.display()))?;
    log::debug!("loaded {}", path.display());
    Ok(Some(file))
}

pub fn parse_pipeline_toml(s: &str) -> std::result::Result<PipelineToml, toml::de::Error> {
    toml::from_str(s)
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($set:expr, $opts:expr, $set_field:ident => $opts_field:ident) => {
        if let Some(v) = $set.$set_field {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI flags.
pub fn apply_file_to_opts(file: &PipelineToml, opts: &mut RunOpts) {
    let set = &file.settings;
    if let Some(ref p) = set.input {
        opts.input = Some(PathBuf::from(p));
    }
    if let Some(ref p) = set.output {
        opts.output = Some(PathBuf::from(p));
    }
    apply_file_opt!(set, opts, channel_cap => channel_cap);
    apply_file_opt!(set, opts, error_policy => error_policy);
    if let Some(secs) = set.timeout_secs {
        opts.timeout_secs = Some(secs);
    }
    apply_file_opt!(set, opts, verbose => verbose);
    apply_file_opt!(set, opts, json => json);
    if !file.stages.is_empty() {
        opts.stages = file.stages.iter().map(StageArg::from).collect();
    }
}
