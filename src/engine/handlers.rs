//! CLI command handler: merge config file and flags, run the pipeline, print the report.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::arg_parser::Cli;
use super::runner::{RunOutcome, run_lines};
use super::transforms::BUILTIN_TRANSFORMS;
use crate::utils::config::FAILURE_PRINT_LIMIT;
use crate::utils::{Colors, apply_file_to_opts, load_pipeline_toml, setup_logging};
use crate::{PipelineReport, RunOpts};

/// Build run options: defaults, then `.stagepool.toml` in the working directory, then CLI flags.
pub fn setup_opts(cli: &Cli) -> Result<RunOpts> {
    let mut opts = RunOpts::default();
    let cwd = std::env::current_dir().context("current directory")?;
    if let Some(file) = load_pipeline_toml(&cwd)? {
        apply_file_to_opts(&file, &mut opts);
    }
    apply_cli_to_opts(cli, &mut opts);
    Ok(opts)
}

/// CLI flags win over the config file. Only flags actually given are applied.
pub fn apply_cli_to_opts(cli: &Cli, opts: &mut RunOpts) {
    if let Some(ref p) = cli.input {
        opts.input = Some(p.clone());
    }
    if let Some(ref p) = cli.output {
        opts.output = Some(p.clone());
    }
    if !cli.stages.is_empty() {
        opts.stages = cli.stages.clone();
    }
    if let Some(cap) = cli.channel_cap {
        opts.channel_cap = cap;
    }
    if let Some(policy) = cli.error_policy {
        opts.error_policy = policy;
    }
    if let Some(secs) = cli.timeout {
        opts.timeout_secs = Some(secs);
    }
    if let Some(v) = cli.verbose {
        opts.verbose = v;
    }
    if let Some(j) = cli.json {
        opts.json = j;
    }
}

/// Run the pipeline described by flags and config. Fails after printing the report
/// when a transform failure was propagated.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let opts = setup_opts(cli)?;
    setup_logging(opts.verbose);

    if cli.list_transforms {
        for (name, about) in BUILTIN_TRANSFORMS {
            println!("{:<12} {}", name, about);
        }
        return Ok(());
    }
    debug!("run options: {:#?}", opts);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        // Second Ctrl-C: give up on a clean shutdown.
        if stop_handler.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    })
    .context("install Ctrl-C handler")?;

    let RunOutcome { report, failure } = run_lines(&opts, stop)?;
    print_report(&report, opts.json)?;
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Print run summary: JSON on stderr, or colored log lines.
fn print_report(report: &PipelineReport, json: bool) -> Result<()> {
    if json {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(report).context("serialize report")?
        );
        return Ok(());
    }

    info!(
        "{} | {} | {} ({} submitted in {:.2?})",
        Colors::colorize(Colors::EMITTED, &format!("Emitted: {}", report.emitted)),
        Colors::colorize(Colors::FAILED, &format!("Failed: {}", report.total_failed())),
        Colors::colorize(Colors::DROPPED, &format!("Dropped: {}", report.total_dropped())),
        report.submitted,
        report.elapsed
    );
    for stage in &report.stages {
        debug!(
            "  stage {} {:<12} workers={} processed={} failed={} dropped={}{}",
            stage.index,
            stage.name,
            stage.workers,
            stage.processed,
            stage.failed,
            stage.dropped,
            if stage.degraded { " (degraded)" } else { "" }
        );
        for msg in stage.failures.iter().take(FAILURE_PRINT_LIMIT) {
            warn!("  {}: {}", stage.name, msg);
        }
    }
    if !report.is_lossless() {
        warn!("Item accounting does not balance; some items are unaccounted for");
    }
    Ok(())
}
