//! CLI run: read lines → pipeline → write lines, with a consumer thread draining the sink.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::progress::{ProgressBar, create_counter, finish_bar, refresh_bar, update_progress_bar};
use super::transforms::line_transform;
use crate::pipeline::{Output, Pipeline, StageSpec};
use crate::utils::config::{ChannelCaps, INPUT_POLL_MS, WorkerThreadLimits};
use crate::{PipelineError, PipelineOpts, PipelineReport, RunOpts, StageArg};

/// Resolve CLI stages to specs. Stages without a worker count share the available threads.
pub fn build_stage_specs(stages: &[StageArg]) -> Result<Vec<StageSpec<String>>> {
    if stages.is_empty() {
        anyhow::bail!("no stages given; use --stage or [[stages]] in the config file");
    }
    let default_workers = WorkerThreadLimits::current().workers_per_stage(stages.len());
    stages
        .iter()
        .map(|arg| {
            let transform = line_transform(&arg.transform)?;
            Ok(StageSpec {
                name: arg.transform.clone(),
                workers: arg.workers.unwrap_or(default_workers),
                transform,
            })
        })
        .collect()
}

/// Pipeline options for a CLI run. The sink is bounded too: the consumer drains it concurrently.
pub fn pipeline_opts(opts: &RunOpts) -> PipelineOpts {
    let channel_cap = match opts.channel_cap {
        0 => ChannelCaps::DEFAULT,
        n => n,
    };
    PipelineOpts {
        channel_cap,
        output_cap: Some(channel_cap),
        error_policy: opts.error_policy,
        ..PipelineOpts::default()
    }
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead + Send>> {
    Ok(match path {
        Some(p) => Box::new(BufReader::new(
            File::open(p).with_context(|| format!("open input {}", p.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(p) => Box::new(
            File::create(p).with_context(|| format!("create output {}", p.display()))?,
        ),
        None => Box::new(io::stdout()),
    })
}

/// Write every result until end of stream. A write failure is remembered and the
/// sink is still drained so the pipeline can finish.
fn spawn_consumer(
    output: Output<String>,
    writer: Box<dyn Write + Send>,
    bar: Option<ProgressBar>,
) -> JoinHandle<Result<usize>> {
    thread::spawn(move || {
        let mut writer = BufWriter::new(writer);
        let mut written = 0_usize;
        let mut write_err: Option<io::Error> = None;
        for line in output {
            if write_err.is_none() {
                match writeln!(writer, "{}", line) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        warn!("output write failed; discarding remaining results: {}", e);
                        write_err = Some(e);
                    }
                }
            }
            if let Some(bar) = &bar {
                update_progress_bar(bar, 1);
            }
        }
        if let Some(bar) = &bar {
            finish_bar(bar, written);
        }
        if let Some(e) = write_err {
            return Err(e).context("write results");
        }
        writer.flush().context("flush results")?;
        Ok(written)
    })
}

/// Read lines on their own thread so the producer can notice `stop` while input is idle.
/// The reader ends at end of input or once the producer has gone.
fn spawn_reader(input: Box<dyn BufRead + Send>) -> Receiver<io::Result<String>> {
    let (tx, rx) = bounded(ChannelCaps::DEFAULT);
    thread::spawn(move || {
        for line in input.lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Feed lines into the pipeline until input ends, `stop` is set, or the pipeline refuses work.
fn produce(
    pipeline: &Pipeline<String, String>,
    lines: Receiver<io::Result<String>>,
    stop: &AtomicBool,
) -> Result<usize> {
    let poll = Duration::from_millis(INPUT_POLL_MS);
    let mut sent = 0_usize;
    loop {
        if stop.load(Ordering::Relaxed) {
            warn!("Interrupted; stopping input after {} line(s)", sent);
            break;
        }
        let line = match lines.recv_timeout(poll) {
            Ok(line) => line.context("read input")?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match pipeline.submit(line) {
            Ok(()) => sent += 1,
            Err(PipelineError::ClosedChannel) => {
                warn!("Pipeline stopped accepting input after {} line(s)", sent);
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    debug!("producer done: {} line(s) submitted", sent);
    Ok(sent)
}

/// Report of a CLI run plus the propagated transform failure, if any.
pub struct RunOutcome {
    pub report: PipelineReport,
    pub failure: Option<PipelineError>,
}

/// Run one CLI pipeline to completion. A propagated transform failure still yields the
/// report so the caller can print it before failing.
pub fn run_lines(opts: &RunOpts, stop: Arc<AtomicBool>) -> Result<RunOutcome> {
    let specs = build_stage_specs(&opts.stages)?;
    let mut pipeline = Pipeline::build(pipeline_opts(opts), specs)?;
    let input = open_input(opts.input.as_deref())?;
    let writer = open_output(opts.output.as_deref())?;

    let bar = opts.verbose.then(|| {
        let b = create_counter("Processed");
        refresh_bar(&b);
        b
    });

    pipeline.start()?;
    let consumer = spawn_consumer(pipeline.output(), writer, bar);

    let produced = produce(&pipeline, spawn_reader(input), &stop);
    let timeout = opts.timeout_secs.map(Duration::from_secs);
    let (report, failure) = match pipeline.shutdown_and_wait(timeout) {
        Ok(report) => (report, None),
        Err(e @ PipelineError::Transform { .. }) => {
            let report = pipeline
                .report()
                .cloned()
                .context("finished pipeline has no report")?;
            (report, Some(e))
        }
        // On timeout workers are still running, so the consumer may never see end of stream.
        Err(e) => return Err(e.into()),
    };

    let written = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("consumer thread panicked"))??;
    debug!("consumer done: {} line(s) written", written);
    produced?;
    Ok(RunOutcome { report, failure })
}
