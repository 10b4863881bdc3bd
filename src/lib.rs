//! Stagepool: bounded multi-stage pipelines of worker pools connected by closable channels.
//!
//! Items enter channel 0, pass through each stage's worker pool, and leave on the final
//! channel. Closing channel 0 cascades a drain-and-close down the chain: a stage closes
//! its output only after every one of its workers has seen end of stream.
//!
//! Stages with several workers do not preserve order; single-worker stages do.

pub mod channel;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use channel::{BoundedChannel, ChannelSnapshot, Recv};
pub use error::{ClosedChannel, PipelineError};
pub use pipeline::{Output, Pipeline, PipelineBuilder, StageSpec, Submitter};

use log::debug;
use std::panic;
use std::thread;
use std::time::Duration;

/// Result alias used by the public pipeline API
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Everything a finished [`run_to_completion`] observed.
#[derive(Debug)]
pub struct Completed<Out> {
    /// Results in arrival order at the sink.
    pub outputs: Vec<Out>,
    pub report: PipelineReport,
    /// First transform failure under [`ErrorPolicy::Propagate`]. Outputs and report are
    /// still complete when this is set.
    pub failure: Option<PipelineError>,
}

impl<Out> Completed<Out> {
    /// Outputs and report, or the propagated failure.
    pub fn into_result(self) -> Result<(Vec<Out>, PipelineReport)> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok((self.outputs, self.report)),
        }
    }
}

/// Single entry point: start `pipeline`, feed it `items`, shut it down and collect everything.
///
/// Outputs are collected on a separate thread while items are submitted, so a bounded
/// sink never stalls the run. Multi-worker stages make output order unspecified.
///
/// A propagated transform failure is returned inside [`Completed`] together with the
/// outputs and report. Other shutdown errors, such as a timeout, are returned as `Err`;
/// the pipeline is then dropped, which closes every channel.
///
/// ```ignore
/// let pipeline = Pipeline::build(PipelineOpts::default(), vec![
///     StageSpec::new("double", 4, |x: u64| Ok(x * 2)),
/// ])?;
/// let done = stagepool::run_to_completion(pipeline, 1..=100, None)?;
/// assert_eq!(done.outputs.len(), 100);
/// assert!(done.report.is_lossless());
/// ```
pub fn run_to_completion<In, Out, I>(
    mut pipeline: Pipeline<In, Out>,
    items: I,
    timeout: Option<Duration>,
) -> Result<Completed<Out>>
where
    In: Send + 'static,
    Out: Send + 'static,
    I: IntoIterator<Item = In>,
{
    pipeline.start()?;
    let output = pipeline.output();
    let collector = thread::spawn(move || output.collect::<Vec<Out>>());

    let mut submitted = 0_usize;
    for item in items {
        if let Err(e) = pipeline.submit(item) {
            debug!("submit stopped after {} item(s): {}", submitted, e);
            break;
        }
        submitted += 1;
    }

    let (report, failure) = match pipeline.shutdown_and_wait(timeout) {
        Ok(report) => (report, None),
        Err(e @ PipelineError::Transform { .. }) => match pipeline.report().cloned() {
            Some(report) => (report, Some(e)),
            None => return Err(e),
        },
        Err(e) => return Err(e),
    };

    // The sink is closed once shutdown finished, so the collector ends.
    let outputs = match collector.join() {
        Ok(outputs) => outputs,
        Err(payload) => panic::resume_unwind(payload),
    };
    Ok(Completed {
        outputs,
        report,
        failure,
    })
}
