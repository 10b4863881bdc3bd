//! Public options and report types for the pipeline API.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::config::{ChannelCaps, FailureLog};

/// What a worker does when its transform fails.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Halt the failing worker and mark its stage degraded; siblings keep going.
    /// `shutdown_and_wait` returns the first failure.
    Propagate,
    /// Count the failure, drop the item, keep going.
    #[default]
    Skip,
}

/// Lifecycle of a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Built,
    Running,
    /// Channel 0 closed; waiting for stages to drain. A timed-out shutdown stays here.
    Draining,
    Finished,
}

/// Options fixed at build time.
#[derive(Clone, Debug)]
pub struct PipelineOpts {
    /// Capacity of channel 0 and every inter-stage channel.
    pub channel_cap: usize,
    /// Capacity of the final (sink) channel. `None` = unbounded, so results can be
    /// drained after `shutdown_and_wait` returns.
    pub output_cap: Option<usize>,
    pub error_policy: ErrorPolicy,
    /// Failure messages kept per stage; later failures are still counted.
    pub max_recorded_failures: usize,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            channel_cap: ChannelCaps::DEFAULT,
            output_cap: None,
            error_policy: ErrorPolicy::default(),
            max_recorded_failures: FailureLog::MAX_RECORDED,
        }
    }
}

/// Counters for one worker, returned when its thread is joined.
#[derive(Clone, Debug, Default, Serialize)]
pub struct WorkerReport {
    pub stage: usize,
    pub worker: usize,
    /// Gets issued on the input channel, including the final end-of-stream.
    pub polled: u64,
    pub work_done: u64,
    pub error_count: u64,
    /// Results that could not be forwarded because the output was closed.
    pub dropped: u64,
    /// True when the worker stopped on a transform failure.
    pub halted: bool,
}

/// Totals for one stage after shutdown.
#[derive(Clone, Debug, Serialize)]
pub struct StageReport {
    pub index: usize,
    pub name: String,
    pub workers: usize,
    pub processed: u64,
    pub failed: u64,
    /// Items lost to a closed downstream or abandoned when every worker halted.
    pub dropped: u64,
    pub degraded: bool,
    pub failures: Vec<String>,
    pub worker_reports: Vec<WorkerReport>,
}

/// Outcome of a completed shutdown.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
    /// Items accepted into channel 0.
    pub submitted: u64,
    /// Items that reached the final channel.
    pub emitted: u64,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn total_failed(&self) -> u64 {
        self.stages.iter().map(|s| s.failed).sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.stages.iter().map(|s| s.dropped).sum()
    }

    /// Every submitted item is accounted for as emitted, failed or dropped.
    pub fn is_lossless(&self) -> bool {
        self.submitted == self.emitted + self.total_failed() + self.total_dropped()
    }

    pub fn degraded_stages(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| s.degraded)
    }
}

/// One CLI stage: built-in transform (`name` or `name=arg`) plus an optional worker count.
///
/// Parsed from `name[=arg][:workers]`, e.g. `upper`, `delay=5:3`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageArg {
    pub transform: String,
    /// `None` = derive from available threads.
    pub workers: Option<usize>,
}

impl FromStr for StageArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        let (transform, workers) = match s.rsplit_once(':') {
            Some((name, n)) => {
                let n: usize = n
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid worker count {:?} in stage {:?}", n, s))?;
                (name, Some(n))
            }
            None => (s, None),
        };
        if transform.is_empty() {
            anyhow::bail!("empty stage name in {:?}", s);
        }
        Ok(StageArg {
            transform: transform.to_string(),
            workers,
        })
    }
}

/// Full options for the CLI run. Library callers use [`PipelineOpts`].
#[derive(Clone, Debug, Default)]
pub struct RunOpts {
    /// Input file, one item per line. `None` = stdin.
    pub input: Option<PathBuf>,
    /// Output file. `None` = stdout.
    pub output: Option<PathBuf>,
    pub stages: Vec<StageArg>,
    /// Capacity of each inter-stage channel. 0 = use the default.
    pub channel_cap: usize,
    pub error_policy: ErrorPolicy,
    /// Bound on the shutdown wait.
    pub timeout_secs: Option<u64>,
    /// Debug logging and a progress counter.
    pub verbose: bool,
    /// Print the report as JSON instead of a colored summary.
    pub json: bool,
}
