use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::builder::PipelineBuilder;
use super::context::{FirstFailure, StageStatsSnapshot};
use super::error_handler::check_for_first_failure_or_skipped;
use super::stage::{StageRunner, StageSpec};
use super::worker::WorkerExit;
use crate::channel::{BoundedChannel, ChannelSnapshot, Recv};
use crate::{
    PipelineError, PipelineOpts, PipelineReport, PipelineState, StageReport, WorkerReport,
};

/// Linear chain of worker-pool stages joined by bounded channels.
///
/// Lifecycle: build → [`start`](Self::start) → [`submit`](Self::submit)… →
/// [`shutdown_and_wait`](Self::shutdown_and_wait). Finished pipelines are not reusable.
///
/// Items from one stage with several workers may leave in a different order than
/// they arrived; a single-worker stage preserves order.
pub struct Pipeline<In, Out> {
    opts: PipelineOpts,
    head: Arc<BoundedChannel<In>>,
    sink: Arc<BoundedChannel<Out>>,
    stages: Vec<Box<dyn StageRunner>>,
    state: PipelineState,
    handles: Vec<JoinHandle<WorkerReport>>,
    exit_tx: Sender<WorkerExit>,
    exit_rx: Receiver<WorkerExit>,
    exited: usize,
    first_failure: FirstFailure,
    started_at: Option<Instant>,
    report: Option<PipelineReport>,
}

impl<In: Send + 'static> Pipeline<In, In> {
    /// Build a pipeline whose stages all map `In -> In`.
    pub fn build<I>(opts: PipelineOpts, specs: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = StageSpec<In>>,
    {
        specs
            .into_iter()
            .fold(PipelineBuilder::new(opts), |b, spec| {
                b.stage_arc(spec.name, spec.workers, spec.transform)
            })
            .build()
    }
}

impl<In, Out> Pipeline<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn builder(opts: PipelineOpts) -> PipelineBuilder<In, In> {
        PipelineBuilder::new(opts)
    }

    pub(crate) fn from_parts(
        opts: PipelineOpts,
        head: Arc<BoundedChannel<In>>,
        sink: Arc<BoundedChannel<Out>>,
        stages: Vec<Box<dyn StageRunner>>,
        first_failure: FirstFailure,
    ) -> Self {
        let (exit_tx, exit_rx) = unbounded();
        debug!(
            "pipeline built: {} stage(s), channel cap {}, output cap {:?}, policy {:?}",
            stages.len(),
            opts.channel_cap,
            opts.output_cap,
            opts.error_policy
        );
        Self {
            opts,
            head,
            sink,
            stages,
            state: PipelineState::Built,
            handles: Vec::new(),
            exit_tx,
            exit_rx,
            exited: 0,
            first_failure,
            started_at: None,
            report: None,
        }
    }

    /// Spawn every worker of every stage. Does not block.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Built {
            return Err(PipelineError::AlreadyStarted);
        }
        self.state = PipelineState::Running;
        self.started_at = Some(Instant::now());

        for (i, stage) in self.stages.iter().enumerate() {
            if let Err(e) = stage.spawn_workers(&self.exit_tx, &mut self.handles) {
                error!("failed to spawn workers for stage {}: {}", i, e);
                for later in &self.stages[i + 1..] {
                    later.release_unspawned();
                }
                self.head.close();
                self.state = PipelineState::Draining;
                return Err(PipelineError::Spawn(e));
            }
        }
        info!(
            "pipeline started: {} stage(s), {} worker(s)",
            self.stages.len(),
            self.handles.len()
        );
        Ok(())
    }

    /// Blocking put into channel 0.
    pub fn submit(&self, item: In) -> Result<(), PipelineError> {
        match self.state {
            PipelineState::Built => Err(PipelineError::NotStarted),
            PipelineState::Running => self.head.put(item).map_err(PipelineError::from),
            PipelineState::Draining | PipelineState::Finished => Err(PipelineError::ClosedChannel),
        }
    }

    /// Cloneable producer handle over channel 0, for feeding from other threads.
    pub fn submitter(&self) -> Submitter<In> {
        Submitter {
            channel: Arc::clone(&self.head),
        }
    }

    /// Cloneable consumer handle over the final channel.
    pub fn output(&self) -> Output<Out> {
        Output {
            channel: Arc::clone(&self.sink),
        }
    }

    /// Close channel 0, wait for each stage to drain in order, then join every worker.
    ///
    /// With `timeout`, one deadline bounds the whole wait: the per-stage drains as well
    /// as the join. It can therefore expire before any worker is joined, while an upstream
    /// stage is still draining. [`PipelineError::ShutdownTimeout`] then reports the workers
    /// that have not exited yet. Workers are never killed; call again to keep waiting.
    pub fn shutdown_and_wait(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<PipelineReport, PipelineError> {
        match self.state {
            PipelineState::Built => return Err(PipelineError::NotStarted),
            PipelineState::Finished => return Err(PipelineError::AlreadyFinished),
            PipelineState::Running | PipelineState::Draining => {}
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        if self.state == PipelineState::Running {
            self.head.close();
            self.state = PipelineState::Draining;
            debug!("channel 0 closed; draining {} stage(s)", self.stages.len());
        }

        let all_drained = self.stages.iter().all(|stage| {
            let drained = stage.wait_input_drained(deadline);
            if drained {
                let ctx = stage.context();
                debug!("stage {} ({}) input drained", ctx.index, ctx.name);
            }
            drained
        });
        if !all_drained {
            return Err(self.timeout_error(timeout));
        }

        while self.exited < self.handles.len() {
            let notice = match deadline {
                None => self.exit_rx.recv().ok(),
                Some(d) => self.exit_rx.recv_deadline(d).ok(),
            };
            match notice {
                Some(_) => self.exited += 1,
                None => return Err(self.timeout_error(timeout)),
            }
        }

        let mut worker_reports = Vec::with_capacity(self.handles.len());
        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(report) => worker_reports.push(report),
                Err(_) => warn!("worker thread panicked outside its transform"),
            }
        }
        self.state = PipelineState::Finished;

        let report = self.build_report(worker_reports);
        info!(
            "pipeline finished in {:?}: submitted={} emitted={} failed={} dropped={}",
            report.elapsed,
            report.submitted,
            report.emitted,
            report.total_failed(),
            report.total_dropped()
        );
        self.report = Some(report.clone());

        check_for_first_failure_or_skipped(self.opts.error_policy, &self.first_failure, &report)?;
        Ok(report)
    }

    fn timeout_error(&mut self, timeout: Option<Duration>) -> PipelineError {
        // Workers of already drained stages may have exited without being counted yet.
        while self.exit_rx.try_recv().is_ok() {
            self.exited += 1;
        }
        let pending = self.handles.len() - self.exited;
        warn!(
            "shutdown timed out with {} worker(s) still running; they keep running",
            pending
        );
        PipelineError::ShutdownTimeout {
            pending,
            timeout: timeout.unwrap_or_default(),
        }
    }

    fn build_report(&self, worker_reports: Vec<WorkerReport>) -> PipelineReport {
        let stages = self
            .stages
            .iter()
            .map(|stage| {
                let ctx = stage.context();
                let stats = ctx.stats.snapshot();
                StageReport {
                    index: ctx.index,
                    name: ctx.name.clone(),
                    workers: ctx.workers,
                    processed: stats.processed,
                    failed: stats.failed,
                    dropped: stats.dropped,
                    degraded: stats.degraded,
                    failures: ctx.stats.failures(),
                    worker_reports: worker_reports
                        .iter()
                        .filter(|r| r.stage == ctx.index)
                        .cloned()
                        .collect(),
                }
            })
            .collect();
        PipelineReport {
            stages,
            submitted: self.head.snapshot().total_put,
            emitted: self.sink.snapshot().total_put,
            elapsed: self.started_at.map(|t| t.elapsed()).unwrap_or_default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn opts(&self) -> &PipelineOpts {
        &self.opts
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Live counters per stage.
    pub fn stats(&self) -> Vec<StageStatsSnapshot> {
        self.stages
            .iter()
            .map(|s| s.context().stats.snapshot())
            .collect()
    }

    /// Snapshots of every channel, channel 0 first and the sink last.
    pub fn channels(&self) -> Vec<ChannelSnapshot> {
        self.stages
            .iter()
            .map(|s| s.input_snapshot())
            .chain(std::iter::once(self.sink.snapshot()))
            .collect()
    }

    /// Report of the completed shutdown, kept even when shutdown returned a transform error.
    pub fn report(&self) -> Option<&PipelineReport> {
        self.report.as_ref()
    }
}

impl<In, Out> Drop for Pipeline<In, Out> {
    fn drop(&mut self) {
        if matches!(self.state, PipelineState::Running | PipelineState::Draining) {
            debug!("pipeline dropped while running; closing all channels");
            self.head.close();
            for stage in &self.stages {
                stage.close_input();
            }
            self.sink.close();
        }
    }
}

/// Producer handle over channel 0.
pub struct Submitter<T> {
    channel: Arc<BoundedChannel<T>>,
}

impl<T> Clone for Submitter<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<T> Submitter<T> {
    /// Blocking put. Fails once shutdown has closed channel 0.
    pub fn submit(&self, item: T) -> Result<(), PipelineError> {
        self.channel.put(item).map_err(PipelineError::from)
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

/// Consumer handle over the final channel. Acknowledges each item it hands out.
pub struct Output<T> {
    channel: Arc<BoundedChannel<T>>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<T> Output<T> {
    fn ack(&self, recv: Recv<T>) -> Recv<T> {
        if !recv.is_end() {
            self.channel.task_done();
        }
        recv
    }

    /// Block for the next result, or `EndOfStream` once the last stage has closed the sink.
    pub fn recv(&self) -> Recv<T> {
        self.ack(self.channel.get())
    }

    /// `None` if nothing arrived within `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Recv<T>> {
        self.channel.get_timeout(timeout).map(|r| self.ack(r))
    }

    /// Take whatever is queued right now without blocking.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(Recv::Item(item)) = self.channel.try_get() {
            self.channel.task_done();
            items.push(item);
        }
        items
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.channel.snapshot()
    }
}

impl<T> Iterator for Output<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv().into_item()
    }
}
