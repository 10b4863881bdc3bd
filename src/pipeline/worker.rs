use crossbeam_channel::Sender;
use log::{debug, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use super::context::{StageContext, TransformFailure, TransformFn};
use crate::WorkerReport;
use crate::channel::{BoundedChannel, Recv};
use crate::utils::config::PackagePaths;

/// Sent by every worker as its thread winds down. Shutdown counts these to bound the join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerExit {
    pub stage: usize,
    pub worker: usize,
}

/// Counts down the workers of a stage. The last arrival owns closing the stage's output.
#[derive(Debug)]
pub struct CloseLatch {
    remaining: AtomicUsize,
}

impl CloseLatch {
    pub fn new(workers: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(workers),
        }
    }

    /// Returns `true` for the arrival that brings the count to zero.
    pub fn arrive(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// Close out a stage once no worker is left on it.
///
/// If the input is not yet closed and drained (every worker halted), close it and
/// discard what is left, counting each item as dropped so producers fail fast
/// instead of blocking. Then close the output.
pub(crate) fn release_stage<A, B>(
    input: &BoundedChannel<A>,
    output: &BoundedChannel<B>,
    ctx: &StageContext,
) {
    let closed_here = input.close();
    let mut abandoned = 0_u64;
    while let Some(Recv::Item(_)) = input.try_get() {
        input.task_done();
        abandoned += 1;
    }
    if closed_here || abandoned > 0 {
        ctx.stats.add_dropped(abandoned);
        warn!(
            "stage {} ({}) has no workers left; abandoned input with {} queued item(s)",
            ctx.index, ctx.name, abandoned
        );
    }
    if output.close() {
        debug!("stage {} ({}) closed its output", ctx.index, ctx.name);
    }
}

/// One member of a stage's worker pool: pulls from the shared input, transforms,
/// pushes to the shared output.
pub struct Worker<A, B> {
    id: usize,
    input: Arc<BoundedChannel<A>>,
    output: Arc<BoundedChannel<B>>,
    transform: TransformFn<A, B>,
    ctx: Arc<StageContext>,
    latch: Arc<CloseLatch>,
    exit_tx: Sender<WorkerExit>,
}

/// Runs the exit protocol even if the loop unwinds.
struct ExitGuard<'a, A, B>(&'a Worker<A, B>);

impl<A, B> Drop for ExitGuard<'_, A, B> {
    fn drop(&mut self) {
        self.0.on_exit();
    }
}

impl<A, B> Worker<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    pub fn new(
        id: usize,
        input: Arc<BoundedChannel<A>>,
        output: Arc<BoundedChannel<B>>,
        transform: TransformFn<A, B>,
        ctx: Arc<StageContext>,
        latch: Arc<CloseLatch>,
        exit_tx: Sender<WorkerExit>,
    ) -> Self {
        Self {
            id,
            input,
            output,
            transform,
            ctx,
            latch,
            exit_tx,
        }
    }

    /// Start the worker on a named thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<WorkerReport>> {
        let name = PackagePaths::get().worker_thread_name(self.ctx.index, self.id);
        self.ctx.stats.live_workers.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::clone(&self.ctx);
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run_loop())
            .inspect_err(|_| {
                ctx.stats.live_workers.fetch_sub(1, Ordering::Relaxed);
            })
    }

    /// Get, transform, put, until the input reports end of stream or a failure halts this worker.
    pub fn run_loop(self) -> WorkerReport {
        let _exit = ExitGuard(&self);
        let mut report = WorkerReport {
            stage: self.ctx.index,
            worker: self.id,
            ..Default::default()
        };

        loop {
            report.polled += 1;
            let item = match self.input.get() {
                Recv::Item(item) => item,
                Recv::EndOfStream => break,
            };
            let keep_going = match self.apply(item) {
                Ok(out) => {
                    if self.output.put(out).is_ok() {
                        report.work_done += 1;
                        self.ctx.stats.processed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        report.dropped += 1;
                        self.ctx.stats.add_dropped(1);
                    }
                    true
                }
                Err(err) => {
                    report.error_count += 1;
                    self.handle_failure(err)
                }
            };
            self.input.task_done();
            if !keep_going {
                report.halted = true;
                break;
            }
        }

        debug!(
            "stage {} worker {} done: polled={} work_done={} errors={} dropped={}",
            report.stage,
            report.worker,
            report.polled,
            report.work_done,
            report.error_count,
            report.dropped
        );
        report
    }

    fn apply(&self, item: A) -> anyhow::Result<B> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.transform)(item))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!(
                "transform panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }

    /// Record the failure. Returns whether this worker keeps running.
    fn handle_failure(&self, err: anyhow::Error) -> bool {
        let ctx = &self.ctx;
        ctx.stats
            .record_failure(format!("{:#}", err), ctx.max_recorded_failures);
        match ctx.policy {
            crate::ErrorPolicy::Skip => {
                debug!(
                    "stage {} ({}) worker {}: skipped item: {:#}",
                    ctx.index, ctx.name, self.id, err
                );
                true
            }
            crate::ErrorPolicy::Propagate => {
                warn!(
                    "stage {} ({}) worker {} halting: {:#}",
                    ctx.index, ctx.name, self.id, err
                );
                ctx.stats.mark_degraded();
                ctx.set_first_failure(TransformFailure {
                    stage: ctx.index,
                    worker: self.id,
                    error: err,
                });
                false
            }
        }
    }
}

impl<A, B> Worker<A, B> {
    fn on_exit(&self) {
        self.ctx.stats.live_workers.fetch_sub(1, Ordering::Relaxed);
        if self.latch.arrive() {
            release_stage(&self.input, &self.output, &self.ctx);
        }
        let _ = self.exit_tx.send(WorkerExit {
            stage: self.ctx.index,
            worker: self.id,
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
