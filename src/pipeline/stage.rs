//! A stage: one worker pool between an input and an output channel.

use crossbeam_channel::Sender;
use log::debug;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use super::context::{StageContext, TransformFn};
use super::worker::{CloseLatch, Worker, WorkerExit, release_stage};
use crate::WorkerReport;
use crate::channel::{BoundedChannel, ChannelSnapshot};

/// Homogeneous stage description for [`Pipeline::build`](crate::pipeline::Pipeline::build).
pub struct StageSpec<T> {
    pub name: String,
    pub workers: usize,
    pub transform: TransformFn<T, T>,
}

impl<T> StageSpec<T> {
    pub fn new<F>(name: impl Into<String>, workers: usize, transform: F) -> Self
    where
        F: Fn(T) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            workers,
            transform: Arc::new(transform),
        }
    }
}

/// Type-erased view of a stage so a pipeline can hold stages of different item types.
pub trait StageRunner: Send {
    fn context(&self) -> &Arc<StageContext>;

    /// Spawn every worker, pushing handles as they start. On a spawn failure the
    /// workers that never started are released from the close latch and the error returned.
    fn spawn_workers(
        &self,
        exit_tx: &Sender<WorkerExit>,
        handles: &mut Vec<JoinHandle<WorkerReport>>,
    ) -> std::io::Result<()>;

    /// Release a stage whose workers were never spawned.
    fn release_unspawned(&self);

    /// Wait until the input is closed, empty and fully acknowledged. `false` on deadline.
    fn wait_input_drained(&self, deadline: Option<Instant>) -> bool;

    fn close_input(&self);

    fn input_snapshot(&self) -> ChannelSnapshot;
}

pub struct Stage<A, B> {
    ctx: Arc<StageContext>,
    input: Arc<BoundedChannel<A>>,
    output: Arc<BoundedChannel<B>>,
    transform: TransformFn<A, B>,
    latch: Arc<CloseLatch>,
}

impl<A, B> Stage<A, B> {
    pub fn new(
        ctx: Arc<StageContext>,
        input: Arc<BoundedChannel<A>>,
        output: Arc<BoundedChannel<B>>,
        transform: TransformFn<A, B>,
    ) -> Self {
        let latch = Arc::new(CloseLatch::new(ctx.workers));
        Self {
            ctx,
            input,
            output,
            transform,
            latch,
        }
    }

    fn release(&self, count: usize) {
        for _ in 0..count {
            if self.latch.arrive() {
                release_stage(&self.input, &self.output, &self.ctx);
            }
        }
    }
}

impl<A, B> StageRunner for Stage<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn context(&self) -> &Arc<StageContext> {
        &self.ctx
    }

    fn spawn_workers(
        &self,
        exit_tx: &Sender<WorkerExit>,
        handles: &mut Vec<JoinHandle<WorkerReport>>,
    ) -> std::io::Result<()> {
        for id in 0..self.ctx.workers {
            let worker = Worker::new(
                id,
                Arc::clone(&self.input),
                Arc::clone(&self.output),
                Arc::clone(&self.transform),
                Arc::clone(&self.ctx),
                Arc::clone(&self.latch),
                exit_tx.clone(),
            );
            match worker.spawn() {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.release(self.ctx.workers - id);
                    return Err(e);
                }
            }
        }
        debug!(
            "stage {} ({}) started {} worker(s)",
            self.ctx.index, self.ctx.name, self.ctx.workers
        );
        Ok(())
    }

    fn release_unspawned(&self) {
        self.release(self.ctx.workers);
    }

    fn wait_input_drained(&self, deadline: Option<Instant>) -> bool {
        self.input.wait_drained(deadline)
    }

    fn close_input(&self) {
        self.input.close();
    }

    fn input_snapshot(&self) -> ChannelSnapshot {
        self.input.snapshot()
    }
}
