//! Error types for channels and pipeline lifecycle.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Returned by [`BoundedChannel::put`](crate::channel::BoundedChannel::put) when the channel is closed.
/// Carries the rejected item back to the caller.
pub struct ClosedChannel<T>(pub T);

impl<T> ClosedChannel<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for ClosedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClosedChannel(..)")
    }
}

impl<T> fmt::Display for ClosedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("put on a closed channel")
    }
}

impl<T> std::error::Error for ClosedChannel<T> {}

/// Errors from building, driving and shutting down a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Submit after shutdown began. The producer should stop.
    #[error("channel is closed; the pipeline is shutting down")]
    ClosedChannel,

    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("pipeline not started")]
    NotStarted,

    #[error("pipeline already finished; build a new one")]
    AlreadyFinished,

    /// First transform failure under [`ErrorPolicy::Propagate`](crate::ErrorPolicy::Propagate).
    #[error("stage {stage} worker {worker}: transform failed: {source:#}")]
    Transform {
        stage: usize,
        worker: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Workers still running when the deadline passed. They are not killed.
    #[error("{pending} worker(s) still running after {timeout:?}")]
    ShutdownTimeout { pending: usize, timeout: Duration },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("pipeline needs at least one stage")]
    NoStages,

    #[error("stage {stage} needs at least one worker")]
    ZeroWorkers { stage: usize },

    #[error("channel capacity must be at least 1")]
    ZeroCapacity,
}

impl<T> From<ClosedChannel<T>> for PipelineError {
    fn from(_: ClosedChannel<T>) -> Self {
        PipelineError::ClosedChannel
    }
}
