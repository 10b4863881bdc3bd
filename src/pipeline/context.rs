//! Per-stage shared state: identity, failure policy, live counters and the recorded failures.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{ErrorPolicy, PipelineOpts};

/// Transform applied by every worker of a stage.
pub type TransformFn<A, B> = Arc<dyn Fn(A) -> anyhow::Result<B> + Send + Sync>;

/// First failure seen under [`ErrorPolicy::Propagate`], shared by all stages of a pipeline.
pub type FirstFailure = Arc<Mutex<Option<TransformFailure>>>;

/// A transform failure with the worker that hit it.
#[derive(Debug)]
pub struct TransformFailure {
    pub stage: usize,
    pub worker: usize,
    pub error: anyhow::Error,
}

/// Live counters for one stage, updated by its workers.
#[derive(Debug, Default)]
pub struct StageStats {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
    pub live_workers: AtomicUsize,
    degraded: AtomicBool,
    failures: Mutex<Vec<String>>,
}

/// Point-in-time copy of [`StageStats`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct StageStatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub live_workers: usize,
    pub degraded: bool,
}

impl StageStats {
    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Release);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Count a failure and keep its message while under `max_recorded`.
    pub fn record_failure(&self, message: String, max_recorded: usize) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if failures.len() < max_recorded {
            failures.push(message);
        }
    }

    pub fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> StageStatsSnapshot {
        StageStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            live_workers: self.live_workers.load(Ordering::Relaxed),
            degraded: self.is_degraded(),
        }
    }
}

/// Shared context for one stage's workers. Built by the pipeline builder.
#[derive(Debug)]
pub struct StageContext {
    pub index: usize,
    pub name: String,
    pub workers: usize,
    pub policy: ErrorPolicy,
    pub max_recorded_failures: usize,
    pub stats: StageStats,
    pub first_failure: FirstFailure,
}

impl StageContext {
    pub fn new(
        index: usize,
        name: String,
        workers: usize,
        opts: &PipelineOpts,
        first_failure: &FirstFailure,
    ) -> Self {
        Self {
            index,
            name,
            workers,
            policy: opts.error_policy,
            max_recorded_failures: opts.max_recorded_failures,
            stats: StageStats::default(),
            first_failure: Arc::clone(first_failure),
        }
    }

    /// Keep `failure` if it is the first one recorded for the pipeline.
    pub fn set_first_failure(&self, failure: TransformFailure) {
        let _ = self
            .first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(failure);
    }
}
