//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    thread_prefix: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                thread_prefix: pkg.to_string(),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// CLI config file looked up in the working directory (e.g. `.stagepool.toml`).
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Worker thread name: `<pkg>-<stage>-<worker>`.
    pub fn worker_thread_name(&self, stage: usize, worker: usize) -> String {
        format!("{}-{}-{}", self.thread_prefix, stage, worker)
    }
}

// ---- Worker threads ----

/// Thread limits for sizing worker pools when the caller gives no count.
/// Use [`WorkerThreadLimits::current()`] to fill `all_threads` from rayon; the rest are const.
#[derive(Clone, Copy, Debug)]
pub struct WorkerThreadLimits {
    /// Available threads (from rayon); set by [`WorkerThreadLimits::current()`].
    pub all_threads: usize,
    /// Minimum workers per stage.
    pub floor: usize,
    /// Maximum workers per stage when derived automatically.
    pub stage_max: usize,
}

impl Default for WorkerThreadLimits {
    fn default() -> Self {
        Self {
            all_threads: 0, // use current() to set from rayon
            floor: Self::FLOOR_THREADS,
            stage_max: Self::STAGE_MAX_THREADS,
        }
    }
}

impl WorkerThreadLimits {
    pub const FLOOR_THREADS: usize = 1;
    pub const STAGE_MAX_THREADS: usize = 8;

    /// Build limits with `all_threads` set from `rayon::current_num_threads()`.
    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads(),
            ..Self::default()
        }
    }

    /// Split available threads evenly across `stage_count` stages, clamped to `[floor, stage_max]`.
    pub fn workers_per_stage(&self, stage_count: usize) -> usize {
        let share = self.all_threads / stage_count.max(1);
        share.clamp(self.floor, self.stage_max)
    }
}

// ---- Channels ----

/// Channel capacities.
pub struct ChannelCaps;

impl ChannelCaps {
    /// Default capacity for channel 0 and inter-stage channels.
    pub const DEFAULT: usize = 64;
}

// ---- Failures ----

/// Per-stage failure bookkeeping.
pub struct FailureLog;

impl FailureLog {
    /// Failure messages kept per stage. Failures past this are counted, not stored.
    pub const MAX_RECORDED: usize = 100;
}

// ---- CLI ----

/// How often the producer wakes while input is idle, to notice Ctrl-C.
pub const INPUT_POLL_MS: u64 = 50;

/// When the summary lists failures, print at most this many.
pub const FAILURE_PRINT_LIMIT: usize = 10;
