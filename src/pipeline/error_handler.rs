use log::{debug, warn};
use std::sync::PoisonError;

use super::context::FirstFailure;
use crate::{ErrorPolicy, PipelineError, PipelineReport};

/// Check shutdown result: under `Propagate`, return the first transform failure;
/// otherwise log how many items were skipped or dropped. Call after joining workers.
pub fn check_for_first_failure_or_skipped(
    policy: ErrorPolicy,
    first_failure: &FirstFailure,
    report: &PipelineReport,
) -> Result<(), PipelineError> {
    if policy == ErrorPolicy::Propagate
        && let Some(failure) = first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    {
        return Err(PipelineError::Transform {
            stage: failure.stage,
            worker: failure.worker,
            source: failure.error,
        });
    }
    let failed = report.total_failed();
    if failed > 0 {
        warn!("Skipped {} item(s) after transform failures", failed);
        for stage in report.stages.iter().filter(|s| s.failed > 0) {
            for msg in &stage.failures {
                debug!("  stage {} ({}): {}", stage.index, stage.name, msg);
            }
        }
    }
    let dropped = report.total_dropped();
    if dropped > 0 {
        warn!(
            "Dropped {} item(s) because a downstream stage stopped accepting work",
            dropped
        );
    }
    Ok(())
}
