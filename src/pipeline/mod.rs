//! Pipeline components: stage context, workers, stages, builder, orchestration, error handling.

pub mod builder;
pub mod context;
pub mod error_handler;
pub mod orchestrator;
pub mod stage;
pub mod worker;

pub use builder::PipelineBuilder;
pub use context::{
    FirstFailure, StageContext, StageStats, StageStatsSnapshot, TransformFailure, TransformFn,
};
pub use error_handler::check_for_first_failure_or_skipped;
pub use orchestrator::{Output, Pipeline, Submitter};
pub use stage::{Stage, StageRunner, StageSpec};
pub use worker::{CloseLatch, Worker, WorkerExit};
