//! Typed pipeline construction. Each `stage` call changes the builder's output type,
//! so a chain `In -> B -> C -> Out` is checked at compile time.

use std::sync::{Arc, Mutex};

use super::context::{FirstFailure, StageContext, TransformFn};
use super::orchestrator::Pipeline;
use super::stage::{Stage, StageRunner};
use crate::channel::BoundedChannel;
use crate::{PipelineError, PipelineOpts};

/// A stage that knows its input channel and waits for its output channel.
type PendingStage<B> = Box<dyn FnOnce(Arc<BoundedChannel<B>>) -> Box<dyn StageRunner>>;

enum Tail<T> {
    /// No stage yet: the next stage reads channel 0.
    Head(Arc<BoundedChannel<T>>),
    Pending(PendingStage<T>),
}

/// Builds a [`Pipeline`] stage by stage.
///
/// ```ignore
/// let mut pipeline = PipelineBuilder::<u32>::new(PipelineOpts::default())
///     .stage("double", 2, |x: u32| Ok(x * 2))
///     .stage("render", 1, |x: u32| Ok(x.to_string()))
///     .build()?;
/// ```
pub struct PipelineBuilder<In, Out = In> {
    opts: PipelineOpts,
    head: Arc<BoundedChannel<In>>,
    tail: Tail<Out>,
    stages: Vec<Box<dyn StageRunner>>,
    first_failure: FirstFailure,
    invalid: Option<PipelineError>,
}

impl<In: Send + 'static> PipelineBuilder<In, In> {
    pub fn new(opts: PipelineOpts) -> Self {
        let head = Arc::new(BoundedChannel::new(opts.channel_cap));
        Self {
            tail: Tail::Head(Arc::clone(&head)),
            head,
            opts,
            stages: Vec::new(),
            first_failure: Arc::new(Mutex::new(None)),
            invalid: None,
        }
    }
}

impl<In, Out> PipelineBuilder<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Append a stage of `workers` threads applying `transform`.
    pub fn stage<B, F>(
        self,
        name: impl Into<String>,
        workers: usize,
        transform: F,
    ) -> PipelineBuilder<In, B>
    where
        B: Send + 'static,
        F: Fn(Out) -> anyhow::Result<B> + Send + Sync + 'static,
    {
        self.stage_arc(name, workers, Arc::new(transform))
    }

    /// [`stage`](Self::stage) with an already shared transform.
    pub fn stage_arc<B>(
        mut self,
        name: impl Into<String>,
        workers: usize,
        transform: TransformFn<Out, B>,
    ) -> PipelineBuilder<In, B>
    where
        B: Send + 'static,
    {
        let index = self.stages.len() + usize::from(matches!(self.tail, Tail::Pending(_)));
        if workers == 0 && self.invalid.is_none() {
            self.invalid = Some(PipelineError::ZeroWorkers { stage: index });
        }

        let input: Arc<BoundedChannel<Out>> = match self.tail {
            Tail::Head(head) => head,
            Tail::Pending(pending) => {
                let link = Arc::new(BoundedChannel::new(self.opts.channel_cap));
                self.stages.push(pending(Arc::clone(&link)));
                link
            }
        };

        let ctx = Arc::new(StageContext::new(
            index,
            name.into(),
            workers,
            &self.opts,
            &self.first_failure,
        ));
        let pending: PendingStage<B> = Box::new(move |output| {
            Box::new(Stage::new(ctx, input, output, transform)) as Box<dyn StageRunner>
        });

        PipelineBuilder {
            opts: self.opts,
            head: self.head,
            tail: Tail::Pending(pending),
            stages: self.stages,
            first_failure: self.first_failure,
            invalid: self.invalid,
        }
    }

    /// Create the sink channel and return the pipeline, not yet started.
    pub fn build(self) -> Result<Pipeline<In, Out>, PipelineError> {
        if let Some(err) = self.invalid {
            return Err(err);
        }
        if self.opts.channel_cap == 0 || self.opts.output_cap == Some(0) {
            return Err(PipelineError::ZeroCapacity);
        }
        let pending = match self.tail {
            Tail::Head(_) => return Err(PipelineError::NoStages),
            Tail::Pending(pending) => pending,
        };
        let sink = Arc::new(match self.opts.output_cap {
            Some(cap) => BoundedChannel::new(cap),
            None => BoundedChannel::unbounded(),
        });
        let mut stages = self.stages;
        stages.push(pending(Arc::clone(&sink)));
        Ok(Pipeline::from_parts(
            self.opts,
            self.head,
            sink,
            stages,
            self.first_failure,
        ))
    }
}
