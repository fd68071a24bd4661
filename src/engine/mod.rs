//! Execution of an [`AnalysisJob`] over a [`RowSource`].
//!
//! A run is a chain of listeners assembled up front and then driven entirely
//! by the task runner:
//!
//! ```text
//! initialize x N -> Join(N) -> begin -> rows -> Fork(results + close) -> Join(N) -> done
//! ```
//!
//! Nested output stream jobs get their own fork level after their parent, so
//! they are closed only once the parent has been.

mod consumer;
mod distributed;
mod errors;
mod events;
mod future;
mod handler;
mod listeners;
mod pipeline;
mod tasks;

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use petgraph::visit::Dfs;

pub use crate::engine::distributed::DistributedAnalysisRunner;
pub use crate::engine::events::{AnalysisEvent, PROGRESS_INTERVAL};
pub use crate::engine::future::{AnalysisResult, AnalysisResultFuture, JobResult, JobStatus};
pub use crate::engine::handler::{ConsumeRowHandler, ConsumeRowOptions, ConsumeRowResult};

use crate::concurrent::{
    ForkTaskListener, JoinTaskListener, ListenerRef, MultiThreadedTaskRunner, RunNextTaskListener,
    RunnerRef, TaskRef, TaskRunnable, task_fn,
};
use crate::config::EngineConfig;
use crate::engine::consumer::RowConsumer;
use crate::engine::errors::ErrorSink;
use crate::engine::events::EventSink;
use crate::engine::listeners::{CloseTaskListener, RunCompletionListener};
use crate::engine::pipeline::{RowPipeline, StreamSink};
use crate::engine::tasks::{CollectResultTask, InitializeTask, RowProcessingTask};
use crate::error::EngineError;
use crate::job::{AnalysisJob, Component, JobId, JobParts, RowIdGenerator, RowSink, RowSource};

/// State shared by every task of one run.
pub(crate) struct RunContext {
    pub runner: RunnerRef,
    pub ids: RowIdGenerator,
    pub errors: ErrorSink,
    pub events: EventSink,
    pub results: Mutex<AnalysisResult>,
    pub max_row_depth: usize,
    pub max_pending_rows: usize,
    pub progress: bool,
}

impl RunContext {
    fn new(config: &EngineConfig, runner: RunnerRef, events: EventSink) -> Self {
        Self {
            runner,
            ids: RowIdGenerator::new(),
            errors: ErrorSink::default(),
            events,
            results: Mutex::new(AnalysisResult::default()),
            max_row_depth: config.max_row_depth,
            max_pending_rows: config.max_pending_rows,
            progress: config.progress,
        }
    }

    #[cfg(test)]
    pub fn for_tests(max_row_depth: usize) -> Arc<Self> {
        let config = EngineConfig {
            max_row_depth,
            ..EngineConfig::default()
        };
        let runner: RunnerRef = Arc::new(crate::concurrent::SingleThreadedTaskRunner::new());
        Arc::new(Self::new(&config, runner, EventSink::default()))
    }
}

/// Wires the components of `job` into consumers.
///
/// Returns the row pipeline of the top level job together with every consumer
/// grouped by nesting depth: index 0 holds the jobs of `job` itself, index 1
/// the jobs attached to their output streams, and so on.
pub(crate) fn plan(
    job: AnalysisJob,
    ctx: &Arc<RunContext>,
) -> (Arc<RowPipeline>, Vec<Vec<Arc<RowConsumer>>>) {
    let JobParts {
        graph,
        components,
        order,
        streams,
    } = job.into_parts();

    let mut levels: Vec<Vec<Arc<RowConsumer>>> = vec![Vec::new()];
    let mut sinks: HashMap<JobId, Vec<(String, Arc<dyn RowSink>)>> = HashMap::new();

    for binding in streams {
        let (pipeline, nested) = plan(binding.job, ctx);
        let sink: Arc<dyn RowSink> = Arc::new(StreamSink::new(pipeline, binding.columns));
        sinks
            .entry(binding.analyzer)
            .or_default()
            .push((binding.stream, sink));

        for (depth, level) in nested.into_iter().enumerate() {
            if levels.len() <= depth + 1 {
                levels.push(Vec::new());
            }
            levels[depth + 1].extend(level);
        }
    }

    let positions: HashMap<_, _> = order
        .iter()
        .enumerate()
        .map(|(position, &index)| (index, position))
        .collect();

    let descendants: Vec<Arc<[bool]>> = order
        .iter()
        .map(|&start| {
            let mut mask = vec![false; order.len()];
            let mut dfs = Dfs::new(&graph, start);
            while let Some(node) = dfs.next(&graph) {
                if node != start
                    && let Some(&position) = positions.get(&node)
                {
                    mask[position] = true;
                }
            }
            Arc::from(mask)
        })
        .collect();

    let mut components: Vec<Option<Component>> = components.into_iter().map(Some).collect();
    let consumers: Vec<Arc<RowConsumer>> = order
        .iter()
        .filter_map(|&index| {
            let info = graph[index].clone();
            let component = components.get_mut(index.index())?.take()?;
            let streams = sinks.remove(&info.id).unwrap_or_default();
            Some(Arc::new(RowConsumer::new(info, component, streams)))
        })
        .collect();

    levels[0] = consumers.clone();
    let pipeline = RowPipeline::new(consumers, descendants, ctx.clone());
    (Arc::new(pipeline), levels)
}

/// Runs analysis jobs on a task runner.
///
/// ```rust,ignore
/// let runner = AnalysisRunner::new(EngineConfig::default())?;
/// let future = runner.run(job, RowSource::from_values(["name"], rows))?;
/// if future.is_successful() {
///     let stats = future.results();
/// }
/// ```
pub struct AnalysisRunner {
    config: EngineConfig,
    runner: RunnerRef,
    events: Option<Sender<AnalysisEvent>>,
}

impl AnalysisRunner {
    /// Starts a dedicated worker pool sized by the configuration.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let runner = MultiThreadedTaskRunner::new(config.threads, &config.thread_name)?;

        Ok(Self {
            config,
            runner: Arc::new(runner),
            events: None,
        })
    }

    pub fn with_task_runner(config: EngineConfig, runner: RunnerRef) -> Result<Self, EngineError> {
        config.validate()?;

        Ok(Self {
            config,
            runner,
            events: None,
        })
    }

    /// Publishes [`AnalysisEvent`]s of every later run on `sender`.
    pub fn with_events(mut self, sender: Sender<AnalysisEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn task_runner(&self) -> &RunnerRef {
        &self.runner
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submits the job and returns immediately.
    ///
    /// Fails only when the source cannot feed the job. Everything that goes
    /// wrong after submission is reported through the returned future.
    pub fn run(&self, job: AnalysisJob, source: RowSource) -> Result<AnalysisResultFuture, EngineError> {
        let future = AnalysisResultFuture::new();
        self.launch(job, source, future.clone(), None)?;
        Ok(future)
    }

    pub(crate) fn check_source(job: &AnalysisJob, source: &RowSource) -> Result<(), EngineError> {
        match job
            .source_columns()
            .iter()
            .find(|column| !source.columns().contains(column))
        {
            Some(column) => Err(EngineError::MissingSourceColumn(column.to_string())),
            None => Ok(()),
        }
    }

    /// Assembles the listener chain of one run and submits its first tasks.
    /// `done` is signalled after `future` has been resolved.
    pub(crate) fn launch(
        &self,
        job: AnalysisJob,
        source: RowSource,
        future: AnalysisResultFuture,
        done: Option<ListenerRef>,
    ) -> Result<(), EngineError> {
        Self::check_source(&job, &source)?;

        let events = EventSink::new(self.events.clone());
        let ctx = Arc::new(RunContext::new(&self.config, self.runner.clone(), events));
        let (pipeline, levels) = plan(job, &ctx);
        let consumers: Vec<Arc<RowConsumer>> = levels.iter().flatten().cloned().collect();

        tracing::info!(jobs = consumers.len(), "starting analysis job");

        let mut next: ListenerRef = Arc::new(RunCompletionListener::new(
            ctx.clone(),
            future.clone(),
            done,
        ));

        for (depth, level) in levels.iter().enumerate().rev() {
            if level.is_empty() {
                continue;
            }

            let join: ListenerRef = JoinTaskListener::new(level.len(), next);
            let successors = level
                .iter()
                .map(|consumer| {
                    let task: TaskRef = Arc::new(CollectResultTask::new(consumer.clone(), ctx.clone()));
                    let close: ListenerRef =
                        Arc::new(CloseTaskListener::new(consumer.clone(), ctx.clone(), join.clone()));
                    TaskRunnable::with_listener(task, close)
                })
                .collect();

            next = Arc::new(ForkTaskListener::new(
                format!("results level {depth}"),
                self.runner.clone(),
                successors,
            ));
        }

        let rows: TaskRef = Arc::new(RowProcessingTask::new(ctx.clone(), pipeline, source));
        let after_begin: ListenerRef = Arc::new(RunNextTaskListener::new(
            self.runner.clone(),
            rows,
            Some(next),
        ));

        let begin_ctx = ctx.clone();
        let begin = task_fn("row processing begin", move || {
            begin_ctx.events.send(AnalysisEvent::RowProcessingBegin);
            Ok(())
        });
        let after_init: ListenerRef = Arc::new(RunNextTaskListener::new(
            self.runner.clone(),
            begin,
            Some(after_begin),
        ));

        future.set_running();
        ctx.events.send(AnalysisEvent::JobBegin {
            jobs: consumers.len(),
        });

        let init: ListenerRef = JoinTaskListener::new(consumers.len(), after_init);
        for consumer in consumers {
            let task: TaskRef = Arc::new(InitializeTask::new(consumer, ctx.clone()));
            self.runner.run(TaskRunnable::with_listener(task, init.clone()));
        }

        Ok(())
    }
}
