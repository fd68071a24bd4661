use std::sync::{Arc, PoisonError};

use crate::ArcStr;
use crate::concurrent::{RunnerRef, SingleThreadedTaskRunner, Task};
use crate::config::EngineConfig;
use crate::engine::consumer::RowConsumer;
use crate::engine::events::EventSink;
use crate::engine::future::AnalysisResultFuture;
use crate::engine::pipeline::RowPipeline;
use crate::engine::tasks::{CollectResultTask, InitializeTask};
use crate::engine::{RunContext, plan};
use crate::error::{EngineError, JobFailure, Phase, TaskError};
use crate::job::{AnalysisJob, FilterOutcome, JobKind, Record, Row};

/// Options of a [`ConsumeRowHandler`].
#[derive(Debug, Clone)]
pub struct ConsumeRowOptions {
    /// When unset, analyzers are left out entirely: they are neither
    /// initialized, fed nor closed.
    pub include_analyzers: bool,
    /// Outcomes every row starts with, as if an upstream filter had
    /// produced them.
    pub always_satisfied: Vec<FilterOutcome>,
    pub max_row_depth: usize,
}

impl Default for ConsumeRowOptions {
    fn default() -> Self {
        Self {
            include_analyzers: true,
            always_satisfied: Vec::new(),
            max_row_depth: EngineConfig::default().max_row_depth,
        }
    }
}

/// What became of one record.
#[derive(Debug, Clone, Default)]
pub struct ConsumeRowResult {
    rows: Vec<(Row, Vec<FilterOutcome>)>,
    errors: Vec<JobFailure>,
}

impl ConsumeRowResult {
    /// The source row with every appended column, followed by the rows
    /// generated from it, each with the filter outcomes it collected.
    pub fn rows(&self) -> impl Iterator<Item = (&Row, &[FilterOutcome])> {
        self.rows.iter().map(|(row, outcomes)| (row, outcomes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Components that failed on this record. Each of them is skipped for
    /// every later record.
    pub fn errors(&self) -> &[JobFailure] {
        &self.errors
    }

    pub fn into_rows(self) -> Vec<(Row, Vec<FilterOutcome>)> {
        self.rows
    }
}

/// Pushes records through a job one at a time on the calling thread.
///
/// Components are initialized once, when the handler is built, and closed
/// by [`close`](Self::close) or when the handler is dropped. Callers that
/// need the rows a job produces, rather than its analyzer results, embed
/// the job through this handler.
pub struct ConsumeRowHandler {
    ctx: Arc<RunContext>,
    pipeline: Arc<RowPipeline>,
    consumers: Vec<Arc<RowConsumer>>,
    columns: Vec<ArcStr>,
    always_satisfied: Vec<FilterOutcome>,
    closed: bool,
}

impl ConsumeRowHandler {
    /// Initializes every component of `job`. If any of them fails, all of
    /// them are closed again and the first failure is returned.
    pub fn new(job: AnalysisJob, options: ConsumeRowOptions) -> Result<Self, JobFailure> {
        let config = EngineConfig {
            max_row_depth: options.max_row_depth,
            ..EngineConfig::default()
        };
        let runner: RunnerRef = Arc::new(SingleThreadedTaskRunner::new());
        let ctx = Arc::new(RunContext::new(&config, runner, EventSink::default()));

        let columns = job.source_columns().to_vec();
        let (pipeline, levels) = plan(job, &ctx);

        let mut consumers = Vec::new();
        for consumer in levels.into_iter().flatten() {
            if !options.include_analyzers && consumer.kind() == JobKind::Analyzer {
                consumer.abort();
                continue;
            }
            consumers.push(consumer);
        }

        let mut handler = Self {
            ctx,
            pipeline,
            consumers,
            columns,
            always_satisfied: options.always_satisfied,
            closed: false,
        };

        for consumer in &handler.consumers {
            // Failures are recorded by the task itself.
            let _ = InitializeTask::new(consumer.clone(), handler.ctx.clone()).execute();
        }

        if !handler.ctx.errors.is_empty() {
            handler.close_consumers();
            handler.closed = true;
            if let Some(failure) = handler.ctx.errors.take().into_iter().next() {
                return Err(failure);
            }
        }

        tracing::debug!(jobs = handler.consumers.len(), "row handler ready");
        Ok(handler)
    }

    /// Source columns a record must provide, in order.
    pub fn columns(&self) -> &[ArcStr] {
        &self.columns
    }

    /// Runs one record through every component.
    pub fn consume_row(&mut self, record: Record) -> Result<ConsumeRowResult, EngineError> {
        if self.closed {
            return Err(EngineError::HandlerClosed);
        }
        if record.values.len() != self.columns.len() {
            return Err(EngineError::RecordWidth {
                expected: self.columns.len(),
                found: record.values.len(),
            });
        }

        let cells = self.columns.iter().cloned().zip(record.values).collect();
        let row = Row::new(self.ctx.ids.next_id(), record.distinct_count, cells);

        let seen = self.ctx.errors.len();
        let rows = self
            .pipeline
            .consume_collect(row, self.always_satisfied.clone());

        Ok(ConsumeRowResult {
            rows,
            errors: self.ctx.errors.since(seen),
        })
    }

    /// Collects the analyzer results, closes every component and hands back
    /// an already resolved future.
    pub fn close(mut self) -> AnalysisResultFuture {
        self.finish()
    }

    fn finish(&mut self) -> AnalysisResultFuture {
        let future = AnalysisResultFuture::new();
        if self.closed {
            future.resolve(Default::default(), Vec::new());
            return future;
        }
        self.closed = true;

        for consumer in &self.consumers {
            let task = CollectResultTask::new(consumer.clone(), self.ctx.clone());
            if let Err(error) = task.execute() {
                self.ctx
                    .errors
                    .record_unattributed(Phase::Result, &TaskError::from(error));
            }
        }
        self.close_consumers();

        let results = std::mem::take(
            &mut *self
                .ctx
                .results
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        future.resolve(results, self.ctx.errors.take());
        future
    }

    fn close_consumers(&self) {
        for consumer in &self.consumers {
            if let Err(error) = consumer.close() {
                tracing::warn!(job = %consumer.label(), "closing failed: {error:#}");
                self.ctx.errors.record_cleanup(consumer.label(), error);
            }
        }
    }
}

impl Drop for ConsumeRowHandler {
    fn drop(&mut self) {
        if !self.closed {
            let future = self.finish();
            for failure in future.errors() {
                tracing::warn!("row handler dropped with failure: {failure}");
            }
        }
    }
}
