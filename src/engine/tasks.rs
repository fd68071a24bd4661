use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::concurrent::{Task, TaskRunnable};
use crate::engine::RunContext;
use crate::engine::consumer::RowConsumer;
use crate::engine::events::AnalysisEvent;
use crate::engine::listeners::RowTracker;
use crate::engine::pipeline::RowPipeline;
use crate::error::{EngineError, JobFailure, Phase, TaskError};
use crate::job::{JobKind, Row, RowSource};

/// Initializes one component. A failure aborts the whole run.
pub(crate) struct InitializeTask {
    consumer: Arc<RowConsumer>,
    ctx: Arc<RunContext>,
}

impl InitializeTask {
    pub fn new(consumer: Arc<RowConsumer>, ctx: Arc<RunContext>) -> Self {
        Self { consumer, ctx }
    }
}

impl Task for InitializeTask {
    fn name(&self) -> Cow<'_, str> {
        Cow::Owned(format!("initialize {}", self.consumer.name()))
    }

    fn execute(&self) -> anyhow::Result<()> {
        let label = self.consumer.label();

        if let Err(error) = self.consumer.initialize() {
            self.consumer.abort();
            self.ctx
                .errors
                .record(JobFailure::new(Some(label), Phase::Initialize, error.clone()));
            return Err(error.into());
        }

        tracing::debug!(job = %label, "component initialized");
        self.ctx
            .events
            .send(AnalysisEvent::ComponentInitialized { job: label });
        Ok(())
    }
}

/// Reads the source and submits one [`ConsumeRowTask`] per record.
///
/// At most `max_pending_rows` rows are in flight at once. The task returns
/// only after every submitted row has been consumed, so the components can be
/// closed as soon as it completes.
pub(crate) struct RowProcessingTask {
    ctx: Arc<RunContext>,
    pipeline: Arc<RowPipeline>,
    source: Mutex<Option<RowSource>>,
}

impl RowProcessingTask {
    pub fn new(ctx: Arc<RunContext>, pipeline: Arc<RowPipeline>, source: RowSource) -> Self {
        Self {
            ctx,
            pipeline,
            source: Mutex::new(Some(source)),
        }
    }

    fn source_failure(&self, error: anyhow::Error) -> anyhow::Error {
        let error = TaskError::from(error);
        tracing::error!("reading the row source failed: {error:#}");
        self.ctx
            .errors
            .record(JobFailure::new(None, Phase::Source, error.clone()));
        error.into()
    }
}

impl Task for RowProcessingTask {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed("row processing")
    }

    fn execute(&self) -> anyhow::Result<()> {
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(source) = source else {
            anyhow::bail!("row source was already consumed");
        };
        let (columns, records) = source.into_parts();

        let span = tracing::span!(Level::INFO, "row_processing");
        if self.ctx.progress {
            span.pb_set_style(&crate::utils::progress_style());
            span.pb_set_message("Processing rows...");
        }
        let _enter = span.enter();

        let tracker = Arc::new(RowTracker::new(self.ctx.clone(), span.clone()));
        let limit = self.ctx.max_pending_rows.saturating_sub(1);

        for record in records {
            let record = record.and_then(|record| {
                if record.values.len() != columns.len() {
                    return Err(EngineError::RecordWidth {
                        expected: columns.len(),
                        found: record.values.len(),
                    }
                    .into());
                }
                Ok(record)
            });

            let record = match record {
                Ok(record) => record,
                Err(error) => {
                    tracker.wait_until(0);
                    return Err(self.source_failure(error));
                }
            };

            let cells = columns.iter().cloned().zip(record.values).collect();
            let row = Row::new(self.ctx.ids.next_id(), record.distinct_count, cells);

            tracker.wait_until(limit);
            tracker.submit();
            let task = Arc::new(ConsumeRowTask::new(row, self.pipeline.clone()));
            self.ctx
                .runner
                .run(TaskRunnable::with_listener(task, tracker.clone()));
        }

        tracker.wait_until(0);

        let rows = tracker.rows();
        tracing::info!(rows, "row processing finished");
        self.ctx
            .events
            .send(AnalysisEvent::RowProcessingSuccess { rows });
        Ok(())
    }
}

pub(crate) struct ConsumeRowTask {
    row: Mutex<Option<Row>>,
    pipeline: Arc<RowPipeline>,
}

impl ConsumeRowTask {
    pub fn new(row: Row, pipeline: Arc<RowPipeline>) -> Self {
        Self {
            row: Mutex::new(Some(row)),
            pipeline,
        }
    }
}

impl Task for ConsumeRowTask {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed("consume row")
    }

    fn execute(&self) -> anyhow::Result<()> {
        let row = self.row.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(row) = row {
            self.pipeline.consume(row);
        }
        Ok(())
    }
}

/// Fetches the result of an analyzer that was not aborted.
///
/// A failing analyzer only loses its own result; the error is recorded and
/// the task still completes so that the close step and later levels run
/// normally.
pub(crate) struct CollectResultTask {
    consumer: Arc<RowConsumer>,
    ctx: Arc<RunContext>,
}

impl CollectResultTask {
    pub fn new(consumer: Arc<RowConsumer>, ctx: Arc<RunContext>) -> Self {
        Self { consumer, ctx }
    }
}

impl Task for CollectResultTask {
    fn name(&self) -> Cow<'_, str> {
        Cow::Owned(format!("result of {}", self.consumer.name()))
    }

    fn execute(&self) -> anyhow::Result<()> {
        if self.consumer.kind() != JobKind::Analyzer || self.consumer.is_aborted() {
            return Ok(());
        }

        let label = self.consumer.label();
        match self.consumer.result() {
            Ok(Some(result)) => {
                self.ctx
                    .results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(label.clone(), result);
                self.ctx
                    .events
                    .send(AnalysisEvent::ComponentResult { job: label });
            }
            Ok(None) => {}
            Err(error) => {
                self.consumer.abort();
                tracing::warn!(job = %label, "collecting the result failed: {error:#}");
                self.ctx.events.send(AnalysisEvent::ComponentError {
                    job: label.clone(),
                    message: error.message(),
                });
                self.ctx
                    .errors
                    .record(JobFailure::new(Some(label), Phase::Result, error));
            }
        }

        Ok(())
    }
}
