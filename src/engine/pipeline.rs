use std::collections::VecDeque;
use std::sync::Arc;

use crate::ArcStr;
use crate::engine::RunContext;
use crate::engine::consumer::RowConsumer;
use crate::engine::events::AnalysisEvent;
use crate::error::{EngineError, JobFailure, Phase, TaskError};
use crate::job::{FilterOutcome, JobKind, Row, RowSink, Value};

/// A row waiting to continue through the pipeline.
struct PendingRow {
    row: Row,
    outcomes: Vec<FilterOutcome>,
    /// Position of the first consumer still to see the row.
    start: usize,
    /// Consumers allowed to see the row, `None` for all of them.
    scope: Option<Arc<[bool]>>,
    depth: usize,
}

/// Routes rows through the consumers of one job graph.
///
/// Rows generated by a transformer are queued rather than recursed into, and
/// only continue to the consumers downstream of their generator.
pub(crate) struct RowPipeline {
    /// In topological order.
    consumers: Vec<Arc<RowConsumer>>,
    /// Per position, which positions depend on it transitively.
    descendants: Vec<Arc<[bool]>>,
    ctx: Arc<RunContext>,
}

impl RowPipeline {
    pub fn new(
        consumers: Vec<Arc<RowConsumer>>,
        descendants: Vec<Arc<[bool]>>,
        ctx: Arc<RunContext>,
    ) -> Self {
        Self {
            consumers,
            descendants,
            ctx,
        }
    }

    /// Consumes a row and everything generated from it. Returns the number of
    /// rows that went through the pipeline.
    pub fn consume(&self, row: Row) -> usize {
        self.drive(row, Vec::new(), |_, _| {})
    }

    /// Like [`consume`](Self::consume), starting from `outcomes` and returning
    /// every row in its final shape, source row first, with the outcomes it
    /// collected.
    pub fn consume_collect(&self, row: Row, outcomes: Vec<FilterOutcome>) -> Vec<(Row, Vec<FilterOutcome>)> {
        let mut rows = Vec::new();
        self.drive(row, outcomes, |row, outcomes| rows.push((row, outcomes)));
        rows
    }

    fn drive(
        &self,
        row: Row,
        outcomes: Vec<FilterOutcome>,
        mut emit: impl FnMut(Row, Vec<FilterOutcome>),
    ) -> usize {
        let mut queue = VecDeque::from([PendingRow {
            row,
            outcomes,
            start: 0,
            scope: None,
            depth: 0,
        }]);
        let mut processed = 0;

        while let Some(pending) = queue.pop_front() {
            processed += 1;
            let (row, outcomes) = self.consume_one(pending, &mut queue);
            emit(row, outcomes);
        }

        processed
    }

    fn consume_one(
        &self,
        pending: PendingRow,
        queue: &mut VecDeque<PendingRow>,
    ) -> (Row, Vec<FilterOutcome>) {
        let PendingRow {
            mut row,
            mut outcomes,
            start,
            scope,
            depth,
        } = pending;

        for position in start..self.consumers.len() {
            if scope.as_ref().is_some_and(|scope| !scope[position]) {
                continue;
            }

            let consumer = &self.consumers[position];
            if consumer.is_aborted() || !consumer.accepts(&row, &outcomes) {
                continue;
            }

            let outcome = match consumer.kind() {
                JobKind::Filter => consumer
                    .categorize(&row)
                    .map(|outcome| outcomes.extend(outcome)),
                JobKind::Analyzer => consumer.run(&row),
                JobKind::Transformer if consumer.generates_rows() => {
                    self.generate(position, &row, &outcomes, scope.as_ref(), depth, queue)
                }
                JobKind::Transformer => consumer
                    .transform(&row)
                    .and_then(|records| append(consumer, &mut row, records)),
            };

            if let Err(error) = outcome {
                self.fail(position, error);
            }
        }

        (row, outcomes)
    }

    fn generate(
        &self,
        position: usize,
        row: &Row,
        outcomes: &[FilterOutcome],
        scope: Option<&Arc<[bool]>>,
        depth: usize,
        queue: &mut VecDeque<PendingRow>,
    ) -> Result<(), TaskError> {
        let consumer = &self.consumers[position];
        let records = consumer.transform(row)?;

        if records.is_empty() {
            return Ok(());
        }

        if depth + 1 > self.ctx.max_row_depth {
            return Err(TaskError::new(EngineError::RowDepthExceeded(
                self.ctx.max_row_depth,
            )));
        }

        let descendants = &self.descendants[position];
        let scope: Arc<[bool]> = match scope {
            Some(outer) => outer
                .iter()
                .zip(descendants.iter())
                .map(|(a, b)| *a && *b)
                .collect(),
            None => descendants.clone(),
        };

        for (values, distinct_count) in records {
            let mut generated = row.derive(self.ctx.ids.next_id(), distinct_count);
            append_values(consumer, &mut generated, values)?;

            queue.push_back(PendingRow {
                row: generated,
                outcomes: outcomes.to_vec(),
                start: position + 1,
                scope: Some(scope.clone()),
                depth: depth + 1,
            });
        }

        Ok(())
    }

    /// Aborts the failing job and everything downstream of it. Only the first
    /// failure of a job is reported.
    fn fail(&self, position: usize, error: TaskError) {
        let consumer = &self.consumers[position];
        if !consumer.abort() {
            return;
        }

        tracing::warn!(job = %consumer.label(), "component failed, aborting its branch: {error:#}");

        self.ctx.events.send(AnalysisEvent::ComponentError {
            job: consumer.label(),
            message: error.message(),
        });
        self.ctx
            .errors
            .record(JobFailure::new(Some(consumer.label()), Phase::Consume, error));

        for (downstream, is_descendant) in self.descendants[position].iter().enumerate() {
            if *is_descendant {
                self.consumers[downstream].abort();
            }
        }
    }
}

/// Appends the single record of a one-to-one transformer.
fn append(consumer: &RowConsumer, row: &mut Row, records: Vec<(Vec<Value>, u32)>) -> Result<(), TaskError> {
    let mut records = records.into_iter();
    let Some((values, _)) = records.next() else {
        return Ok(());
    };

    if records.next().is_some() {
        return Err(TaskError::msg(format!(
            "transformer '{}' emitted more than one record but does not generate rows",
            consumer.name()
        )));
    }

    append_values(consumer, row, values)
}

fn append_values(consumer: &RowConsumer, row: &mut Row, values: Vec<Value>) -> Result<(), TaskError> {
    let outputs = consumer.outputs();
    if values.len() > outputs.len() {
        return Err(TaskError::msg(format!(
            "transformer '{}' emitted {} values for {} output columns",
            consumer.name(),
            values.len(),
            outputs.len()
        )));
    }

    let mut values = values.into_iter();
    for column in outputs {
        row.append(column.clone(), values.next().unwrap_or(Value::Null));
    }

    Ok(())
}

/// Feeds rows published on an output stream into a nested pipeline.
pub(crate) struct StreamSink {
    pipeline: Arc<RowPipeline>,
    columns: Vec<ArcStr>,
}

impl StreamSink {
    pub fn new(pipeline: Arc<RowPipeline>, columns: Vec<ArcStr>) -> Self {
        Self { pipeline, columns }
    }
}

impl RowSink for StreamSink {
    fn push(&self, values: Vec<Value>, distinct_count: u32) -> anyhow::Result<()> {
        anyhow::ensure!(
            values.len() == self.columns.len(),
            "output stream expects {} values, got {}",
            self.columns.len(),
            values.len()
        );

        let cells = self.columns.iter().cloned().zip(values).collect();
        let row = Row::new(self.pipeline.ctx.ids.next_id(), distinct_count, cells);
        self.pipeline.consume(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunContext;
    use crate::job::testing::{Collect, Collected, Equals, Split, Upper};
    use crate::job::{AnalyzerHandle, JobBuilder};

    fn plan(builder: JobBuilder) -> (Arc<RunContext>, Arc<RowPipeline>) {
        let ctx = RunContext::for_tests(8);
        let (pipeline, levels) = crate::engine::plan(builder.build().unwrap(), &ctx);
        for consumer in levels.iter().flatten() {
            consumer.initialize().unwrap();
        }
        (ctx, pipeline)
    }

    fn collected(pipeline: &RowPipeline, handle: AnalyzerHandle) -> Collected {
        let consumer = pipeline
            .consumers
            .iter()
            .find(|c| c.id() == handle.id())
            .unwrap();
        let result = consumer.result().unwrap().unwrap();
        result.downcast_ref::<Collected>().unwrap().clone()
    }

    fn row(ctx: &RunContext, name: &str) -> Row {
        Row::new(ctx.ids.next_id(), 1, vec![("name".into(), Value::from(name))])
    }

    #[test]
    fn test_requirement_routes_rows() {
        let mut builder = JobBuilder::new(["name"]);
        let is_ada = builder.filter(Equals::new("name", "ada")).input("name").register();
        let valid = builder
            .analyzer(Collect::new("name"))
            .input("name")
            .requires(is_ada.outcome("VALID"))
            .register();
        let invalid = builder
            .analyzer(Collect::new("name"))
            .input("name")
            .requires(is_ada.outcome("INVALID"))
            .register();
        let (ctx, pipeline) = plan(builder);

        for name in ["ada", "bob", "ada", "cy"] {
            pipeline.consume(row(&ctx, name));
        }

        assert_eq!(collected(&pipeline, valid).values, vec![Value::from("ada"); 2]);
        assert_eq!(
            collected(&pipeline, invalid).values,
            vec![Value::from("bob"), Value::from("cy")]
        );
    }

    #[test]
    fn test_transformer_appends_columns() {
        let mut builder = JobBuilder::new(["name"]);
        builder.transformer(Upper::new("name")).input("name").register();
        let upper = builder.analyzer(Collect::new("name_upper")).input("name_upper").register();
        let (ctx, pipeline) = plan(builder);

        pipeline.consume(row(&ctx, "ada"));

        assert_eq!(collected(&pipeline, upper).values, vec![Value::from("ADA")]);
    }

    #[test]
    fn test_generated_rows_get_fresh_ids() {
        let mut builder = JobBuilder::new(["name"]);
        builder.transformer(Split::new("name")).input("name").register();
        let tokens = builder.analyzer(Collect::new("token")).input("token").register();
        let names = builder.analyzer(Collect::new("name")).input("name").register();
        let (ctx, pipeline) = plan(builder);

        assert_eq!(pipeline.consume(row(&ctx, "a b c")), 4);
        assert_eq!(pipeline.consume(row(&ctx, "d e")), 3);

        let tokens = collected(&pipeline, tokens);
        assert_eq!(tokens.values.len(), 5);

        let mut ids = tokens.ids.clone();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 5);

        // Source rows reach unrelated analyzers once, generated rows do not.
        let names = collected(&pipeline, names);
        assert_eq!(names.values.len(), 2);
        assert!(names.ids.iter().all(|id| !tokens.ids.contains(id)));
    }

    #[test]
    fn test_generation_depth_is_bounded() {
        let mut builder = JobBuilder::new(["name"]);
        builder.transformer(Split::new("name")).input("name").register();
        let tokens = builder.analyzer(Collect::new("token")).input("token").register();

        let ctx = RunContext::for_tests(0);
        let (pipeline, _) = crate::engine::plan(builder.build().unwrap(), &ctx);
        pipeline.consume(row(&ctx, "a b"));

        let errors = ctx.errors.take();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].error.downcast_ref::<EngineError>(),
            Some(EngineError::RowDepthExceeded(0))
        ));
        assert!(collected(&pipeline, tokens).values.is_empty());
    }
}
