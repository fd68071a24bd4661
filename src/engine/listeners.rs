use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::concurrent::{ListenerRef, Task, TaskListener};
use crate::engine::RunContext;
use crate::engine::consumer::RowConsumer;
use crate::engine::events::{AnalysisEvent, PROGRESS_INTERVAL};
use crate::engine::future::AnalysisResultFuture;
use crate::error::{Phase, TaskError};

/// Counts the rows in flight and lets the source task wait for them.
pub(crate) struct RowTracker {
    ctx: Arc<RunContext>,
    span: Span,
    in_flight: Mutex<usize>,
    settled: Condvar,
    rows: AtomicU64,
}

impl RowTracker {
    pub fn new(ctx: Arc<RunContext>, span: Span) -> Self {
        Self {
            ctx,
            span,
            in_flight: Mutex::new(0),
            settled: Condvar::new(),
            rows: AtomicU64::new(0),
        }
    }

    /// Must be called before the row task is handed to the runner.
    pub fn submit(&self) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Acquire)
    }

    /// Blocks until at most `limit` rows are in flight. Queued work of the
    /// runner is executed on this thread while waiting.
    pub fn wait_until(&self, limit: usize) {
        loop {
            let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if *in_flight <= limit {
                return;
            }
            drop(in_flight);

            if self.ctx.runner.assist_execution() {
                continue;
            }

            let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if *in_flight > limit {
                let _ = self
                    .settled
                    .wait_timeout(in_flight, Duration::from_millis(5))
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    fn settle(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *in_flight = in_flight.saturating_sub(1);
        drop(in_flight);
        self.settled.notify_all();
    }
}

impl TaskListener for RowTracker {
    fn on_complete(&self, _: Option<&dyn Task>) {
        let rows = self.rows.fetch_add(1, Ordering::AcqRel) + 1;
        self.span.pb_inc(1);

        if rows % PROGRESS_INTERVAL == 0 {
            tracing::debug!(rows, "rows processed");
            self.ctx
                .events
                .send(AnalysisEvent::RowProcessingProgress { rows });
        }

        self.settle();
    }

    fn on_error(&self, _: Option<&dyn Task>, error: &TaskError) {
        tracing::error!("row task failed: {error:#}");
        self.ctx.errors.record_unattributed(Phase::Runner, error);
        self.settle();
    }
}

/// Closes a consumer after its result step, whatever the outcome, and then
/// signals the join of its level.
pub(crate) struct CloseTaskListener {
    consumer: Arc<RowConsumer>,
    ctx: Arc<RunContext>,
    join: ListenerRef,
}

impl CloseTaskListener {
    pub fn new(consumer: Arc<RowConsumer>, ctx: Arc<RunContext>, join: ListenerRef) -> Self {
        Self {
            consumer,
            ctx,
            join,
        }
    }

    fn close(&self) {
        if let Err(error) = self.consumer.close() {
            tracing::warn!(job = %self.consumer.label(), "closing failed: {error:#}");
            self.ctx.errors.record_cleanup(self.consumer.label(), error);
        }
    }
}

impl TaskListener for CloseTaskListener {
    fn on_complete(&self, _: Option<&dyn Task>) {
        self.close();
        self.join.on_complete(None);
    }

    fn on_error(&self, _: Option<&dyn Task>, error: &TaskError) {
        self.ctx.errors.record_unattributed(Phase::Runner, error);
        self.close();
        self.join.on_error(None, error);
    }
}

/// Resolves the future of a run once every consumer has been closed.
pub(crate) struct RunCompletionListener {
    ctx: Arc<RunContext>,
    future: AnalysisResultFuture,
    done: Option<ListenerRef>,
}

impl RunCompletionListener {
    pub fn new(ctx: Arc<RunContext>, future: AnalysisResultFuture, done: Option<ListenerRef>) -> Self {
        Self { ctx, future, done }
    }

    fn finish(&self) {
        let errors = self.ctx.errors.take();
        let results = std::mem::take(
            &mut *self
                .ctx
                .results
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        if errors.is_empty() {
            tracing::info!(results = results.len(), "analysis job finished");
            self.ctx.events.send(AnalysisEvent::JobSuccess);
        } else {
            tracing::warn!(errors = errors.len(), "analysis job finished with errors");
            self.ctx.events.send(AnalysisEvent::JobFailed {
                errors: errors.len(),
            });
        }

        self.future.resolve(results, errors);

        if let Some(done) = &self.done {
            done.on_complete(None);
        }
    }
}

impl TaskListener for RunCompletionListener {
    fn on_complete(&self, _: Option<&dyn Task>) {
        self.finish();
    }

    fn on_error(&self, _: Option<&dyn Task>, error: &TaskError) {
        self.ctx.errors.record_unattributed(Phase::Runner, error);
        self.finish();
    }
}
