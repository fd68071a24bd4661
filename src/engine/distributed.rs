use std::sync::Arc;

use crate::concurrent::{JoinTaskListener, ListenerRef, Task, TaskListener};
use crate::engine::AnalysisRunner;
use crate::engine::future::{AnalysisResult, AnalysisResultFuture};
use crate::error::{EngineError, JobFailure, JobLabel, Phase, TaskError};
use crate::job::{AnalysisJob, RowSource};
use crate::result::{AnalyzerResultRef, AnalyzerResultReducer};

/// Runs one logical job over several row partitions and merges the partial
/// results with each analyzer's reducer.
///
/// Every partition gets its own job instance from the factory. Factories
/// must build the same graph each time so that job ids line up across
/// partitions.
pub struct DistributedAnalysisRunner {
    runner: AnalysisRunner,
}

impl DistributedAnalysisRunner {
    pub fn new(runner: AnalysisRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &AnalysisRunner {
        &self.runner
    }

    /// Submits every partition and returns the future of the reduced run.
    ///
    /// Nothing is submitted if the job cannot be distributed or if any
    /// partition is unable to feed it.
    pub fn run<F>(&self, factory: F, partitions: Vec<RowSource>) -> Result<AnalysisResultFuture, EngineError>
    where
        F: Fn() -> Result<AnalysisJob, EngineError>,
    {
        if partitions.is_empty() {
            return Err(EngineError::NoPartitions);
        }

        let jobs = partitions
            .iter()
            .map(|_| factory())
            .collect::<Result<Vec<_>, _>>()?;

        let mut reducers = Vec::new();
        for (label, reducer) in jobs[0].reducers() {
            let reducer = reducer.ok_or_else(|| EngineError::NotDistributable(label.name.to_string()))?;
            reducers.push((label, reducer));
        }

        for (job, source) in jobs.iter().zip(&partitions) {
            AnalysisRunner::check_source(job, source)?;
        }

        let futures: Vec<AnalysisResultFuture> =
            partitions.iter().map(|_| AnalysisResultFuture::new()).collect();
        let future = AnalysisResultFuture::new();
        future.set_running();

        tracing::info!(partitions = partitions.len(), "starting distributed analysis job");

        let reduce: ListenerRef = Arc::new(ReduceListener {
            reducers,
            partitions: futures.clone(),
            future: future.clone(),
        });
        let join: ListenerRef = JoinTaskListener::new(partitions.len(), reduce);

        for ((job, source), partition) in jobs.into_iter().zip(partitions).zip(futures) {
            self.runner.launch(job, source, partition, Some(join.clone()))?;
        }

        Ok(future)
    }
}

/// Merges the partition results once every partition has resolved.
struct ReduceListener {
    reducers: Vec<(JobLabel, Arc<dyn AnalyzerResultReducer>)>,
    partitions: Vec<AnalysisResultFuture>,
    future: AnalysisResultFuture,
}

impl ReduceListener {
    fn reduce(&self) {
        let mut errors = Vec::new();
        let mut partials = Vec::with_capacity(self.partitions.len());

        for (index, partition) in self.partitions.iter().enumerate() {
            let partition_errors = partition.errors();
            if !partition_errors.is_empty() {
                tracing::warn!(partition = index, errors = partition_errors.len(), "partition failed");
            }
            errors.extend(partition_errors);
            partials.push(partition.results());
        }

        let mut results = AnalysisResult::default();
        for (label, reducer) in &self.reducers {
            let parts: Vec<AnalyzerResultRef> = partials
                .iter()
                .filter_map(|partial| partial.get(label.id).cloned())
                .collect();

            if parts.is_empty() {
                continue;
            }

            match reducer.reduce(&parts) {
                Ok(result) => results.insert(label.clone(), result),
                Err(error) => {
                    tracing::warn!(job = %label, "reducing partial results failed: {error}");
                    errors.push(JobFailure::new(Some(label.clone()), Phase::Reduce, TaskError::new(error)));
                }
            }
        }

        self.future.resolve(results, errors);
    }
}

impl TaskListener for ReduceListener {
    fn on_complete(&self, _: Option<&dyn Task>) {
        self.reduce();
    }

    fn on_error(&self, _: Option<&dyn Task>, error: &TaskError) {
        tracing::error!("distributed run failed: {error:#}");
        self.reduce();
    }
}
