use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{JobFailure, JobLabel};
use crate::job::JobId;
use crate::result::{AnalyzerResult, AnalyzerResultRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Successful,
    Erroneous,
}

impl JobStatus {
    pub fn is_done(self) -> bool {
        matches!(self, JobStatus::Successful | JobStatus::Erroneous)
    }
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub job: JobLabel,
    pub result: AnalyzerResultRef,
}

/// Analyzer results of a run, keyed by job. Analyzers of a failed branch
/// have no entry.
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    results: BTreeMap<JobId, JobResult>,
}

impl AnalysisResult {
    pub(crate) fn insert(&mut self, job: JobLabel, result: AnalyzerResultRef) {
        self.results.insert(job.id, JobResult { job, result });
    }

    pub fn get(&self, job: impl Into<JobId>) -> Option<&AnalyzerResultRef> {
        self.results.get(&job.into()).map(|r| &r.result)
    }

    /// The result of `job`, if it has type `T`.
    pub fn get_as<T: AnalyzerResult + 'static>(&self, job: impl Into<JobId>) -> Option<&T> {
        self.get(job).and_then(|result| result.downcast_ref::<T>())
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobResult> {
        self.results.values()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug)]
struct State {
    status: JobStatus,
    results: AnalysisResult,
    errors: Vec<JobFailure>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    done: Condvar,
}

/// Handle to a running analysis.
///
/// Status goes `Pending -> Running -> Successful | Erroneous`. Accessors for
/// results and errors block until the run is done.
#[derive(Debug, Clone)]
pub struct AnalysisResultFuture {
    shared: Arc<Shared>,
}

impl AnalysisResultFuture {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    status: JobStatus::Pending,
                    results: AnalysisResult::default(),
                    errors: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub(crate) fn set_running(&self) {
        let mut state = self.lock();
        if state.status == JobStatus::Pending {
            state.status = JobStatus::Running;
        }
    }

    pub(crate) fn resolve(&self, results: AnalysisResult, errors: Vec<JobFailure>) {
        let mut state = self.lock();
        state.status = if errors.is_empty() {
            JobStatus::Successful
        } else {
            JobStatus::Erroneous
        };
        state.results = results;
        state.errors = errors;
        drop(state);

        self.shared.done.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_done(&self) -> MutexGuard<'_, State> {
        let mut state = self.lock();
        while !state.status.is_done() {
            state = self
                .shared
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn is_done(&self) -> bool {
        self.status().is_done()
    }

    /// Blocks until the run is done.
    pub fn wait(&self) {
        drop(self.wait_done());
    }

    /// Blocks for at most `timeout`. Returns whether the run is done; a
    /// timeout is not an error.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        while !state.status.is_done() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .done
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        true
    }

    pub fn is_successful(&self) -> bool {
        self.wait_done().status == JobStatus::Successful
    }

    pub fn is_erroneous(&self) -> bool {
        self.wait_done().status == JobStatus::Erroneous
    }

    /// Primary failures in discovery order, each with its suppressed cleanup
    /// failures.
    pub fn errors(&self) -> Vec<JobFailure> {
        self.wait_done().errors.clone()
    }

    pub fn results(&self) -> AnalysisResult {
        self.wait_done().results.clone()
    }

    pub fn result(&self, job: impl Into<JobId>) -> Option<AnalyzerResultRef> {
        self.wait_done().results.get(job).cloned()
    }
}
