use std::sync::{Mutex, PoisonError};

use crate::error::{JobFailure, JobLabel, Phase, TaskError};

/// Ordered failures of one run.
///
/// A failure is recorded once no matter how many listeners it reaches.
/// Cleanup failures are attached to the primary failure that caused them.
#[derive(Debug, Default)]
pub(crate) struct ErrorSink {
    failures: Mutex<Vec<JobFailure>>,
}

impl ErrorSink {
    /// Returns whether the failure was new.
    pub fn record(&self, failure: JobFailure) -> bool {
        let mut failures = self.lock();
        if failures.iter().any(|f| f.mentions(&failure.error)) {
            return false;
        }

        failures.push(failure);
        true
    }

    /// Records an error that reached a listener without being attributed.
    pub fn record_unattributed(&self, phase: Phase, error: &TaskError) -> bool {
        self.record(JobFailure::new(None, phase, error.clone()))
    }

    /// Files a close failure under the job's own primary failure, else under
    /// the first primary failure of the run. Without any primary it becomes
    /// one itself.
    pub fn record_cleanup(&self, job: JobLabel, error: TaskError) {
        let mut failures = self.lock();
        if failures.iter().any(|f| f.mentions(&error)) {
            return;
        }

        let cleanup = JobFailure::new(Some(job.clone()), Phase::Close, error);
        let own = failures
            .iter()
            .position(|f| f.job.as_ref().is_some_and(|j| j.id == job.id));

        match own.or((!failures.is_empty()).then_some(0)) {
            Some(index) => failures[index].suppressed.push(cleanup),
            None => failures.push(cleanup),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies of the primary failures recorded after the first `start`.
    pub fn since(&self, start: usize) -> Vec<JobFailure> {
        self.lock().iter().skip(start).cloned().collect()
    }

    pub fn take(&self) -> Vec<JobFailure> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JobFailure>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;

    fn label(id: u32, name: &str) -> JobLabel {
        JobLabel {
            id: JobId(id),
            name: name.into(),
        }
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let sink = ErrorSink::default();
        let error = TaskError::msg("E1");

        assert!(sink.record(JobFailure::new(Some(label(0, "a")), Phase::Consume, error.clone())));
        assert!(!sink.record_unattributed(Phase::Runner, &error));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_cleanup_attaches_to_own_primary() {
        let sink = ErrorSink::default();
        sink.record(JobFailure::new(Some(label(0, "a")), Phase::Consume, TaskError::msg("E0")));
        sink.record(JobFailure::new(Some(label(1, "b")), Phase::Consume, TaskError::msg("E1")));

        sink.record_cleanup(label(1, "b"), TaskError::msg("E2"));
        sink.record_cleanup(label(1, "b"), TaskError::msg("E3"));
        sink.record_cleanup(label(2, "c"), TaskError::msg("E4"));

        let failures = sink.take();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1].message(), "E1");
        let suppressed: Vec<String> = failures[1].suppressed.iter().map(|f| f.message()).collect();
        assert_eq!(suppressed, ["E2", "E3"]);
        assert_eq!(failures[0].suppressed[0].message(), "E4");
    }

    #[test]
    fn test_cleanup_without_primary_is_primary() {
        let sink = ErrorSink::default();
        sink.record_cleanup(label(3, "d"), TaskError::msg("E5"));

        let failures = sink.take();
        assert_eq!(failures[0].job.as_ref().map(|j| j.id), Some(JobId(3)));
        assert_eq!(failures[0].phase, Phase::Close);
        assert!(failures[0].suppressed.is_empty());
    }
}
