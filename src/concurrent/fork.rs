use std::sync::{Mutex, PoisonError};

use crate::concurrent::{RunnerRef, Task, TaskListener, TaskRunnable};
use crate::error::TaskError;

/// Submits a fixed set of successors once the observed task completes.
///
/// On error the successors are not executed; each one's listener receives the
/// error instead, so that joins further down still count down.
pub struct ForkTaskListener {
    name: String,
    runner: RunnerRef,
    successors: Mutex<Option<Vec<TaskRunnable>>>,
}

impl ForkTaskListener {
    pub fn new(name: impl Into<String>, runner: RunnerRef, successors: Vec<TaskRunnable>) -> Self {
        Self {
            name: name.into(),
            runner,
            successors: Mutex::new(Some(successors)),
        }
    }

    fn take(&self) -> Vec<TaskRunnable> {
        let taken = self
            .successors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match taken {
            Some(successors) => successors,
            None => {
                tracing::warn!(fork = %self.name, "fork signalled more than once");
                Vec::new()
            }
        }
    }
}

impl TaskListener for ForkTaskListener {
    fn on_complete(&self, _: Option<&dyn Task>) {
        let successors = self.take();
        tracing::trace!(fork = %self.name, count = successors.len(), "forking");

        for runnable in successors {
            self.runner.run(runnable);
        }
    }

    fn on_error(&self, _: Option<&dyn Task>, error: &TaskError) {
        for runnable in self.take() {
            runnable.reject(error);
        }
    }
}
