use crate::concurrent::{ListenerRef, RunnerRef, Task, TaskListener, TaskRef, TaskRunnable};
use crate::error::TaskError;

/// Chains one task after another.
pub struct RunNextTaskListener {
    runner: RunnerRef,
    next_task: TaskRef,
    next_listener: Option<ListenerRef>,
}

impl RunNextTaskListener {
    pub fn new(runner: RunnerRef, next_task: TaskRef, next_listener: Option<ListenerRef>) -> Self {
        Self {
            runner,
            next_task,
            next_listener,
        }
    }
}

impl TaskListener for RunNextTaskListener {
    fn on_complete(&self, _: Option<&dyn Task>) {
        self.runner.run(TaskRunnable {
            task: Some(self.next_task.clone()),
            listener: self.next_listener.clone(),
        });
    }

    fn on_error(&self, _: Option<&dyn Task>, error: &TaskError) {
        match &self.next_listener {
            Some(listener) => listener.on_error(Some(&*self.next_task), error),
            None => tracing::warn!(
                task = %self.next_task.name(),
                "skipping task after failed predecessor: {error}"
            ),
        }
    }
}
