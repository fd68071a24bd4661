//! Task scheduling primitives.
//!
//! Everything the engine does is expressed as a [`Task`] paired with a
//! [`TaskListener`] and handed to a [`TaskRunner`]. Ordering between tasks is
//! expressed by composing completion callbacks:
//!
//! * [`ForkTaskListener`] fans out to a fixed set of successors,
//! * [`JoinTaskListener`] fans in once N predecessors have finished,
//! * [`RunNextTaskListener`] chains one task after another.
//!
//! Failures travel along the same edges as completions, so a join downstream
//! of a failed fork still counts down and never deadlocks.

mod fork;
mod join;
mod listener;
mod run_next;
mod runner;

use std::borrow::Cow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

pub use crate::concurrent::fork::ForkTaskListener;
pub use crate::concurrent::join::JoinTaskListener;
pub use crate::concurrent::listener::{ListenerRef, TaskListener};
pub use crate::concurrent::run_next::RunNextTaskListener;
pub use crate::concurrent::runner::{
    MultiThreadedTaskRunner, RunnerRef, SingleThreadedTaskRunner, TaskRunner,
};

use crate::error::{EngineError, TaskError};

/// A unit of work. Executed at most once by a [`TaskRunner`].
pub trait Task: Send + Sync {
    fn name(&self) -> Cow<'_, str>;

    fn execute(&self) -> anyhow::Result<()>;
}

pub type TaskRef = Arc<dyn Task>;

/// Closure-backed [`Task`].
pub struct FnTask<F> {
    name: Cow<'static, str>,
    func: F,
}

impl<F> Task for FnTask<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }

    fn execute(&self) -> anyhow::Result<()> {
        (self.func)()
    }
}

/// Wraps a closure into a shareable task.
pub fn task_fn<F>(name: impl Into<Cow<'static, str>>, func: F) -> TaskRef
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnTask {
        name: name.into(),
        func,
    })
}

/// A task paired with the listener that observes it.
///
/// Running it always calls [`TaskListener::on_begin`] first and then exactly
/// one of [`TaskListener::on_complete`] or [`TaskListener::on_error`].
pub struct TaskRunnable {
    task: Option<TaskRef>,
    listener: Option<ListenerRef>,
}

impl TaskRunnable {
    pub fn new(task: Option<TaskRef>, listener: Option<ListenerRef>) -> Result<Self, EngineError> {
        if task.is_none() && listener.is_none() {
            return Err(EngineError::EmptyRunnable);
        }

        Ok(Self { task, listener })
    }

    pub fn with_listener(task: TaskRef, listener: ListenerRef) -> Self {
        Self {
            task: Some(task),
            listener: Some(listener),
        }
    }

    /// A runnable with no work of its own, used to drive a listener through
    /// its begin/complete cycle.
    pub fn listener_only(listener: ListenerRef) -> Self {
        Self {
            task: None,
            listener: Some(listener),
        }
    }

    pub fn task(&self) -> Option<&TaskRef> {
        self.task.as_ref()
    }

    pub fn listener(&self) -> Option<&ListenerRef> {
        self.listener.as_ref()
    }

    pub(crate) fn name(&self) -> String {
        match &self.task {
            Some(task) => task.name().into_owned(),
            None => String::from("<listener>"),
        }
    }

    pub fn run(self) {
        let task = self.task.as_deref();

        if let Some(listener) = &self.listener {
            listener.on_begin(task);
        }

        let outcome = match task {
            Some(task) => execute_guarded(task),
            None => Ok(()),
        };

        match (outcome, &self.listener) {
            (Ok(()), Some(listener)) => listener.on_complete(task),
            (Err(error), Some(listener)) => listener.on_error(task, &error),
            (Ok(()), None) => {}
            (Err(error), None) => {
                tracing::error!(
                    task = %self.name(),
                    "task failed and no listener is attached: {error:#}"
                );
            }
        }
    }

    /// Reports `error` to the listener without executing the task.
    pub(crate) fn reject(self, error: &TaskError) {
        match &self.listener {
            Some(listener) => listener.on_error(self.task.as_deref(), error),
            None => tracing::warn!(task = %self.name(), "dropping task: {error}"),
        }
    }
}

fn execute_guarded(task: &dyn Task) -> Result<(), TaskError> {
    guarded(&task.name(), || task.execute())
}

/// Runs `f`, turning both its error and a panic into a [`TaskError`].
pub(crate) fn guarded<T>(name: &str, f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, TaskError> {
    // AssertUnwindSafe: a panicking body only poisons its own state, the
    // shared bookkeeping lives in the listeners which are not unwound.
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(TaskError::from),
        Err(panic) => Err(TaskError::msg(panic_message(name, panic.as_ref()))),
    }
}

pub(crate) fn panic_message(name: &str, panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s} ({name})")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s} ({name})")
    } else {
        format!("Task panicked with unknown payload ({name})")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Listener that records every callback it receives.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub events: Mutex<Vec<String>>,
    }

    impl Recorder {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.events()
                .iter()
                .filter(|e| e.starts_with(prefix))
                .count()
        }
    }

    impl TaskListener for Recorder {
        fn on_begin(&self, task: Option<&dyn Task>) {
            let name = task.map(|t| t.name().into_owned()).unwrap_or_default();
            self.events.lock().unwrap().push(format!("begin:{name}"));
        }

        fn on_complete(&self, task: Option<&dyn Task>) {
            let name = task.map(|t| t.name().into_owned()).unwrap_or_default();
            self.events.lock().unwrap().push(format!("complete:{name}"));
        }

        fn on_error(&self, task: Option<&dyn Task>, error: &TaskError) {
            let name = task.map(|t| t.name().into_owned()).unwrap_or_default();
            self.events
                .lock()
                .unwrap()
                .push(format!("error:{name}:{}", error.message()));
        }
    }

    #[test]
    fn test_runnable_requires_task_or_listener() {
        assert!(matches!(
            TaskRunnable::new(None, None),
            Err(EngineError::EmptyRunnable)
        ));
    }

    #[test]
    fn test_runnable_order_on_success() {
        let recorder = Arc::new(Recorder::default());
        let task = task_fn("ok", || Ok(()));

        TaskRunnable::with_listener(task, recorder.clone()).run();

        assert_eq!(recorder.events(), vec!["begin:ok", "complete:ok"]);
    }

    #[test]
    fn test_runnable_order_on_error() {
        let recorder = Arc::new(Recorder::default());
        let task = task_fn("bad", || Err(anyhow::anyhow!("nope")));

        TaskRunnable::with_listener(task, recorder.clone()).run();

        assert_eq!(recorder.events(), vec!["begin:bad", "error:bad:nope"]);
    }

    #[test]
    fn test_runnable_catches_panic() {
        let recorder = Arc::new(Recorder::default());
        let task = task_fn("panics", || panic!("kaboom"));

        TaskRunnable::with_listener(task, recorder.clone()).run();

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert!(events[1].starts_with("error:panics:Task panicked: kaboom"));
    }

    #[test]
    fn test_listener_only_completes() {
        let recorder = Arc::new(Recorder::default());
        TaskRunnable::listener_only(recorder.clone()).run();
        assert_eq!(recorder.events(), vec!["begin:", "complete:"]);
    }
}
