use std::sync::Arc;

use crate::concurrent::Task;
use crate::error::TaskError;

/// Observer of a single task execution.
///
/// The task is `None` when the runnable carried only a listener, which is how
/// join and fork points are driven without doing any work of their own.
pub trait TaskListener: Send + Sync {
    fn on_begin(&self, _task: Option<&dyn Task>) {}

    fn on_complete(&self, task: Option<&dyn Task>);

    fn on_error(&self, task: Option<&dyn Task>, error: &TaskError);
}

pub type ListenerRef = Arc<dyn TaskListener>;
