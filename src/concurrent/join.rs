use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::concurrent::{ListenerRef, Task, TaskListener};
use crate::error::TaskError;

/// Fires `next` once `count` observed tasks have finished, whichever way.
///
/// If any of them failed, `next` receives the first recorded error instead of
/// a completion.
pub struct JoinTaskListener {
    remaining: AtomicUsize,
    error: Mutex<Option<TaskError>>,
    next: ListenerRef,
}

impl JoinTaskListener {
    pub fn new(count: usize, next: ListenerRef) -> Arc<Self> {
        let join = Arc::new(Self {
            remaining: AtomicUsize::new(count),
            error: Mutex::new(None),
            next,
        });

        if count == 0 {
            join.next.on_complete(None);
        }

        join
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    fn count_down(&self) {
        let result = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match result {
            Ok(1) => self.fire(),
            Ok(_) => {}
            Err(_) => tracing::warn!("join signalled more often than it was sized for"),
        }
    }

    fn fire(&self) {
        let error = self
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match error {
            Some(error) => self.next.on_error(None, &error),
            None => self.next.on_complete(None),
        }
    }
}

impl TaskListener for JoinTaskListener {
    fn on_complete(&self, _: Option<&dyn Task>) {
        self.count_down();
    }

    fn on_error(&self, _: Option<&dyn Task>, error: &TaskError) {
        {
            let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(error.clone());
            }
        }
        self.count_down();
    }
}
