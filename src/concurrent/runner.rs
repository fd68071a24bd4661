use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rayon::{ThreadPool, ThreadPoolBuilder, Yield};

use crate::concurrent::{ListenerRef, TaskRef, TaskRunnable};
use crate::error::{EngineError, TaskError};

/// Executes runnables, possibly on other threads.
pub trait TaskRunner: Send + Sync {
    /// Schedules the runnable. Never blocks on its completion.
    fn run(&self, runnable: TaskRunnable);

    fn run_task(&self, task: TaskRef, listener: Option<ListenerRef>) {
        self.run(TaskRunnable {
            task: Some(task),
            listener,
        });
    }

    /// Lets a waiting caller do some queued work instead of idling. Returns
    /// whether anything was executed.
    fn assist_execution(&self) -> bool;

    /// Stops accepting work. Later submissions are rejected through their
    /// listener with [`EngineError::RunnerShutdown`].
    fn shutdown(&self);
}

pub type RunnerRef = Arc<dyn TaskRunner>;

fn shutdown_error() -> TaskError {
    TaskError::new(EngineError::RunnerShutdown)
}

/// Runner backed by a dedicated rayon pool.
pub struct MultiThreadedTaskRunner {
    pool: RwLock<Option<Arc<ThreadPool>>>,
}

impl MultiThreadedTaskRunner {
    pub fn new(threads: Option<usize>, thread_name: &str) -> Result<Self, EngineError> {
        let prefix = thread_name.to_string();
        let mut builder = ThreadPoolBuilder::new()
            .thread_name(move |i| format!("{prefix}-{i}"))
            .panic_handler(|panic| {
                let message = crate::concurrent::panic_message("worker", panic.as_ref());
                tracing::error!("{message}");
            });

        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }

        let pool = builder.build()?;
        tracing::debug!(threads = pool.current_num_threads(), "task runner started");

        Ok(Self {
            pool: RwLock::new(Some(Arc::new(pool))),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool()
            .map(|pool| pool.current_num_threads())
            .unwrap_or(0)
    }

    fn pool(&self) -> Option<Arc<ThreadPool>> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TaskRunner for MultiThreadedTaskRunner {
    fn run(&self, runnable: TaskRunnable) {
        match self.pool() {
            Some(pool) => pool.spawn(move || runnable.run()),
            None => runnable.reject(&shutdown_error()),
        }
    }

    fn assist_execution(&self) -> bool {
        if let Some(pool) = self.pool() {
            // Only effective when called from one of the pool's own threads.
            if let Some(Yield::Executed) = pool.yield_now() {
                return true;
            }
        }

        std::thread::yield_now();
        false
    }

    fn shutdown(&self) {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if pool.is_some() {
            tracing::debug!("task runner shut down");
        }
    }
}

/// Runner that executes on the calling thread.
///
/// In immediate mode each runnable runs inside [`TaskRunner::run`]. In queued
/// mode runnables are kept until [`TaskRunner::assist_execution`] or
/// [`SingleThreadedTaskRunner::drain`] picks them up.
pub struct SingleThreadedTaskRunner {
    queue: Option<Mutex<VecDeque<TaskRunnable>>>,
    shutdown: AtomicBool,
}

impl SingleThreadedTaskRunner {
    pub fn new() -> Self {
        Self {
            queue: None,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn queued() -> Self {
        Self {
            queue: Some(Mutex::new(VecDeque::new())),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn pending(&self) -> usize {
        match &self.queue {
            Some(queue) => queue.lock().unwrap_or_else(PoisonError::into_inner).len(),
            None => 0,
        }
    }

    /// Runs queued work until the queue is empty, including work enqueued
    /// while draining.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while self.assist_execution() {
            count += 1;
        }
        count
    }
}

impl Default for SingleThreadedTaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner for SingleThreadedTaskRunner {
    fn run(&self, runnable: TaskRunnable) {
        if self.shutdown.load(Ordering::Acquire) {
            runnable.reject(&shutdown_error());
            return;
        }

        match &self.queue {
            Some(queue) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(runnable),
            None => runnable.run(),
        }
    }

    fn assist_execution(&self) -> bool {
        let Some(queue) = &self.queue else {
            return false;
        };

        // Lock released before running, the runnable may enqueue more work.
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(runnable) => {
                runnable.run();
                true
            }
            None => false,
        }
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
