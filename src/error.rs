use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use thiserror::Error;

use crate::job::JobId;

/// A failure raised by a task body or a component hook.
///
/// Cheap to clone, so that a single failure can be handed to every listener
/// of a fork without losing its identity.
#[derive(Clone)]
pub struct TaskError(Arc<anyhow::Error>);

impl TaskError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self::from(err.into())
    }

    pub fn msg(message: impl Display + Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Top-level message of the underlying error, without its cause chain.
    pub fn message(&self) -> String {
        self.0.to_string()
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Whether both handles point at the very same failure.
    pub fn same(&self, other: &TaskError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Unwraps a `TaskError` that travelled through `anyhow`, keeping its identity.
impl From<anyhow::Error> for TaskError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<TaskError>() {
            Ok(inner) => inner,
            Err(e) => TaskError(Arc::new(e)),
        }
    }
}

impl Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

impl Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        (**self.0).source()
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Job graph contains a cycle through '{0}'")]
    Cycle(String),

    #[error("Job '{job}' reads column '{column}' which no source or transformer provides")]
    UnknownColumn { job: String, column: String },

    #[error("Column '{0}' is produced more than once")]
    DuplicateColumn(String),

    #[error("Job '{job}' has an invalid requirement: {reason}")]
    InvalidRequirement { job: String, reason: String },

    #[error("Job '{job}' has no output stream named '{stream}'")]
    UnknownOutputStream { job: String, stream: String },

    #[error("Output stream '{stream}' of job '{job}' has more than one job attached")]
    DuplicateOutputStream { job: String, stream: String },

    #[error("Job {0} is not part of this analysis job")]
    UnknownJob(JobId),

    #[error("Analysis job has no components")]
    EmptyJob,

    #[error("Row source does not provide column '{0}'")]
    MissingSourceColumn(String),

    #[error("A task runnable needs a task or a listener")]
    EmptyRunnable,

    #[error("Task runner has been shut down")]
    RunnerShutdown,

    #[error("Failed to build the worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Rows generated from a single source row nested deeper than {0} levels")]
    RowDepthExceeded(usize),

    #[error("Job '{0}' declares no result reducer and cannot be distributed")]
    NotDistributable(String),

    #[error("Distributed run needs at least one partition")]
    NoPartitions,

    #[error("Record holds {found} values for {expected} columns")]
    RecordWidth { expected: usize, found: usize },

    #[error("Row handler has already been closed")]
    HandlerClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't parse engine configuration.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid engine configuration: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CrosstabError {
    #[error("Crosstab has no dimension named '{0}'")]
    UnknownDimension(String),

    #[error("Dimension '{0}' is declared twice")]
    DuplicateDimension(String),

    #[error("Cell address covers {found} of {expected} dimensions")]
    IncompleteAddress { expected: usize, found: usize },

    #[error("Sum of cell ({0}) overflows")]
    Overflow(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReduceError {
    #[error("Nothing to reduce")]
    Empty,

    #[error("Dimension '{dimension}' has incompatible categories {found:?}, already established as {established:?}")]
    IncompatibleDimension {
        dimension: String,
        established: Vec<String>,
        found: Vec<String>,
    },

    #[error("Partial crosstab holds cells but lacks dimension '{0}'")]
    MissingDimension(String),

    #[error("Value combination crosstab lacks the '{0}' category")]
    MissingCategory(&'static str),

    #[error("Expected a partial result of type {0}")]
    UnexpectedResultType(&'static str),

    #[error(transparent)]
    Crosstab(#[from] CrosstabError),
}

/// The part of a run in which a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Initialize,
    Source,
    Consume,
    Result,
    Close,
    Reduce,
    Runner,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initialize => "initialize",
            Phase::Source => "source",
            Phase::Consume => "consume",
            Phase::Result => "result",
            Phase::Close => "close",
            Phase::Reduce => "reduce",
            Phase::Runner => "runner",
        };
        f.write_str(name)
    }
}

/// Identity of a job as reported in failures and results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobLabel {
    pub id: JobId,
    pub name: Arc<str>,
}

impl Display for JobLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.name, self.id)
    }
}

/// A primary failure together with the cleanup failures it caused.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub job: Option<JobLabel>,
    pub phase: Phase,
    pub error: TaskError,
    pub suppressed: Vec<JobFailure>,
}

impl JobFailure {
    pub fn new(job: Option<JobLabel>, phase: Phase, error: TaskError) -> Self {
        Self {
            job,
            phase,
            error,
            suppressed: Vec::new(),
        }
    }

    pub fn message(&self) -> String {
        self.error.message()
    }

    pub(crate) fn mentions(&self, error: &TaskError) -> bool {
        self.error.same(error) || self.suppressed.iter().any(|s| s.mentions(error))
    }
}

impl Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.job {
            Some(job) => write!(f, "[{}] job {}: {:#}", self.phase, job, self.error)?,
            None => write!(f, "[{}] {:#}", self.phase, self.error)?,
        }

        for suppressed in &self.suppressed {
            write!(f, "\n  suppressed: {suppressed}")?;
        }

        Ok(())
    }
}

impl std::error::Error for JobFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
