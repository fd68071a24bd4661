#![forbid(unsafe_code)]
//! Job execution engine for tabular data profiling.
//!
//! An [`AnalysisJob`] is a graph of filters, transformers and analyzers fed
//! by the columns of a [`RowSource`]. Running it with an [`AnalysisRunner`]
//! pushes every row through the graph on a [`TaskRunner`] and yields an
//! [`AnalysisResultFuture`] holding one result per analyzer, or the ordered
//! list of failures observed along the way.
//!
//! ```rust,ignore
//! let mut builder = JobBuilder::new(["name"]);
//! let valid = builder.filter(NotNull).input("name").register();
//! let names = builder
//!     .analyzer(ValueDistribution::default())
//!     .input("name")
//!     .requires(valid.outcome("VALID"))
//!     .register();
//!
//! let runner = AnalysisRunner::new(EngineConfig::default())?;
//! let future = runner.run(builder.build()?, source)?;
//! let distribution = future.result(names);
//! ```
//!
//! Partial results of partitioned runs are merged by the reducers in
//! [`result`], most notably [`CrosstabReducer`].

pub mod concurrent;
mod config;
mod engine;
mod error;
pub mod job;
pub mod result;
mod utils;

use std::sync::Arc;

pub use crate::concurrent::{
    ForkTaskListener, JoinTaskListener, ListenerRef, MultiThreadedTaskRunner, RunNextTaskListener,
    RunnerRef, SingleThreadedTaskRunner, Task, TaskListener, TaskRef, TaskRunnable, TaskRunner,
};
pub use crate::config::EngineConfig;
pub use crate::engine::{
    AnalysisEvent, AnalysisResult, AnalysisResultFuture, AnalysisRunner, ConsumeRowHandler,
    ConsumeRowOptions, ConsumeRowResult, DistributedAnalysisRunner, JobResult, JobStatus,
    PROGRESS_INTERVAL,
};
pub use crate::error::*;
pub use crate::job::{
    AnalysisJob, Analyzer, Filter, JobBuilder, JobId, Record, Row, RowCollector, RowSource,
    Transformer, Value,
};
pub use crate::result::{AnalyzerResult, AnalyzerResultRef, CrosstabReducer, CrosstabResult};

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

/// Shared immutable string, used for column and job names.
pub(crate) type ArcStr = Arc<str>;
