use std::fmt;
use std::sync::Arc;

use crate::job::{Row, Value};
use crate::result::{AnalyzerResultReducer, AnalyzerResultRef};

/// Categorizes every row into exactly one of its declared categories.
pub trait Filter: Send + Sync {
    fn categories(&self) -> Vec<String>;

    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn categorize(&self, row: &Row) -> anyhow::Result<&str>;

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Derives new column values from a row.
///
/// A plain transformer puts at most one record into the collector and its
/// values are appended to the row. A transformer that
/// [generates rows](Transformer::generates_rows) may put any number of
/// records; each becomes a new row with a fresh id that continues through
/// the pipeline on its own.
pub trait Transformer: Send + Sync {
    fn output_columns(&self) -> Vec<String>;

    fn generates_rows(&self) -> bool {
        false
    }

    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn transform(&self, row: &Row, out: &mut RowCollector) -> anyhow::Result<()>;

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Accumulates state across rows and yields one result at the end.
///
/// Calls into a single analyzer instance are always serialized, so
/// implementations may keep plain mutable state.
pub trait Analyzer: Send {
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn run(&mut self, row: &Row, distinct_count: u32) -> anyhow::Result<()>;

    fn result(&mut self) -> anyhow::Result<AnalyzerResultRef>;

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Reducer able to merge partial results of this analyzer. `None` means
    /// the analyzer cannot be distributed.
    fn reducer(&self) -> Option<Arc<dyn AnalyzerResultReducer>> {
        None
    }

    fn output_streams(&self) -> Vec<OutputStreamSpec> {
        Vec::new()
    }

    /// Called during initialization for every declared stream that has a
    /// job attached to it.
    fn attach_output_stream(
        &mut self,
        stream: &str,
        _collector: OutputRowCollector,
    ) -> anyhow::Result<()> {
        anyhow::bail!("analyzer does not publish output stream '{stream}'")
    }
}

pub enum Component {
    Filter(Box<dyn Filter>),
    Transformer(Box<dyn Transformer>),
    Analyzer(Box<dyn Analyzer>),
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Filter(_) => f.write_str("Filter"),
            Component::Transformer(_) => f.write_str("Transformer"),
            Component::Analyzer(_) => f.write_str("Analyzer"),
        }
    }
}

/// Collects the records a transformer emits for one input row.
#[derive(Debug)]
pub struct RowCollector {
    distinct_count: u32,
    records: Vec<(Vec<Value>, u32)>,
}

impl RowCollector {
    pub(crate) fn new(distinct_count: u32) -> Self {
        Self {
            distinct_count,
            records: Vec::new(),
        }
    }

    /// Emits a record with the distinct count of the input row.
    pub fn put(&mut self, values: Vec<Value>) {
        self.records.push((values, self.distinct_count));
    }

    pub fn put_weighted(&mut self, values: Vec<Value>, distinct_count: u32) {
        self.records.push((values, distinct_count));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn into_records(self) -> Vec<(Vec<Value>, u32)> {
        self.records
    }
}

/// A named stream of rows an analyzer can publish to a nested job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputStreamSpec {
    pub name: String,
    pub columns: Vec<String>,
}

impl OutputStreamSpec {
    pub fn new<I, C>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

pub(crate) trait RowSink: Send + Sync {
    fn push(&self, values: Vec<Value>, distinct_count: u32) -> anyhow::Result<()>;
}

/// Feeds rows into the job attached to an output stream. The rows are
/// consumed before [`OutputRowCollector::put`] returns.
#[derive(Clone)]
pub struct OutputRowCollector {
    sink: Arc<dyn RowSink>,
}

impl OutputRowCollector {
    pub(crate) fn new(sink: Arc<dyn RowSink>) -> Self {
        Self { sink }
    }

    /// Values are given in the order of the stream's declared columns.
    pub fn put(&self, values: Vec<Value>) -> anyhow::Result<()> {
        self.sink.push(values, 1)
    }

    pub fn put_weighted(&self, values: Vec<Value>, distinct_count: u32) -> anyhow::Result<()> {
        self.sink.push(values, distinct_count)
    }
}

impl fmt::Debug for OutputRowCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutputRowCollector")
    }
}
