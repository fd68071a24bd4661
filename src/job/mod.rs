//! The job graph: components, their wiring and the rows they consume.

mod builder;
mod component;
mod row;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt::{self, Display};

pub use crate::job::builder::{AnalysisJob, Dependency, JobBuilder, JobDef, JobKind};
pub(crate) use crate::job::builder::{JobInfo, JobParts};
pub use crate::job::component::{
    Analyzer, Component, Filter, OutputRowCollector, OutputStreamSpec, RowCollector, Transformer,
};
pub(crate) use crate::job::component::RowSink;
pub use crate::job::row::{Record, Row, RowIdGenerator, RowSource, Value};

use crate::ArcStr;

/// Identity of one job within a run. Nested output stream jobs share the
/// numbering of their parent, so ids are unique across the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u32);

impl JobId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One category a filter may assign to a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterOutcome {
    pub filter: JobId,
    pub category: ArcStr,
}

impl FilterOutcome {
    pub fn new(filter: JobId, category: impl Into<ArcStr>) -> Self {
        Self {
            filter,
            category: category.into(),
        }
    }
}

impl Display for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.filter, self.category)
    }
}

/// Gate on upstream filter outcomes. Satisfied when any of the listed
/// outcomes was produced for the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    outcomes: Vec<FilterOutcome>,
}

impl Requirement {
    pub fn any(outcomes: impl IntoIterator<Item = FilterOutcome>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
        }
    }

    pub fn outcomes(&self) -> &[FilterOutcome] {
        &self.outcomes
    }

    pub fn is_satisfied(&self, produced: &[FilterOutcome]) -> bool {
        self.outcomes.iter().any(|o| produced.contains(o))
    }
}

impl From<FilterOutcome> for Requirement {
    fn from(outcome: FilterOutcome) -> Self {
        Self {
            outcomes: vec![outcome],
        }
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, outcome) in self.outcomes.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{outcome}")?;
        }
        Ok(())
    }
}

/// Handle to a registered filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterHandle(JobId);

impl FilterHandle {
    pub fn id(self) -> JobId {
        self.0
    }

    pub fn outcome(self, category: impl Into<ArcStr>) -> FilterOutcome {
        FilterOutcome::new(self.0, category)
    }
}

/// Handle to a registered transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformerHandle(JobId);

impl TransformerHandle {
    pub fn id(self) -> JobId {
        self.0
    }
}

/// Handle to a registered analyzer; its result is looked up by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnalyzerHandle(JobId);

impl AnalyzerHandle {
    pub fn id(self) -> JobId {
        self.0
    }
}

impl From<FilterHandle> for JobId {
    fn from(h: FilterHandle) -> Self {
        h.0
    }
}

impl From<TransformerHandle> for JobId {
    fn from(h: TransformerHandle) -> Self {
        h.0
    }
}

impl From<AnalyzerHandle> for JobId {
    fn from(h: AnalyzerHandle) -> Self {
        h.0
    }
}
