use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::ArcStr;
use crate::concurrent::guarded;
use crate::error::{JobLabel, TaskError};
use crate::job::{
    Analyzer, Component, Filter, FilterOutcome, JobId, JobInfo, JobKind, OutputRowCollector, Row,
    RowCollector, RowSink, Transformer, Value,
};
use crate::result::AnalyzerResultRef;

/// Records emitted by a transformer for one row, with their distinct counts.
pub(crate) type Records = Vec<(Vec<Value>, u32)>;

enum Slot {
    Filter(RwLock<Box<dyn Filter>>),
    Transformer {
        component: RwLock<Box<dyn Transformer>>,
        generates_rows: bool,
    },
    Analyzer {
        component: Mutex<Box<dyn Analyzer>>,
        streams: Vec<(String, Arc<dyn RowSink>)>,
    },
}

/// A component wired into a run.
///
/// Filters and transformers are called concurrently through a shared lock,
/// analyzers one row at a time.
pub(crate) struct RowConsumer {
    info: JobInfo,
    slot: Slot,
    aborted: AtomicBool,
}

impl RowConsumer {
    pub fn new(info: JobInfo, component: Component, streams: Vec<(String, Arc<dyn RowSink>)>) -> Self {
        let slot = match component {
            Component::Filter(filter) => Slot::Filter(RwLock::new(filter)),
            Component::Transformer(transformer) => Slot::Transformer {
                generates_rows: transformer.generates_rows(),
                component: RwLock::new(transformer),
            },
            Component::Analyzer(analyzer) => Slot::Analyzer {
                component: Mutex::new(analyzer),
                streams,
            },
        };

        Self {
            info,
            slot,
            aborted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> JobId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn kind(&self) -> JobKind {
        self.info.kind
    }

    pub fn label(&self) -> JobLabel {
        self.info.label()
    }

    pub fn outputs(&self) -> &[ArcStr] {
        &self.info.outputs
    }

    pub fn generates_rows(&self) -> bool {
        matches!(self.slot, Slot::Transformer { generates_rows: true, .. })
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Returns whether this call did the aborting.
    pub fn abort(&self) -> bool {
        !self.aborted.swap(true, Ordering::AcqRel)
    }

    /// Every input column is present and the requirement, if any, holds.
    pub fn accepts(&self, row: &Row, outcomes: &[FilterOutcome]) -> bool {
        self.info.inputs.iter().all(|column| row.contains(column))
            && self
                .info
                .requirement
                .as_ref()
                .is_none_or(|requirement| requirement.is_satisfied(outcomes))
    }

    pub fn initialize(&self) -> Result<(), TaskError> {
        guarded(self.name(), || match &self.slot {
            Slot::Filter(filter) => write(filter).init(),
            Slot::Transformer { component, .. } => write(component).init(),
            Slot::Analyzer { component, streams } => {
                let mut analyzer = component.lock().unwrap_or_else(PoisonError::into_inner);
                for (stream, sink) in streams {
                    analyzer.attach_output_stream(stream, OutputRowCollector::new(sink.clone()))?;
                }
                analyzer.init()
            }
        })
    }

    pub fn categorize(&self, row: &Row) -> Result<Option<FilterOutcome>, TaskError> {
        let Slot::Filter(filter) = &self.slot else {
            return Ok(None);
        };

        guarded(self.name(), || {
            let filter = filter.read().unwrap_or_else(PoisonError::into_inner);
            let category = filter.categorize(row)?;

            let declared = self
                .info
                .categories
                .iter()
                .find(|c| &***c == category)
                .ok_or_else(|| anyhow::anyhow!("undeclared category '{category}'"))?;

            Ok(Some(FilterOutcome::new(self.id(), declared.clone())))
        })
    }

    pub fn transform(&self, row: &Row) -> Result<Records, TaskError> {
        let Slot::Transformer { component, .. } = &self.slot else {
            return Ok(Vec::new());
        };

        guarded(self.name(), || {
            let mut out = RowCollector::new(row.distinct_count());
            component
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .transform(row, &mut out)?;
            Ok(out.into_records())
        })
    }

    pub fn run(&self, row: &Row) -> Result<(), TaskError> {
        let Slot::Analyzer { component, .. } = &self.slot else {
            return Ok(());
        };

        let mut analyzer = component.lock().unwrap_or_else(PoisonError::into_inner);
        guarded(self.name(), || analyzer.run(row, row.distinct_count()))
    }

    /// `None` for filters and transformers.
    pub fn result(&self) -> Result<Option<AnalyzerResultRef>, TaskError> {
        let Slot::Analyzer { component, .. } = &self.slot else {
            return Ok(None);
        };

        let mut analyzer = component.lock().unwrap_or_else(PoisonError::into_inner);
        guarded(self.name(), || analyzer.result().map(Some))
    }

    pub fn close(&self) -> Result<(), TaskError> {
        guarded(self.name(), || match &self.slot {
            Slot::Filter(filter) => write(filter).close(),
            Slot::Transformer { component, .. } => write(component).close(),
            Slot::Analyzer { component, .. } => {
                component.lock().unwrap_or_else(PoisonError::into_inner).close()
            }
        })
    }
}

fn write<T: ?Sized>(lock: &RwLock<Box<T>>) -> std::sync::RwLockWriteGuard<'_, Box<T>> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
