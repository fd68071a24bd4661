use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::ArcStr;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("<null>"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A row flowing through the pipeline.
///
/// Rows only grow: transformers append their output columns, and a row is
/// never handed to two threads while it is still being extended.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: u64,
    distinct_count: u32,
    cells: Vec<(ArcStr, Value)>,
}

impl Row {
    pub(crate) fn new(id: u64, distinct_count: u32, cells: Vec<(ArcStr, Value)>) -> Self {
        Self {
            id,
            distinct_count,
            cells,
        }
    }

    /// Unique within one run, generated rows included.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// How many identical physical records this row stands for.
    pub fn distinct_count(&self) -> u32 {
        self.distinct_count
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| &**name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.cells.iter().any(|(name, _)| &**name == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| &**name)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.cells.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub(crate) fn append(&mut self, column: ArcStr, value: Value) {
        self.cells.push((column, value));
    }

    /// Copy of this row under a new identity.
    pub(crate) fn derive(&self, id: u64, distinct_count: u32) -> Row {
        Row {
            id,
            distinct_count,
            cells: self.cells.clone(),
        }
    }
}

/// Hands out row ids for one run, nested streams included.
#[derive(Debug, Default)]
pub struct RowIdGenerator {
    next: AtomicU64,
}

impl RowIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// One physical record produced by a source, before it becomes a [`Row`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<Value>,
    pub distinct_count: u32,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            distinct_count: 1,
        }
    }

    pub fn weighted(values: Vec<Value>, distinct_count: u32) -> Self {
        Self {
            values,
            distinct_count,
        }
    }
}

type Records = Box<dyn Iterator<Item = anyhow::Result<Record>> + Send>;

/// The rows of one table, as handed to the engine by a datastore adapter.
pub struct RowSource {
    columns: Vec<ArcStr>,
    records: Records,
}

impl RowSource {
    pub fn new<I, C>(columns: I, records: impl Iterator<Item = anyhow::Result<Record>> + Send + 'static) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ArcStr>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            records: Box::new(records),
        }
    }

    /// In-memory source, each record with a distinct count of one.
    pub fn from_values<I, C>(columns: I, rows: Vec<Vec<Value>>) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ArcStr>,
    {
        Self::new(columns, rows.into_iter().map(|values| Ok(Record::new(values))))
    }

    pub fn columns(&self) -> &[ArcStr] {
        &self.columns
    }

    pub(crate) fn into_parts(self) -> (Vec<ArcStr>, Records) {
        (self.columns, self.records)
    }
}

impl fmt::Debug for RowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSource")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}
