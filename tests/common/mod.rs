#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use datasieve::job::{OutputRowCollector, OutputStreamSpec};
use datasieve::result::{
    AnalyzerResultReducer, Crosstab, CrosstabDimension, CrosstabReducer, CrosstabResult,
    DIMENSION_MEASURE, Number,
};
use datasieve::{Analyzer, AnalyzerResult, AnalyzerResultRef, Filter, Row, RowCollector, Transformer, Value};

pub const ROW_COUNT: &str = "Row count";

pub fn text_rows(values: &[&str]) -> Vec<Vec<Value>> {
    values.iter().map(|v| vec![Value::from(*v)]).collect()
}

pub fn row_count(result: &AnalyzerResultRef) -> Option<Number> {
    result
        .downcast_ref::<CrosstabResult>()?
        .crosstab()
        .get(&[(DIMENSION_MEASURE, ROW_COUNT)])
}

/// `VALID` when the column holds the expected text.
pub struct Equals {
    pub column: &'static str,
    pub expected: &'static str,
}

impl Filter for Equals {
    fn categories(&self) -> Vec<String> {
        vec!["VALID".into(), "INVALID".into()]
    }

    fn categorize(&self, row: &Row) -> anyhow::Result<&str> {
        match row.get(self.column).and_then(Value::as_str) {
            Some(text) if text == self.expected => Ok("VALID"),
            _ => Ok("INVALID"),
        }
    }
}

pub struct Upper {
    pub input: &'static str,
}

impl Transformer for Upper {
    fn output_columns(&self) -> Vec<String> {
        vec![format!("{}_upper", self.input)]
    }

    fn transform(&self, row: &Row, out: &mut RowCollector) -> anyhow::Result<()> {
        let value = row
            .get(self.input)
            .and_then(Value::as_str)
            .map(|text| Value::from(text.to_uppercase()))
            .unwrap_or(Value::Null);
        out.put(vec![value]);
        Ok(())
    }
}

/// One row per whitespace separated token, in column `token`.
pub struct Tokenize {
    pub input: &'static str,
}

impl Transformer for Tokenize {
    fn output_columns(&self) -> Vec<String> {
        vec!["token".into()]
    }

    fn generates_rows(&self) -> bool {
        true
    }

    fn transform(&self, row: &Row, out: &mut RowCollector) -> anyhow::Result<()> {
        if let Some(text) = row.get(self.input).and_then(Value::as_str) {
            for token in text.split_whitespace() {
                out.put(vec![Value::from(token)]);
            }
        }
        Ok(())
    }
}

/// Counts rows, weighted by their distinct count.
#[derive(Default)]
pub struct Count {
    total: i64,
}

impl Analyzer for Count {
    fn run(&mut self, _: &Row, distinct_count: u32) -> anyhow::Result<()> {
        self.total += i64::from(distinct_count);
        Ok(())
    }

    fn result(&mut self) -> anyhow::Result<AnalyzerResultRef> {
        let mut crosstab = Crosstab::new(vec![CrosstabDimension::with_categories(
            DIMENSION_MEASURE,
            [ROW_COUNT],
        )])?;
        crosstab.put(&[(DIMENSION_MEASURE, ROW_COUNT)], self.total)?;
        Ok(Arc::new(CrosstabResult::new(crosstab)))
    }

    fn reducer(&self) -> Option<Arc<dyn AnalyzerResultReducer>> {
        Some(Arc::new(CrosstabReducer::new()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub values: Vec<Value>,
    pub ids: Vec<u64>,
}

impl AnalyzerResult for Collected {}

/// Keeps every value of a column together with the row id.
pub struct Collect {
    column: &'static str,
    values: Vec<Value>,
    ids: Vec<u64>,
}

impl Collect {
    pub fn new(column: &'static str) -> Self {
        Self {
            column,
            values: Vec::new(),
            ids: Vec::new(),
        }
    }
}

impl Analyzer for Collect {
    fn run(&mut self, row: &Row, _: u32) -> anyhow::Result<()> {
        self.values
            .push(row.get(self.column).cloned().unwrap_or(Value::Null));
        self.ids.push(row.id());
        Ok(())
    }

    fn result(&mut self) -> anyhow::Result<AnalyzerResultRef> {
        Ok(Arc::new(Collected {
            values: self.values.clone(),
            ids: self.ids.clone(),
        }))
    }
}

pub fn collected(result: Option<AnalyzerResultRef>) -> Collected {
    result
        .and_then(|result| result.downcast_ref::<Collected>().cloned())
        .expect("collect analyzer produced no result")
}

/// Republishes a column on the output stream `values`.
pub struct Publish {
    pub column: &'static str,
    pub out: Option<OutputRowCollector>,
}

impl Analyzer for Publish {
    fn run(&mut self, row: &Row, distinct_count: u32) -> anyhow::Result<()> {
        if let Some(out) = &self.out {
            let value = row.get(self.column).cloned().unwrap_or(Value::Null);
            out.put_weighted(vec![value], distinct_count)?;
        }
        Ok(())
    }

    fn result(&mut self) -> anyhow::Result<AnalyzerResultRef> {
        Count::default().result()
    }

    fn output_streams(&self) -> Vec<OutputStreamSpec> {
        vec![OutputStreamSpec::new("values", [self.column])]
    }

    fn attach_output_stream(&mut self, _: &str, collector: OutputRowCollector) -> anyhow::Result<()> {
        self.out = Some(collector);
        Ok(())
    }
}

/// Fails in the configured hooks and reports whether it was closed.
#[derive(Default)]
pub struct Failing {
    pub init: Option<&'static str>,
    pub run: Option<&'static str>,
    pub close: Option<&'static str>,
    pub panic: bool,
    pub closed: Arc<AtomicBool>,
}

impl Analyzer for Failing {
    fn init(&mut self) -> anyhow::Result<()> {
        match self.init {
            Some(message) => anyhow::bail!(message),
            None => Ok(()),
        }
    }

    fn run(&mut self, _: &Row, _: u32) -> anyhow::Result<()> {
        if self.panic {
            panic!("kaboom");
        }
        match self.run {
            Some(message) => anyhow::bail!(message),
            None => Ok(()),
        }
    }

    fn result(&mut self) -> anyhow::Result<AnalyzerResultRef> {
        Count::default().result()
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        match self.close {
            Some(message) => anyhow::bail!(message),
            None => Ok(()),
        }
    }
}
