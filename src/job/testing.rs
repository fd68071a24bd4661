//! Small components shared by the unit tests.

use std::sync::Arc;

use crate::job::{
    Analyzer, Filter, OutputRowCollector, OutputStreamSpec, Row, RowCollector, Transformer, Value,
};
use crate::result::{AnalyzerResult, AnalyzerResultRef};

/// `VALID` when the column holds the expected value, `INVALID` otherwise.
pub(crate) struct Equals {
    column: String,
    expected: Value,
}

impl Equals {
    pub fn new(column: &str, expected: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            expected: expected.into(),
        }
    }
}

impl Filter for Equals {
    fn categories(&self) -> Vec<String> {
        vec!["VALID".into(), "INVALID".into()]
    }

    fn categorize(&self, row: &Row) -> anyhow::Result<&str> {
        match row.get(&self.column) {
            Some(value) if *value == self.expected => Ok("VALID"),
            _ => Ok("INVALID"),
        }
    }
}

/// Appends `<input>_upper`.
pub(crate) struct Upper {
    input: String,
}

impl Upper {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
        }
    }
}

impl Transformer for Upper {
    fn output_columns(&self) -> Vec<String> {
        vec![format!("{}_upper", self.input)]
    }

    fn transform(&self, row: &Row, out: &mut RowCollector) -> anyhow::Result<()> {
        let value = match row.get(&self.input) {
            Some(Value::Text(text)) => Value::Text(text.to_uppercase()),
            _ => Value::Null,
        };
        out.put(vec![value]);
        Ok(())
    }
}

/// One generated row per whitespace separated token, in column `token`.
pub(crate) struct Split {
    input: String,
}

impl Split {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
        }
    }
}

impl Transformer for Split {
    fn output_columns(&self) -> Vec<String> {
        vec!["token".into()]
    }

    fn generates_rows(&self) -> bool {
        true
    }

    fn transform(&self, row: &Row, out: &mut RowCollector) -> anyhow::Result<()> {
        if let Some(text) = row.get(&self.input).and_then(Value::as_str) {
            for token in text.split_whitespace() {
                out.put(vec![token.into()]);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Collected {
    pub values: Vec<Value>,
    pub ids: Vec<u64>,
}

impl AnalyzerResult for Collected {}

/// Records every value of one column, with the ids of the rows.
pub(crate) struct Collect {
    column: String,
    values: Vec<Value>,
    ids: Vec<u64>,
}

impl Collect {
    pub fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
            values: Vec::new(),
            ids: Vec::new(),
        }
    }
}

impl Analyzer for Collect {
    fn run(&mut self, row: &Row, _: u32) -> anyhow::Result<()> {
        self.values
            .push(row.get(&self.column).cloned().unwrap_or(Value::Null));
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

/// Republishes one column on the output stream `rows`.
pub(crate) struct Publish {
    column: String,
    out: Option<OutputRowCollector>,
}

impl Publish {
    pub fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
            out: None,
        }
    }
}

impl Analyzer for Publish {
    fn run(&mut self, row: &Row, distinct_count: u32) -> anyhow::Result<()> {
        if let Some(out) = &self.out {
            let value = row.get(&self.column).cloned().unwrap_or(Value::Null);
            out.put_weighted(vec![value], distinct_count)?;
        }
        Ok(())
    }

    fn result(&mut self) -> anyhow::Result<AnalyzerResultRef> {
        Ok(Arc::new(Collected {
            values: Vec::new(),
            ids: Vec::new(),
        }))
    }

    fn output_streams(&self) -> Vec<OutputStreamSpec> {
        vec![OutputStreamSpec::new("rows", [self.column.clone()])]
    }

    fn attach_output_stream(&mut self, stream: &str, collector: OutputRowCollector) -> anyhow::Result<()> {
        anyhow::ensure!(stream == "rows", "unknown stream '{stream}'");
        self.out = Some(collector);
        Ok(())
    }
}

/// Analyzer failing in the configured hooks.
#[derive(Default)]
pub(crate) struct Failing {
    pub init: Option<&'static str>,
    pub run: Option<&'static str>,
    pub close: Option<&'static str>,
}

impl Analyzer for Failing {
    fn init(&mut self) -> anyhow::Result<()> {
        match self.init {
            Some(message) => anyhow::bail!(message),
            None => Ok(()),
        }
    }

    fn run(&mut self, _: &Row, _: u32) -> anyhow::Result<()> {
        match self.run {
            Some(message) => anyhow::bail!(message),
            None => Ok(()),
        }
    }

    fn result(&mut self) -> anyhow::Result<AnalyzerResultRef> {
        Ok(Arc::new(Collected {
            values: Vec::new(),
            ids: Vec::new(),
        }))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        match self.close {
            Some(message) => anyhow::bail!(message),
            None => Ok(()),
        }
    }
}
