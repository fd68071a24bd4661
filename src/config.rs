use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings of an [`AnalysisRunner`](crate::AnalysisRunner).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```json
/// { "threads": 4, "progress": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads, `None` for one per CPU.
    pub threads: Option<usize>,
    /// Prefix of worker thread names.
    pub thread_name: String,
    /// Upper bound on rows handed to the runner but not yet consumed.
    pub max_pending_rows: usize,
    /// How deep rows generated from rows may nest.
    pub max_row_depth: usize,
    /// Attach a progress bar to row processing.
    pub progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: None,
            thread_name: String::from("datasieve-worker"),
            max_pending_rows: 1024,
            max_row_depth: 64,
            progress: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be at least 1"));
        }
        if self.max_pending_rows == 0 {
            return Err(ConfigError::Invalid("max_pending_rows must be at least 1"));
        }
        Ok(())
    }
}
