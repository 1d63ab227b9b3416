//! Tunable thresholds and session options.
//!
//! Loaded from a YAML file (`--config`) and overridden by command-line flags.
//!
//! ```yaml
//! thresholds:
//!   sparse_null_ratio: 0.8
//!   variance_spread: 2
//!   coercion_confidence: 0.9
//! delimiter: ","
//! preview_rows: 10
//! candidates: [double-quote, single-quote]
//! ```

use crate::dialect::{self, DialectCandidate};
use crate::error::{CleanError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// A trailing column is sparse when its NULL fraction is at least this.
    pub sparse_null_ratio: f64,
    /// Minimum spread between the most and least populated row widths.
    pub variance_spread: usize,
    /// Fraction of values that must parse before a type coercion is suggested.
    pub coercion_confidence: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            sparse_null_ratio: 0.8,
            variance_spread: 2,
            coercion_confidence: 0.9,
        }
    }
}

/// Complete configuration for a cleaning session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub thresholds: Thresholds,
    /// Field delimiter used for loading and exporting
    pub delimiter: char,
    /// Load every column as text
    pub all_varchar: bool,
    /// Dialect candidate names, in probe order. Empty means all built-ins.
    pub candidates: Vec<String>,
    /// Rows shown before/after in a preview
    pub preview_rows: usize,
    /// DuckDB memory limit, e.g. "2GB"
    pub memory_limit: Option<String>,
    /// Back the session with an on-disk database instead of memory
    pub disk_mode: bool,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            delimiter: ',',
            all_varchar: true,
            candidates: Vec::new(),
            preview_rows: 10,
            memory_limit: None,
            disk_mode: false,
        }
    }
}

impl CleanConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: CleanConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if !(t.sparse_null_ratio > 0.0 && t.sparse_null_ratio <= 1.0) {
            return Err(CleanError::Config(format!(
                "sparse_null_ratio must be in (0, 1], got {}",
                t.sparse_null_ratio
            )));
        }
        if !(t.coercion_confidence > 0.0 && t.coercion_confidence <= 1.0) {
            return Err(CleanError::Config(format!(
                "coercion_confidence must be in (0, 1], got {}",
                t.coercion_confidence
            )));
        }
        if t.variance_spread == 0 {
            return Err(CleanError::Config(
                "variance_spread must be at least 1".to_string(),
            ));
        }
        if self.delimiter == '\n' || self.delimiter == '\r' || self.delimiter == '"' {
            return Err(CleanError::Config(format!(
                "delimiter {:?} cannot be used",
                self.delimiter
            )));
        }
        if self.preview_rows == 0 {
            return Err(CleanError::Config(
                "preview_rows must be at least 1".to_string(),
            ));
        }
        self.dialect_candidates()?;
        Ok(())
    }

    /// Resolve the configured candidate names against the built-in list.
    pub fn dialect_candidates(&self) -> Result<Vec<DialectCandidate>> {
        let builtin = dialect::default_candidates();
        if self.candidates.is_empty() {
            return Ok(builtin);
        }
        self.candidates
            .iter()
            .map(|name| {
                builtin
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .cloned()
                    .ok_or_else(|| {
                        CleanError::Config(format!(
                            "Unknown dialect candidate: {}. Valid: {}",
                            name,
                            builtin
                                .iter()
                                .map(|c| c.name)
                                .collect::<Vec<_>>()
                                .join(", ")
                        ))
                    })
            })
            .collect()
    }
}
