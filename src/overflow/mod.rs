//! Column-overflow detection.
//!
//! Overflow happens when an unquoted delimiter inside a field pushes the rest
//! of the row into extra trailing columns. Three independent indicators are
//! collected:
//!
//! - **Sequential sparsity**: a run of trailing columns that are mostly NULL.
//! - **Row value variance**: rows differ widely in how many cells are filled.
//! - **Placeholder naming**: columns named like `column5`, `unnamed_2`, `field_3`.
//!
//! Overflow is declared when two indicators fire, or when variance fires on
//! its own. The detector never mutates the table.

pub mod repair;
pub mod tokenizer;

pub use repair::{repair, RepairContext, RepairMode, RepairReport, SchemaHint};

use crate::config::Thresholds;
use crate::engine::{Ident, QueryEngine};
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

static PLACEHOLDER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(column_?\d+|unnamed[_:]?\d*|field_?\d+|_\d+)$").unwrap()
});

/// Which structural signal an indicator records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    SequentialSparsity,
    RowValueVariance,
    OverflowColumnNaming,
}

/// Number of rows having a given count of non-null cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct RowWidth {
    pub non_null_count: u64,
    pub row_count: u64,
}

/// One fired indicator and its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, schemars::JsonSchema)]
pub struct Indicator {
    pub kind: IndicatorKind,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub distribution: Vec<RowWidth>,
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Serialize, schemars::JsonSchema)]
pub struct OverflowFinding {
    pub detected: bool,
    pub indicators: Vec<Indicator>,
    pub overflow_columns: Vec<String>,
    pub suspected_anchor_column: Option<String>,
    pub total_columns: usize,
    pub total_rows: u64,
}

impl OverflowFinding {
    pub fn indicator(&self, kind: IndicatorKind) -> Option<&Indicator> {
        self.indicators.iter().find(|i| i.kind == kind)
    }

    pub fn has(&self, kind: IndicatorKind) -> bool {
        self.indicator(kind).is_some()
    }

    /// Columns in the trailing sparsity run.
    pub fn sparse_run(&self) -> &[String] {
        self.indicator(IndicatorKind::SequentialSparsity)
            .map(|i| i.columns.as_slice())
            .unwrap_or(&[])
    }
}

/// Length of the trailing run of columns whose NULL count is at least
/// `ratio * total_rows`. An empty table has no run.
pub fn trailing_sparse_run(null_counts: &[u64], total_rows: u64, ratio: f64) -> usize {
    if total_rows == 0 {
        return 0;
    }
    let threshold = total_rows as f64 * ratio;
    null_counts
        .iter()
        .rev()
        .take_while(|&&nulls| nulls as f64 >= threshold)
        .count()
}

/// `(min, max)` non-null widths, when more than one width occurs.
pub fn value_count_spread(distribution: &[RowWidth]) -> Option<(u64, u64)> {
    if distribution.len() < 2 {
        return None;
    }
    let min = distribution.iter().map(|w| w.non_null_count).min()?;
    let max = distribution.iter().map(|w| w.non_null_count).max()?;
    Some((min, max))
}

/// Columns whose names look auto-generated.
pub fn placeholder_columns<S: AsRef<str>>(columns: &[S]) -> Vec<String> {
    columns
        .iter()
        .map(|c| c.as_ref())
        .filter(|c| PLACEHOLDER_NAME.is_match(c))
        .map(str::to_string)
        .collect()
}

/// Two indicators, or variance alone.
pub fn decide(indicators: &[Indicator]) -> bool {
    indicators.len() >= 2
        || (indicators.len() == 1 && indicators[0].kind == IndicatorKind::RowValueVariance)
}

/// Per-column NULL counts plus the row count, in one scan.
pub fn null_counts(engine: &QueryEngine, table: &Ident) -> Result<(u64, Vec<u64>)> {
    let columns = engine.column_idents(table)?;
    if columns.is_empty() {
        return Ok((engine.row_count(table)?, Vec::new()));
    }

    let counts = columns
        .iter()
        .map(|c| format!("COUNT(*) - COUNT({})", c))
        .collect::<Vec<_>>()
        .join(", ");
    let result = engine.query(&format!("SELECT COUNT(*), {} FROM {}", counts, table))?;

    let row = result.rows.into_iter().next().unwrap_or_default();
    let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0u64);
    let total = row.first().map(parse).unwrap_or(0);
    let nulls = row.iter().skip(1).map(parse).collect();
    Ok((total, nulls))
}

/// Number of trailing sparse columns. This is the score used by the dialect
/// prober and the repairer.
pub fn sparse_column_count(
    engine: &QueryEngine,
    table: &Ident,
    thresholds: &Thresholds,
) -> Result<usize> {
    let (total, nulls) = null_counts(engine, table)?;
    Ok(trailing_sparse_run(&nulls, total, thresholds.sparse_null_ratio))
}

/// Group rows by their count of non-null cells.
pub fn row_width_distribution(engine: &QueryEngine, table: &Ident) -> Result<Vec<RowWidth>> {
    let columns = engine.column_idents(table)?;
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let width_expr = columns
        .iter()
        .map(|c| format!("CASE WHEN {} IS NOT NULL THEN 1 ELSE 0 END", c))
        .collect::<Vec<_>>()
        .join(" + ");
    let result = engine.query(&format!(
        "SELECT ({}) AS non_null_count, COUNT(*) AS row_count FROM {} GROUP BY non_null_count ORDER BY non_null_count",
        width_expr, table
    ))?;

    Ok(result
        .rows
        .iter()
        .filter_map(|row| {
            let width = row.first()?.as_deref()?.parse().ok()?;
            let count = row.get(1)?.as_deref()?.parse().ok()?;
            Some(RowWidth {
                non_null_count: width,
                row_count: count,
            })
        })
        .collect())
}

/// Whether the row widths still spread by at least the configured amount.
pub fn has_variance(engine: &QueryEngine, table: &Ident, thresholds: &Thresholds) -> Result<bool> {
    let distribution = row_width_distribution(engine, table)?;
    Ok(value_count_spread(&distribution)
        .map(|(min, max)| max - min >= thresholds.variance_spread as u64)
        .unwrap_or(false))
}

/// Run all three indicators against a loaded table.
pub fn detect(engine: &QueryEngine, table: &Ident, thresholds: &Thresholds) -> Result<OverflowFinding> {
    let columns = engine.column_names(table)?;
    let (total_rows, nulls) = null_counts(engine, table)?;

    let mut indicators = Vec::new();
    let mut overflow_columns: Vec<String> = Vec::new();

    let run = trailing_sparse_run(&nulls, total_rows, thresholds.sparse_null_ratio);
    if run > 0 {
        let sparse: Vec<String> = columns[columns.len() - run..].to_vec();
        indicators.push(Indicator {
            kind: IndicatorKind::SequentialSparsity,
            description: format!(
                "Found {} trailing columns that are at least {:.0}% NULL",
                run,
                thresholds.sparse_null_ratio * 100.0
            ),
            columns: sparse.clone(),
            distribution: Vec::new(),
        });
        overflow_columns = sparse;
    }

    let distribution = row_width_distribution(engine, table)?;
    if let Some((min, max)) = value_count_spread(&distribution) {
        if max - min >= thresholds.variance_spread as u64 {
            indicators.push(Indicator {
                kind: IndicatorKind::RowValueVariance,
                description: format!("Rows have between {} and {} non-null values", min, max),
                columns: Vec::new(),
                distribution,
            });
        }
    }

    let placeholders = placeholder_columns(&columns);
    if !placeholders.is_empty() {
        indicators.push(Indicator {
            kind: IndicatorKind::OverflowColumnNaming,
            description: format!(
                "Found {} columns with auto-generated names",
                placeholders.len()
            ),
            columns: placeholders.clone(),
            distribution: Vec::new(),
        });
        for col in placeholders {
            if !overflow_columns.contains(&col) {
                overflow_columns.push(col);
            }
        }
    }

    let detected = decide(&indicators);
    let suspected_anchor_column = if detected {
        overflow_columns
            .first()
            .and_then(|first| columns.iter().position(|c| c == first))
            .filter(|&idx| idx > 0)
            .map(|idx| columns[idx - 1].clone())
    } else {
        None
    };

    debug!(
        table = table.as_str(),
        detected,
        indicators = indicators.len(),
        "overflow detection"
    );

    Ok(OverflowFinding {
        detected,
        indicators,
        overflow_columns,
        suspected_anchor_column,
        total_columns: columns.len(),
        total_rows,
    })
}
