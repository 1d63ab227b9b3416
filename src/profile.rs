//! Column profiling heuristics.
//!
//! Each function is a small, independent query against the loaded table. They
//! feed the plan author (human or automated) and never mutate anything.

use crate::config::Thresholds;
use crate::engine::{string_literal, Ident, QueryEngine, QueryResult};
use crate::error::{CleanError, Result};
use serde::Serialize;

/// Date layouts checked by [`date_formats`]: strptime pattern and label.
pub const DATE_FORMATS: &[(&str, &str)] = &[
    ("%m/%d/%Y", "MM/DD/YYYY"),
    ("%d/%m/%Y", "DD/MM/YYYY"),
    ("%Y-%m-%d", "YYYY-MM-DD"),
    ("%Y/%m/%d", "YYYY/MM/DD"),
    ("%d-%b-%Y", "DD-Mon-YYYY"),
];

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ColumnProfile {
    pub column: String,
    pub column_type: String,
    pub approx_unique: u64,
    pub null_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub enum SuggestedType {
    Number,
    Date,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct CoercionSuggestion {
    pub column: String,
    pub non_null: u64,
    pub number_matches: u64,
    pub date_matches: u64,
    pub suggested_types: Vec<SuggestedType>,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ValueCount {
    pub value: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ValueDistribution {
    pub column: String,
    pub values: Vec<ValueCount>,
    pub total_unique: u64,
}

/// Tukey fences for a numeric column.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct IqrBounds {
    pub column: String,
    pub q1: f64,
    pub q3: f64,
    pub lower: f64,
    pub upper: f64,
    pub outliers: u64,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct DateFormatMatch {
    pub format: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct DateFormatReport {
    pub column: String,
    pub formats: Vec<DateFormatMatch>,
    pub mixed: bool,
}

/// Whole-table profile.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ProfileReport {
    pub table: String,
    pub rows: u64,
    pub columns: Vec<ColumnProfile>,
    pub suggestions: Vec<CoercionSuggestion>,
}

/// Every heuristic for a single column.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ColumnReport {
    pub column: String,
    pub coercion: CoercionSuggestion,
    pub distribution: ValueDistribution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iqr: Option<IqrBounds>,
    pub dates: DateFormatReport,
}

/// Look up a caller-supplied column name against the table's columns.
pub fn resolve_column(engine: &QueryEngine, table: &Ident, name: &str) -> Result<Ident> {
    let available = engine.column_names(table)?;
    if available.iter().any(|c| c == name) {
        Ok(Ident::from_catalog(name))
    } else {
        Err(CleanError::ColumnNotFound {
            column: name.to_string(),
            available,
        })
    }
}

fn cell<'r>(result: &'r QueryResult, row: usize, col: usize) -> Option<&'r str> {
    result.rows.get(row)?.get(col)?.as_deref()
}

fn cell_u64(result: &QueryResult, row: usize, col: usize) -> u64 {
    cell(result, row, col)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn cell_f64(result: &QueryResult, row: usize, col: usize) -> Option<f64> {
    cell(result, row, col).and_then(|v| v.parse().ok())
}

/// Type, approximate distinct count and NULL share of every column.
pub fn column_profiles(engine: &QueryEngine, table: &Ident) -> Result<Vec<ColumnProfile>> {
    let result = engine.query(&format!(
        "SELECT column_name, column_type, approx_unique, CAST(null_percentage AS DOUBLE) FROM (SUMMARIZE SELECT * FROM {})",
        table
    ))?;
    Ok((0..result.row_count())
        .map(|i| ColumnProfile {
            column: cell(&result, i, 0).unwrap_or_default().to_string(),
            column_type: cell(&result, i, 1).unwrap_or_default().to_string(),
            approx_unique: cell_u64(&result, i, 2),
            null_percentage: cell_f64(&result, i, 3).unwrap_or(0.0),
        })
        .collect())
}

/// Suggest Number or Date when enough non-null values would convert cleanly.
pub fn suggest_type_coercion(
    engine: &QueryEngine,
    table: &Ident,
    column: &Ident,
    thresholds: &Thresholds,
) -> Result<CoercionSuggestion> {
    let text = format!("CAST({} AS VARCHAR)", column);
    let result = engine.query(&format!(
        "SELECT COUNT({col}), \
         COUNT(*) FILTER (WHERE {col} IS NOT NULL AND TRY_CAST(regexp_replace({text}, '[$%,]', '', 'g') AS DOUBLE) IS NOT NULL), \
         COUNT(*) FILTER (WHERE TRY_CAST({text} AS DATE) IS NOT NULL OR try_strptime({text}, '%m/%d/%Y') IS NOT NULL) \
         FROM {table}",
        col = column,
        text = text,
        table = table
    ))?;

    let non_null = cell_u64(&result, 0, 0);
    let number_matches = cell_u64(&result, 0, 1);
    let date_matches = cell_u64(&result, 0, 2);

    let mut suggested_types = Vec::new();
    if non_null > 0 {
        let ratio = |n: u64| n as f64 / non_null as f64;
        if ratio(number_matches) > thresholds.coercion_confidence {
            suggested_types.push(SuggestedType::Number);
        }
        if ratio(date_matches) > thresholds.coercion_confidence {
            suggested_types.push(SuggestedType::Date);
        }
    }

    Ok(CoercionSuggestion {
        column: column.as_str().to_string(),
        non_null,
        number_matches,
        date_matches,
        suggested_types,
    })
}

/// Most frequent values, for spotting casing and spelling variants.
pub fn value_distribution(
    engine: &QueryEngine,
    table: &Ident,
    column: &Ident,
    limit: usize,
) -> Result<ValueDistribution> {
    let result = engine.query(&format!(
        "SELECT {col} AS value, COUNT(*) AS count FROM {table} GROUP BY 1 ORDER BY 2 DESC, 1 LIMIT {limit}",
        col = column,
        table = table,
        limit = limit
    ))?;

    let values = result
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| ValueCount {
            value: row.first().cloned().flatten(),
            count: cell_u64(&result, i, 1),
        })
        .collect();

    let total_unique = engine.scalar_u64(&format!(
        "SELECT COUNT(DISTINCT {}) FROM {}",
        column, table
    ))?;

    Ok(ValueDistribution {
        column: column.as_str().to_string(),
        values,
        total_unique,
    })
}

/// Quartiles, 1.5×IQR fences and the number of values outside them.
/// `None` when the column holds no numeric values.
pub fn iqr_bounds(engine: &QueryEngine, table: &Ident, column: &Ident) -> Result<Option<IqrBounds>> {
    let result = engine.query(&format!(
        "WITH v AS (SELECT TRY_CAST({col} AS DOUBLE) AS x FROM {table}), \
         q AS (SELECT quantile_cont(x, 0.25) AS q1, quantile_cont(x, 0.75) AS q3 FROM v WHERE x IS NOT NULL) \
         SELECT q.q1, q.q3, COUNT(*) FILTER (WHERE v.x < q.q1 - 1.5 * (q.q3 - q.q1) OR v.x > q.q3 + 1.5 * (q.q3 - q.q1)) \
         FROM q, v GROUP BY q.q1, q.q3",
        col = column,
        table = table
    ))?;

    let (Some(q1), Some(q3)) = (cell_f64(&result, 0, 0), cell_f64(&result, 0, 1)) else {
        return Ok(None);
    };
    let iqr = q3 - q1;
    Ok(Some(IqrBounds {
        column: column.as_str().to_string(),
        q1,
        q3,
        lower: q1 - 1.5 * iqr,
        upper: q3 + 1.5 * iqr,
        outliers: cell_u64(&result, 0, 2),
    }))
}

/// Which of the common date layouts occur in a column.
pub fn date_formats(engine: &QueryEngine, table: &Ident, column: &Ident) -> Result<DateFormatReport> {
    let text = format!("CAST({} AS VARCHAR)", column);
    let counts = DATE_FORMATS
        .iter()
        .map(|(pattern, _)| {
            format!(
                "COUNT(*) FILTER (WHERE try_strptime({}, {}) IS NOT NULL)",
                text,
                string_literal(pattern)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let result = engine.query(&format!("SELECT {} FROM {}", counts, table))?;

    let formats: Vec<DateFormatMatch> = DATE_FORMATS
        .iter()
        .enumerate()
        .filter_map(|(i, (_, label))| {
            let count = cell_u64(&result, 0, i);
            (count > 0).then(|| DateFormatMatch {
                format: label.to_string(),
                count,
            })
        })
        .collect();

    Ok(DateFormatReport {
        column: column.as_str().to_string(),
        mixed: formats.len() > 1,
        formats,
    })
}
