//! Column-overflow repair.
//!
//! Repair only acts on a trailing sparsity run; a table without one is left
//! untouched, which makes repeated repairs no-ops. Two modes exist:
//!
//! - **Blind**: re-parse the source with every dialect candidate into a
//!   scratch table and adopt one that strictly lowers the overflow count while
//!   keeping the row count. Whatever overflow is left is then contained: the
//!   overflow columns are dropped and a boolean `is_shifted` flag marks every
//!   row that had data in them.
//! - **Schema hint**: given the anchor column and the expected trailing
//!   columns, each row's tail is joined back into one delimited string,
//!   re-tokenized and remapped. Excess leading tokens fold into the anchor.
//!
//! Neither mode changes the row count.

use super::tokenizer;
use super::{has_variance, null_counts, sparse_column_count, trailing_sparse_run};
use crate::config::Thresholds;
use crate::dialect::{self, DialectCandidate, LoadOptions};
use crate::engine::{column_list, has_value_expr, Ident, QueryEngine};
use crate::error::{CleanError, Result};
use crate::naming;
use ahash::AHashSet;
use duckdb::types::Value;
use serde::Serialize;
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, info};

/// Name of the containment flag column, before collision handling.
pub const SHIFTED_FLAG: &str = "is_shifted";

/// Anchor column plus the names expected after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaHint {
    pub anchor: String,
    pub expected: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RepairMode {
    /// Nothing to repair
    None,
    /// Source re-parsed with a better dialect
    Reparse,
    /// Overflow columns dropped and rows flagged
    Containment,
    /// Tails re-tokenized against a caller-supplied schema
    SchemaHint,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct RepairReport {
    pub mode: RepairMode,
    /// True when the overflow was actually fixed rather than contained
    pub repaired: bool,
    pub message: String,
    pub columns_before: usize,
    pub columns_after: usize,
    pub overflow_before: usize,
    pub overflow_after: usize,
    pub rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_config: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_flagged: Option<u64>,
    pub new_schema: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance_eliminated: Option<bool>,
}

/// Everything a repair needs besides the table itself.
pub struct RepairContext<'a> {
    pub engine: &'a QueryEngine,
    pub table: &'a Ident,
    pub source: &'a Path,
    pub candidates: &'a [DialectCandidate],
    pub options: LoadOptions,
    pub thresholds: Thresholds,
    /// Per-session tag that keeps scratch tables from colliding.
    pub scratch_tag: &'a str,
}

/// Repair overflow in `ctx.table`, with or without a schema hint.
pub fn repair(ctx: &RepairContext<'_>, hint: Option<&SchemaHint>) -> Result<RepairReport> {
    let engine = ctx.engine;
    let columns = engine.column_names(ctx.table)?;
    let (rows, nulls) = null_counts(engine, ctx.table)?;
    let run = trailing_sparse_run(&nulls, rows, ctx.thresholds.sparse_null_ratio);

    if run == 0 {
        debug!(table = ctx.table.as_str(), "no trailing sparse columns, nothing to repair");
        return Ok(RepairReport {
            mode: RepairMode::None,
            repaired: false,
            message: "No overflow detected (no sparse columns at the end of the table)".to_string(),
            columns_before: columns.len(),
            columns_after: columns.len(),
            overflow_before: 0,
            overflow_after: 0,
            rows,
            parse_config: None,
            flag_column: None,
            rows_flagged: None,
            new_schema: columns,
            variance_eliminated: None,
        });
    }

    match hint {
        Some(hint) => repair_with_hint(ctx, hint, columns.len(), run, rows),
        None => repair_blind(ctx, columns.len(), run, rows),
    }
}

fn repair_blind(
    ctx: &RepairContext<'_>,
    columns_before: usize,
    overflow_before: usize,
    rows: u64,
) -> Result<RepairReport> {
    let engine = ctx.engine;
    let scratch = ctx.table.with_suffix(&format!("probe_{}", ctx.scratch_tag));
    let mut last_loaded: Option<usize> = None;

    let best = dialect::choose_dialect(ctx.candidates, |idx, candidate| {
        match trial_reparse(ctx, &scratch, candidate) {
            Ok((trial_rows, score)) => {
                last_loaded = Some(idx);
                debug!(candidate = candidate.name, trial_rows, score, "repair trial");
                // A re-parse that changes the row count is never adopted
                (trial_rows == rows).then_some(score)
            }
            Err(e) => {
                debug!(candidate = candidate.name, error = %e, "repair trial failed");
                None
            }
        }
    });

    let improvement = best.filter(|&(_, score)| score < overflow_before);
    let Some((idx, overflow_after)) = improvement else {
        engine.drop_table(&scratch)?;
        let mut report = contain(ctx, columns_before, overflow_before)?;
        report.message = format!(
            "Could not fix overflow by re-parsing. Removed {} overflow columns and flagged affected rows in '{}'",
            overflow_before,
            report.flag_column.as_deref().unwrap_or(SHIFTED_FLAG)
        );
        return Ok(report);
    };

    let candidate = &ctx.candidates[idx];
    if last_loaded != Some(idx) {
        trial_reparse(ctx, &scratch, candidate)?;
    }
    engine.swap_in(&scratch, ctx.table)?;
    info!(
        candidate = candidate.name,
        overflow_before, overflow_after, "overflow repaired by re-parsing"
    );

    let mut message = format!("Reloaded the source with {} parsing", candidate.name);
    let mut flag_column = None;
    let mut rows_flagged = None;
    if overflow_after > 0 {
        let contained = contain(ctx, columns_before, overflow_before)?;
        message.push_str(&format!(
            "; {} residual overflow columns were removed and flagged in '{}'",
            overflow_after,
            contained.flag_column.as_deref().unwrap_or(SHIFTED_FLAG)
        ));
        flag_column = contained.flag_column;
        rows_flagged = contained.rows_flagged;
    }

    let new_schema = engine.column_names(ctx.table)?;
    Ok(RepairReport {
        mode: RepairMode::Reparse,
        repaired: true,
        message,
        columns_before,
        columns_after: new_schema.len(),
        overflow_before,
        overflow_after,
        rows: engine.row_count(ctx.table)?,
        parse_config: Some(candidate.name.to_string()),
        flag_column,
        rows_flagged,
        new_schema,
        variance_eliminated: None,
    })
}

/// Load a candidate into `scratch` exactly as the load path would. Returns
/// the row count and the overflow score.
fn trial_reparse(
    ctx: &RepairContext<'_>,
    scratch: &Ident,
    candidate: &DialectCandidate,
) -> Result<(u64, usize)> {
    dialect::load_candidate(ctx.engine, ctx.source, scratch, candidate, &ctx.options)?;
    dialect::normalize_table_columns(ctx.engine, scratch)?;
    dialect::remove_empty_rows(ctx.engine, scratch)?;
    let rows = ctx.engine.row_count(scratch)?;
    let score = sparse_column_count(ctx.engine, scratch, &ctx.thresholds)?;
    Ok((rows, score))
}

/// Drop the trailing sparse run and add a flag marking rows that had data in it.
fn contain(
    ctx: &RepairContext<'_>,
    columns_before: usize,
    overflow_before: usize,
) -> Result<RepairReport> {
    let engine = ctx.engine;
    let columns = engine.column_names(ctx.table)?;
    let (rows, nulls) = null_counts(engine, ctx.table)?;
    let run = trailing_sparse_run(&nulls, rows, ctx.thresholds.sparse_null_ratio);

    let (kept, overflow) = columns.split_at(columns.len() - run);
    let kept: Vec<Ident> = kept.iter().map(|c| Ident::from_catalog(c.as_str())).collect();
    let overflow: Vec<Ident> = overflow
        .iter()
        .map(|c| Ident::from_catalog(c.as_str()))
        .collect();

    let taken: AHashSet<String> = kept.iter().map(|c| c.as_str().to_string()).collect();
    let flag = Ident::from_catalog(naming::unique_name(SHIFTED_FLAG, &taken));

    let has_overflow = if overflow.is_empty() {
        "FALSE".to_string()
    } else {
        overflow
            .iter()
            .map(has_value_expr)
            .collect::<Vec<_>>()
            .join(" OR ")
    };

    let rows_flagged = engine.scalar_u64(&format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        ctx.table, has_overflow
    ))?;

    let mut projection: Vec<String> = kept.iter().map(|c| c.to_string()).collect();
    projection.push(format!(
        "CASE WHEN ({}) THEN TRUE ELSE FALSE END AS {}",
        has_overflow, flag
    ));

    let scratch = ctx.table.with_suffix(&format!("contain_{}", ctx.scratch_tag));
    engine.execute(&format!(
        "CREATE OR REPLACE TABLE {} AS SELECT {} FROM {} ORDER BY rowid",
        scratch,
        projection.join(", "),
        ctx.table
    ))?;
    engine.swap_in(&scratch, ctx.table)?;
    info!(rows_flagged, flag = flag.as_str(), "overflow contained");

    let new_schema = engine.column_names(ctx.table)?;
    Ok(RepairReport {
        mode: RepairMode::Containment,
        repaired: false,
        message: String::new(),
        columns_before,
        columns_after: new_schema.len(),
        overflow_before,
        overflow_after: 0,
        rows: engine.row_count(ctx.table)?,
        parse_config: None,
        flag_column: Some(flag.as_str().to_string()),
        rows_flagged: Some(rows_flagged),
        new_schema,
        variance_eliminated: None,
    })
}

fn repair_with_hint(
    ctx: &RepairContext<'_>,
    hint: &SchemaHint,
    columns_before: usize,
    overflow_before: usize,
    rows: u64,
) -> Result<RepairReport> {
    let engine = ctx.engine;
    let columns = engine.column_names(ctx.table)?;
    let Some(anchor_idx) = columns.iter().position(|c| c == &hint.anchor) else {
        return Err(CleanError::ColumnNotFound {
            column: hint.anchor.clone(),
            available: columns,
        });
    };

    let head: Vec<Ident> = columns[..anchor_idx]
        .iter()
        .map(|c| Ident::from_catalog(c.as_str()))
        .collect();
    let tail: Vec<Ident> = columns[anchor_idx..]
        .iter()
        .map(|c| Ident::from_catalog(c.as_str()))
        .collect();

    // Expected names are normalized and kept distinct from the head and anchor
    let mut taken: AHashSet<String> = columns[..=anchor_idx].iter().cloned().collect();
    let mut expected = Vec::with_capacity(hint.expected.len());
    for (i, name) in hint.expected.iter().enumerate() {
        let base = naming::normalize_name(name, anchor_idx + 1 + i);
        let unique = naming::unique_name(&base, &taken);
        taken.insert(unique.clone());
        expected.push(Ident::from_catalog(unique));
    }
    let row_key = Ident::from_catalog(naming::unique_name("_source_row", &taken));
    let anchor = tail[0].clone();

    // Staging table for re-tokenized tails, keyed by the source rowid
    let staged = ctx.table.with_suffix(&format!("hint_{}", ctx.scratch_tag));
    let mut staged_defs = vec![format!("{} BIGINT", row_key), format!("{} VARCHAR", anchor)];
    staged_defs.extend(expected.iter().map(|c| format!("{} VARCHAR", c)));
    engine.execute(&format!(
        "CREATE OR REPLACE TABLE {} ({})",
        staged,
        staged_defs.join(", ")
    ))?;

    let tail_select = tail
        .iter()
        .map(|c| format!("CAST({} AS VARCHAR)", c))
        .collect::<Vec<_>>()
        .join(", ");
    {
        let conn = engine.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT rowid, {} FROM {} ORDER BY rowid",
            tail_select, ctx.table
        ))?;
        let mut appender = conn.appender(staged.as_str())?;
        let mut source_rows = stmt.query([])?;

        while let Some(row) = source_rows.next()? {
            let rowid: i64 = row.get(0)?;
            let mut cells: Vec<Option<String>> = Vec::with_capacity(tail.len());
            for i in 0..tail.len() {
                cells.push(row.get(i + 1)?);
            }

            let mut values = Vec::with_capacity(expected.len() + 2);
            values.push(Value::BigInt(rowid));
            values.extend(
                retokenize_tail(&cells, expected.len(), ctx.options.delimiter)
                    .into_iter()
                    .map(|v| v.map_or(Value::Null, Value::Text)),
            );
            appender.append_row(duckdb::appender_params_from_iter(values))?;
        }
        appender.flush()?;
    }

    let mut projection: Vec<String> = head.iter().map(|c| format!("t.{}", c)).collect();
    projection.push(format!("s.{}", anchor));
    projection.extend(expected.iter().map(|c| format!("s.{}", c)));

    let rebuilt = ctx.table.with_suffix(&format!("rebuilt_{}", ctx.scratch_tag));
    engine.execute(&format!(
        "CREATE OR REPLACE TABLE {} AS SELECT {} FROM {} t JOIN {} s ON t.rowid = s.{} ORDER BY t.rowid",
        rebuilt,
        projection.join(", "),
        ctx.table,
        staged,
        row_key
    ))?;
    engine.drop_table(&staged)?;
    engine.swap_in(&rebuilt, ctx.table)?;

    let variance_eliminated = !has_variance(engine, ctx.table, &ctx.thresholds)?;
    let overflow_after = sparse_column_count(engine, ctx.table, &ctx.thresholds)?;
    let new_schema = engine.column_names(ctx.table)?;
    let rows_after = engine.row_count(ctx.table)?;
    debug_assert_eq!(rows, rows_after);

    info!(
        anchor = anchor.as_str(),
        expected = expected.len(),
        variance_eliminated,
        "overflow repaired with schema hint"
    );

    Ok(RepairReport {
        mode: RepairMode::SchemaHint,
        repaired: true,
        message: format!(
            "Re-tokenized columns from '{}' onward into {} expected columns ({})",
            anchor.as_str(),
            expected.len(),
            column_list(&expected)
        ),
        columns_before,
        columns_after: new_schema.len(),
        overflow_before,
        overflow_after,
        rows: rows_after,
        parse_config: None,
        flag_column: None,
        rows_flagged: None,
        new_schema,
        variance_eliminated: Some(variance_eliminated),
    })
}

/// Re-split a row tail into the anchor plus `expected` columns.
///
/// When nothing folds into the anchor, every output position lines up with
/// its source cell and NULL cells stay NULL.
pub fn retokenize_tail(
    cells: &[Option<String>],
    expected: usize,
    delimiter: char,
) -> Vec<Option<String>> {
    let joined = join_tail(cells, delimiter);
    let tokens = tokenizer::tokenize(&joined, delimiter);
    let folded = tokens.len() > expected + 1;
    let (anchor, rest) = tokenizer::remap(&tokens, expected, delimiter);

    std::iter::once(Some(anchor))
        .chain(rest)
        .enumerate()
        .map(|(i, value)| {
            if !folded && cells.get(i).map_or(true, Option::is_none) {
                None
            } else {
                value
            }
        })
        .collect()
}

/// Join a row tail back into one delimited string. Trailing NULLs were
/// padding and are dropped; interior NULLs were empty fields. Cells holding
/// the delimiter, a quote or a backslash are quoted so each stays one token.
pub fn join_tail(cells: &[Option<String>], delimiter: char) -> String {
    let len = cells
        .iter()
        .rposition(Option::is_some)
        .map_or(0, |last| last + 1);
    cells[..len]
        .iter()
        .map(|c| quote_cell(c.as_deref().unwrap_or(""), delimiter))
        .collect::<Vec<_>>()
        .join(&delimiter.to_string())
}

fn quote_cell(cell: &str, delimiter: char) -> Cow<'_, str> {
    if !cell.contains(|c: char| c == delimiter || c == '"' || c == '\\') {
        return Cow::Borrowed(cell);
    }
    let mut quoted = String::with_capacity(cell.len() + 2);
    quoted.push('"');
    for c in cell.chars() {
        match c {
            '"' => quoted.push_str("\"\""),
            '\\' => quoted.push_str("\\\\"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn test_join_tail_drops_trailing_nulls() {
        let cells = vec![s("Smith"), s(" John"), s("42"), None, None];
        assert_eq!(join_tail(&cells, ','), "Smith, John,42");
    }

    #[test]
    fn test_join_tail_quotes_cells_with_delimiter() {
        let cells = vec![s("Person 11"), s("30"), s("Oslo, Norway")];
        assert_eq!(join_tail(&cells, ','), "Person 11,30,\"Oslo, Norway\"");
        let cells = vec![s("say \"hi\""), s("C:\\dir\\")];
        assert_eq!(join_tail(&cells, ','), "\"say \"\"hi\"\"\",\"C:\\\\dir\\\\\"");
    }

    #[test]
    fn test_retokenize_keeps_clean_row_with_delimiter() {
        let cells = vec![s("Person 11"), s("30"), s("Oslo, Norway"), None];
        assert_eq!(
            retokenize_tail(&cells, 2, ','),
            vec![s("Person 11"), s("30"), s("Oslo, Norway")]
        );
    }

    #[test]
    fn test_retokenize_round_trips_quotes_and_backslashes() {
        let cells = vec![s("a\\"), s("b\\\"c"), s("\"d\", e")];
        assert_eq!(retokenize_tail(&cells, 2, ','), cells);
    }

    #[test]
    fn test_retokenize_folds_shifted_row() {
        let cells = vec![s("Smith"), s(" John"), s("42"), s("Bergen")];
        assert_eq!(
            retokenize_tail(&cells, 2, ','),
            vec![s("Smith, John"), s("42"), s("Bergen")]
        );
    }

    #[test]
    fn test_retokenize_keeps_nulls_null() {
        let cells = vec![None, s("30"), s("Oslo"), None];
        assert_eq!(retokenize_tail(&cells, 2, ','), vec![None, s("30"), s("Oslo")]);

        let cells = vec![s("Person 3"), None, s("Oslo"), None];
        assert_eq!(retokenize_tail(&cells, 2, ','), vec![s("Person 3"), None, s("Oslo")]);

        assert_eq!(retokenize_tail(&[None, None, None], 2, ','), vec![None, None, None]);
    }

    #[test]
    fn test_join_tail_keeps_interior_empties() {
        let cells = vec![s("a"), None, s("c")];
        assert_eq!(join_tail(&cells, ','), "a,,c");
        assert_eq!(join_tail(&[None, None], ','), "");
    }
}
