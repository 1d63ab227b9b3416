//! Plan staging: preview and execute.
//!
//! Every call starts by copying the Loaded Table into the staging table
//! `data`, which is the only table plan statements may touch. Statements run
//! one at a time: each one first passes the guard, then executes; failures
//! are recorded per statement and never stop the rest of the plan.
//!
//! - **Preview** tags the copy with a synthetic `_row_id`, captures the first
//!   rows, applies the plan and re-selects the same row ids. Nothing is
//!   promoted.
//! - **Execute** applies the plan and compares row counts. A shrink restores
//!   `data` from the untouched Loaded Table and fails; otherwise `data` is
//!   exported, promoted to the Loaded Table, and the export becomes the new
//!   source artifact.

use crate::engine::{placeholders, Ident, QueryEngine, QueryResult};
use crate::error::{CleanError, Result};
use crate::guard;
use crate::naming;
use crate::plan::{self, CleaningPlan};
use ahash::AHashSet;
use duckdb::types::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the staging table plan statements target.
pub const STAGING_TABLE: &str = "data";

/// Synthetic row identifier used to align before/after views.
pub const ROW_ID: &str = "_row_id";

static CLEANED_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(_cleaned)+$").unwrap());

/// Lifecycle of the staging table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StagingState {
    #[default]
    Idle,
    Staged,
    Previewed,
    Committed,
    RolledBack,
}

impl std::fmt::Display for StagingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StagingState::Idle => write!(f, "idle"),
            StagingState::Staged => write!(f, "staged"),
            StagingState::Previewed => write!(f, "previewed"),
            StagingState::Committed => write!(f, "committed"),
            StagingState::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatementStatus {
    Ok,
    Blocked,
    Error,
}

/// What happened to one plan statement.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct StatementOutcome {
    /// 1-based position in the plan
    pub step: usize,
    pub sql: String,
    pub status: StatementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Columns of the staging table when the statement failed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_columns: Vec<String>,
}

impl StatementOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == StatementStatus::Ok
    }
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct PreviewReport {
    pub state: StagingState,
    pub before: QueryResult,
    pub after: QueryResult,
    pub steps: Vec<StatementOutcome>,
    pub rows_before: u64,
    pub rows_after: u64,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ExecuteReport {
    pub state: StagingState,
    pub steps: Vec<StatementOutcome>,
    pub rows_before: u64,
    pub rows_after: u64,
    /// The exported file, now the session's source artifact
    pub artifact: PathBuf,
}

/// Default export path: `<stem>_cleaned<.ext>` beside the source, with any
/// existing `_cleaned` suffixes collapsed.
pub fn cleaned_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let base = CLEANED_SUFFIX.replace(&stem, "");
    let name = match source.extension() {
        Some(ext) => format!("{}_cleaned.{}", base, ext.to_string_lossy()),
        None => format!("{}_cleaned", base),
    };
    source.with_file_name(name)
}

pub(crate) fn multi_statement_message(statements: usize) -> String {
    format!(
        "Expected exactly one statement but found {}; submit each statement as its own plan step",
        statements
    )
}

/// The staging table for one preview or execute call.
pub struct Workspace<'a> {
    engine: &'a QueryEngine,
    source: &'a Ident,
    staging: Ident,
    row_id: Option<Ident>,
    source_ref: Regex,
}

impl<'a> Workspace<'a> {
    /// Copy `source` into a fresh staging table, optionally tagging rows.
    pub fn stage(engine: &'a QueryEngine, source: &'a Ident, tag_rows: bool) -> Result<Self> {
        let staging = Ident::from_catalog(STAGING_TABLE);

        let row_id = if tag_rows {
            let taken: AHashSet<String> = engine.column_names(source)?.into_iter().collect();
            let name = Ident::from_catalog(naming::unique_name(ROW_ID, &taken));
            engine.execute(&format!(
                "CREATE OR REPLACE TABLE {} AS SELECT ROW_NUMBER() OVER (ORDER BY rowid) AS {}, * FROM {} ORDER BY rowid",
                staging, name, source
            ))?;
            Some(name)
        } else {
            engine.execute(&format!(
                "CREATE OR REPLACE TABLE {} AS SELECT * FROM {} ORDER BY rowid",
                staging, source
            ))?;
            None
        };

        let source_ref = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(source.as_str())))
            .map_err(|e| CleanError::Config(e.to_string()))?;

        debug!(source = source.as_str(), tagged = tag_rows, "staged working copy");
        Ok(Self {
            engine,
            source,
            staging,
            row_id,
            source_ref,
        })
    }

    pub fn table(&self) -> &Ident {
        &self.staging
    }

    pub fn row_count(&self) -> Result<u64> {
        self.engine.row_count(&self.staging)
    }

    /// Columns visible to plan authors (the row id is hidden).
    pub fn visible_columns(&self) -> Vec<String> {
        let hidden = self.row_id.as_ref().map(Ident::as_str);
        self.engine
            .column_names(&self.staging)
            .unwrap_or_default()
            .into_iter()
            .filter(|c| Some(c.as_str()) != hidden)
            .collect()
    }

    /// Run every statement in order, recording an outcome for each.
    pub fn apply(&self, plan: &CleaningPlan) -> Vec<StatementOutcome> {
        plan.iter()
            .enumerate()
            .map(|(i, sql)| self.apply_one(i + 1, sql))
            .collect()
    }

    fn apply_one(&self, step: usize, sql: &str) -> StatementOutcome {
        let outcome = |status, error: Option<String>, available_columns| StatementOutcome {
            step,
            sql: sql.to_string(),
            status,
            error,
            available_columns,
        };

        let statements = plan::statement_count(sql);
        if statements > 1 {
            debug!(step, statements, "multi-statement element refused");
            return outcome(
                StatementStatus::Error,
                Some(multi_statement_message(statements)),
                self.visible_columns(),
            );
        }

        if let Err(rejection) = guard::check(sql) {
            debug!(step, keyword = %rejection.keyword, "statement blocked");
            return outcome(StatementStatus::Blocked, Some(rejection.reason), Vec::new());
        }

        if self.source_ref.is_match(&plan::code_text(sql)) {
            return outcome(
                StatementStatus::Error,
                Some(format!(
                    "Plan statements must target the staging table '{}', not '{}'",
                    STAGING_TABLE,
                    self.source.as_str()
                )),
                self.visible_columns(),
            );
        }

        match self.engine.execute(sql) {
            Ok(_) => outcome(StatementStatus::Ok, None, Vec::new()),
            Err(e) => {
                debug!(step, error = %e, "statement failed");
                outcome(StatementStatus::Error, Some(e.to_string()), self.visible_columns())
            }
        }
    }

    /// Replace the staging table with a fresh copy of the Loaded Table and
    /// check that the copy is content-identical.
    pub fn restore(&self, expected_fingerprint: &str) -> Result<()> {
        self.engine.copy_table(self.source, &self.staging)?;
        let actual = self.engine.fingerprint(&self.staging)?;
        if actual != expected_fingerprint {
            return Err(CleanError::RollbackVerification {
                expected: expected_fingerprint.to_string(),
                actual,
            });
        }
        Ok(())
    }

    fn drop_row_id(&self) -> Result<()> {
        if let Some(row_id) = &self.row_id {
            self.engine.execute(&format!(
                "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
                self.staging, row_id
            ))?;
        }
        Ok(())
    }
}

/// Apply a plan to a fresh staging copy and show the first rows before and
/// after. The Loaded Table is never modified.
pub fn preview(
    engine: &QueryEngine,
    source: &Ident,
    plan: &CleaningPlan,
    preview_rows: usize,
) -> Result<PreviewReport> {
    let workspace = Workspace::stage(engine, source, true)?;
    let staging = workspace.table();
    let row_id = workspace
        .row_id
        .clone()
        .unwrap_or_else(|| Ident::from_catalog(ROW_ID));

    let rows_before = workspace.row_count()?;
    let before = engine.query(&format!(
        "SELECT * FROM {} ORDER BY {} LIMIT {}",
        staging, row_id, preview_rows
    ))?;

    let steps = workspace.apply(plan);

    let ids: Vec<Value> = before
        .column_index(row_id.as_str())
        .map(|idx| {
            before
                .rows
                .iter()
                .filter_map(|r| r.get(idx).cloned().flatten())
                .filter_map(|v| v.parse::<i64>().ok())
                .map(Value::BigInt)
                .collect()
        })
        .unwrap_or_default();

    let still_tagged = engine
        .column_names(staging)?
        .iter()
        .any(|c| c == row_id.as_str());

    let after = if !ids.is_empty() && still_tagged {
        engine.query_with_params(
            &format!(
                "SELECT * FROM {} WHERE {} IN ({}) ORDER BY {}",
                staging,
                row_id,
                placeholders(ids.len()),
                row_id
            ),
            &ids,
        )?
    } else {
        engine.query(&format!("SELECT * FROM {} LIMIT {}", staging, preview_rows))?
    };
    let rows_after = workspace.row_count()?;

    workspace.drop_row_id()?;

    info!(
        statements = plan.len(),
        ok = steps.iter().filter(|s| s.is_ok()).count(),
        rows_before,
        rows_after,
        "plan previewed"
    );

    Ok(PreviewReport {
        state: StagingState::Previewed,
        before: before.without_column(row_id.as_str()),
        after: after.without_column(row_id.as_str()),
        steps,
        rows_before,
        rows_after,
    })
}

/// Apply a plan, then commit it or roll it back.
///
/// On commit `data` is exported to `artifact` and copied over the Loaded
/// Table. A row-count shrink restores `data` and returns
/// [`CleanError::RowCountShrank`] with the full step log.
pub fn execute(
    engine: &QueryEngine,
    source: &Ident,
    plan: &CleaningPlan,
    artifact: &Path,
    delimiter: char,
) -> Result<ExecuteReport> {
    let fingerprint = engine.fingerprint(source)?;
    let workspace = Workspace::stage(engine, source, false)?;
    let rows_before = workspace.row_count()?;

    let steps = workspace.apply(plan);

    let rows_after = match workspace.row_count() {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "staging table unreadable after plan, rolling back");
            workspace.restore(&fingerprint)?;
            return Err(e);
        }
    };

    if rows_after < rows_before {
        workspace.restore(&fingerprint)?;
        let delta = rows_before - rows_after;
        warn!(rows_before, rows_after, delta, "plan removed rows, rolled back");
        return Err(CleanError::RowCountShrank {
            rows_before,
            rows_after,
            delta,
            steps,
        });
    }

    engine.export_csv(workspace.table(), artifact, delimiter)?;
    engine.copy_table(workspace.table(), source)?;

    info!(
        artifact = %artifact.display(),
        rows_before,
        rows_after,
        "plan committed"
    );

    Ok(ExecuteReport {
        state: StagingState::Committed,
        steps,
        rows_before,
        rows_after,
        artifact: artifact.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleaned_path() {
        assert_eq!(
            cleaned_path(Path::new("/tmp/sales.csv")),
            PathBuf::from("/tmp/sales_cleaned.csv")
        );
        assert_eq!(
            cleaned_path(Path::new("/tmp/sales_cleaned_cleaned.csv")),
            PathBuf::from("/tmp/sales_cleaned.csv")
        );
        assert_eq!(
            cleaned_path(Path::new("/tmp/export")),
            PathBuf::from("/tmp/export_cleaned")
        );
    }

    #[test]
    fn test_blocked_statement_does_not_run() {
        let engine = QueryEngine::in_memory().unwrap();
        engine
            .execute("CREATE TABLE src AS SELECT i AS id FROM range(5) r(i)")
            .unwrap();
        let src = Ident::new("src").unwrap();
        let workspace = Workspace::stage(&engine, &src, false).unwrap();

        let plan = CleaningPlan::new(["DELETE FROM data WHERE id > 1"]);
        let steps = workspace.apply(&plan);
        assert_eq!(steps[0].status, StatementStatus::Blocked);
        assert_eq!(workspace.row_count().unwrap(), 5);
    }

    #[test]
    fn test_statement_naming_the_loaded_table_is_refused() {
        let engine = QueryEngine::in_memory().unwrap();
        engine
            .execute("CREATE TABLE src AS SELECT 'a' AS name")
            .unwrap();
        let src = Ident::new("src").unwrap();
        let workspace = Workspace::stage(&engine, &src, false).unwrap();

        let steps = workspace.apply(&CleaningPlan::new(["UPDATE src SET name = 'b'"]));
        assert_eq!(steps[0].status, StatementStatus::Error);
        assert_eq!(steps[0].available_columns, vec!["name"]);
        let result = engine.query("SELECT name FROM src").unwrap();
        assert_eq!(result.rows[0][0].as_deref(), Some("a"));
    }
}
