//! Per-session cleaning context.
//!
//! A [`Session`] owns everything one uploaded file needs: its own query
//! engine, the current source artifact, the loaded table handle and the
//! configuration. Sessions share nothing, and every scratch table they create
//! carries the session's unique tag.

use crate::config::CleanConfig;
use crate::dialect::{self, Attempt, LoadOptions};
use crate::engine::{ColumnInfo, Ident, QueryEngine, QueryResult};
use crate::error::{CleanError, Result};
use crate::guard;
use crate::naming::{self, ColumnMapping};
use crate::overflow::{self, OverflowFinding, RepairContext, RepairReport, SchemaHint};
use crate::plan::{self, CleaningPlan};
use crate::profile::{
    self, CoercionSuggestion, ColumnProfile, ColumnReport, DateFormatReport, IqrBounds,
    ProfileReport, ValueDistribution,
};
use crate::staging::{self, ExecuteReport, PreviewReport, StagingState};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracing::{info, warn};

/// Rows included in the load report sample.
const SAMPLE_ROWS: usize = 5;

static SESSION_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// The file a session reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct SourceArtifact {
    pub path: PathBuf,
    pub display_name: String,
}

impl SourceArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, display_name }
    }
}

/// Handle to the session's current table.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub name: Ident,
    pub columns: Vec<ColumnInfo>,
    pub row_count: u64,
}

impl LoadedTable {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct LoadReport {
    pub source: SourceArtifact,
    pub table: String,
    pub rows: u64,
    pub columns: Vec<ColumnInfo>,
    pub parse_config: String,
    pub attempts: Vec<Attempt>,
    /// Columns whose names changed during normalization
    pub renamed: Vec<ColumnMapping>,
    pub empty_rows_removed: u64,
    /// Source lines that did not become rows
    pub rows_lost: u64,
    /// Trailing sparse columns left after the best dialect was chosen
    pub overflow_columns: Vec<String>,
    pub warnings: Vec<String>,
    pub sample: QueryResult,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct NormalizeReport {
    pub renames: Vec<ColumnMapping>,
    pub new_schema: Vec<String>,
}

/// One cleaning session over one source file.
pub struct Session {
    engine: QueryEngine,
    config: CleanConfig,
    source: SourceArtifact,
    table: Option<LoadedTable>,
    tag: String,
    staging_state: StagingState,
    _upload_dir: Option<TempDir>,
}

impl Session {
    /// Start a session for a file on disk. The file is not loaded yet.
    pub fn open(path: &Path, config: CleanConfig) -> Result<Self> {
        if !path.exists() {
            return Err(CleanError::NotFound(path.to_path_buf()));
        }
        config.validate()?;

        let tag = format!(
            "{}_{}",
            std::process::id(),
            SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let engine = QueryEngine::new(config.disk_mode, config.memory_limit.as_deref(), &tag)?;

        Ok(Self {
            engine,
            config,
            source: SourceArtifact::new(path),
            table: None,
            tag,
            staging_state: StagingState::Idle,
            _upload_dir: None,
        })
    }

    /// Start a session for uploaded bytes. They are written to a temp
    /// directory that lives as long as the session.
    pub fn from_bytes(name: &str, bytes: &[u8], config: CleanConfig) -> Result<Self> {
        let dir = TempDir::new()?;
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "upload.csv".into());
        let path = dir.path().join(file_name);
        std::fs::write(&path, bytes)?;

        let mut session = Self::open(&path, config)?;
        session._upload_dir = Some(dir);
        Ok(session)
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn config(&self) -> &CleanConfig {
        &self.config
    }

    pub fn source(&self) -> &SourceArtifact {
        &self.source
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn staging_state(&self) -> StagingState {
        self.staging_state
    }

    pub fn table(&self) -> Option<&LoadedTable> {
        self.table.as_ref()
    }

    pub fn require_table(&self) -> Result<&LoadedTable> {
        self.table.as_ref().ok_or(CleanError::NoTableLoaded)
    }

    fn table_ident(&self) -> Result<Ident> {
        Ok(self.require_table()?.name.clone())
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            delimiter: self.config.delimiter,
            all_varchar: self.config.all_varchar,
        }
    }

    /// Re-read the loaded table's schema and row count.
    fn refresh_table(&mut self, name: Ident) -> Result<&LoadedTable> {
        let columns = self.engine.columns(&name)?;
        let row_count = self.engine.row_count(&name)?;
        Ok(&*self.table.insert(LoadedTable {
            name,
            columns,
            row_count,
        }))
    }

    /// Probe the dialect, normalize names, drop fully empty rows and report.
    pub fn load(&mut self) -> Result<LoadReport> {
        let path = self.source.path.clone();
        let table = Ident::new(&naming::table_name_for_path(&path))?;
        let source_rows = dialect::count_source_rows(&path)?;
        let candidates = self.config.dialect_candidates()?;

        let outcome = dialect::probe(
            &self.engine,
            &path,
            &table,
            &candidates,
            &self.load_options(),
            &self.config.thresholds,
        )?;

        let mappings = dialect::normalize_table_columns(&self.engine, &table)?;
        let empty_rows_removed = dialect::remove_empty_rows(&self.engine, &table)?;

        let (total, nulls) = overflow::null_counts(&self.engine, &table)?;
        let run = overflow::trailing_sparse_run(&nulls, total, self.config.thresholds.sparse_null_ratio);

        let loaded = self.refresh_table(table.clone())?.clone();
        let names = loaded.column_names();
        let overflow_columns = names[names.len() - run..].to_vec();

        let rows_lost = source_rows.saturating_sub(loaded.row_count + empty_rows_removed);

        let mut warnings = Vec::new();
        if !overflow_columns.is_empty() {
            warnings.push(format!(
                "Detected {} potential overflow columns: {}. Some rows may have misaligned data due to unquoted delimiters in the source file",
                overflow_columns.len(),
                overflow_columns.join(", ")
            ));
        }
        if rows_lost > 0 {
            warnings.push(format!(
                "{} rows from the source file were not loaded. Inspect the raw file for encoding or delimiter issues",
                rows_lost
            ));
        }
        if empty_rows_removed > 0 {
            warnings.push(format!("Removed {} fully empty rows", empty_rows_removed));
        }
        for w in &warnings {
            warn!("{}", w);
        }

        let sample = self
            .engine
            .query(&format!("SELECT * FROM {} LIMIT {}", table, SAMPLE_ROWS))?;

        info!(
            table = table.as_str(),
            rows = loaded.row_count,
            columns = loaded.columns.len(),
            dialect = outcome.candidate.name,
            "loaded source"
        );
        self.staging_state = StagingState::Idle;

        Ok(LoadReport {
            source: self.source.clone(),
            table: table.as_str().to_string(),
            rows: loaded.row_count,
            columns: loaded.columns,
            parse_config: outcome.candidate.name.to_string(),
            attempts: outcome.attempts,
            renamed: mappings.into_iter().filter(ColumnMapping::is_rename).collect(),
            empty_rows_removed,
            rows_lost,
            overflow_columns,
            warnings,
            sample,
        })
    }

    pub fn detect_overflow(&self) -> Result<OverflowFinding> {
        let table = self.table_ident()?;
        overflow::detect(&self.engine, &table, &self.config.thresholds)
    }

    pub fn repair_overflow(&mut self, hint: Option<&SchemaHint>) -> Result<RepairReport> {
        let table = self.table_ident()?;
        let candidates = self.config.dialect_candidates()?;
        let ctx = RepairContext {
            engine: &self.engine,
            table: &table,
            source: &self.source.path,
            candidates: &candidates,
            options: self.load_options(),
            thresholds: self.config.thresholds,
            scratch_tag: &self.tag,
        };
        let report = overflow::repair(&ctx, hint)?;
        self.refresh_table(table)?;
        Ok(report)
    }

    /// Normalize the loaded table's column names in place.
    pub fn normalize_columns(&mut self) -> Result<NormalizeReport> {
        let table = self.table_ident()?;
        let mappings = dialect::normalize_table_columns(&self.engine, &table)?;
        let loaded = self.refresh_table(table)?;
        Ok(NormalizeReport {
            renames: mappings.into_iter().filter(ColumnMapping::is_rename).collect(),
            new_schema: loaded.column_names(),
        })
    }

    /// Run an ad-hoc query. Errors carry the loaded table's columns.
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        let statements = plan::statement_count(sql);
        if statements > 1 {
            return Err(CleanError::Statement {
                sql: sql.to_string(),
                message: staging::multi_statement_message(statements),
                available_columns: self.available_columns(),
            });
        }
        guard::check(sql).map_err(CleanError::Rejected)?;
        self.engine.query(sql).map_err(|e| match e {
            CleanError::Engine(err) => CleanError::Statement {
                sql: sql.to_string(),
                message: err.to_string(),
                available_columns: self.available_columns(),
            },
            other => other,
        })
    }

    fn available_columns(&self) -> Vec<String> {
        self.table
            .as_ref()
            .map(LoadedTable::column_names)
            .unwrap_or_default()
    }

    pub fn validate_column(&self, name: &str) -> Result<Ident> {
        let table = self.table_ident()?;
        profile::resolve_column(&self.engine, &table, name)
    }

    pub fn column_profiles(&self) -> Result<Vec<ColumnProfile>> {
        profile::column_profiles(&self.engine, &self.table_ident()?)
    }

    /// Coercion suggestions for every column that has one.
    pub fn coercion_suggestions(&self) -> Result<Vec<CoercionSuggestion>> {
        let table = self.table_ident()?;
        let mut out = Vec::new();
        for column in self.engine.column_idents(&table)? {
            let s = profile::suggest_type_coercion(
                &self.engine,
                &table,
                &column,
                &self.config.thresholds,
            )?;
            if !s.suggested_types.is_empty() {
                out.push(s);
            }
        }
        Ok(out)
    }

    pub fn suggest_type_coercion(&self, column: &str) -> Result<CoercionSuggestion> {
        let col = self.validate_column(column)?;
        profile::suggest_type_coercion(&self.engine, &self.table_ident()?, &col, &self.config.thresholds)
    }

    pub fn value_distribution(&self, column: &str, limit: usize) -> Result<ValueDistribution> {
        let col = self.validate_column(column)?;
        profile::value_distribution(&self.engine, &self.table_ident()?, &col, limit)
    }

    pub fn iqr_bounds(&self, column: &str) -> Result<Option<IqrBounds>> {
        let col = self.validate_column(column)?;
        profile::iqr_bounds(&self.engine, &self.table_ident()?, &col)
    }

    pub fn date_formats(&self, column: &str) -> Result<DateFormatReport> {
        let col = self.validate_column(column)?;
        profile::date_formats(&self.engine, &self.table_ident()?, &col)
    }

    pub fn profile(&self) -> Result<ProfileReport> {
        let loaded = self.require_table()?;
        Ok(ProfileReport {
            table: loaded.name.as_str().to_string(),
            rows: loaded.row_count,
            columns: self.column_profiles()?,
            suggestions: self.coercion_suggestions()?,
        })
    }

    /// All column heuristics at once; `top` bounds the value distribution.
    pub fn profile_column(&self, column: &str, top: usize) -> Result<ColumnReport> {
        let table = self.table_ident()?;
        let col = self.validate_column(column)?;
        Ok(ColumnReport {
            column: col.as_str().to_string(),
            coercion: profile::suggest_type_coercion(
                &self.engine,
                &table,
                &col,
                &self.config.thresholds,
            )?,
            distribution: profile::value_distribution(&self.engine, &table, &col, top)?,
            iqr: profile::iqr_bounds(&self.engine, &table, &col)?,
            dates: profile::date_formats(&self.engine, &table, &col)?,
        })
    }

    pub fn preview(&mut self, plan: &CleaningPlan) -> Result<PreviewReport> {
        let table = self.table_ident()?;
        self.staging_state = StagingState::Staged;
        let report = staging::preview(&self.engine, &table, plan, self.config.preview_rows)?;
        self.staging_state = report.state;
        Ok(report)
    }

    /// Execute a plan. On commit the export becomes the session's source.
    pub fn execute(&mut self, plan: &CleaningPlan, output: Option<&Path>) -> Result<ExecuteReport> {
        let table = self.table_ident()?;
        let artifact = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| staging::cleaned_path(&self.source.path));

        self.staging_state = StagingState::Staged;
        match staging::execute(&self.engine, &table, plan, &artifact, self.config.delimiter) {
            Ok(report) => {
                self.source = SourceArtifact::new(report.artifact.clone());
                self.refresh_table(table)?;
                self.staging_state = report.state;
                Ok(report)
            }
            Err(e) => {
                if e.is_rollback() {
                    self.staging_state = StagingState::RolledBack;
                }
                Err(e)
            }
        }
    }

    pub fn inspect_raw(&self, lines: usize) -> Result<String> {
        dialect::inspect_raw(&self.source.path, lines)
    }
}
