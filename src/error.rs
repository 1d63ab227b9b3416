//! Structured error types for the cleaning core.
//!
//! Every error carries the context an automated caller needs to correct itself
//! without a human in the loop: the available column list for unknown columns,
//! the exact row delta and step log for a rolled-back plan, and a raw preview
//! of the file when no dialect could parse it.
//!
//! Errors serialize as `{code, message, context}` so the CLI can emit them in
//! `--json` mode unchanged.

use crate::guard::GuardRejection;
use crate::staging::StatementOutcome;
use serde::ser::SerializeStruct;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the cleaning core.
#[derive(Error, Debug)]
pub enum CleanError {
    /// Source artifact does not exist.
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// No dialect candidate could load the file.
    #[error(
        "Could not parse {} with any of {attempts} dialect candidates; inspect the raw content to find the delimiter or header issue",
        .path.display()
    )]
    ParseFailure {
        path: PathBuf,
        attempts: usize,
        raw_preview: String,
    },

    /// An operation needs a loaded table but the session has none.
    #[error("No table loaded. Load a CSV first")]
    NoTableLoaded,

    /// A caller referenced a column that does not exist.
    #[error("Column '{column}' does not exist. Available columns: {}", .available.join(", "))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    /// An identifier failed validation and cannot be placed in a query.
    #[error("Invalid identifier '{0}': expected a normalized name (lowercase letters, digits, underscores)")]
    InvalidIdentifier(String),

    /// The destructive-operation guard rejected a statement.
    #[error("{0}")]
    Rejected(GuardRejection),

    /// A statement failed inside the query engine.
    #[error("Statement failed: {message}")]
    Statement {
        sql: String,
        message: String,
        available_columns: Vec<String>,
    },

    /// Executing a plan would have removed rows; the staging table was rolled back.
    #[error(
        "Cleaning dropped {delta} rows ({rows_before} -> {rows_after}). Changes were rolled back. Rewrite the plan using UPDATE statements or a flag column; rows must never be removed"
    )]
    RowCountShrank {
        rows_before: u64,
        rows_after: u64,
        delta: u64,
        steps: Vec<StatementOutcome>,
    },

    /// A rolled-back staging table does not match the Loaded Table it was restored from.
    #[error("Rollback verification failed: staging fingerprint {actual} does not match {expected}")]
    RollbackVerification { expected: String, actual: String },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DuckDB error wrapper.
    #[error("DuckDB error: {0}")]
    Engine(#[from] duckdb::Error),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML config parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CleanError {
    /// Stable error code for callers that branch on the error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::ParseFailure { .. } => "PARSE_FAILURE",
            Self::NoTableLoaded => "NO_TABLE_LOADED",
            Self::ColumnNotFound { .. } => "COLUMN_NOT_FOUND",
            Self::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            Self::Rejected(_) => "REJECTED",
            Self::Statement { .. } => "STATEMENT_FAILED",
            Self::RowCountShrank { .. } => "ROW_COUNT_SHRANK",
            Self::RollbackVerification { .. } => "ROLLBACK_VERIFICATION",
            Self::Config(_) => "INVALID_CONFIG",
            Self::Engine(_) => "ENGINE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Yaml(_) => "YAML_ERROR",
        }
    }

    /// True for the single fatal condition of the execute path.
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::RowCountShrank { .. })
    }

    /// Variant-specific diagnostic payload.
    pub fn context(&self) -> serde_json::Value {
        match self {
            Self::ParseFailure {
                path,
                attempts,
                raw_preview,
            } => serde_json::json!({
                "path": path.display().to_string(),
                "attempts": attempts,
                "raw_preview": raw_preview,
            }),
            Self::ColumnNotFound { column, available } => serde_json::json!({
                "column": column,
                "available_columns": available,
            }),
            Self::Rejected(rejection) => {
                serde_json::to_value(rejection).unwrap_or(serde_json::Value::Null)
            }
            Self::Statement {
                sql,
                available_columns,
                ..
            } => serde_json::json!({
                "sql": sql,
                "available_columns": available_columns,
            }),
            Self::RowCountShrank {
                rows_before,
                rows_after,
                delta,
                steps,
            } => serde_json::json!({
                "rows_before": rows_before,
                "rows_after": rows_after,
                "delta": delta,
                "steps": steps,
            }),
            Self::RollbackVerification { expected, actual } => serde_json::json!({
                "expected": expected,
                "actual": actual,
            }),
            _ => serde_json::Value::Null,
        }
    }
}

/// Owned, schema-described form of a serialized [`CleanError`].
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    pub context: serde_json::Value,
}

impl From<&CleanError> for ErrorReport {
    fn from(err: &CleanError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            context: err.context(),
        }
    }
}

impl Serialize for CleanError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("CleanError", 3)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.serialize_field("context", &self.context())?;
        state.end()
    }
}

/// Result type alias for the cleaning core.
pub type Result<T> = std::result::Result<T, CleanError>;
