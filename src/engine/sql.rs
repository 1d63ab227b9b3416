//! Narrow query-building helpers.
//!
//! Query text is only ever assembled from [`Ident`] values and escaped string
//! literals. User-supplied names must pass [`Ident::new`], which accepts only
//! normalized identifiers; names read back from the engine's own catalog are
//! wrapped with [`Ident::from_catalog`] and always emitted quoted. Row values
//! are bound as parameters, never interpolated.

use crate::error::{CleanError, Result};
use crate::naming;
use std::fmt;

/// A quoted SQL identifier (table or column name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    /// Validate a caller-supplied name. Only normalized names are accepted.
    pub fn new(name: &str) -> Result<Self> {
        if naming::is_normalized(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(CleanError::InvalidIdentifier(name.to_string()))
        }
    }

    /// Wrap a name the engine reported for an existing table or column.
    pub(crate) fn from_catalog(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a scratch name from this identifier and a tag.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self(format!("{}_{}", self.0, suffix))
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.replace('"', "\"\""))
    }
}

/// Escape a value as a single-quoted SQL string literal.
///
/// Used only where the engine cannot bind a parameter (table-function options
/// such as file paths and delimiters in `read_csv`, and `COPY` targets).
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Comma-separated quoted column list.
pub fn column_list(columns: &[Ident]) -> String {
    columns
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `?, ?, ?` placeholder list for `count` bound parameters.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// `TRUE` when the cell holds a non-blank value.
pub fn has_value_expr(column: &Ident) -> String {
    format!(
        "({col} IS NOT NULL AND TRIM(CAST({col} AS VARCHAR)) != '')",
        col = column
    )
}
