//! Embedded DuckDB query engine.
//!
//! Every session owns one [`QueryEngine`], so tables of different sessions can
//! never collide. The engine exposes the small set of operations the cleaning
//! core needs: run a query, execute a single statement, inspect a table's
//! schema and row count, copy/replace/drop tables, fingerprint a table's full
//! content and export a table as a delimited file.
//!
//! # Example
//!
//! ```ignore
//! use clean_csv::engine::{QueryEngine, Ident};
//!
//! let engine = QueryEngine::in_memory().unwrap();
//! engine.execute("CREATE TABLE t AS SELECT 1 AS id").unwrap();
//! let table = Ident::new("t").unwrap();
//! assert_eq!(engine.row_count(&table).unwrap(), 1);
//! ```

mod output;
mod sql;

pub use output::{OutputFormat, QueryResultFormatter};
pub use sql::{column_list, has_value_expr, placeholders, string_literal, Ident};

use crate::error::Result;
use duckdb::types::{Value, ValueRef};
use duckdb::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Name and engine type of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
}

/// Result of a query execution
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows of data; `None` is SQL NULL
    pub rows: Vec<Vec<Option<String>>>,
    /// Query execution time in seconds
    #[serde(skip)]
    pub execution_time_secs: f64,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Copy of this result without the named column.
    pub fn without_column(&self, name: &str) -> QueryResult {
        let Some(idx) = self.column_index(name) else {
            return self.clone();
        };
        let mut columns = self.columns.clone();
        columns.remove(idx);
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                if idx < row.len() {
                    row.remove(idx);
                }
                row
            })
            .collect();
        QueryResult {
            columns,
            rows,
            execution_time_secs: self.execution_time_secs,
        }
    }
}

/// The query engine that wraps one DuckDB connection
pub struct QueryEngine {
    conn: Connection,
    temp_db_path: Option<PathBuf>,
}

impl QueryEngine {
    /// Create an in-memory engine.
    pub fn in_memory() -> Result<Self> {
        Self::new(false, None, "mem")
    }

    /// Create an engine. In disk mode the database lives in a temp file whose
    /// name includes `session_tag`, so concurrent sessions never share it.
    pub fn new(disk_mode: bool, memory_limit: Option<&str>, session_tag: &str) -> Result<Self> {
        let (conn, temp_db_path) = if disk_mode {
            let temp_path =
                std::env::temp_dir().join(format!("clean-csv-{}.duckdb", session_tag));
            let conn = Connection::open(&temp_path)?;
            (conn, Some(temp_path))
        } else {
            (Connection::open_in_memory()?, None)
        };

        if let Some(limit) = memory_limit {
            conn.execute(
                &format!("SET memory_limit = {}", string_literal(limit)),
                [],
            )?;
        }

        Ok(Self { conn, temp_db_path })
    }

    /// Execute a query and return the results
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        self.query_with_params(sql, &[])
    }

    /// Execute a query with bound parameters
    pub fn query_with_params(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start = std::time::Instant::now();

        let mut stmt = self.conn.prepare(sql)?;
        let mut rows_result = stmt.query(duckdb::params_from_iter(params.iter()))?;

        let mut rows: Vec<Vec<Option<String>>> = Vec::new();
        let mut column_count = 0;

        while let Some(row) = rows_result.next()? {
            if column_count == 0 {
                column_count = row.as_ref().column_count();
            }
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(render_value(row.get_ref(i)?));
            }
            rows.push(values);
        }

        // Release the mutable borrow before reading column metadata
        drop(rows_result);

        let columns: Vec<String> = (0..stmt.column_count())
            .map(|i| {
                stmt.column_name(i)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("col{}", i))
            })
            .collect();

        Ok(QueryResult {
            columns,
            rows,
            execution_time_secs: start.elapsed().as_secs_f64(),
        })
    }

    /// Execute a single statement that doesn't return results
    pub fn execute(&self, sql: &str) -> Result<usize> {
        Ok(self.conn.execute(sql, [])?)
    }

    /// Run a query returning one integer cell.
    pub fn scalar_u64(&self, sql: &str) -> Result<u64> {
        let value: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(value.max(0) as u64)
    }

    pub fn row_count(&self, table: &Ident) -> Result<u64> {
        self.scalar_u64(&format!("SELECT COUNT(*) FROM {}", table))
    }

    /// Ordered column names and types of a table
    pub fn columns(&self, table: &Ident) -> Result<Vec<ColumnInfo>> {
        let result = self.query(&format!("DESCRIBE {}", table))?;
        Ok(result
            .rows
            .into_iter()
            .map(|mut row| {
                row.truncate(2);
                let column_type = row.pop().flatten().unwrap_or_default();
                let name = row.pop().flatten().unwrap_or_default();
                ColumnInfo { name, column_type }
            })
            .collect())
    }

    pub fn column_names(&self, table: &Ident) -> Result<Vec<String>> {
        Ok(self.columns(table)?.into_iter().map(|c| c.name).collect())
    }

    /// Column identifiers of a table, as reported by the catalog
    pub fn column_idents(&self, table: &Ident) -> Result<Vec<Ident>> {
        Ok(self
            .column_names(table)?
            .into_iter()
            .map(Ident::from_catalog)
            .collect())
    }

    pub fn table_exists(&self, table: &Ident) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'main' AND table_name = ?",
            [table.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get list of tables in the database
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let result = self.query(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'main' ORDER BY table_name",
        )?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|mut r| r.pop().flatten())
            .collect())
    }

    pub fn drop_table(&self, table: &Ident) -> Result<()> {
        self.execute(&format!("DROP TABLE IF EXISTS {}", table))?;
        Ok(())
    }

    /// `target` becomes a verbatim copy of `source`.
    pub fn copy_table(&self, source: &Ident, target: &Ident) -> Result<()> {
        self.execute(&format!(
            "CREATE OR REPLACE TABLE {} AS SELECT * FROM {}",
            target, source
        ))?;
        Ok(())
    }

    /// Replace `target` wholesale with `replacement`, consuming `replacement`.
    pub fn swap_in(&self, replacement: &Ident, target: &Ident) -> Result<()> {
        self.drop_table(target)?;
        self.execute(&format!(
            "ALTER TABLE {} RENAME TO {}",
            replacement, target
        ))?;
        Ok(())
    }

    /// SHA-256 over the schema and an in-order scan of every cell.
    pub fn fingerprint(&self, table: &Ident) -> Result<String> {
        let mut hasher = Sha256::new();
        for column in self.columns(table)? {
            hasher.update(column.name.as_bytes());
            hasher.update([0x1f]);
            hasher.update(column.column_type.as_bytes());
            hasher.update([0x1e]);
        }

        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {}", table))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let count = row.as_ref().column_count();
            for i in 0..count {
                match render_value(row.get_ref(i)?) {
                    Some(v) => {
                        hasher.update([0x01]);
                        hasher.update(v.as_bytes());
                    }
                    None => hasher.update([0x00]),
                }
                hasher.update([0x1f]);
            }
            hasher.update([0x1e]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Write a table to a delimited text file with a header row.
    pub fn export_csv(&self, table: &Ident, path: &Path, delimiter: char) -> Result<()> {
        self.execute(&format!(
            "COPY {} TO {} (HEADER, DELIMITER {})",
            table,
            string_literal(&path.display().to_string()),
            string_literal(&delimiter.to_string())
        ))?;
        Ok(())
    }

    /// Get the underlying DuckDB connection (for appenders and prepared statements)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for QueryEngine {
    fn drop(&mut self) {
        if let Some(ref path) = self.temp_db_path {
            let _ = std::fs::remove_file(path);
            let wal_path = path.with_extension("duckdb.wal");
            let _ = std::fs::remove_file(wal_path);
        }
    }
}

/// Render one cell as text; `None` for SQL NULL.
fn render_value(value: ValueRef<'_>) -> Option<String> {
    let text = match value {
        ValueRef::Null => return None,
        ValueRef::Boolean(b) => b.to_string(),
        ValueRef::TinyInt(n) => n.to_string(),
        ValueRef::SmallInt(n) => n.to_string(),
        ValueRef::Int(n) => n.to_string(),
        ValueRef::BigInt(n) => n.to_string(),
        ValueRef::HugeInt(n) => n.to_string(),
        ValueRef::UTinyInt(n) => n.to_string(),
        ValueRef::USmallInt(n) => n.to_string(),
        ValueRef::UInt(n) => n.to_string(),
        ValueRef::UBigInt(n) => n.to_string(),
        ValueRef::Float(f) => f.to_string(),
        ValueRef::Double(f) => f.to_string(),
        ValueRef::Decimal(d) => d.to_string(),
        ValueRef::Text(s) => String::from_utf8_lossy(s).to_string(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
        ValueRef::Timestamp(_, ts) => {
            // microseconds since epoch
            let secs = ts.div_euclid(1_000_000);
            let nanos = (ts.rem_euclid(1_000_000) * 1000) as u32;
            match chrono::DateTime::from_timestamp(secs, nanos) {
                Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
                None => ts.to_string(),
            }
        }
        ValueRef::Date32(days) => {
            // 719163 = days from 0001-01-01 to 1970-01-01
            match chrono::NaiveDate::from_num_days_from_ce_opt(719163 + days) {
                Some(date) => date.format("%Y-%m-%d").to_string(),
                None => days.to_string(),
            }
        }
        ValueRef::Time64(_, micros) => {
            let secs = (micros / 1_000_000) as u32;
            let nanos = ((micros % 1_000_000) * 1000) as u32;
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos) {
                Some(time) => time.format("%H:%M:%S").to_string(),
                None => micros.to_string(),
            }
        }
        other => format!("{:?}", other),
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_table() -> QueryEngine {
        let engine = QueryEngine::in_memory().unwrap();
        engine
            .execute("CREATE TABLE t AS SELECT * FROM (VALUES (1, 'a'), (2, NULL)) v(id, name)")
            .unwrap();
        engine
    }

    #[test]
    fn test_query_renders_nulls_as_none() {
        let engine = engine_with_table();
        let result = engine.query("SELECT id, name FROM t ORDER BY id").unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.rows[0][1].as_deref(), Some("a"));
        assert_eq!(result.rows[1][1], None);
    }

    #[test]
    fn test_columns_and_row_count() {
        let engine = engine_with_table();
        let t = Ident::new("t").unwrap();
        assert_eq!(engine.row_count(&t).unwrap(), 2);
        assert_eq!(engine.column_names(&t).unwrap(), vec!["id", "name"]);
        assert!(engine.table_exists(&t).unwrap());
        assert!(!engine.table_exists(&Ident::new("missing").unwrap()).unwrap());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let engine = engine_with_table();
        let t = Ident::new("t").unwrap();
        let copy = Ident::new("t_copy").unwrap();
        engine.copy_table(&t, &copy).unwrap();
        assert_eq!(engine.fingerprint(&t).unwrap(), engine.fingerprint(&copy).unwrap());

        engine.execute("UPDATE t_copy SET name = 'b' WHERE id = 2").unwrap();
        assert_ne!(engine.fingerprint(&t).unwrap(), engine.fingerprint(&copy).unwrap());
    }

    #[test]
    fn test_fingerprint_distinguishes_null_from_text() {
        let engine = QueryEngine::in_memory().unwrap();
        engine.execute("CREATE TABLE a AS SELECT NULL::VARCHAR AS v").unwrap();
        engine.execute("CREATE TABLE b AS SELECT 'NULL' AS v").unwrap();
        let a = Ident::new("a").unwrap();
        let b = Ident::new("b").unwrap();
        assert_ne!(engine.fingerprint(&a).unwrap(), engine.fingerprint(&b).unwrap());
    }

    #[test]
    fn test_swap_in_replaces_table() {
        let engine = engine_with_table();
        engine.execute("CREATE TABLE t_new AS SELECT 42 AS answer").unwrap();
        let t = Ident::new("t").unwrap();
        engine.swap_in(&Ident::new("t_new").unwrap(), &t).unwrap();
        assert_eq!(engine.column_names(&t).unwrap(), vec!["answer"]);
        assert_eq!(engine.list_tables().unwrap(), vec!["t"]);
    }

    #[test]
    fn test_without_column() {
        let engine = engine_with_table();
        let result = engine.query("SELECT * FROM t ORDER BY id").unwrap();
        let trimmed = result.without_column("id");
        assert_eq!(trimmed.columns, vec!["name"]);
        assert_eq!(trimmed.rows[0], vec![Some("a".to_string())]);
    }
}
