//! Parse-dialect probing.
//!
//! A delimited file is trial-loaded with each candidate quote/escape pair in a
//! fixed preference order. Every load is tolerant: short rows are NULL-padded
//! and malformed rows never abort the load. Each successful load is scored by
//! the number of trailing sparse columns it produced, and the candidate with
//! the lowest score wins. A score of zero ends the search early.
//!
//! The search itself is [`choose_dialect`], a pure function over the candidate
//! list and an evaluator closure, so selection can be tested without a
//! database.

use crate::config::Thresholds;
use crate::engine::{string_literal, Ident, QueryEngine};
use crate::error::{CleanError, Result};
use crate::naming::{self, ColumnMapping};
use crate::overflow;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Lines shown when a file cannot be parsed at all.
pub const RAW_PREVIEW_LINES: usize = 10;

/// One quote/escape configuration to try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialectCandidate {
    pub name: &'static str,
    /// `None` uses the session delimiter.
    pub delimiter: Option<char>,
    /// `None` lets the engine sniff quoting and skip bad rows.
    pub quote: Option<char>,
    pub escape: Option<char>,
}

impl DialectCandidate {
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }
}

/// Built-in candidates in preference order.
pub fn default_candidates() -> Vec<DialectCandidate> {
    vec![
        DialectCandidate {
            name: "double-quote",
            delimiter: None,
            quote: Some('"'),
            escape: Some('"'),
        },
        DialectCandidate {
            name: "backslash-escape",
            delimiter: None,
            quote: Some('"'),
            escape: Some('\\'),
        },
        DialectCandidate {
            name: "single-quote",
            delimiter: None,
            quote: Some('\''),
            escape: Some('\''),
        },
        DialectCandidate {
            name: "auto-detect",
            delimiter: None,
            quote: None,
            escape: None,
        },
    ]
}

/// Options shared by every trial load.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub delimiter: char,
    pub all_varchar: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            all_varchar: true,
        }
    }
}

/// Outcome of one trial load.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct Attempt {
    pub candidate: String,
    pub loaded: bool,
    pub overflow_columns: Option<usize>,
}

/// Winner of a probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub candidate: DialectCandidate,
    pub overflow_columns: usize,
    pub attempts: Vec<Attempt>,
}

/// Pick the candidate with the fewest overflow columns.
///
/// `evaluate` returns `None` when a candidate fails to load. Ties keep the
/// earlier candidate and a score of zero stops the search. Returns the index
/// of the winner and its score.
pub fn choose_dialect<F>(candidates: &[DialectCandidate], mut evaluate: F) -> Option<(usize, usize)>
where
    F: FnMut(usize, &DialectCandidate) -> Option<usize>,
{
    let mut best: Option<(usize, usize)> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        let Some(score) = evaluate(idx, candidate) else {
            continue;
        };
        if best.map_or(true, |(_, best_score)| score < best_score) {
            best = Some((idx, score));
            if score == 0 {
                break;
            }
        }
    }
    best
}

/// `read_csv(...)` table function call for a candidate.
pub fn read_csv_expr(path: &Path, candidate: &DialectCandidate, options: &LoadOptions) -> String {
    let delimiter = candidate.delimiter.unwrap_or(options.delimiter);
    let mut args = vec![
        string_literal(&path.display().to_string()),
        format!("delim = {}", string_literal(&delimiter.to_string())),
        "header = true".to_string(),
        "auto_detect = true".to_string(),
        "strict_mode = false".to_string(),
        "null_padding = true".to_string(),
        format!("all_varchar = {}", options.all_varchar),
    ];
    match (candidate.quote, candidate.escape) {
        (Some(quote), escape) => {
            args.push(format!("quote = {}", string_literal(&quote.to_string())));
            if let Some(escape) = escape {
                args.push(format!("escape = {}", string_literal(&escape.to_string())));
            }
        }
        (None, _) => args.push("ignore_errors = true".to_string()),
    }
    format!("read_csv({})", args.join(", "))
}

/// Replace `table` with the file parsed under `candidate`.
pub fn load_candidate(
    engine: &QueryEngine,
    path: &Path,
    table: &Ident,
    candidate: &DialectCandidate,
    options: &LoadOptions,
) -> Result<()> {
    engine.execute(&format!(
        "CREATE OR REPLACE TABLE {} AS SELECT * FROM {}",
        table,
        read_csv_expr(path, candidate, options)
    ))?;
    Ok(())
}

/// Trial-load every candidate into `table` and leave the best one loaded.
pub fn probe(
    engine: &QueryEngine,
    path: &Path,
    table: &Ident,
    candidates: &[DialectCandidate],
    options: &LoadOptions,
    thresholds: &Thresholds,
) -> Result<ProbeOutcome> {
    if !path.exists() {
        return Err(CleanError::NotFound(path.to_path_buf()));
    }

    let mut attempts = Vec::with_capacity(candidates.len());
    let mut last_loaded: Option<usize> = None;

    let best = choose_dialect(candidates, |idx, candidate| {
        let score = load_candidate(engine, path, table, candidate, options)
            .and_then(|_| {
                last_loaded = Some(idx);
                overflow::sparse_column_count(engine, table, thresholds)
            });
        match score {
            Ok(score) => {
                debug!(candidate = candidate.name, score, "dialect trial");
                attempts.push(Attempt {
                    candidate: candidate.name.to_string(),
                    loaded: true,
                    overflow_columns: Some(score),
                });
                Some(score)
            }
            Err(e) => {
                debug!(candidate = candidate.name, error = %e, "dialect trial failed");
                attempts.push(Attempt {
                    candidate: candidate.name.to_string(),
                    loaded: false,
                    overflow_columns: None,
                });
                None
            }
        }
    });

    let Some((idx, overflow_columns)) = best else {
        warn!(path = %path.display(), "no dialect candidate could load the file");
        return Err(CleanError::ParseFailure {
            path: path.to_path_buf(),
            attempts: candidates.len(),
            raw_preview: inspect_raw(path, RAW_PREVIEW_LINES).unwrap_or_default(),
        });
    };

    let candidate = candidates[idx].clone();
    if last_loaded != Some(idx) {
        load_candidate(engine, path, table, &candidate, options)?;
    }

    info!(
        candidate = candidate.name,
        overflow_columns, "selected parse dialect"
    );

    Ok(ProbeOutcome {
        candidate,
        overflow_columns,
        attempts,
    })
}

/// Rename every column of `table` to its normalized form.
///
/// The table is rebuilt in one statement so renames can never collide with
/// each other midway.
pub fn normalize_table_columns(engine: &QueryEngine, table: &Ident) -> Result<Vec<ColumnMapping>> {
    let names = engine.column_names(table)?;
    let mappings = naming::normalize_columns(&names);
    if !mappings.iter().any(ColumnMapping::is_rename) {
        return Ok(mappings);
    }

    let select = mappings
        .iter()
        .map(|m| {
            format!(
                "{} AS {}",
                Ident::from_catalog(m.original.as_str()),
                Ident::from_catalog(m.normalized.as_str())
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let scratch = table.with_suffix("renamed");
    engine.execute(&format!(
        "CREATE OR REPLACE TABLE {} AS SELECT {} FROM {}",
        scratch, select, table
    ))?;
    engine.swap_in(&scratch, table)?;

    Ok(mappings)
}

/// Delete rows in which every cell is NULL. Returns how many were removed.
pub fn remove_empty_rows(engine: &QueryEngine, table: &Ident) -> Result<u64> {
    let columns = engine.column_idents(table)?;
    if columns.is_empty() {
        return Ok(0);
    }
    let all_null = columns
        .iter()
        .map(|c| format!("{} IS NULL", c))
        .collect::<Vec<_>>()
        .join(" AND ");

    let empty = engine.scalar_u64(&format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        table, all_null
    ))?;
    if empty > 0 {
        engine.execute(&format!("DELETE FROM {} WHERE {}", table, all_null))?;
        debug!(table = table.as_str(), empty, "removed fully empty rows");
    }
    Ok(empty)
}

/// Number of data lines in a file: newline count, plus an unterminated final
/// line, minus the header.
pub fn count_source_rows(path: &Path) -> Result<u64> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; 1024 * 1024];
    let mut newlines = 0u64;
    let mut last_byte: Option<u8> = None;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        newlines += memchr::memchr_iter(b'\n', &buf[..n]).count() as u64;
        last_byte = Some(buf[n - 1]);
    }

    let lines = match last_byte {
        None => 0,
        Some(b'\n') => newlines,
        Some(_) => newlines + 1,
    };
    Ok(lines.saturating_sub(1))
}

/// First `lines` lines of a file, decoded lossily.
pub fn inspect_raw(path: &Path, lines: usize) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut out = String::new();
    let mut line = Vec::new();

    for _ in 0..lines {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        out.push_str(&String::from_utf8_lossy(&line));
    }
    Ok(out)
}
