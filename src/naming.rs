//! Deterministic identifier normalization for tables and columns.
//!
//! Arbitrary user-provided names (file names, CSV headers) are mapped to
//! lowercase snake_case identifiers that are safe to place in a query without
//! further escaping. The mapping is stable: the same ordered input always
//! produces the same output, including how collisions are resolved.

use ahash::AHashSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;

/// Prefix for identifiers that would otherwise start with a digit.
pub const DIGIT_PREFIX: &str = "col_";

/// Prefix for generated table names.
pub const TABLE_PREFIX: &str = "table_";

static CAMEL_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.)([A-Z][a-z]+)").unwrap());
static CAMEL_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());
static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static NORMALIZED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap());

/// A source name and the identifier it was mapped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct ColumnMapping {
    pub original: String,
    pub normalized: String,
}

impl ColumnMapping {
    pub fn is_rename(&self) -> bool {
        self.original != self.normalized
    }
}

/// Normalize a single name. Returns `None` when nothing identifier-like is left.
pub fn normalize_identifier(name: &str) -> Option<String> {
    let split = CAMEL_WORD.replace_all(name, "${1}_${2}");
    let split = CAMEL_TAIL.replace_all(&split, "${1}_${2}");
    let lower = split.to_lowercase();
    let collapsed = NON_ALNUM.replace_all(&lower, "_");
    let trimmed = collapsed.trim_matches('_');

    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        Some(format!("{}{}", DIGIT_PREFIX, trimmed))
    } else {
        Some(trimmed.to_string())
    }
}

/// Normalize a name, falling back to a positional name when it is empty.
pub fn normalize_name(name: &str, position: usize) -> String {
    normalize_identifier(name).unwrap_or_else(|| fallback_name(position))
}

/// Positional name used when a source name normalizes to nothing.
pub fn fallback_name(position: usize) -> String {
    format!("column_{}", position)
}

/// Whether `name` is already in normalized form.
pub fn is_normalized(name: &str) -> bool {
    NORMALIZED.is_match(name)
}

/// Return `base`, or `base_N` with the smallest N >= 1 not present in `taken`.
pub fn unique_name(base: &str, taken: &AHashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 1usize;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Normalize an ordered list of column names.
///
/// Collisions are resolved in encounter order: the first occurrence keeps the
/// plain name and each later conflict gets the next free numeric suffix.
pub fn normalize_columns<S: AsRef<str>>(names: &[S]) -> Vec<ColumnMapping> {
    let mut taken: AHashSet<String> = AHashSet::with_capacity(names.len());
    let mut mappings = Vec::with_capacity(names.len());

    for (position, name) in names.iter().enumerate() {
        let name = name.as_ref();
        let base = normalize_name(name, position);
        let normalized = unique_name(&base, &taken);
        taken.insert(normalized.clone());
        mappings.push(ColumnMapping {
            original: name.to_string(),
            normalized,
        });
    }

    mappings
}

/// Derive the table name for a source file: `table_<normalized stem>`.
pub fn table_name_for_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match normalize_identifier(&stem) {
        Some(name) => format!("{}{}", TABLE_PREFIX, name),
        None => format!("{}data", TABLE_PREFIX),
    }
}
