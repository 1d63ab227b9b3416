//! Integration tests for overflow detection and repair.

use clean_csv::config::{CleanConfig, Thresholds};
use clean_csv::dialect::{default_candidates, DialectCandidate, LoadOptions};
use clean_csv::engine::{Ident, QueryEngine};
use clean_csv::error::CleanError;
use clean_csv::overflow::{self, IndicatorKind, RepairContext, RepairMode, SchemaHint};
use clean_csv::session::Session;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// 100 rows of `id, name, age, city`. Every 20th row had an unquoted
/// "Last, First" name, pushing age and city one column right and spilling
/// three extra fields into `column4..column6`.
fn shifted_table(engine: &QueryEngine) -> Ident {
    engine
        .execute(
            "CREATE TABLE people AS SELECT \
                CAST(i AS VARCHAR) AS id, \
                CASE WHEN i % 20 = 0 THEN 'Smith' ELSE 'Person ' || CAST(i AS VARCHAR) END AS name, \
                CASE WHEN i % 20 = 0 THEN ' John' ELSE CAST(20 + i % 50 AS VARCHAR) END AS age, \
                CASE WHEN i % 20 = 0 THEN '42' ELSE 'Oslo' END AS city, \
                CASE WHEN i % 20 = 0 THEN 'Bergen' END AS column4, \
                CASE WHEN i % 20 = 0 THEN 'x' END AS column5, \
                CASE WHEN i % 20 = 0 THEN 'y' END AS column6 \
             FROM range(100) r(i) ORDER BY i",
        )
        .unwrap();
    Ident::new("people").unwrap()
}

fn context<'a>(
    engine: &'a QueryEngine,
    table: &'a Ident,
    source: &'a Path,
    candidates: &'a [DialectCandidate],
) -> RepairContext<'a> {
    RepairContext {
        engine,
        table,
        source,
        candidates,
        options: LoadOptions::default(),
        thresholds: Thresholds::default(),
        scratch_tag: "test",
    }
}

#[test]
fn test_detects_three_trailing_overflow_columns() {
    let engine = QueryEngine::in_memory().unwrap();
    let table = shifted_table(&engine);

    let finding = overflow::detect(&engine, &table, &Thresholds::default()).unwrap();

    assert!(finding.detected);
    assert_eq!(finding.total_rows, 100);
    assert_eq!(finding.total_columns, 7);
    assert_eq!(finding.sparse_run(), ["column4", "column5", "column6"]);
    assert_eq!(finding.overflow_columns, vec!["column4", "column5", "column6"]);
    assert_eq!(finding.suspected_anchor_column.as_deref(), Some("city"));

    let variance = finding
        .indicator(IndicatorKind::RowValueVariance)
        .expect("variance indicator");
    let widths: Vec<u64> = variance
        .distribution
        .iter()
        .map(|w| w.non_null_count)
        .collect();
    assert_eq!(widths, vec![4, 7]);
    assert!(finding.has(IndicatorKind::OverflowColumnNaming));
}

#[test]
fn test_load_detects_unescaped_comma_row() {
    let mut csv = String::from("id,name,age,city\n");
    for i in 1..=100 {
        if i == 50 {
            csv.push_str("50,Smith, John, Jr.,42,Bergen, Norway\n");
        } else {
            csv.push_str(&format!("{},Person {},{},Oslo\n", i, i, 20 + i % 50));
        }
    }
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("people.csv");
    fs::write(&path, csv).unwrap();

    let mut session = Session::open(&path, CleanConfig::default()).unwrap();
    let report = session.load().unwrap();
    assert_eq!(report.rows, 100);
    assert_eq!(report.overflow_columns, vec!["column4", "column5", "column6"]);

    let finding = session.detect_overflow().unwrap();
    assert!(finding.detected);
    assert_eq!(finding.total_rows, 100);
    assert_eq!(finding.sparse_run(), ["column4", "column5", "column6"]);
    assert_eq!(finding.suspected_anchor_column.as_deref(), Some("city"));

    let variance = finding
        .indicator(IndicatorKind::RowValueVariance)
        .expect("variance indicator");
    let widths: Vec<u64> = variance
        .distribution
        .iter()
        .map(|w| w.non_null_count)
        .collect();
    assert_eq!(widths, vec![4, 7]);
}

#[test]
fn test_detection_does_not_mutate() {
    let engine = QueryEngine::in_memory().unwrap();
    let table = shifted_table(&engine);
    let before = engine.fingerprint(&table).unwrap();

    overflow::detect(&engine, &table, &Thresholds::default()).unwrap();
    overflow::detect(&engine, &table, &Thresholds::default()).unwrap();

    assert_eq!(engine.fingerprint(&table).unwrap(), before);
}

#[test]
fn test_sparse_run_alone_is_not_overflow() {
    let engine = QueryEngine::in_memory().unwrap();
    // A genuinely optional trailing column: sparse, but rows only vary by one
    engine
        .execute(
            "CREATE TABLE t AS SELECT CAST(i AS VARCHAR) AS id, \
             CASE WHEN i % 10 = 0 THEN 'note' END AS notes FROM range(50) r(i)",
        )
        .unwrap();
    let table = Ident::new("t").unwrap();

    let finding = overflow::detect(&engine, &table, &Thresholds::default()).unwrap();

    assert!(finding.has(IndicatorKind::SequentialSparsity));
    assert!(!finding.detected);
    assert_eq!(finding.suspected_anchor_column, None);
}

#[test]
fn test_containment_keeps_rows_and_flags_shifted() {
    let engine = QueryEngine::in_memory().unwrap();
    let table = shifted_table(&engine);
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("people.csv");
    fs::write(&source, "id\n1\n").unwrap();

    // No candidates: re-parsing cannot help, so containment runs
    let ctx = context(&engine, &table, &source, &[]);
    let report = overflow::repair(&ctx, None).unwrap();

    assert_eq!(report.mode, RepairMode::Containment);
    assert_eq!(report.rows, 100);
    assert_eq!(report.overflow_before, 3);
    assert_eq!(report.flag_column.as_deref(), Some("is_shifted"));
    assert_eq!(report.rows_flagged, Some(5));
    assert_eq!(
        report.new_schema,
        vec!["id", "name", "age", "city", "is_shifted"]
    );
    assert_eq!(engine.row_count(&table).unwrap(), 100);
    assert_eq!(
        engine
            .scalar_u64("SELECT COUNT(*) FROM people WHERE is_shifted")
            .unwrap(),
        5
    );
}

#[test]
fn test_containment_avoids_flag_collision() {
    let engine = QueryEngine::in_memory().unwrap();
    engine
        .execute(
            "CREATE TABLE t AS SELECT CAST(i AS VARCHAR) AS id, 'no' AS is_shifted, \
             CASE WHEN i = 0 THEN 'spill' END AS column2 FROM range(10) r(i)",
        )
        .unwrap();
    let table = Ident::new("t").unwrap();
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("t.csv");
    fs::write(&source, "id\n").unwrap();

    let ctx = context(&engine, &table, &source, &[]);
    let report = overflow::repair(&ctx, None).unwrap();

    assert_eq!(report.flag_column.as_deref(), Some("is_shifted_1"));
    assert_eq!(report.new_schema, vec!["id", "is_shifted", "is_shifted_1"]);
}

#[test]
fn test_repair_is_idempotent() {
    let engine = QueryEngine::in_memory().unwrap();
    let table = shifted_table(&engine);
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("people.csv");
    fs::write(&source, "id\n1\n").unwrap();
    let ctx = context(&engine, &table, &source, &[]);

    overflow::repair(&ctx, None).unwrap();
    let after_first = engine.fingerprint(&table).unwrap();

    let second = overflow::repair(&ctx, None).unwrap();
    assert_eq!(second.mode, RepairMode::None);
    assert!(!second.repaired);
    assert_eq!(engine.fingerprint(&table).unwrap(), after_first);
}

#[test]
fn test_blind_repair_adopts_quoted_reparse() {
    let engine = QueryEngine::in_memory().unwrap();
    let table = shifted_table(&engine);

    // The same 100 rows, correctly quoted on disk
    let mut csv = String::from("id,name,age,city\n");
    for i in 0..100 {
        if i % 20 == 0 {
            csv.push_str(&format!("{},\"Smith, John\",42,Bergen\n", i));
        } else {
            csv.push_str(&format!("{},Person {},{},Oslo\n", i, i, 20 + i % 50));
        }
    }
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("people.csv");
    fs::write(&source, csv).unwrap();

    let candidates = default_candidates();
    let ctx = context(&engine, &table, &source, &candidates);
    let report = overflow::repair(&ctx, None).unwrap();

    assert_eq!(report.mode, RepairMode::Reparse);
    assert!(report.repaired);
    assert_eq!(report.parse_config.as_deref(), Some("double-quote"));
    assert_eq!(report.overflow_after, 0);
    assert_eq!(report.rows, 100);
    assert_eq!(report.new_schema, vec!["id", "name", "age", "city"]);

    let names = engine
        .query("SELECT name FROM people WHERE id = '20'")
        .unwrap();
    assert_eq!(names.rows[0][0].as_deref(), Some("Smith, John"));
}

#[test]
fn test_schema_hint_repair() {
    let engine = QueryEngine::in_memory().unwrap();
    engine
        .execute(
            "CREATE TABLE people AS SELECT \
                CAST(i AS VARCHAR) AS id, \
                CASE WHEN i % 10 = 0 THEN 'Smith' ELSE 'Person ' || CAST(i AS VARCHAR) END AS name, \
                CASE WHEN i % 10 = 0 THEN ' John' ELSE '30' END AS age, \
                CASE WHEN i % 10 = 0 THEN '42' ELSE 'Oslo' END AS city, \
                CASE WHEN i % 10 = 0 THEN 'Bergen' END AS column4 \
             FROM range(100) r(i) ORDER BY i",
        )
        .unwrap();
    let table = Ident::new("people").unwrap();
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("people.csv");
    fs::write(&source, "id\n").unwrap();

    let ctx = context(&engine, &table, &source, &[]);
    let hint = SchemaHint {
        anchor: "name".to_string(),
        expected: vec!["Age".to_string(), "City".to_string()],
    };
    let report = overflow::repair(&ctx, Some(&hint)).unwrap();

    assert_eq!(report.mode, RepairMode::SchemaHint);
    assert_eq!(report.rows, 100);
    assert_eq!(report.new_schema, vec!["id", "name", "age", "city"]);
    assert_eq!(report.variance_eliminated, Some(true));
    assert_eq!(report.overflow_after, 0);

    let fixed = engine
        .query("SELECT name, age, city FROM people WHERE id = '10'")
        .unwrap();
    assert_eq!(
        fixed.rows[0],
        vec![
            Some("Smith, John".to_string()),
            Some("42".to_string()),
            Some("Bergen".to_string())
        ]
    );
    let untouched = engine
        .query("SELECT name, age, city FROM people WHERE id = '11'")
        .unwrap();
    assert_eq!(untouched.rows[0][0].as_deref(), Some("Person 11"));

    // Nothing left to repair
    let again = overflow::repair(&ctx, Some(&hint)).unwrap();
    assert_eq!(again.mode, RepairMode::None);
}

#[test]
fn test_schema_hint_leaves_clean_rows_intact() {
    let engine = QueryEngine::in_memory().unwrap();
    engine
        .execute(
            "CREATE TABLE people AS SELECT \
                CAST(i AS VARCHAR) AS id, \
                CASE WHEN i % 10 = 0 THEN 'Smith' WHEN i = 13 THEN NULL \
                     ELSE 'Person ' || CAST(i AS VARCHAR) END AS name, \
                CASE WHEN i % 10 = 0 THEN ' John' WHEN i = 17 THEN NULL ELSE '30' END AS age, \
                CASE WHEN i % 10 = 0 THEN '42' WHEN i = 11 THEN 'Oslo, Norway' \
                     WHEN i = 12 THEN 'say \"hi\"' ELSE 'Oslo' END AS city, \
                CASE WHEN i % 10 = 0 THEN 'Bergen' END AS column4 \
             FROM range(100) r(i) ORDER BY i",
        )
        .unwrap();
    let table = Ident::new("people").unwrap();
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("people.csv");
    fs::write(&source, "id\n").unwrap();

    let ctx = context(&engine, &table, &source, &[]);
    let hint = SchemaHint {
        anchor: "name".to_string(),
        expected: vec!["age".to_string(), "city".to_string()],
    };
    let report = overflow::repair(&ctx, Some(&hint)).unwrap();
    assert_eq!(report.mode, RepairMode::SchemaHint);
    assert_eq!(report.rows, 100);

    let row = |id: &str| {
        engine
            .query(&format!("SELECT name, age, city FROM people WHERE id = '{}'", id))
            .unwrap()
            .rows
            .remove(0)
    };
    let s = |v: &str| Some(v.to_string());

    assert_eq!(row("10"), vec![s("Smith, John"), s("42"), s("Bergen")]);
    assert_eq!(row("11"), vec![s("Person 11"), s("30"), s("Oslo, Norway")]);
    assert_eq!(row("12"), vec![s("Person 12"), s("30"), s("say \"hi\"")]);
    assert_eq!(row("13"), vec![None, s("30"), s("Oslo")]);
    assert_eq!(row("17"), vec![s("Person 17"), None, s("Oslo")]);
}

#[test]
fn test_schema_hint_unknown_anchor() {
    let engine = QueryEngine::in_memory().unwrap();
    let table = shifted_table(&engine);
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("people.csv");
    fs::write(&source, "id\n").unwrap();

    let ctx = context(&engine, &table, &source, &[]);
    let hint = SchemaHint {
        anchor: "full_name".to_string(),
        expected: vec!["age".to_string()],
    };
    match overflow::repair(&ctx, Some(&hint)) {
        Err(CleanError::ColumnNotFound { column, available }) => {
            assert_eq!(column, "full_name");
            assert!(available.contains(&"name".to_string()));
        }
        other => panic!("unexpected: {:?}", other.map(|r| r.mode)),
    }
    assert_eq!(engine.row_count(&table).unwrap(), 100);
}
