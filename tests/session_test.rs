//! End-to-end tests for a cleaning session: load, query, preview, execute.

use clean_csv::config::CleanConfig;
use clean_csv::error::CleanError;
use clean_csv::plan::CleaningPlan;
use clean_csv::session::Session;
use clean_csv::staging::{StagingState, StatementStatus};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const PEOPLE_CSV: &str = "\
Full Name,Age,E-mail,Sign-up Date
Alice Smith,34,alice@example.com,2024-01-05
Bob Jones,,bob@example.com,01/06/2024
Carol White,29,carol@example.com,2024-01-07
Bob Jones,,bob@example.com,01/06/2024
Dan Brown,41,dan@example.com,2024-01-09
";

fn write_csv(name: &str, content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join(name);
    fs::write(&path, content).unwrap();
    (temp_dir, path)
}

fn loaded_session() -> (TempDir, Session) {
    let (dir, path) = write_csv("people.csv", PEOPLE_CSV);
    let mut session = Session::open(&path, CleanConfig::default()).unwrap();
    session.load().unwrap();
    (dir, session)
}

fn loaded_fingerprint(session: &Session) -> String {
    let table = session.require_table().unwrap().name.clone();
    session.engine().fingerprint(&table).unwrap()
}

// =============================================================================
// Load
// =============================================================================

#[test]
fn test_load_normalizes_names() {
    let (_dir, path) = write_csv("People List.csv", PEOPLE_CSV);
    let mut session = Session::open(&path, CleanConfig::default()).unwrap();
    let report = session.load().unwrap();

    assert_eq!(report.table, "table_people_list");
    assert_eq!(report.rows, 5);
    assert_eq!(report.parse_config, "double-quote");
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.rows_lost, 0);
    assert!(report.overflow_columns.is_empty());

    let names: Vec<&str> = report.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["full_name", "age", "e_mail", "sign_up_date"]);
    assert_eq!(report.renamed.len(), 4);
    assert_eq!(report.renamed[0].original, "Full Name");
    assert_eq!(report.sample.row_count(), 5);
}

#[test]
fn test_load_keeps_text_verbatim() {
    let (_dir, path) = write_csv("codes.csv", "zip,code\n00501,007\n02134,010\n");
    let mut session = Session::open(&path, CleanConfig::default()).unwrap();
    session.load().unwrap();

    let result = session.query("SELECT zip, code FROM table_codes").unwrap();
    assert_eq!(result.rows[0][0].as_deref(), Some("00501"));
    assert_eq!(result.rows[0][1].as_deref(), Some("007"));
}

#[test]
fn test_load_removes_empty_rows() {
    let (_dir, path) = write_csv("gaps.csv", "a,b,c\n1,2,3\n,,\n4,5,6\n");
    let mut session = Session::open(&path, CleanConfig::default()).unwrap();
    let report = session.load().unwrap();

    assert_eq!(report.rows, 2);
    assert_eq!(report.empty_rows_removed, 1);
    assert_eq!(report.rows_lost, 0);
}

#[test]
fn test_sessions_are_isolated() {
    let (_a_dir, a_path) = write_csv("shared.csv", "x\n1\n2\n");
    let (_b_dir, b_path) = write_csv("shared.csv", "x\n1\n2\n3\n");

    let mut a = Session::open(&a_path, CleanConfig::default()).unwrap();
    let mut b = Session::open(&b_path, CleanConfig::default()).unwrap();
    assert_ne!(a.tag(), b.tag());

    a.load().unwrap();
    b.load().unwrap();
    assert_eq!(a.require_table().unwrap().row_count, 2);
    assert_eq!(b.require_table().unwrap().row_count, 3);
}

#[test]
fn test_from_bytes() {
    let mut session =
        Session::from_bytes("upload.csv", b"id,name\n1,a\n2,b\n", CleanConfig::default()).unwrap();
    let report = session.load().unwrap();
    assert_eq!(report.table, "table_upload");
    assert_eq!(report.rows, 2);
}

// =============================================================================
// Query and columns
// =============================================================================

#[test]
fn test_query_rejects_destructive() {
    let (_dir, session) = loaded_session();
    match session.query("DELETE FROM table_people") {
        Err(CleanError::Rejected(rejection)) => {
            assert!(rejection.reason.contains("flag column"));
        }
        other => panic!("expected rejection, got {:?}", other.map(|r| r.row_count())),
    }
    assert_eq!(session.require_table().unwrap().row_count, 5);
}

#[test]
fn test_query_error_lists_columns() {
    let (_dir, session) = loaded_session();
    match session.query("SELECT agee FROM table_people") {
        Err(CleanError::Statement {
            available_columns, ..
        }) => {
            assert!(available_columns.contains(&"age".to_string()));
        }
        other => panic!("expected statement error, got {:?}", other.map(|r| r.row_count())),
    }
}

#[test]
fn test_validate_column() {
    let (_dir, session) = loaded_session();
    assert!(session.validate_column("age").is_ok());
    match session.validate_column("Age") {
        Err(CleanError::ColumnNotFound { available, .. }) => assert_eq!(available.len(), 4),
        other => panic!("unexpected: {:?}", other.map(|c| c.to_string())),
    }
}

#[test]
fn test_normalize_columns_is_noop_after_load() {
    let (_dir, mut session) = loaded_session();
    let report = session.normalize_columns().unwrap();
    assert!(report.renames.is_empty());
    assert_eq!(report.new_schema.len(), 4);
}

#[test]
fn test_profile() {
    let (_dir, session) = loaded_session();
    let report = session.profile().unwrap();
    assert_eq!(report.rows, 5);
    assert_eq!(report.columns.len(), 4);

    let column = session.profile_column("sign_up_date", 5).unwrap();
    assert!(column.dates.mixed);
    assert_eq!(column.distribution.total_unique, 4);
}

// =============================================================================
// Preview
// =============================================================================

#[test]
fn test_preview_does_not_touch_loaded_table() {
    let (_dir, mut session) = loaded_session();
    let before = loaded_fingerprint(&session);

    let plan = CleaningPlan::new([
        "UPDATE data SET full_name = UPPER(full_name)",
        "ALTER TABLE data ADD COLUMN is_duplicate BOOLEAN DEFAULT FALSE",
    ]);
    let report = session.preview(&plan).unwrap();

    assert_eq!(report.state, StagingState::Previewed);
    assert!(report.steps.iter().all(|s| s.is_ok()));
    assert_eq!(report.before.rows[0][0].as_deref(), Some("Alice Smith"));
    assert_eq!(report.after.rows[0][0].as_deref(), Some("ALICE SMITH"));
    assert!(report.after.column_index("is_duplicate").is_some());
    assert!(report.before.column_index("_row_id").is_none());
    assert_eq!(loaded_fingerprint(&session), before);
    assert_eq!(session.staging_state(), StagingState::Previewed);
}

#[test]
fn test_preview_reports_bad_column_and_continues() {
    let (_dir, mut session) = loaded_session();

    let plan = CleaningPlan::new([
        "UPDATE data SET agee = '0'",
        "UPDATE data SET age = '0' WHERE age IS NULL",
    ]);
    let report = session.preview(&plan).unwrap();

    assert_eq!(report.steps[0].status, StatementStatus::Error);
    assert!(report.steps[0]
        .available_columns
        .contains(&"age".to_string()));
    assert!(!report.steps[0].available_columns.contains(&"_row_id".to_string()));
    assert_eq!(report.steps[1].status, StatementStatus::Ok);
    assert_eq!(report.after.rows[1][1].as_deref(), Some("0"));
}

#[test]
fn test_preview_blocks_disguised_delete() {
    let (_dir, mut session) = loaded_session();

    let plan = CleaningPlan::from_sql(
        "UPDATE data SET age = '0' WHERE age IS NULL;\n/* tidy up */ delete FROM data WHERE age = '0'",
    );
    let report = session.preview(&plan).unwrap();

    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[0].status, StatementStatus::Ok);
    assert_eq!(report.steps[1].status, StatementStatus::Blocked);
    assert_eq!(report.rows_before, 5);
    assert_eq!(report.rows_after, 5);
}

#[test]
fn test_preview_refuses_loaded_table_reference() {
    let (_dir, mut session) = loaded_session();
    let before = loaded_fingerprint(&session);

    let plan = CleaningPlan::new(["UPDATE table_people SET age = '1'"]);
    let report = session.preview(&plan).unwrap();

    assert_eq!(report.steps[0].status, StatementStatus::Error);
    assert_eq!(loaded_fingerprint(&session), before);
}

#[test]
fn test_preview_ignores_table_name_inside_literal() {
    let (_dir, mut session) = loaded_session();

    let plan = CleaningPlan::new([
        "UPDATE data SET full_name = 'from table_people' WHERE age IS NULL -- not table_people",
    ]);
    let report = session.preview(&plan).unwrap();

    assert_eq!(report.steps[0].status, StatementStatus::Ok);
    assert_eq!(report.after.rows[1][0].as_deref(), Some("from table_people"));
}

#[test]
fn test_preview_refuses_multi_statement_element() {
    let (_dir, mut session) = loaded_session();

    let plan = CleaningPlan::new([
        "UPDATE data SET age = '9'; DELETE FROM data",
        "UPDATE data SET age = '1' WHERE age IS NULL",
    ]);
    let report = session.preview(&plan).unwrap();

    assert_eq!(report.steps[0].status, StatementStatus::Error);
    assert!(report.steps[0]
        .error
        .as_deref()
        .unwrap()
        .contains("exactly one statement"));
    assert!(report.steps[0].available_columns.contains(&"age".to_string()));
    assert_eq!(report.steps[1].status, StatementStatus::Ok);
    assert_eq!(report.rows_after, 5);
    // Nothing from the refused element ran
    assert!(report
        .after
        .rows
        .iter()
        .all(|row| row[1].as_deref() != Some("9")));
}

// =============================================================================
// Execute
// =============================================================================

#[test]
fn test_execute_flags_duplicates() {
    let (dir, mut session) = loaded_session();

    let plan = CleaningPlan::from_sql(
        "ALTER TABLE data ADD COLUMN is_duplicate BOOLEAN DEFAULT FALSE;
         UPDATE data SET is_duplicate = TRUE
           WHERE rowid NOT IN (SELECT MIN(rowid) FROM data GROUP BY full_name, e_mail);",
    );
    let report = session.execute(&plan, None).unwrap();

    assert_eq!(report.state, StagingState::Committed);
    assert_eq!(report.rows_before, 5);
    assert_eq!(report.rows_after, 5);
    assert_eq!(report.artifact, dir.path().join("people_cleaned.csv"));
    assert_eq!(session.source().path, report.artifact);

    let flagged = session
        .query("SELECT COUNT(*) FROM table_people WHERE is_duplicate")
        .unwrap();
    assert_eq!(flagged.rows[0][0].as_deref(), Some("1"));

    let written = fs::read_to_string(&report.artifact).unwrap();
    let header = written.lines().next().unwrap();
    assert!(header.ends_with("is_duplicate"));
    assert_eq!(written.lines().count(), 6);
}

#[test]
fn test_execute_rolls_back_shrinking_plan() {
    let (dir, mut session) = loaded_session();
    let before = loaded_fingerprint(&session);

    let plan = CleaningPlan::new([
        "UPDATE data SET age = '0' WHERE age IS NULL",
        "CREATE OR REPLACE TABLE data AS SELECT * FROM data WHERE age <> '0'",
    ]);
    match session.execute(&plan, None) {
        Err(CleanError::RowCountShrank {
            rows_before,
            rows_after,
            delta,
            steps,
        }) => {
            assert_eq!(rows_before, 5);
            assert_eq!(rows_after, 3);
            assert_eq!(delta, 2);
            assert_eq!(steps.len(), 2);
        }
        other => panic!("expected rollback, got {:?}", other.map(|r| r.rows_after)),
    }

    assert_eq!(session.staging_state(), StagingState::RolledBack);
    assert_eq!(loaded_fingerprint(&session), before);
    assert!(!dir.path().join("people_cleaned.csv").exists());
    assert_eq!(session.source().display_name, "people.csv");
}

#[test]
fn test_execute_commits_around_blocked_delete() {
    let (_dir, mut session) = loaded_session();

    let plan = CleaningPlan::from_sql(
        "UPDATE data SET e_mail = UPPER(e_mail);\n  -- remove dupes\n  DELETE FROM data WHERE age IS NULL;",
    );
    let report = session.execute(&plan, None).unwrap();

    assert_eq!(report.state, StagingState::Committed);
    assert_eq!(report.steps[0].status, StatementStatus::Ok);
    assert_eq!(report.steps[1].status, StatementStatus::Blocked);
    assert_eq!(report.rows_before, 5);
    assert_eq!(report.rows_after, 5);
    assert_eq!(session.require_table().unwrap().row_count, 5);
}

#[test]
fn test_execute_refuses_multi_statement_element() {
    let (_dir, mut session) = loaded_session();

    // Delete plus insert keeps the row count, so only the refusal protects Alice
    let plan = CleaningPlan::new([
        "UPDATE data SET age = age; DELETE FROM data WHERE full_name = 'Alice Smith'; \
         INSERT INTO data VALUES ('Eve Black', '50', 'eve@example.com', '2024-02-01')",
    ]);
    let report = session.execute(&plan, None).unwrap();

    assert_eq!(report.state, StagingState::Committed);
    assert_eq!(report.steps[0].status, StatementStatus::Error);
    assert_eq!(report.rows_after, 5);

    let written = fs::read_to_string(&report.artifact).unwrap();
    assert!(written.contains("Alice Smith"));
    assert!(!written.contains("Eve Black"));
}

#[test]
fn test_query_refuses_multi_statement() {
    let (_dir, session) = loaded_session();

    match session.query("SELECT 1; DROP TABLE table_people") {
        Err(CleanError::Statement {
            message,
            available_columns,
            ..
        }) => {
            assert!(message.contains("exactly one statement"));
            assert!(available_columns.contains(&"full_name".to_string()));
        }
        other => panic!("expected statement error, got {:?}", other.map(|r| r.row_count())),
    }

    let count = session.query("SELECT COUNT(*) FROM table_people").unwrap();
    assert_eq!(count.rows[0][0].as_deref(), Some("5"));
}

#[test]
fn test_execute_to_explicit_output() {
    let (dir, mut session) = loaded_session();
    let output = dir.path().join("out.tsv");

    let plan = CleaningPlan::new(["UPDATE data SET e_mail = LOWER(e_mail)"]);
    let report = session.execute(&plan, Some(&output)).unwrap();

    assert_eq!(report.artifact, output);
    assert!(output.exists());
}

#[test]
fn test_execute_then_reload_from_artifact() {
    let (_dir, mut session) = loaded_session();
    let plan = CleaningPlan::new(["UPDATE data SET age = '0' WHERE age IS NULL"]);
    session.execute(&plan, None).unwrap();

    // The cleaned file is now the source; loading it yields the cleaned table
    let report = session.load().unwrap();
    assert_eq!(report.source.display_name, "people_cleaned.csv");
    assert_eq!(report.table, "table_people_cleaned");
    let nulls = session
        .query("SELECT COUNT(*) FROM table_people_cleaned WHERE age IS NULL")
        .unwrap();
    assert_eq!(nulls.rows[0][0].as_deref(), Some("0"));
}
