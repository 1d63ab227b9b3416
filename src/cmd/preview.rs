use super::{print_json, spinner, Globals};
use clean_csv::engine::{OutputFormat, QueryResultFormatter};
use clean_csv::plan::CleaningPlan;
use clean_csv::staging::{StatementOutcome, StatementStatus};
use std::path::Path;

pub fn run(file: &Path, plan: &CleaningPlan, globals: &Globals) -> anyhow::Result<()> {
    let mut session = globals.load(file)?;

    let pb = spinner("Staging plan...", !globals.json);
    let report = session.preview(plan);
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let report = report?;

    if globals.json {
        return print_json(&report);
    }

    print_steps(&report.steps);
    eprintln!();

    println!("Before:");
    print!(
        "{}",
        QueryResultFormatter::format(&report.before, OutputFormat::Table)
    );
    println!();
    println!("After:");
    print!(
        "{}",
        QueryResultFormatter::format(&report.after, OutputFormat::Table)
    );

    eprintln!();
    eprintln!("Rows: {} -> {}", report.rows_before, report.rows_after);
    eprintln!("Nothing was written. Run `clean-csv execute` to apply the plan");
    Ok(())
}

pub(crate) fn print_steps(steps: &[StatementOutcome]) {
    eprintln!("Plan steps:");
    for step in steps {
        let status = match step.status {
            StatementStatus::Ok => "ok",
            StatementStatus::Blocked => "BLOCKED",
            StatementStatus::Error => "ERROR",
        };
        eprintln!("  {:>2}. [{}] {}", step.step, status, first_line(&step.sql));
        if let Some(error) = &step.error {
            eprintln!("      {}", error);
            if step.status == StatementStatus::Error && !step.available_columns.is_empty() {
                eprintln!(
                    "      Available columns: {}",
                    step.available_columns.join(", ")
                );
            }
        }
    }
}

fn first_line(sql: &str) -> &str {
    sql.lines().find(|l| !l.trim().is_empty()).unwrap_or(sql).trim()
}
