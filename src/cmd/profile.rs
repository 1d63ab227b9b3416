use super::{print_json, Globals};
use clean_csv::session::Session;
use std::path::Path;

pub fn run(
    file: &Path,
    column: Option<String>,
    top: usize,
    globals: &Globals,
) -> anyhow::Result<()> {
    let session = globals.load(file)?;
    match column {
        Some(column) => run_column(&session, &column, top, globals),
        None => run_table(&session, globals),
    }
}

fn run_table(session: &Session, globals: &Globals) -> anyhow::Result<()> {
    let report = session.profile()?;
    if globals.json {
        return print_json(&report);
    }

    println!("Profile of {} ({} rows):", report.table, report.rows);
    println!();
    println!(
        "  {:<32} {:<12} {:>10} {:>8}",
        "COLUMN", "TYPE", "UNIQUE", "NULL %"
    );
    for c in &report.columns {
        println!(
            "  {:<32} {:<12} {:>10} {:>7.1}%",
            c.column, c.column_type, c.approx_unique, c.null_percentage
        );
    }

    if !report.suggestions.is_empty() {
        println!();
        println!("Coercion candidates:");
        for s in &report.suggestions {
            let types: Vec<String> = s.suggested_types.iter().map(|t| format!("{:?}", t)).collect();
            println!(
                "  {} -> {} ({} numeric, {} date of {} values)",
                s.column,
                types.join(" or "),
                s.number_matches,
                s.date_matches,
                s.non_null
            );
        }
    }
    Ok(())
}

fn run_column(session: &Session, column: &str, top: usize, globals: &Globals) -> anyhow::Result<()> {
    let report = session.profile_column(column, top)?;
    if globals.json {
        return print_json(&report);
    }

    println!("Column {}:", report.column);
    println!();
    println!(
        "Top values ({} distinct):",
        report.distribution.total_unique
    );
    for v in &report.distribution.values {
        println!(
            "  {:>8}  {}",
            v.count,
            v.value.as_deref().unwrap_or("NULL")
        );
    }

    if let Some(iqr) = &report.iqr {
        println!();
        println!(
            "IQR: q1={} q3={} fences=[{}, {}], {} outliers",
            iqr.q1, iqr.q3, iqr.lower, iqr.upper, iqr.outliers
        );
    }

    if !report.dates.formats.is_empty() {
        println!();
        let label = if report.dates.mixed { " (mixed)" } else { "" };
        println!("Date formats{}:", label);
        for f in &report.dates.formats {
            println!("  {:<12} {}", f.format, f.count);
        }
    }

    if !report.coercion.suggested_types.is_empty() {
        println!();
        let types: Vec<String> = report
            .coercion
            .suggested_types
            .iter()
            .map(|t| format!("{:?}", t))
            .collect();
        println!("Suggested type: {}", types.join(" or "));
    }
    Ok(())
}
