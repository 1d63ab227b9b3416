use super::{print_json, spinner, Globals};
use clean_csv::engine::{OutputFormat, QueryResultFormatter};
use clean_csv::session::Session;
use std::path::Path;
use std::time::Instant;

pub fn run(file: &Path, globals: &Globals) -> anyhow::Result<()> {
    let mut session = Session::open(file, globals.config.clone())?;

    let start_time = Instant::now();
    let pb = spinner(&format!("Loading {}...", file.display()), !globals.json);
    let report = session.load();
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let report = report?;

    if globals.json {
        return print_json(&report);
    }

    for warning in &report.warnings {
        eprintln!("Warning: {}", warning);
    }
    if !report.warnings.is_empty() {
        eprintln!();
    }

    eprintln!("Load summary:");
    eprintln!("  Source: {}", report.source.display_name);
    eprintln!("  Table: {}", report.table);
    eprintln!("  Dialect: {}", report.parse_config);
    eprintln!("  Rows: {}", report.rows);
    eprintln!("  Columns: {}", report.columns.len());
    if !report.renamed.is_empty() {
        eprintln!("  Renamed:");
        for m in &report.renamed {
            eprintln!("    {} -> {}", m.original, m.normalized);
        }
    }
    eprintln!("  Time: {:.3?}", start_time.elapsed());
    eprintln!();

    print!(
        "{}",
        QueryResultFormatter::format(&report.sample, OutputFormat::Table)
    );
    Ok(())
}
