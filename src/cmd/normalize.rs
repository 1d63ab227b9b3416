use super::{print_json, Globals};
use clean_csv::naming::{self, ColumnMapping};
use clean_csv::session::NormalizeReport;

pub fn run(names: &[String], globals: &Globals) -> anyhow::Result<()> {
    let mappings = naming::normalize_columns(names);
    let report = NormalizeReport {
        new_schema: mappings.iter().map(|m| m.normalized.clone()).collect(),
        renames: mappings.into_iter().filter(ColumnMapping::is_rename).collect(),
    };

    if globals.json {
        return print_json(&report);
    }

    for m in &report.renames {
        println!("{} -> {}", m.original, m.normalized);
    }
    eprintln!(
        "{} of {} names changed",
        report.renames.len(),
        report.new_schema.len()
    );
    Ok(())
}
