use super::{print_json, spinner, Globals};
use clean_csv::overflow::SchemaHint;
use std::path::{Path, PathBuf};

pub fn run(
    file: &Path,
    anchor: Option<String>,
    expect: Option<Vec<String>>,
    output: Option<PathBuf>,
    globals: &Globals,
) -> anyhow::Result<()> {
    let mut session = globals.load(file)?;

    let hint = match (anchor, expect) {
        (Some(anchor), Some(expected)) => Some(SchemaHint { anchor, expected }),
        _ => None,
    };

    let pb = spinner("Repairing overflow...", !globals.json);
    let report = session.repair_overflow(hint.as_ref());
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let report = report?;

    if let Some(path) = &output {
        let table = session.require_table()?.name.clone();
        session
            .engine()
            .export_csv(&table, path, session.config().delimiter)?;
    }

    if globals.json {
        return print_json(&report);
    }

    eprintln!("Repair summary:");
    eprintln!("  Mode: {:?}", report.mode);
    eprintln!("  {}", report.message);
    eprintln!(
        "  Columns: {} -> {}",
        report.columns_before, report.columns_after
    );
    eprintln!(
        "  Overflow columns: {} -> {}",
        report.overflow_before, report.overflow_after
    );
    eprintln!("  Rows: {}", report.rows);
    if let (Some(flag), Some(flagged)) = (&report.flag_column, report.rows_flagged) {
        eprintln!("  Flagged rows: {} (column {})", flagged, flag);
    }
    if let Some(path) = &output {
        eprintln!("  Wrote: {}", path.display());
    }
    Ok(())
}
