use super::{print_json, Globals};
use std::path::Path;

pub fn run(file: &Path, globals: &Globals) -> anyhow::Result<()> {
    let session = globals.load(file)?;
    let finding = session.detect_overflow()?;

    if globals.json {
        return print_json(&finding);
    }

    eprintln!("Overflow check:");
    eprintln!(
        "  Table: {} rows x {} columns",
        finding.total_rows, finding.total_columns
    );
    for indicator in &finding.indicators {
        eprintln!("  - {}", indicator.description);
    }
    eprintln!();

    if finding.detected {
        eprintln!(
            "Result: OVERFLOW ({} trailing columns)",
            finding.overflow_columns.len()
        );
        if let Some(anchor) = &finding.suspected_anchor_column {
            eprintln!("  Suspected anchor column: {}", anchor);
        }
        eprintln!("  Run `clean-csv repair` to fix it");
    } else {
        eprintln!("Result: CLEAN");
    }
    Ok(())
}
