use super::preview::print_steps;
use super::{print_json, spinner, Globals};
use clean_csv::plan::CleaningPlan;
use std::path::{Path, PathBuf};

pub fn run(
    file: &Path,
    plan: &CleaningPlan,
    output: Option<PathBuf>,
    globals: &Globals,
) -> anyhow::Result<()> {
    let mut session = globals.load(file)?;

    let pb = spinner("Executing plan...", !globals.json);
    let report = session.execute(plan, output.as_deref());
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let report = report?;

    if globals.json {
        return print_json(&report);
    }

    print_steps(&report.steps);
    eprintln!();
    eprintln!("Execute summary:");
    eprintln!("  Rows: {} -> {}", report.rows_before, report.rows_after);
    eprintln!("  Wrote: {}", report.artifact.display());
    Ok(())
}
