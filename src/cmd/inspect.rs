use clean_csv::dialect;
use clean_csv::error::CleanError;
use std::path::Path;

/// Raw lines are printed as-is; no dialect is applied.
pub fn run(file: &Path, lines: usize) -> anyhow::Result<()> {
    if !file.exists() {
        return Err(CleanError::NotFound(file.to_path_buf()).into());
    }
    let content = dialect::inspect_raw(file, lines)?;
    print!("{}", content);
    if !content.is_empty() && !content.ends_with('\n') {
        println!();
    }
    Ok(())
}
