//! Query command and the interactive cleaning session.

use super::preview::print_steps;
use super::{error_hints, print_json, read_plan, Globals};
use anyhow::{Context, Result};
use clap::Args;
use clean_csv::engine::{OutputFormat, QueryResultFormatter};
use clean_csv::error::CleanError;
use clean_csv::overflow::SchemaHint;
use clean_csv::plan::CleaningPlan;
use clean_csv::session::Session;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Query a loaded CSV with DuckDB SQL
#[derive(Args, Debug)]
#[command(after_help = "Examples:
  clean-csv query sales.csv \"SELECT COUNT(*) FROM table_sales\"
  clean-csv query sales.csv \"SELECT * FROM table_sales LIMIT 10\" -f markdown
  clean-csv query sales.csv \"SELECT region, SUM(CAST(total AS DOUBLE)) FROM table_sales GROUP BY 1\" -o totals.csv -f csv
  clean-csv query sales.csv --interactive")]
pub struct QueryArgs {
    /// CSV file to load
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// SQL query to execute (omit for --interactive mode)
    #[arg(value_name = "QUERY")]
    pub query: Option<String>,

    /// Output format: table, json, jsonl, csv, markdown
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Write output to file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Start an interactive cleaning session (REPL)
    #[arg(short, long)]
    pub interactive: bool,

    /// Show query execution time
    #[arg(long)]
    pub timing: bool,
}

/// Run the query command
pub fn run(args: QueryArgs, globals: &Globals) -> Result<()> {
    if !args.interactive && args.query.is_none() {
        anyhow::bail!("Query is required (or use --interactive mode)");
    }

    let output_format: OutputFormat = args
        .format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let mut session = globals.load(&args.input)?;

    if args.interactive {
        return run_repl(&mut session, output_format, args.timing);
    }

    let Some(query) = args.query else {
        anyhow::bail!("Query is required (or use --interactive mode)");
    };
    let result = session.query(&query)?;

    if globals.json {
        return print_json(&result);
    }

    if let Some(output_path) = args.output {
        let file = File::create(&output_path)
            .with_context(|| format!("Cannot create output file: {}", output_path.display()))?;
        let mut writer = BufWriter::new(file);
        QueryResultFormatter::write(&result, output_format, &mut writer)?;
        writer.flush()?;
        eprintln!(
            "Wrote {} rows to {}",
            result.row_count(),
            output_path.display()
        );
    } else {
        print!("{}", QueryResultFormatter::format(&result, output_format));
    }

    if args.timing {
        eprintln!("Query executed in {:.3}s", result.execution_time_secs);
    }

    Ok(())
}

/// Load a file and hand it to the REPL.
pub fn run_session(file: &Path, format: &str, timing: bool, globals: &Globals) -> Result<()> {
    let output_format: OutputFormat = format.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let mut session = globals.load(file)?;
    run_repl(&mut session, output_format, timing)
}

fn report_error(err: &CleanError) {
    eprintln!("Error: {}", err);
    for hint in error_hints(err) {
        eprintln!("{}", hint);
    }
}

/// Run the interactive REPL
fn run_repl(session: &mut Session, default_format: OutputFormat, timing: bool) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    let history_path = dirs::cache_dir()
        .map(|d| d.join("clean-csv").join("session_history"))
        .unwrap_or_else(|| PathBuf::from(".clean_csv_history"));

    let _ = rl.load_history(&history_path);

    let table = session.require_table()?.name.as_str().to_string();
    println!("clean-csv session on {} (table {})", session.source().display_name, table);
    println!("Type .help for available commands, .exit to quit");
    println!();

    let mut current_format = default_format;

    loop {
        let readline = rl.readline("csv> ");

        match readline {
            Ok(line) => {
                let trimmed = line.trim();

                if trimmed.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(trimmed);

                if trimmed.starts_with('.') {
                    match handle_meta_command(trimmed, session, &mut current_format) {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => match e.downcast_ref::<CleanError>() {
                            Some(clean) => report_error(clean),
                            None => eprintln!("Error: {}", e),
                        },
                    }
                    continue;
                }

                match session.query(trimmed) {
                    Ok(result) => {
                        let formatted = QueryResultFormatter::format(&result, current_format);
                        print!("{}", formatted);

                        if timing {
                            eprintln!("({:.3}s)", result.execution_time_secs);
                        }
                    }
                    Err(e) => report_error(&e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = rl.save_history(&history_path);

    Ok(())
}

/// `.preview` and `.execute` take a plan file or inline SQL.
fn plan_argument(rest: &str) -> Result<CleaningPlan> {
    let path = Path::new(rest);
    if path.is_file() {
        read_plan(Some(path), None)
    } else {
        read_plan(None, Some(rest))
    }
}

/// Handle REPL meta-commands. Returns true if REPL should exit.
fn handle_meta_command(
    command: &str,
    session: &mut Session,
    format: &mut OutputFormat,
) -> Result<bool> {
    let (cmd, rest) = match command.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (command, ""),
    };
    let parts: Vec<&str> = rest.split_whitespace().collect();

    match cmd {
        ".exit" | ".quit" | ".q" => {
            println!("Goodbye!");
            return Ok(true);
        }
        ".help" | ".h" | ".?" => {
            println!("Available commands:");
            println!("  .schema                   Show the loaded table's columns");
            println!("  .count                    Count rows in the loaded table");
            println!("  .sample [n]               Show sample rows (default: 10)");
            println!("  .raw [n]                  Show raw source lines (default: 10)");
            println!("  .detect                   Check for column overflow");
            println!("  .repair [anchor a,b,c]    Repair overflow, optionally with a schema hint");
            println!("  .normalize                Normalize column names");
            println!("  .profile [column]         Profile the table or one column");
            println!("  .preview <file|sql>       Stage a plan and show before/after");
            println!("  .execute <file|sql>       Apply a plan and write the cleaned CSV");
            println!("  .format <fmt>             Set output format (table, json, jsonl, csv, markdown)");
            println!("  .export <file> <query>    Export query results to file");
            println!("  .exit, .quit, .q          Exit the REPL");
            println!();
        }
        ".schema" | ".describe" | ".desc" => {
            let table = session.require_table()?;
            for column in &table.columns {
                println!("  {} {}", column.name, column.column_type);
            }
        }
        ".count" => {
            println!("{}", session.require_table()?.row_count);
        }
        ".sample" => {
            let limit: usize = parts.first().and_then(|s| s.parse().ok()).unwrap_or(10);
            let table = session.require_table()?.name.to_string();
            let result = session.query(&format!("SELECT * FROM {} LIMIT {}", table, limit))?;
            print!("{}", QueryResultFormatter::format(&result, *format));
        }
        ".raw" => {
            let lines: usize = parts.first().and_then(|s| s.parse().ok()).unwrap_or(10);
            print!("{}", session.inspect_raw(lines)?);
            println!();
        }
        ".detect" => {
            let finding = session.detect_overflow()?;
            println!("{}", serde_json::to_string_pretty(&finding)?);
        }
        ".repair" => {
            let hint = match parts.as_slice() {
                [] => None,
                [anchor, expected] => Some(SchemaHint {
                    anchor: anchor.to_string(),
                    expected: expected.split(',').map(|s| s.trim().to_string()).collect(),
                }),
                _ => {
                    eprintln!("Usage: .repair [anchor col_a,col_b,...]");
                    return Ok(false);
                }
            };
            let report = session.repair_overflow(hint.as_ref())?;
            println!("{}", report.message);
            println!("Columns: {}", report.new_schema.join(", "));
        }
        ".normalize" => {
            let report = session.normalize_columns()?;
            if report.renames.is_empty() {
                println!("All column names are already normalized");
            }
            for m in &report.renames {
                println!("  {} -> {}", m.original, m.normalized);
            }
        }
        ".profile" => {
            let json = match parts.first() {
                Some(column) => serde_json::to_string_pretty(&session.profile_column(column, 10)?)?,
                None => serde_json::to_string_pretty(&session.profile()?)?,
            };
            println!("{}", json);
        }
        ".preview" => {
            if rest.is_empty() {
                eprintln!("Usage: .preview <plan file | statements>");
                return Ok(false);
            }
            let plan = plan_argument(rest)?;
            let report = session.preview(&plan)?;
            print_steps(&report.steps);
            println!("Before:");
            print!("{}", QueryResultFormatter::format(&report.before, *format));
            println!("After:");
            print!("{}", QueryResultFormatter::format(&report.after, *format));
        }
        ".execute" => {
            if rest.is_empty() {
                eprintln!("Usage: .execute <plan file | statements>");
                return Ok(false);
            }
            let plan = plan_argument(rest)?;
            let report = session.execute(&plan, None)?;
            print_steps(&report.steps);
            println!(
                "Wrote {} rows to {}",
                report.rows_after,
                report.artifact.display()
            );
        }
        ".format" => {
            if parts.is_empty() {
                println!("Current format: {}", format);
                println!("Usage: .format <table|json|jsonl|csv|markdown>");
            } else {
                match parts[0].parse::<OutputFormat>() {
                    Ok(new_format) => {
                        *format = new_format;
                        println!("Output format set to: {}", format);
                    }
                    Err(e) => {
                        eprintln!("Error: {}", e);
                    }
                }
            }
        }
        ".export" => {
            if parts.len() < 2 {
                eprintln!("Usage: .export <file> <query>");
            } else {
                let file_path = parts[0];
                let query = parts[1..].join(" ");
                let result = session.query(&query)?;

                let export_format = if file_path.ends_with(".json") {
                    OutputFormat::Json
                } else if file_path.ends_with(".csv") {
                    OutputFormat::Csv
                } else if file_path.ends_with(".md") {
                    OutputFormat::Markdown
                } else {
                    *format
                };

                let formatted = QueryResultFormatter::format(&result, export_format);
                std::fs::write(file_path, formatted)?;
                println!("Exported {} rows to {}", result.row_count(), file_path);
            }
        }
        _ => {
            eprintln!(
                "Unknown command: {}. Type .help for available commands.",
                cmd
            );
        }
    }

    Ok(false)
}
