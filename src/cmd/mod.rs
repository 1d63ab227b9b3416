mod detect;
mod execute;
mod inspect;
mod load;
mod normalize;
mod preview;
mod profile;
mod query;
mod repair;
mod schema;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use clean_csv::config::CleanConfig;
use clean_csv::error::{CleanError, ErrorReport};
use clean_csv::plan::CleaningPlan;
use clean_csv::session::Session;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "clean-csv")]
#[command(author = "Helge Sverre <helge.sverre@gmail.com>")]
#[command(version)]
#[command(about = "Load messy CSV files, repair column overflow and apply cleaning plans without ever losing rows", long_about = None)]
pub struct Cli {
    /// YAML config file (thresholds, dialect candidates, preview size)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Field delimiter of the source file (overrides the config)
    #[arg(short, long, global = true)]
    pub delimiter: Option<char>,

    /// Output results as JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a CSV, recovering its dialect, and report what was found
    Load {
        /// Input CSV file
        file: PathBuf,
    },

    /// Show the first lines of a file exactly as they are on disk
    Inspect {
        /// Input CSV file
        file: PathBuf,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "10")]
        lines: usize,
    },

    /// Check a loaded CSV for column overflow
    Detect {
        /// Input CSV file
        file: PathBuf,
    },

    /// Repair column overflow, blind or with a schema hint
    Repair {
        /// Input CSV file
        file: PathBuf,

        /// Column that absorbed the unquoted delimiters
        #[arg(long, requires = "expect")]
        anchor: Option<String>,

        /// Expected column names in order (comma-separated)
        #[arg(long, value_delimiter = ',', requires = "anchor")]
        expect: Option<Vec<String>>,

        /// Write the repaired table to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show how raw header names would be normalized
    Normalize {
        /// Raw column names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Profile columns: types, NULL share, coercion candidates
    Profile {
        /// Input CSV file
        file: PathBuf,

        /// Profile one column in depth (value distribution, IQR, date formats)
        #[arg(long)]
        column: Option<String>,

        /// Number of most frequent values to show with --column
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Query a loaded CSV with SQL
    Query(query::QueryArgs),

    /// Start an interactive cleaning session on a CSV
    Session {
        /// Input CSV file
        file: PathBuf,

        /// Output format for query results: table, json, jsonl, csv, markdown
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Show query execution time
        #[arg(long)]
        timing: bool,
    },

    /// Apply a cleaning plan to a staging copy and show before/after
    Preview {
        /// Input CSV file
        file: PathBuf,

        /// Plan file: JSON array of statements or SQL separated by ';'
        #[arg(short, long, required_unless_present = "sql", conflicts_with = "sql")]
        plan: Option<PathBuf>,

        /// Inline plan SQL
        #[arg(long)]
        sql: Option<String>,
    },

    /// Apply a cleaning plan and write the cleaned CSV
    Execute {
        /// Input CSV file
        file: PathBuf,

        /// Plan file: JSON array of statements or SQL separated by ';'
        #[arg(short, long, required_unless_present = "sql", conflicts_with = "sql")]
        plan: Option<PathBuf>,

        /// Inline plan SQL
        #[arg(long)]
        sql: Option<String>,

        /// Output file (default: <name>_cleaned.csv next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print or export the JSON schemas of --json output
    Schema {
        /// Schema to print (all when omitted)
        name: Option<String>,

        /// Write every schema to <dir>/<name>.schema.json
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// List schema names
        #[arg(long)]
        list: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Options every subcommand shares.
pub(crate) struct Globals {
    pub config: CleanConfig,
    pub json: bool,
}

impl Globals {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => CleanConfig::load(path)?,
            None => CleanConfig::default(),
        };
        if let Some(delimiter) = cli.delimiter {
            config.delimiter = delimiter;
            config.validate()?;
        }
        Ok(Self {
            config,
            json: cli.json,
        })
    }

    /// Open a session and load the file, with a spinner in text mode.
    pub fn load(&self, file: &Path) -> anyhow::Result<Session> {
        let mut session = Session::open(file, self.config.clone())?;
        let pb = spinner(&format!("Loading {}...", file.display()), !self.json);
        let report = session.load();
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        let report = report?;
        if !self.json {
            for warning in &report.warnings {
                eprintln!("Warning: {}", warning);
            }
        }
        Ok(session)
    }
}

pub(crate) fn spinner(message: &str, enabled: bool) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    Some(pb)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a plan from a file or inline SQL.
pub(crate) fn read_plan(plan: Option<&Path>, sql: Option<&str>) -> anyhow::Result<CleaningPlan> {
    let plan = match (plan, sql) {
        (Some(path), _) => CleaningPlan::load(path)?,
        (None, Some(sql)) => CleaningPlan::from_sql(sql),
        (None, None) => anyhow::bail!("a plan is required: pass --plan <file> or --sql <statements>"),
    };
    if plan.is_empty() {
        anyhow::bail!("the plan contains no statements");
    }
    Ok(plan)
}

/// Extra lines a human needs to fix the failing call.
pub(crate) fn error_hints(err: &CleanError) -> Vec<String> {
    match err {
        CleanError::Statement {
            available_columns, ..
        } if !available_columns.is_empty() => {
            vec![format!("Available columns: {}", available_columns.join(", "))]
        }
        CleanError::ParseFailure { raw_preview, .. } => {
            let mut lines = vec!["Raw preview:".to_string()];
            lines.extend(raw_preview.lines().map(|l| format!("  {}", l)));
            lines
        }
        CleanError::RowCountShrank { steps, .. } => steps
            .iter()
            .map(|s| format!("  step {} [{:?}]: {}", s.step, s.status, s.sql))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let globals = Globals::from_cli(&cli)?;
    let json = globals.json;

    let result = dispatch(cli.command, &globals);

    if let Err(e) = &result {
        if let Some(clean) = e.downcast_ref::<CleanError>() {
            if json {
                print_json(&ErrorReport::from(clean))?;
            } else {
                for hint in error_hints(clean) {
                    eprintln!("{}", hint);
                }
            }
        }
    }
    result
}

fn dispatch(command: Commands, globals: &Globals) -> anyhow::Result<()> {
    match command {
        Commands::Load { file } => load::run(&file, globals),
        Commands::Inspect { file, lines } => inspect::run(&file, lines),
        Commands::Detect { file } => detect::run(&file, globals),
        Commands::Repair {
            file,
            anchor,
            expect,
            output,
        } => repair::run(&file, anchor, expect, output, globals),
        Commands::Normalize { names } => normalize::run(&names, globals),
        Commands::Profile { file, column, top } => profile::run(&file, column, top, globals),
        Commands::Query(args) => query::run(args, globals),
        Commands::Session {
            file,
            format,
            timing,
        } => query::run_session(&file, &format, timing, globals),
        Commands::Preview { file, plan, sql } => {
            let plan = read_plan(plan.as_deref(), sql.as_deref())?;
            preview::run(&file, &plan, globals)
        }
        Commands::Execute {
            file,
            plan,
            sql,
            output,
        } => {
            let plan = read_plan(plan.as_deref(), sql.as_deref())?;
            execute::run(&file, &plan, output, globals)
        }
        Commands::Schema {
            name,
            output_dir,
            list,
        } => schema::run(name, output_dir, list),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "clean-csv", &mut io::stdout());
            Ok(())
        }
    }
}
