//! Output formatting for query results.

use super::QueryResult;
use std::io::Write;

/// Shown in text formats for SQL NULL.
const NULL_MARKER: &str = "NULL";

/// Table cells are capped at this many characters.
const MAX_CELL_WIDTH: usize = 50;

/// Output format for query results
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    /// Box-drawn table (default)
    #[default]
    Table,
    /// JSON array of row objects
    Json,
    /// JSON lines format (one object per line)
    JsonLines,
    /// CSV format
    Csv,
    /// GitHub-flavored markdown table
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" | "ndjson" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!(
                "Unknown format: {}. Valid: table, json, jsonl, csv, markdown",
                s
            )),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// Formatter for query results
pub struct QueryResultFormatter;

impl QueryResultFormatter {
    /// Format a query result to a string
    pub fn format(result: &QueryResult, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::format_table(result),
            OutputFormat::Json => Self::format_json(result),
            OutputFormat::JsonLines => Self::format_jsonl(result),
            OutputFormat::Csv => Self::format_csv(result),
            OutputFormat::Markdown => Self::format_markdown(result),
        }
    }

    /// Write formatted result to a writer
    pub fn write<W: Write>(
        result: &QueryResult,
        format: OutputFormat,
        writer: &mut W,
    ) -> std::io::Result<()> {
        let output = Self::format(result, format);
        writer.write_all(output.as_bytes())
    }

    /// Row objects keyed by column name, NULL preserved.
    pub fn to_json_rows(result: &QueryResult) -> Vec<serde_json::Value> {
        result
            .rows
            .iter()
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = result
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, val)| {
                        let value = match val {
                            Some(v) => serde_json::Value::String(v.clone()),
                            None => serde_json::Value::Null,
                        };
                        (col.clone(), value)
                    })
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect()
    }

    fn cell(val: &Option<String>) -> &str {
        val.as_deref().unwrap_or(NULL_MARKER)
    }

    fn format_table(result: &QueryResult) -> String {
        if result.columns.is_empty() {
            return String::new();
        }

        let mut widths: Vec<usize> = result
            .columns
            .iter()
            .map(|c| c.chars().count())
            .collect();

        for row in &result.rows {
            for (i, val) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(Self::cell(val).chars().count());
                }
            }
        }

        widths.iter_mut().for_each(|w| *w = (*w).min(MAX_CELL_WIDTH));

        let mut output = String::new();
        Self::border(&mut output, &widths, '┌', '┬', '┐');

        output.push('│');
        for (i, col) in result.columns.iter().enumerate() {
            Self::push_cell(&mut output, col, widths[i]);
        }
        output.push('\n');

        Self::border(&mut output, &widths, '├', '┼', '┤');

        for row in &result.rows {
            output.push('│');
            for (i, val) in row.iter().enumerate() {
                if i < widths.len() {
                    Self::push_cell(&mut output, Self::cell(val), widths[i]);
                }
            }
            output.push('\n');
        }

        Self::border(&mut output, &widths, '└', '┴', '┘');

        output.push_str(&format!(
            "{} row{}\n",
            result.rows.len(),
            if result.rows.len() == 1 { "" } else { "s" }
        ));

        output
    }

    fn border(output: &mut String, widths: &[usize], left: char, mid: char, right: char) {
        output.push(left);
        for (i, width) in widths.iter().enumerate() {
            output.push_str(&"─".repeat(*width + 2));
            if i < widths.len() - 1 {
                output.push(mid);
            }
        }
        output.push(right);
        output.push('\n');
    }

    fn push_cell(output: &mut String, value: &str, width: usize) {
        let truncated = Self::truncate(value, width);
        let pad = width.saturating_sub(truncated.chars().count());
        output.push(' ');
        output.push_str(&truncated);
        output.push_str(&" ".repeat(pad));
        output.push_str(" │");
    }

    /// Truncate to at most `max_chars` characters, on a char boundary.
    fn truncate(s: &str, max_chars: usize) -> String {
        if s.chars().count() <= max_chars {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_chars.saturating_sub(1)).collect();
            format!("{}…", kept)
        }
    }

    fn format_json(result: &QueryResult) -> String {
        serde_json::to_string_pretty(&Self::to_json_rows(result))
            .unwrap_or_else(|_| "[]".to_string())
    }

    fn format_jsonl(result: &QueryResult) -> String {
        Self::to_json_rows(result)
            .iter()
            .map(|obj| serde_json::to_string(obj).unwrap_or_else(|_| "{}".to_string()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_csv(result: &QueryResult) -> String {
        let mut output = String::new();

        let header: Vec<String> = result.columns.iter().map(|c| Self::csv_escape(c)).collect();
        output.push_str(&header.join(","));
        output.push('\n');

        for row in &result.rows {
            // NULL is an empty field
            let values: Vec<String> = row
                .iter()
                .map(|v| v.as_deref().map(Self::csv_escape).unwrap_or_default())
                .collect();
            output.push_str(&values.join(","));
            output.push('\n');
        }

        output
    }

    fn csv_escape(val: &str) -> String {
        if val.contains(',') || val.contains('"') || val.contains('\n') || val.contains('\r') {
            format!("\"{}\"", val.replace('"', "\"\""))
        } else {
            val.to_string()
        }
    }

    fn format_markdown(result: &QueryResult) -> String {
        if result.columns.is_empty() {
            return String::new();
        }
        let escape = |s: &str| s.replace('|', "\\|").replace('\n', " ");

        let mut output = String::new();
        output.push_str("| ");
        output.push_str(
            &result
                .columns
                .iter()
                .map(|c| escape(c))
                .collect::<Vec<_>>()
                .join(" | "),
        );
        output.push_str(" |\n|");
        output.push_str(&" --- |".repeat(result.columns.len()));
        output.push('\n');

        for row in &result.rows {
            output.push_str("| ");
            output.push_str(
                &row.iter()
                    .map(|v| escape(Self::cell(v)))
                    .collect::<Vec<_>>()
                    .join(" | "),
            );
            output.push_str(" |\n");
        }

        output
    }
}
