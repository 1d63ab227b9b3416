//! Cleaning plans: ordered lists of statements.
//!
//! A plan is read either from a JSON array of strings or from plain SQL text
//! split on `;` (semicolons inside quotes or comments do not split). The
//! order is kept exactly as given.

use crate::error::Result;
use crate::guard::skip_leading_trivia;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(transparent)]
pub struct CleaningPlan {
    pub statements: Vec<String>,
}

impl CleaningPlan {
    pub fn new<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.statements.iter().map(String::as_str)
    }

    /// Parse a JSON array of statement strings.
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Split SQL text into statements.
    pub fn from_sql(input: &str) -> Self {
        Self {
            statements: split_statements(input),
        }
    }

    /// Load from a file: `.json` files are arrays, anything else is SQL text.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json || content.trim_start().starts_with('[') {
            Self::from_json(&content)
        } else {
            Ok(Self::from_sql(&content))
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Lexical {
    Code,
    Single,
    Double,
    LineComment,
    BlockComment,
}

/// Walk `input`, reporting each char with the lexical state it belongs to.
/// Quote and comment delimiters belong to the run they open or close.
fn scan(input: &str, mut visit: impl FnMut(char, Lexical)) {
    let mut state = Lexical::Code;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Lexical::Code => match c {
                '\'' => state = Lexical::Single,
                '"' => state = Lexical::Double,
                '-' if chars.peek() == Some(&'-') => state = Lexical::LineComment,
                '/' if chars.peek() == Some(&'*') => {
                    visit(c, Lexical::BlockComment);
                    if let Some(star) = chars.next() {
                        visit(star, Lexical::BlockComment);
                    }
                    state = Lexical::BlockComment;
                    continue;
                }
                _ => {}
            },
            // Doubled quotes re-enter the quoted state on the next char
            Lexical::Single if c == '\'' => {
                visit(c, state);
                state = Lexical::Code;
                continue;
            }
            Lexical::Double if c == '"' => {
                visit(c, state);
                state = Lexical::Code;
                continue;
            }
            Lexical::LineComment if c == '\n' => {
                visit(c, state);
                state = Lexical::Code;
                continue;
            }
            Lexical::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                visit(c, state);
                if let Some(slash) = chars.next() {
                    visit(slash, state);
                }
                state = Lexical::Code;
                continue;
            }
            _ => {}
        }
        visit(c, state);
    }
}

/// Split on top-level `;`, dropping segments that hold only whitespace or comments.
pub fn split_statements(input: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    scan(input, |c, state| {
        if c == ';' && state == Lexical::Code {
            push_statement(&mut statements, &current);
            current.clear();
        } else {
            current.push(c);
        }
    });
    push_statement(&mut statements, &current);
    statements
}

/// Number of statements in `sql`, ignoring empty and comment-only segments.
pub fn statement_count(sql: &str) -> usize {
    split_statements(sql).len()
}

/// `sql` with string literals and comments blanked out. Quoted identifiers
/// are kept since they still name tables and columns.
pub fn code_text(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    scan(sql, |c, state| match state {
        Lexical::Code | Lexical::Double => out.push(c),
        Lexical::Single | Lexical::LineComment | Lexical::BlockComment => out.push(' '),
    });
    out
}

fn push_statement(statements: &mut Vec<String>, segment: &str) {
    if !skip_leading_trivia(segment).is_empty() {
        statements.push(segment.trim().to_string());
    }
}
