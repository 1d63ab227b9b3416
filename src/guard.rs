//! Destructive-operation guard.
//!
//! A syntactic prefix check run on every plan statement before it reaches the
//! engine. Statements that lead with a row- or table-removing keyword are
//! rejected; everything else passes, including schema changes and updates.
//! Leading whitespace and SQL comments are skipped so a comment header cannot
//! hide the keyword.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

static DESTRUCTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(DELETE\b|DROP\s+TABLE\b|TRUNCATE\b)").unwrap());

/// Keyword family that caused a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForbiddenKeyword {
    Delete,
    DropTable,
    Truncate,
}

impl ForbiddenKeyword {
    fn from_match(text: &str) -> Self {
        let upper = text.to_ascii_uppercase();
        if upper.starts_with("DELETE") {
            Self::Delete
        } else if upper.starts_with("DROP") {
            Self::DropTable
        } else {
            Self::Truncate
        }
    }
}

impl fmt::Display for ForbiddenKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "DELETE"),
            Self::DropTable => write!(f, "DROP TABLE"),
            Self::Truncate => write!(f, "TRUNCATE"),
        }
    }
}

/// Structured rejection of a single statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct GuardRejection {
    pub statement: String,
    pub keyword: ForbiddenKeyword,
    pub reason: String,
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blocked {} statement: {}", self.keyword, self.reason)
    }
}

impl std::error::Error for GuardRejection {}

/// Check one statement. `Ok(())` means it may run.
pub fn check(statement: &str) -> Result<(), GuardRejection> {
    let body = skip_leading_trivia(statement);
    match DESTRUCTIVE.find(body) {
        Some(m) => {
            let keyword = ForbiddenKeyword::from_match(m.as_str());
            Err(GuardRejection {
                statement: statement.to_string(),
                keyword,
                reason: format!(
                    "{} removes rows, which is never allowed. Use UPDATE to fix values, or add a boolean flag column (e.g. is_duplicate) and set it instead",
                    keyword
                ),
            })
        }
        None => Ok(()),
    }
}

pub fn is_destructive(statement: &str) -> bool {
    check(statement).is_err()
}

/// Strip whitespace, `-- line` comments and `/* block */` comments.
pub(crate) fn skip_leading_trivia(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--") {
            s = match rest.find('\n') {
                Some(pos) => &rest[pos + 1..],
                None => "",
            };
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = match rest.find("*/") {
                Some(pos) => &rest[pos + 2..],
                None => "",
            };
        } else {
            return s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_destructive() {
        assert!(is_destructive("DELETE FROM data WHERE id = 1"));
        assert!(is_destructive("drop table data"));
        assert!(is_destructive("Truncate data"));
        assert!(is_destructive("DROP\n\tTABLE data"));
    }

    #[test]
    fn test_allows_non_destructive() {
        assert!(check("UPDATE data SET a = NULL WHERE a = ''").is_ok());
        assert!(check("ALTER TABLE data DROP COLUMN junk").is_ok());
        assert!(check("ALTER TABLE data ADD COLUMN is_duplicate BOOLEAN").is_ok());
        assert!(check("SELECT * FROM data").is_ok());
        assert!(check("").is_ok());
    }

    #[test]
    fn test_keyword_must_be_a_word() {
        assert!(check("DELETED_AT_FIX").is_ok());
        assert!(check("DROP VIEW v").is_ok());
    }

    #[test]
    fn test_skips_comments() {
        assert!(is_destructive("-- cleanup\nDELETE FROM data"));
        assert!(is_destructive("/* step 3 */ truncate data"));
        assert!(is_destructive("  /* a */ -- b\n  drop table data"));
        assert!(check("-- DELETE FROM data").is_ok());
    }

    #[test]
    fn test_rejection_payload() {
        let rejection = check("  delete from data").unwrap_err();
        assert_eq!(rejection.keyword, ForbiddenKeyword::Delete);
        assert_eq!(rejection.statement, "  delete from data");
        assert!(rejection.reason.contains("flag column"));
        assert!(rejection.to_string().starts_with("Blocked DELETE"));
    }
}
