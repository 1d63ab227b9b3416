//! Quote-aware re-tokenizer for shifted row tails.
//!
//! A token is either a quoted run or a maximal run of non-delimiter
//! characters. Inside a quoted run both `""` and `\"` stand for a literal
//! quote, and `\\` for a literal backslash. An unterminated quote runs to
//! the end of the input. Text between a closing quote and the next delimiter
//! is kept verbatim.

const QUOTE: char = '"';
const BACKSLASH: char = '\\';

/// Split `input` into fields. An empty input yields a single empty token.
pub fn tokenize(input: &str, delimiter: char) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        let mut token = String::new();

        if chars.peek() == Some(&QUOTE) {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    QUOTE if chars.peek() == Some(&QUOTE) => {
                        chars.next();
                        token.push(QUOTE);
                    }
                    QUOTE => break,
                    BACKSLASH if chars.peek() == Some(&QUOTE) => {
                        chars.next();
                        token.push(QUOTE);
                    }
                    BACKSLASH if chars.peek() == Some(&BACKSLASH) => {
                        chars.next();
                        token.push(BACKSLASH);
                    }
                    other => token.push(other),
                }
            }
        }

        // Unquoted run, or trailing text after a closing quote
        let mut hit_delimiter = false;
        for c in chars.by_ref() {
            if c == delimiter {
                hit_delimiter = true;
                break;
            }
            token.push(c);
        }

        tokens.push(token);
        if !hit_delimiter {
            return tokens;
        }
    }
}

/// Fit tokens onto the anchor plus `expected` trailing columns.
///
/// Excess leading tokens are re-joined into the anchor. Missing trailing
/// fields come back as `None`.
pub fn remap(tokens: &[String], expected: usize, delimiter: char) -> (String, Vec<Option<String>>) {
    let width = expected + 1;
    let sep = delimiter.to_string();

    if tokens.len() > width {
        let fold = tokens.len() - expected;
        let anchor = tokens[..fold].join(&sep);
        let rest = tokens[fold..].iter().cloned().map(Some).collect();
        return (anchor, rest);
    }

    let anchor = tokens.first().cloned().unwrap_or_default();
    let mut rest: Vec<Option<String>> = tokens.iter().skip(1).cloned().map(Some).collect();
    rest.resize(expected, None);
    (anchor, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(input: &str) -> Vec<String> {
        tokenize(input, ',')
    }

    #[test]
    fn test_plain_fields() {
        assert_eq!(toks("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(toks("a,,b"), vec!["a", "", "b"]);
        assert_eq!(toks(""), vec![""]);
        assert_eq!(toks("a,"), vec!["a", ""]);
    }

    #[test]
    fn test_quoted_fields() {
        assert_eq!(toks("\"Smith, John\",42"), vec!["Smith, John", "42"]);
        assert_eq!(toks("\"say \"\"hi\"\"\",x"), vec!["say \"hi\"", "x"]);
        assert_eq!(toks("\"back\\\"slash\",x"), vec!["back\"slash", "x"]);
        assert_eq!(toks("\"C:\\\\dir\\\\\",x"), vec!["C:\\dir\\", "x"]);
        // Outside quotes a backslash is literal
        assert_eq!(toks("a\\\\b,x"), vec!["a\\\\b", "x"]);
    }

    #[test]
    fn test_unterminated_quote_runs_to_end() {
        assert_eq!(toks("\"open, still open"), vec!["open, still open"]);
    }

    #[test]
    fn test_text_after_closing_quote_is_kept() {
        assert_eq!(toks("\"a\"b,c"), vec!["ab", "c"]);
    }

    #[test]
    fn test_other_delimiter() {
        assert_eq!(tokenize("a;\"b;c\";d", ';'), vec!["a", "b;c", "d"]);
    }

    #[test]
    fn test_remap_folds_excess_into_anchor() {
        let tokens = toks("Smith, John,42,NY");
        let (anchor, rest) = remap(&tokens, 2, ',');
        assert_eq!(anchor, "Smith, John");
        assert_eq!(rest, vec![Some("42".to_string()), Some("NY".to_string())]);
    }

    #[test]
    fn test_remap_pads_missing_with_none() {
        let tokens = toks("Smith");
        let (anchor, rest) = remap(&tokens, 2, ',');
        assert_eq!(anchor, "Smith");
        assert_eq!(rest, vec![None, None]);
    }

    #[test]
    fn test_remap_exact_width() {
        let tokens = toks("a,b,c");
        let (anchor, rest) = remap(&tokens, 2, ',');
        assert_eq!(anchor, "a");
        assert_eq!(rest, vec![Some("b".to_string()), Some("c".to_string())]);
    }
}
