//! Query-pattern normalization.
//!
//! Patterns canonicalize "the same query with different literals" into
//! one aggregation key: an ordered list of (search regex, replacement
//! template) pairs where the first pattern that substitutes anything
//! wins. Newlines and carriage returns are flattened to spaces first so
//! multi-line queries normalize to a single canonical form.

use regex::Regex;
use std::fmt;

/// Pattern compilation / syntax errors. Raised while parsing arguments,
/// before any capture processing begins.
#[derive(Debug)]
pub enum PatternError {
    /// The `s/search/replace/` argument form could not be split.
    BadSyntax(String),
    /// The search part did not compile.
    BadRegex { pattern: String, error: regex::Error },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::BadSyntax(arg) => {
                write!(f, "invalid pattern (expected s/search/replace/): {}", arg)
            }
            PatternError::BadRegex { pattern, error } => {
                write!(f, "invalid regular expression {:?}: {}", pattern, error)
            }
        }
    }
}

impl std::error::Error for PatternError {}

/// An immutable (compiled search, replacement template) pair.
///
/// Replacement templates support `$1`-style backreferences and every
/// substitution is global.
#[derive(Debug, Clone)]
pub struct QueryPattern {
    search: Regex,
    replace: String,
}

impl QueryPattern {
    pub fn new(search: &str, replace: &str) -> Result<Self, PatternError> {
        let search = Regex::new(search).map_err(|error| PatternError::BadRegex {
            pattern: search.to_string(),
            error,
        })?;
        Ok(QueryPattern {
            search,
            replace: replace.to_string(),
        })
    }

    /// Parse the `s/search/replace/` CLI argument form. A backslash
    /// escapes the delimiter; any other escape is passed through to the
    /// regex engine untouched.
    pub fn parse(arg: &str) -> Result<Self, PatternError> {
        let mut rest = arg.strip_prefix('s').unwrap_or(arg);
        rest = rest.strip_prefix('/').ok_or_else(|| {
            PatternError::BadSyntax(arg.to_string())
        })?;

        let (search, rest) = split_part(rest);
        let (replace, _) = split_part(rest);
        QueryPattern::new(&search, &replace)
    }

    /// Apply the pattern. Returns the canonical key on substitution
    /// success, or `None` when the pattern did not match (the caller
    /// then tries the next pattern).
    pub fn apply(&self, subject: &str) -> Option<String> {
        let flat = flatten_newlines(subject);
        match self.search.replace_all(&flat, self.replace.as_str()) {
            std::borrow::Cow::Borrowed(_) => None,
            std::borrow::Cow::Owned(key) => Some(key),
        }
    }
}

/// Split one `/`-delimited part off the front, honoring `\/` escapes.
fn split_part(input: &str) -> (String, &str) {
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, '/')) => out.push('/'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '/' => return (out, &input[i + 1..]),
            other => out.push(other),
        }
    }
    (out, "")
}

fn flatten_newlines(subject: &str) -> String {
    subject.replace(['\r', '\n'], " ")
}

/// Derive the aggregation key for a query: the first matching pattern's
/// canonical output, or the empty key when every pattern misses.
pub fn query_key(patterns: &[QueryPattern], query: &str) -> String {
    for pattern in patterns {
        if let Some(key) = pattern.apply(query) {
            return key;
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins_and_is_deterministic() {
        let patterns = vec![
            QueryPattern::new(r"hash:\s*\d+", "hash: ?").unwrap(),
            QueryPattern::new(r"\d+", "?").unwrap(),
        ];
        let a = query_key(&patterns, "SELECT * FROM t /* hash: 1234 */");
        let b = query_key(&patterns, "SELECT * FROM t /* hash: 9999 */");
        assert_eq!(a, "SELECT * FROM t /* hash: ? */");
        assert_eq!(a, b);
    }

    #[test]
    fn no_match_yields_empty_key() {
        let patterns = vec![QueryPattern::new(r"hash:\s*\d+", "hash: ?").unwrap()];
        assert_eq!(query_key(&patterns, "SELECT 1"), "");
    }

    #[test]
    fn multiline_queries_flatten_to_one_form() {
        let pattern = QueryPattern::new(r"hash:\s*\d+", "hash: ?").unwrap();
        let single = pattern.apply("select * from t1 /* hash: 1234 */").unwrap();
        let multi = pattern
            .apply("select *\r\n from \n t1 /* hash: 1235 */")
            .unwrap();
        assert_eq!(single, "select * from t1 /* hash: ? */");
        assert_eq!(multi, "select *   from   t1 /* hash: ? */");
    }

    #[test]
    fn backreferences_in_replacement() {
        let pattern = QueryPattern::new(r".*hash:\s*(\d+).*", "Query ID: $1").unwrap();
        assert_eq!(
            pattern.apply("select * from t1 /* hash: 1234 */").unwrap(),
            "Query ID: 1234"
        );
    }

    #[test]
    fn cli_form_parses_with_escaped_delimiter() {
        let pattern = QueryPattern::parse(r"s/a\/b/X/").unwrap();
        assert_eq!(pattern.apply("1 a/b 2").unwrap(), "1 X 2");

        // Regex escapes survive the splitter.
        let pattern = QueryPattern::parse(r"s/hash:\s*\d+/hash: ?/").unwrap();
        assert!(pattern.apply("hash: 77").is_some());

        assert!(QueryPattern::parse("nonsense").is_err());
        assert!(QueryPattern::parse(r"s/(unclosed/x/").is_err());
    }
}
