//! SQL shape recognition.
//!
//! This is not an execution planner: the parser walks the statement
//! just far enough to reach every table reference and report it with
//! the statement kind it appears under. It recognizes SELECT (set
//! operators, subqueries, CASE/IF/CAST/CONVERT, join forms, index
//! hints), INSERT INTO, UPDATE, DELETE FROM and SHOW. Anything outside
//! that shape is a parse error surfaced with the offending bytes;
//! callers log and move on.

mod lexer;
mod parser;

use std::fmt;

/// The statement kinds table statistics aggregate by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse failure, carrying the offending position and surrounding bytes.
#[derive(Debug)]
pub struct SqlError {
    pub offset: usize,
    pub message: String,
    pub context: String,
}

impl SqlError {
    pub(crate) fn at(input: &str, offset: usize, message: &str) -> Self {
        let end = (offset + 32).min(input.len());
        // Clamp to char boundaries so slicing can't panic on multi-byte input.
        let start = floor_char_boundary(input, offset.min(input.len()));
        let end = floor_char_boundary(input, end);
        SqlError {
            offset,
            message: message.to_string(),
            context: input[start..end].to_string(),
        }
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at byte {} near {:?}",
            self.message, self.offset, self.context
        )
    }
}

impl std::error::Error for SqlError {}

/// Recognize a statement and return every `(kind, table)` pair it
/// touches, in source order. SHOW statements parse successfully but
/// reference no tables.
pub fn tables_in_query(sql: &str) -> Result<Vec<(StatementKind, String)>, SqlError> {
    let tokens = lexer::tokenize(sql)?;
    parser::Parser::new(sql, tokens).parse_statement()
}
