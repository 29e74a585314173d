//! SQL tokenizer.
//!
//! Produces the token stream the shape parser consumes. Comments
//! (`-- ...`, `# ...`, `/* ... */`) are tolerated anywhere whitespace
//! is and never surface as tokens. String literal contents are not
//! needed downstream, so literals collapse to a marker token.

use super::SqlError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Unquoted identifier or keyword, original case preserved.
    Ident(String),
    /// Backtick-quoted identifier, quotes stripped.
    Quoted(String),
    /// `'...'` or `"..."` string literal.
    StringLit,
    /// Numeric literal.
    Number,
    /// `@@global_var` or `@user_var` reference.
    Var,
    LParen,
    RParen,
    Comma,
    Dot,
    Semi,
    /// Comparison or arithmetic operator.
    Op(&'static str),
}

impl Token {
    /// Case-insensitive keyword check on unquoted identifiers.
    pub fn is_kw(&self, kw: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(kw))
    }

    pub fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("`{}`", s),
            Token::Quoted(s) => format!("`{}`", s),
            Token::StringLit => "string literal".to_string(),
            Token::Number => "number".to_string(),
            Token::Var => "variable".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Dot => "'.'".to_string(),
            Token::Semi => "';'".to_string(),
            Token::Op(op) => format!("'{}'", op),
        }
    }
}

/// A token and the byte offset it starts at (for error reporting).
pub type Spanned = (Token, usize);

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, SqlError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let b = bytes[i];

        match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
            }
            b'#' => i = skip_line(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_line(bytes, i);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i, input)?;
            }
            b'\'' | b'"' => {
                i = skip_string(bytes, i, input)?;
                tokens.push((Token::StringLit, start));
            }
            b'`' => {
                let (name, next) = scan_backtick(bytes, i, input)?;
                tokens.push((Token::Quoted(name), start));
                i = next;
            }
            b'@' => {
                i += 1;
                if bytes.get(i) == Some(&b'@') {
                    i += 1;
                }
                while i < bytes.len() && (is_ident_byte(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push((Token::Var, start));
            }
            b'0'..=b'9' => {
                i = scan_number(bytes, i);
                tokens.push((Token::Number, start));
            }
            b'.' => {
                // A leading-dot float like `.5`; otherwise a qualifier dot.
                if bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                    i = scan_number(bytes, i + 1);
                    tokens.push((Token::Number, start));
                } else {
                    tokens.push((Token::Dot, start));
                    i += 1;
                }
            }
            b'(' => {
                tokens.push((Token::LParen, start));
                i += 1;
            }
            b')' => {
                tokens.push((Token::RParen, start));
                i += 1;
            }
            b',' => {
                tokens.push((Token::Comma, start));
                i += 1;
            }
            b';' => {
                tokens.push((Token::Semi, start));
                i += 1;
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'>') {
                    tokens.push((Token::Op("<>"), start));
                    i += 2;
                } else if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Op("<="), start));
                    i += 2;
                } else {
                    tokens.push((Token::Op("<"), start));
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Op(">="), start));
                    i += 2;
                } else {
                    tokens.push((Token::Op(">"), start));
                    i += 1;
                }
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Op("!="), start));
                    i += 2;
                } else {
                    return Err(SqlError::at(input, start, "unexpected '!'"));
                }
            }
            b'=' => {
                tokens.push((Token::Op("="), start));
                i += 1;
            }
            b'+' => {
                tokens.push((Token::Op("+"), start));
                i += 1;
            }
            b'-' => {
                tokens.push((Token::Op("-"), start));
                i += 1;
            }
            b'*' => {
                tokens.push((Token::Op("*"), start));
                i += 1;
            }
            b'/' => {
                tokens.push((Token::Op("/"), start));
                i += 1;
            }
            b'%' => {
                tokens.push((Token::Op("%"), start));
                i += 1;
            }
            _ if is_ident_start(b) => {
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
                tokens.push((Token::Ident(input[start..i].to_string()), start));
            }
            _ => {
                return Err(SqlError::at(
                    input,
                    start,
                    &format!("unexpected byte 0x{:02x}", b),
                ));
            }
        }
    }

    Ok(tokens)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn skip_line(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], start: usize, input: &str) -> Result<usize, SqlError> {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return Ok(i + 2);
        }
        i += 1;
    }
    Err(SqlError::at(input, start, "unterminated comment"))
}

fn skip_string(bytes: &[u8], start: usize, input: &str) -> Result<usize, SqlError> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => {
                // Doubled quote is an escaped quote, not the end.
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return Ok(i + 1);
                }
            }
            _ => i += 1,
        }
    }
    Err(SqlError::at(input, start, "unterminated string literal"))
}

fn scan_backtick(bytes: &[u8], start: usize, input: &str) -> Result<(String, usize), SqlError> {
    let mut name = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            if bytes.get(i + 1) == Some(&b'`') {
                name.push('`');
                i += 2;
            } else {
                return Ok((name, i + 1));
            }
        } else {
            name.push(bytes[i] as char);
            i += 1;
        }
    }
    Err(SqlError::at(input, start, "unterminated quoted identifier"))
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}
