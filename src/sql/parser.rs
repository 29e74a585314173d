//! Recursive-descent statement parser.
//!
//! Each statement form has one `parse_*` method; table references are
//! reported through [`Parser::report`] as they are reached, tagged with
//! the kind of the statement they appear under (subqueries always tag
//! as SELECT). The expression grammar is precedence-layered: OR < AND <
//! NOT < predicate < additive < multiplicative < unary < primary.

use super::lexer::{Spanned, Token};
use super::{SqlError, StatementKind};

/// Keywords that terminate a table factor and therefore can never be a
/// bare alias.
const TABLE_STOP_WORDS: &[&str] = &[
    "ON", "USING", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "JOIN", "INNER", "LEFT", "RIGHT",
    "NATURAL", "CROSS", "STRAIGHT_JOIN", "UNION", "SET", "USE", "IGNORE", "FORCE", "FOR", "AS",
    "VALUES", "VALUE", "AND", "OR",
];

/// Keywords that terminate a select item.
const ITEM_STOP_WORDS: &[&str] = &[
    "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "UNION", "AS", "AND", "OR", "WHEN",
    "THEN", "ELSE", "END", "ASC", "DESC",
];

pub struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    found: Vec<(StatementKind, String)>,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, tokens: Vec<Spanned>) -> Self {
        Parser {
            src,
            tokens,
            pos: 0,
            found: Vec::new(),
        }
    }

    pub fn parse_statement(mut self) -> Result<Vec<(StatementKind, String)>, SqlError> {
        if self.at_kw("SELECT") || self.at(&Token::LParen) {
            self.parse_select()?;
        } else if self.at_kw("INSERT") {
            self.parse_insert()?;
        } else if self.at_kw("UPDATE") {
            self.parse_update()?;
        } else if self.at_kw("DELETE") {
            self.parse_delete()?;
        } else if self.at_kw("SHOW") {
            self.parse_show();
        } else {
            return Err(self.err("expected SELECT, INSERT, UPDATE, DELETE or SHOW"));
        }

        self.eat(&Token::Semi);
        if self.pos < self.tokens.len() {
            return Err(self.err("trailing input after statement"));
        }
        Ok(self.found)
    }

    // ---- statements -----------------------------------------------------

    fn parse_select(&mut self) -> Result<(), SqlError> {
        self.parse_select_core()?;
        while self.eat_kw("UNION") {
            if !self.eat_kw("ALL") {
                self.eat_kw("DISTINCT");
            }
            self.parse_select_core()?;
        }
        Ok(())
    }

    fn parse_select_core(&mut self) -> Result<(), SqlError> {
        if self.eat(&Token::LParen) {
            self.parse_select()?;
            self.expect(&Token::RParen)?;
            return Ok(());
        }

        self.expect_kw("SELECT")?;
        if !self.eat_kw("DISTINCT") && !self.eat_kw("DISTINCTROW") {
            self.eat_kw("ALL");
        }

        loop {
            self.parse_select_item()?;
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        if self.eat_kw("FROM") {
            self.parse_table_refs(StatementKind::Select)?;
        }
        if self.eat_kw("WHERE") {
            self.parse_expr()?;
        }
        if self.eat_kw("GROUP") {
            self.expect_kw("BY")?;
            self.parse_order_list()?;
        }
        if self.eat_kw("HAVING") {
            self.parse_expr()?;
        }
        if self.eat_kw("ORDER") {
            self.expect_kw("BY")?;
            self.parse_order_list()?;
        }
        if self.eat_kw("LIMIT") {
            self.parse_limit()?;
        }
        Ok(())
    }

    fn parse_select_item(&mut self) -> Result<(), SqlError> {
        if self.eat(&Token::Op("*")) {
            return Ok(());
        }
        self.parse_expr()?;
        self.eat_alias(ITEM_STOP_WORDS)?;
        Ok(())
    }

    fn parse_insert(&mut self) -> Result<(), SqlError> {
        self.expect_kw("INSERT")?;
        self.eat_kw("IGNORE");
        self.expect_kw("INTO")?;

        let name = self.parse_qualified_name()?;
        self.report(StatementKind::Insert, &name);

        if self.at(&Token::LParen) && !self.lparen_opens_select() {
            self.expect(&Token::LParen)?;
            self.parse_name_list()?;
            self.expect(&Token::RParen)?;
        }

        if self.eat_kw("VALUES") || self.eat_kw("VALUE") {
            loop {
                self.expect(&Token::LParen)?;
                if !self.at(&Token::RParen) {
                    loop {
                        self.parse_expr()?;
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen)?;
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        } else if self.at_kw("SELECT") || self.lparen_opens_select() {
            self.parse_select()?;
        } else if self.eat_kw("SET") {
            self.parse_assignments()?;
        } else {
            return Err(self.err("expected VALUES, SELECT or SET"));
        }

        if self.eat_kw("ON") {
            self.expect_kw("DUPLICATE")?;
            self.expect_kw("KEY")?;
            self.expect_kw("UPDATE")?;
            self.parse_assignments()?;
        }
        Ok(())
    }

    fn parse_update(&mut self) -> Result<(), SqlError> {
        self.expect_kw("UPDATE")?;
        self.eat_kw("IGNORE");
        self.parse_table_refs(StatementKind::Update)?;
        self.expect_kw("SET")?;
        self.parse_assignments()?;
        if self.eat_kw("WHERE") {
            self.parse_expr()?;
        }
        if self.eat_kw("ORDER") {
            self.expect_kw("BY")?;
            self.parse_order_list()?;
        }
        if self.eat_kw("LIMIT") {
            self.parse_limit()?;
        }
        Ok(())
    }

    fn parse_delete(&mut self) -> Result<(), SqlError> {
        self.expect_kw("DELETE")?;
        self.expect_kw("FROM")?;
        self.parse_table_refs(StatementKind::Delete)?;
        if self.eat_kw("WHERE") {
            self.parse_expr()?;
        }
        if self.eat_kw("ORDER") {
            self.expect_kw("BY")?;
            self.parse_order_list()?;
        }
        if self.eat_kw("LIMIT") {
            self.parse_limit()?;
        }
        Ok(())
    }

    /// SHOW is recognized so mid-stream joins on SHOW traffic don't spam
    /// parse errors; it references no tables, so the whole tail is
    /// consumed without inspection.
    fn parse_show(&mut self) {
        while self.pos < self.tokens.len() && !self.at(&Token::Semi) {
            self.pos += 1;
        }
    }

    // ---- table references -----------------------------------------------

    fn parse_table_refs(&mut self, kind: StatementKind) -> Result<(), SqlError> {
        self.parse_table_factor(kind)?;
        loop {
            if self.eat(&Token::Comma) {
                self.parse_table_factor(kind)?;
            } else if self.parse_join_prefix()? {
                self.parse_table_factor(kind)?;
                if self.eat_kw("ON") {
                    self.parse_expr()?;
                } else if self.eat_kw("USING") {
                    self.expect(&Token::LParen)?;
                    self.parse_name_list()?;
                    self.expect(&Token::RParen)?;
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Consume a join introducer if one is present.
    fn parse_join_prefix(&mut self) -> Result<bool, SqlError> {
        if self.eat_kw("JOIN") || self.eat_kw("STRAIGHT_JOIN") {
            return Ok(true);
        }
        if self.eat_kw("INNER") || self.eat_kw("CROSS") {
            self.expect_kw("JOIN")?;
            return Ok(true);
        }
        if self.eat_kw("LEFT") || self.eat_kw("RIGHT") {
            self.eat_kw("OUTER");
            self.expect_kw("JOIN")?;
            return Ok(true);
        }
        if self.eat_kw("NATURAL") {
            if self.eat_kw("LEFT") || self.eat_kw("RIGHT") {
                self.eat_kw("OUTER");
            }
            self.expect_kw("JOIN")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_table_factor(&mut self, kind: StatementKind) -> Result<(), SqlError> {
        if self.eat(&Token::LParen) {
            if self.at_kw("SELECT") || self.lparen_opens_select() {
                self.parse_select()?;
            } else {
                self.parse_table_refs(kind)?;
            }
            self.expect(&Token::RParen)?;
            self.eat_alias(TABLE_STOP_WORDS)?;
            return Ok(());
        }

        let name = self.parse_qualified_name()?;
        self.report(kind, &name);
        self.parse_index_hints()?;
        self.eat_alias(TABLE_STOP_WORDS)?;
        self.parse_index_hints()?;
        Ok(())
    }

    fn parse_index_hints(&mut self) -> Result<(), SqlError> {
        loop {
            let hint = (self.at_kw("USE") || self.at_kw("IGNORE") || self.at_kw("FORCE"))
                && self
                    .tokens
                    .get(self.pos + 1)
                    .is_some_and(|(t, _)| t.is_kw("INDEX") || t.is_kw("KEY"));
            if !hint {
                return Ok(());
            }
            self.pos += 2;
            if self.eat_kw("FOR") {
                if self.eat_kw("JOIN") {
                } else if self.eat_kw("ORDER") || self.eat_kw("GROUP") {
                    self.expect_kw("BY")?;
                } else {
                    return Err(self.err("expected JOIN, ORDER BY or GROUP BY"));
                }
            }
            self.expect(&Token::LParen)?;
            if !self.at(&Token::RParen) {
                self.parse_name_list()?;
            }
            self.expect(&Token::RParen)?;
        }
    }

    // ---- expressions ----------------------------------------------------

    fn parse_expr(&mut self) -> Result<(), SqlError> {
        self.parse_and()?;
        while self.eat_kw("OR") {
            self.parse_and()?;
        }
        Ok(())
    }

    fn parse_and(&mut self) -> Result<(), SqlError> {
        self.parse_not()?;
        while self.eat_kw("AND") {
            self.parse_not()?;
        }
        Ok(())
    }

    fn parse_not(&mut self) -> Result<(), SqlError> {
        if self.eat_kw("NOT") {
            return self.parse_not();
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<(), SqlError> {
        self.parse_additive()?;

        for op in ["=", "!=", "<>", "<=", ">=", "<", ">"] {
            if self.eat(&Token::Op(op)) {
                return self.parse_additive();
            }
        }

        if self.eat_kw("IS") {
            self.eat_kw("NOT");
            if self.eat_kw("NULL") || self.eat_kw("TRUE") || self.eat_kw("FALSE") {
                return Ok(());
            }
            return Err(self.err("expected NULL, TRUE or FALSE after IS"));
        }

        let negated = self.eat_kw("NOT");
        if self.eat_kw("IN") {
            self.expect(&Token::LParen)?;
            if self.at_kw("SELECT") || self.lparen_opens_select() {
                self.parse_select()?;
            } else {
                loop {
                    self.parse_expr()?;
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
            }
            self.expect(&Token::RParen)?;
            return Ok(());
        }
        if self.eat_kw("LIKE") {
            self.parse_additive()?;
            if self.eat_kw("ESCAPE") {
                self.expect_token(Token::StringLit)?;
            }
            return Ok(());
        }
        if self.eat_kw("BETWEEN") {
            self.parse_additive()?;
            self.expect_kw("AND")?;
            self.parse_additive()?;
            return Ok(());
        }
        if negated {
            return Err(self.err("expected IN, LIKE or BETWEEN after NOT"));
        }
        Ok(())
    }

    fn parse_additive(&mut self) -> Result<(), SqlError> {
        self.parse_multiplicative()?;
        while self.eat(&Token::Op("+")) || self.eat(&Token::Op("-")) {
            self.parse_multiplicative()?;
        }
        Ok(())
    }

    fn parse_multiplicative(&mut self) -> Result<(), SqlError> {
        self.parse_unary()?;
        while self.eat(&Token::Op("*")) || self.eat(&Token::Op("/")) || self.eat(&Token::Op("%")) {
            self.parse_unary()?;
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> Result<(), SqlError> {
        if self.eat(&Token::Op("-")) || self.eat(&Token::Op("+")) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<(), SqlError> {
        if self.eat_token(Token::Number)
            || self.eat_token(Token::StringLit)
            || self.eat_token(Token::Var)
        {
            return Ok(());
        }

        if self.eat(&Token::LParen) {
            if self.at_kw("SELECT") || self.lparen_opens_select() {
                self.parse_select()?;
            } else {
                loop {
                    self.parse_expr()?;
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
            }
            self.expect(&Token::RParen)?;
            return Ok(());
        }

        if self.at_kw("EXISTS") && self.tokens.get(self.pos + 1).is_some_and(|(t, _)| *t == Token::LParen) {
            self.pos += 2;
            self.parse_select()?;
            self.expect(&Token::RParen)?;
            return Ok(());
        }

        if self.eat_kw("CASE") {
            if !self.at_kw("WHEN") {
                self.parse_expr()?;
            }
            while self.eat_kw("WHEN") {
                self.parse_expr()?;
                self.expect_kw("THEN")?;
                self.parse_expr()?;
            }
            if self.eat_kw("ELSE") {
                self.parse_expr()?;
            }
            self.expect_kw("END")?;
            return Ok(());
        }

        if self.at_kw("CAST") && self.tokens.get(self.pos + 1).is_some_and(|(t, _)| *t == Token::LParen) {
            self.pos += 2;
            self.parse_expr()?;
            self.expect_kw("AS")?;
            self.parse_type_name()?;
            self.expect(&Token::RParen)?;
            return Ok(());
        }

        if self.at_kw("CONVERT") && self.tokens.get(self.pos + 1).is_some_and(|(t, _)| *t == Token::LParen) {
            self.pos += 2;
            self.parse_expr()?;
            if self.eat(&Token::Comma) {
                self.parse_type_name()?;
            } else if self.eat_kw("USING") {
                self.parse_name()?;
            } else {
                return Err(self.err("expected ',' or USING in CONVERT"));
            }
            self.expect(&Token::RParen)?;
            return Ok(());
        }

        if self.eat_kw("INTERVAL") {
            self.parse_additive()?;
            self.parse_name()?; // unit: DAY, HOUR, ...
            return Ok(());
        }

        if matches!(self.peek(), Some(Token::Ident(_)) | Some(Token::Quoted(_))) {
            self.parse_name()?;
            // Qualifier chain: t.c, db.t.c, or t.*
            while self.eat(&Token::Dot) {
                if self.eat(&Token::Op("*")) {
                    return Ok(());
                }
                self.parse_name()?;
            }
            // Function call.
            if self.eat(&Token::LParen) {
                self.eat_kw("DISTINCT");
                if self.eat(&Token::Op("*")) {
                    self.expect(&Token::RParen)?;
                    return Ok(());
                }
                if !self.at(&Token::RParen) {
                    loop {
                        self.parse_expr()?;
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen)?;
            }
            return Ok(());
        }

        Err(self.err("expected expression"))
    }

    fn parse_type_name(&mut self) -> Result<(), SqlError> {
        // e.g. SIGNED INTEGER, UNSIGNED, CHAR(10), DECIMAL(10, 2)
        self.parse_name()?;
        while matches!(self.peek(), Some(Token::Ident(_))) {
            self.parse_name()?;
        }
        if self.eat(&Token::LParen) {
            self.expect_token(Token::Number)?;
            if self.eat(&Token::Comma) {
                self.expect_token(Token::Number)?;
            }
            self.expect(&Token::RParen)?;
        }
        Ok(())
    }

    fn parse_order_list(&mut self) -> Result<(), SqlError> {
        loop {
            self.parse_expr()?;
            if !self.eat_kw("ASC") {
                self.eat_kw("DESC");
            }
            if !self.eat(&Token::Comma) {
                return Ok(());
            }
        }
    }

    fn parse_limit(&mut self) -> Result<(), SqlError> {
        self.expect_token(Token::Number)?;
        if self.eat(&Token::Comma) || self.eat_kw("OFFSET") {
            self.expect_token(Token::Number)?;
        }
        Ok(())
    }

    fn parse_assignments(&mut self) -> Result<(), SqlError> {
        loop {
            self.parse_qualified_name()?;
            self.expect(&Token::Op("="))?;
            self.parse_expr()?;
            if !self.eat(&Token::Comma) {
                return Ok(());
            }
        }
    }

    // ---- names and aliases ----------------------------------------------

    fn parse_name(&mut self) -> Result<String, SqlError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) | Some(Token::Quoted(name)) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.err("expected identifier or table name")),
        }
    }

    /// `name`, `db.name` etc. — returns the final component.
    fn parse_qualified_name(&mut self) -> Result<String, SqlError> {
        let mut name = self.parse_name()?;
        while self.at(&Token::Dot)
            && matches!(
                self.tokens.get(self.pos + 1),
                Some((Token::Ident(_), _)) | Some((Token::Quoted(_), _))
            )
        {
            self.pos += 1;
            name = self.parse_name()?;
        }
        Ok(name)
    }

    fn parse_name_list(&mut self) -> Result<(), SqlError> {
        loop {
            self.parse_name()?;
            if !self.eat(&Token::Comma) {
                return Ok(());
            }
        }
    }

    fn eat_alias(&mut self, stop_words: &[&str]) -> Result<(), SqlError> {
        if self.eat_kw("AS") {
            self.parse_name()?;
            return Ok(());
        }
        match self.peek() {
            Some(Token::Quoted(_)) => {
                self.pos += 1;
            }
            Some(Token::Ident(name)) => {
                let reserved = stop_words.iter().any(|kw| name.eq_ignore_ascii_case(kw));
                if !reserved {
                    self.pos += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Record a table reference. The reported name is the final dotted
    /// component with any non-alphabetic prefix stripped, then the run
    /// of identifier characters.
    fn report(&mut self, kind: StatementKind, raw: &str) {
        let trimmed: String = raw
            .chars()
            .skip_while(|c| !c.is_ascii_alphabetic())
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        if !trimmed.is_empty() {
            self.found.push((kind, trimmed));
        }
    }

    // ---- token plumbing --------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn at_kw(&self, kw: &str) -> bool {
        self.peek().is_some_and(|t| t.is_kw(kw))
    }

    /// Does the upcoming `(` (possibly nested) open a SELECT?
    fn lparen_opens_select(&self) -> bool {
        let mut i = self.pos;
        let mut depth = 0;
        while let Some((token, _)) = self.tokens.get(i) {
            match token {
                Token::LParen => depth += 1,
                Token::Ident(s) if s.eq_ignore_ascii_case("SELECT") => return depth > 0,
                _ => return false,
            }
            i += 1;
        }
        false
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_token(&mut self, token: Token) -> bool {
        self.eat(&token)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), SqlError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.err(&format!("expected {}", token.describe())))
        }
    }

    fn expect_token(&mut self, token: Token) -> Result<(), SqlError> {
        self.expect(&token)
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), SqlError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.err(&format!("expected {}", kw)))
        }
    }

    fn err(&self, message: &str) -> SqlError {
        match self.tokens.get(self.pos) {
            Some((token, offset)) => SqlError::at(
                self.src,
                *offset,
                &format!("{}, found {}", message, token.describe()),
            ),
            None => SqlError::at(self.src, self.src.len(), &format!("{} at end of input", message)),
        }
    }
}
