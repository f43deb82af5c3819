//! Statement extraction
//!
//! Splits SQL text into individual statements on top-level semicolons. Splitting
//! works on the tokenizer's output rather than the raw text, so semicolons inside
//! string literals, quoted identifiers and comments never end a statement.
//!
//! `COPY ... TO` is not understood by the engine; those statements are recognized
//! here and parsed into a [`CopySpec`] that the pipeline executes itself.

use std::path::PathBuf;

use sqlparser::dialect::SQLiteDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};

use crate::error::{Error, Result};
use crate::export::{CopySpec, CsvOptions};

/// What kind of statement a [`StatementRef`] holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// Plain SQL handed to the engine
    Sql,
    /// `COPY <source> TO '<path>'`
    CopyTo(CopySpec),
}

/// One statement extracted from a larger SQL text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRef {
    index: usize,
    sql: String,
    kind: StatementKind,
}

impl StatementRef {
    pub(crate) fn copy(spec: CopySpec) -> Self {
        Self {
            index: 0,
            sql: format!("COPY ({}) TO '{}'", spec.source_sql, spec.path.display()),
            kind: StatementKind::CopyTo(spec),
        }
    }

    /// Position of the statement in the original text, starting at 0
    pub fn index(&self) -> usize {
        self.index
    }

    /// Statement text without the trailing semicolon
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    pub fn is_copy(&self) -> bool {
        matches!(self.kind, StatementKind::CopyTo(_))
    }
}

/// Statements extracted from one SQL text, in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedStatements {
    statements: Vec<StatementRef>,
}

impl ExtractedStatements {
    /// Number of statements; never zero
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StatementRef> {
        self.statements.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StatementRef> {
        self.statements.iter()
    }
}

impl IntoIterator for ExtractedStatements {
    type Item = StatementRef;
    type IntoIter = std::vec::IntoIter<StatementRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

impl<'a> IntoIterator for &'a ExtractedStatements {
    type Item = &'a StatementRef;
    type IntoIter = std::slice::Iter<'a, StatementRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}

/// Tokenize SQL text, keeping whitespace and comments
pub(crate) fn tokenize(sql: &str) -> Result<Vec<TokenWithSpan>> {
    Tokenizer::new(&SQLiteDialect {}, sql)
        .with_unescape(false)
        .tokenize_with_location()
        .map_err(|e| Error::Parse(e.to_string()))
}

/// Split SQL text into statements
///
/// Fails with [`Error::Parse`] when the text holds no statement at all or when a
/// literal, quoted identifier or comment is left unterminated.
///
/// ```
/// # use litesession_client::extract_statements;
/// let statements = extract_statements("SELECT ';'; -- done\nSELECT 2;").unwrap();
/// assert_eq!(statements.len(), 2);
/// assert_eq!(statements.get(0).unwrap().sql(), "SELECT ';'");
/// ```
pub fn extract_statements(sql: &str) -> Result<ExtractedStatements> {
    let tokens = tokenize(sql)?;
    let index = LineIndex::new(sql);

    let mut statements = Vec::new();
    let mut segment: Vec<&TokenWithSpan> = Vec::new();
    let mut start = 0;
    // open BEGIN/CASE blocks inside a trigger body
    let mut depth = 0usize;

    for token in &tokens {
        match &token.token {
            Token::SemiColon if depth > 0 => segment.push(token),
            Token::SemiColon => {
                let end = index.offset(token.span.start);
                push_statement(sql, start..end, &segment, &index, &mut statements)?;
                segment.clear();
                start = index.offset(token.span.end);
            }
            Token::Whitespace(_) => {}
            _ => {
                segment.push(token);
                if is_trigger(&segment) {
                    if is_keyword(&token.token, Keyword::BEGIN)
                        || is_keyword(&token.token, Keyword::CASE)
                    {
                        depth += 1;
                    } else if is_keyword(&token.token, Keyword::END) {
                        depth = depth.saturating_sub(1);
                    }
                }
            }
        }
    }
    push_statement(sql, start..sql.len(), &segment, &index, &mut statements)?;

    if statements.is_empty() {
        return Err(Error::Parse("no statements found in SQL text".to_string()));
    }
    Ok(ExtractedStatements { statements })
}

fn push_statement(
    sql: &str,
    range: std::ops::Range<usize>,
    segment: &[&TokenWithSpan],
    index: &LineIndex,
    statements: &mut Vec<StatementRef>,
) -> Result<()> {
    // comments and whitespace only
    let Some(first) = segment.first() else {
        return Ok(());
    };

    let kind = if is_keyword(&first.token, Keyword::COPY) {
        StatementKind::CopyTo(CopyParser::new(sql, segment, index).parse()?)
    } else {
        StatementKind::Sql
    };

    statements.push(StatementRef {
        index: statements.len(),
        sql: sql[range].trim().to_string(),
        kind,
    });
    Ok(())
}

/// Whether a statement's leading tokens are `CREATE [TEMP | TEMPORARY] TRIGGER`
fn is_trigger(segment: &[&TokenWithSpan]) -> bool {
    let mut words = segment.iter().map(|t| &t.token);
    if !words.next().is_some_and(|t| is_keyword(t, Keyword::CREATE)) {
        return false;
    }
    match words.next() {
        Some(t) if is_keyword(t, Keyword::TEMP) || is_keyword(t, Keyword::TEMPORARY) => {
            words.next().is_some_and(|t| is_keyword(t, Keyword::TRIGGER))
        }
        Some(t) => is_keyword(t, Keyword::TRIGGER),
        None => false,
    }
}

/// Maps tokenizer locations (1-based line and character column) to byte offsets
struct LineIndex<'a> {
    sql: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(sql: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(sql.match_indices('\n').map(|(i, _)| i + 1));
        Self { sql, line_starts }
    }

    fn offset(&self, location: Location) -> usize {
        let line = location.line.max(1) as usize - 1;
        let Some(&line_start) = self.line_starts.get(line) else {
            return self.sql.len();
        };
        let column = location.column.max(1) as usize - 1;
        self.sql[line_start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| line_start + i)
            .unwrap_or(self.sql.len())
    }
}

pub(crate) fn is_keyword(token: &Token, keyword: Keyword) -> bool {
    matches!(token, Token::Word(w) if w.quote_style.is_none() && w.keyword == keyword)
}

/// Uppercased text of an unquoted word
fn bare_word(token: &Token) -> Option<String> {
    match token {
        Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_ascii_uppercase()),
        _ => None,
    }
}

/// Parser for `COPY <table | (query)> TO '<path>' [WITH] [(option, ...)]`
struct CopyParser<'a> {
    sql: &'a str,
    tokens: &'a [&'a TokenWithSpan],
    index: &'a LineIndex<'a>,
    pos: usize,
}

impl<'a> CopyParser<'a> {
    fn new(sql: &'a str, tokens: &'a [&'a TokenWithSpan], index: &'a LineIndex<'a>) -> Self {
        Self {
            sql,
            tokens,
            index,
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<CopySpec> {
        self.expect_keyword(Keyword::COPY)?;
        let source_sql = self.parse_source()?;

        match self.next() {
            Some(token) if is_keyword(token, Keyword::TO) => {}
            Some(token) if is_keyword(token, Keyword::FROM) => {
                return Err(Error::Parse(
                    "COPY ... FROM is not supported, only COPY ... TO".to_string(),
                ));
            }
            other => return Err(self.unexpected("TO", other)),
        }

        let path = match self.next() {
            Some(Token::SingleQuotedString(raw)) => PathBuf::from(unquote(raw)),
            other => return Err(self.unexpected("a quoted file path", other)),
        };

        let mut options = CsvOptions::default();
        if self.peek().is_some_and(|t| is_keyword(t, Keyword::WITH)) {
            self.pos += 1;
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            self.parse_options(&mut options)?;
        }

        if let Some(extra) = self.next() {
            return Err(Error::Parse(format!(
                "unexpected '{}' after COPY statement",
                extra
            )));
        }

        Ok(CopySpec {
            source_sql,
            path,
            options,
        })
    }

    fn parse_source(&mut self) -> Result<String> {
        let Some(first) = self.tokens.get(self.pos) else {
            return Err(Error::Parse("COPY requires a table or query".to_string()));
        };

        if first.token == Token::LParen {
            let mut depth = 0usize;
            for (offset, token) in self.tokens[self.pos..].iter().enumerate() {
                match token.token {
                    Token::LParen => depth += 1,
                    Token::RParen => {
                        depth -= 1;
                        if depth == 0 {
                            let close = self.pos + offset;
                            let start = self.index.offset(first.span.end);
                            let end = self.index.offset(token.span.start);
                            self.pos = close + 1;
                            let query = self.sql[start..end].trim();
                            if query.is_empty() {
                                return Err(Error::Parse("COPY source query is empty".to_string()));
                            }
                            return Ok(query.to_string());
                        }
                    }
                    _ => {}
                }
            }
            return Err(Error::Parse("unbalanced parentheses in COPY source".to_string()));
        }

        // table name, optionally schema-qualified
        let start = self.pos;
        loop {
            match self.next() {
                Some(Token::Word(_)) => {}
                other => return Err(self.unexpected("a table name", other)),
            }
            if self.peek() == Some(&Token::Period) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let from = self.index.offset(self.tokens[start].span.start);
        let to = self.index.offset(self.tokens[self.pos - 1].span.end);
        Ok(format!("SELECT * FROM {}", &self.sql[from..to]))
    }

    fn parse_options(&mut self, options: &mut CsvOptions) -> Result<()> {
        loop {
            let name = match self.next() {
                Some(token) => bare_word(token)
                    .ok_or_else(|| Error::Parse(format!("expected COPY option, got '{}'", token)))?,
                None => return Err(Error::Parse("unterminated COPY options".to_string())),
            };

            match name.as_str() {
                "HEADER" => {
                    options.header = match self.peek().and_then(bool_literal) {
                        Some(value) => {
                            self.pos += 1;
                            value
                        }
                        None => true,
                    };
                }
                "DELIMITER" | "DELIM" | "SEP" => options.delimiter = self.single_byte(&name)?,
                "QUOTE" => options.quote = self.single_byte(&name)?,
                "NULL" => {
                    options.null = match self.next() {
                        Some(Token::SingleQuotedString(raw)) => unquote(raw),
                        other => return Err(self.unexpected("a quoted NULL string", other)),
                    };
                }
                "FORMAT" => match self.next().and_then(bare_word).as_deref() {
                    Some("CSV") => {}
                    Some(other) => {
                        return Err(Error::Parse(format!(
                            "unsupported COPY format '{}', only CSV is available",
                            other
                        )))
                    }
                    None => return Err(Error::Parse("FORMAT requires a format name".to_string())),
                },
                other => {
                    return Err(Error::Parse(format!("unknown COPY option '{}'", other)));
                }
            }

            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(()),
                other => return Err(self.unexpected("',' or ')'", other)),
            }
        }
    }

    fn single_byte(&mut self, option: &str) -> Result<u8> {
        let text = match self.next() {
            Some(Token::SingleQuotedString(raw)) => unquote(raw),
            other => return Err(self.unexpected("a quoted character", other)),
        };
        match text.as_str() {
            "\\t" => Ok(b'\t'),
            _ if text.len() == 1 && text.is_ascii() => Ok(text.as_bytes()[0]),
            _ => Err(Error::Parse(format!(
                "{} must be a single ASCII character, got '{}'",
                option, text
            ))),
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<()> {
        match self.next() {
            Some(token) if is_keyword(token, keyword) => Ok(()),
            other => Err(self.unexpected(&format!("{:?}", keyword), other)),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str, found: Option<&Token>) -> Error {
        match found {
            Some(token) => Error::Parse(format!(
                "malformed COPY statement: expected {}, got '{}'",
                expected, token
            )),
            None => Error::Parse(format!(
                "malformed COPY statement: expected {}, got end of statement",
                expected
            )),
        }
    }
}

fn bool_literal(token: &Token) -> Option<bool> {
    match token {
        Token::Number(n, _) if n == "1" => Some(true),
        Token::Number(n, _) if n == "0" => Some(false),
        other => match bare_word(other)?.as_str() {
            "TRUE" | "ON" => Some(true),
            "FALSE" | "OFF" => Some(false),
            _ => None,
        },
    }
}

/// Undo `''` escaping in a single-quoted literal
fn unquote(raw: &str) -> String {
    raw.replace("''", "'")
}
