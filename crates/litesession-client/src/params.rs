//! Parameter type inference
//!
//! The engine does not report types for statement parameters, so they are derived
//! from the statement text at prepare time. A parameter gets a concrete type when it
//! appears as
//!
//! * `CAST(? AS <type>)`,
//! * one side of a comparison with a column (`id = ?`, `? < t.price`, `SET name = ?`),
//! * a whole value in `INSERT INTO t [(cols)] VALUES (...)`.
//!
//! Everything else, including every named parameter, accepts any value.

use std::collections::HashMap;

use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::Token;

use crate::error::Result;
use crate::extract::{is_keyword, tokenize};
use crate::types::{ColumnInfo, ColumnType, Value};

/// One positional parameter of a prepared statement
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParamSlot {
    pub ty: ColumnType,
    pub value: Option<Value>,
}

/// A table referenced by the statement, as `(schema, table)`
pub(crate) type TableName = (Option<String>, String);

/// A referenced table with its alias and columns
struct TableRef {
    name: TableName,
    alias: Option<String>,
    columns: Vec<ColumnInfo>,
}

impl TableRef {
    /// Whether `qualifier` names this table, by alias or by table name
    fn answers_to(&self, qualifier: &str) -> bool {
        match &self.alias {
            Some(alias) => alias.eq_ignore_ascii_case(qualifier),
            None => self.name.1.eq_ignore_ascii_case(qualifier),
        }
    }

    fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.ty)
    }
}

/// Words that end a table reference instead of aliasing it
const CLAUSE_WORDS: &[&str] = &[
    "WHERE", "ON", "USING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL",
    "OUTER", "SET", "VALUES", "ORDER", "GROUP", "HAVING", "LIMIT", "OFFSET", "UNION",
    "EXCEPT", "INTERSECT", "WINDOW", "DEFAULT", "SELECT", "RETURNING", "INDEXED", "NOT",
];

/// Infer the types of `count` parameters
///
/// `lookup` returns the columns of a referenced table, or an empty list when the
/// table is unknown.
pub(crate) fn infer_slots<F>(sql: &str, count: usize, mut lookup: F) -> Result<Vec<ParamSlot>>
where
    F: FnMut(&TableName) -> Vec<ColumnInfo>,
{
    let mut slots = vec![
        ParamSlot {
            ty: ColumnType::Any,
            value: None,
        };
        count
    ];
    if count == 0 {
        return Ok(slots);
    }

    let tokens: Vec<Token> = tokenize(sql)?
        .into_iter()
        .map(|t| t.token)
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();

    let mut known: HashMap<TableName, Vec<ColumnInfo>> = HashMap::new();
    let tables: Vec<TableRef> = referenced_tables(&tokens)
        .into_iter()
        .map(|(name, alias)| {
            let columns = known.entry(name.clone()).or_insert_with(|| lookup(&name)).clone();
            TableRef {
                name,
                alias,
                columns,
            }
        })
        .collect();

    let insert_types = insert_value_types(&tokens, &tables);
    let positions = parameter_positions(&tokens);

    for (at, position, named) in positions {
        if named {
            continue;
        }
        let Some(slot) = position.checked_sub(1).and_then(|i| slots.get_mut(i)) else {
            continue;
        };
        let inferred = cast_type(&tokens, at)
            .or_else(|| {
                let (qualifier, name) = compared_column(&tokens, at)?;
                column_type(&tables, qualifier.as_deref(), &name)
            })
            .or_else(|| insert_types.get(&at).copied());
        if let Some(ty) = inferred {
            slot.ty = ty;
        }
    }

    Ok(slots)
}

/// Token index, 1-based parameter number and namedness of every parameter occurrence
///
/// Numbering follows the engine: `?` takes the next number after the largest used so
/// far, `?NNN` takes `NNN`, and a named parameter keeps the number of its first use.
fn parameter_positions(tokens: &[Token]) -> Vec<(usize, usize, bool)> {
    let mut positions = Vec::new();
    let mut named: HashMap<String, usize> = HashMap::new();
    let mut largest = 0usize;

    for (at, token) in tokens.iter().enumerate() {
        let name = match token {
            Token::Placeholder(p) if p == "?" => {
                largest += 1;
                positions.push((at, largest, false));
                continue;
            }
            Token::Placeholder(p) if p.starts_with('?') => {
                if let Ok(n) = p[1..].parse::<usize>() {
                    largest = largest.max(n);
                    positions.push((at, n, false));
                }
                continue;
            }
            Token::Placeholder(p) => p.clone(),
            // `$` starts identifiers in the SQLite dialect
            Token::Word(w) if w.quote_style.is_none() && w.value.starts_with('$') => {
                w.value.clone()
            }
            Token::Colon | Token::AtSign => match tokens.get(at + 1) {
                Some(Token::Word(w)) if w.quote_style.is_none() => format!("{}{}", token, w.value),
                _ => continue,
            },
            _ => continue,
        };
        let position = *named.entry(name).or_insert_with(|| {
            largest += 1;
            largest
        });
        positions.push((at, position, true));
    }

    positions
}

/// Tables named after `FROM`, `JOIN`, `INTO` and `UPDATE`, with their aliases
///
/// `FROM a, b` lists are followed; subqueries are not.
fn referenced_tables(tokens: &[Token]) -> Vec<(TableName, Option<String>)> {
    let mut tables = Vec::new();
    for (at, token) in tokens.iter().enumerate() {
        let introduces_table = [Keyword::FROM, Keyword::JOIN, Keyword::INTO, Keyword::UPDATE]
            .iter()
            .any(|k| is_keyword(token, *k));
        if !introduces_table {
            continue;
        }

        let mut next = at + 1;
        // UPDATE OR REPLACE t
        if is_keyword(token, Keyword::UPDATE)
            && tokens.get(next).is_some_and(|t| is_keyword(t, Keyword::OR))
        {
            next += 2;
        }

        while let Some((name, after)) = table_name_at(tokens, next) {
            let (alias, after) = alias_at(tokens, after);
            let entry = (name, alias);
            if !tables.contains(&entry) {
                tables.push(entry);
            }
            if tokens.get(after) != Some(&Token::Comma) {
                break;
            }
            next = after + 1;
        }
    }
    tables
}

/// Alias following a table name, as `AS alias` or a bare word; returns the alias and
/// the index of the next token
fn alias_at(tokens: &[Token], at: usize) -> (Option<String>, usize) {
    let (at, explicit) = match tokens.get(at) {
        Some(t) if is_keyword(t, Keyword::AS) => (at + 1, true),
        _ => (at, false),
    };
    match tokens.get(at) {
        Some(Token::Word(w)) if w.quote_style.is_some() => (Some(w.value.clone()), at + 1),
        Some(Token::Word(w))
            if explicit || !CLAUSE_WORDS.contains(&w.value.to_ascii_uppercase().as_str()) =>
        {
            (Some(w.value.clone()), at + 1)
        }
        _ => (None, at),
    }
}

/// Type of a column, resolved through its qualifier when there is one
///
/// An unknown qualifier, or an unqualified name whose tables disagree on its type,
/// gives `None`.
fn column_type(tables: &[TableRef], qualifier: Option<&str>, name: &str) -> Option<ColumnType> {
    match qualifier {
        Some(qualifier) => {
            let mut matching = tables.iter().filter(|t| t.answers_to(qualifier));
            let table = matching.next()?;
            if matching.next().is_some() {
                return None;
            }
            table.column_type(name)
        }
        None => {
            let mut types = tables.iter().filter_map(|t| t.column_type(name));
            let first = types.next()?;
            types.all(|ty| ty == first).then_some(first)
        }
    }
}

/// Parse `table` or `schema.table` starting at `at`; returns the name and the index
/// of the next token
fn table_name_at(tokens: &[Token], at: usize) -> Option<(TableName, usize)> {
    let first = word_value(tokens.get(at)?)?;
    if tokens.get(at + 1) == Some(&Token::Period) {
        let second = word_value(tokens.get(at + 2)?)?;
        Some(((Some(first), second), at + 3))
    } else {
        Some(((None, first), at + 1))
    }
}

fn word_value(token: &Token) -> Option<String> {
    match token {
        Token::Word(w) => Some(w.value.clone()),
        _ => None,
    }
}

fn is_comparison(token: &Token) -> bool {
    matches!(
        token,
        Token::Eq | Token::DoubleEq | Token::Neq | Token::Lt | Token::Gt | Token::LtEq | Token::GtEq
    )
}

/// `CAST(? AS <type>)`
fn cast_type(tokens: &[Token], at: usize) -> Option<ColumnType> {
    let before = at.checked_sub(2)?;
    if !is_keyword(&tokens[before], Keyword::CAST) || tokens[before + 1] != Token::LParen {
        return None;
    }
    if !is_keyword(tokens.get(at + 1)?, Keyword::AS) {
        return None;
    }
    let decl = word_value(tokens.get(at + 2)?)?;
    Some(ColumnType::from_decl(Some(&decl)))
}

/// Column compared with the parameter at `at`, from either side, with its qualifier
fn compared_column(tokens: &[Token], at: usize) -> Option<(Option<String>, String)> {
    if let Some(op) = at.checked_sub(1) {
        if is_comparison(&tokens[op]) {
            if let Some(column) = op.checked_sub(1).and_then(|i| word_value(&tokens[i])) {
                // t.column = ?
                let qualifier = op
                    .checked_sub(3)
                    .filter(|&i| tokens[i + 1] == Token::Period)
                    .and_then(|i| word_value(&tokens[i]));
                return Some((qualifier, column));
            }
        }
    }

    if is_comparison(tokens.get(at + 1)?) {
        let column = word_value(tokens.get(at + 2)?)?;
        // ? = t.column
        if tokens.get(at + 3) == Some(&Token::Period) {
            return Some((Some(column), word_value(tokens.get(at + 4)?)?));
        }
        return Some((None, column));
    }
    None
}

/// Types of parameters that make up a whole value in `INSERT ... VALUES`, keyed by
/// token index
fn insert_value_types(
    tokens: &[Token],
    tables: &[TableRef],
) -> HashMap<usize, ColumnType> {
    let mut types = HashMap::new();

    let Some(into) = tokens.iter().position(|t| is_keyword(t, Keyword::INTO)) else {
        return types;
    };
    let Some((name, mut at)) = table_name_at(tokens, into + 1) else {
        return types;
    };
    let Some(table_columns) = tables.iter().find(|t| t.name == name).map(|t| &t.columns) else {
        return types;
    };

    let mut targets: Vec<ColumnType> = table_columns.iter().map(|c| c.ty).collect();
    if tokens.get(at) == Some(&Token::LParen) {
        targets.clear();
        at += 1;
        while let Some(token) = tokens.get(at) {
            at += 1;
            match token {
                Token::RParen => break,
                Token::Word(w) => targets.push(
                    table_columns
                        .iter()
                        .find(|c| c.name.eq_ignore_ascii_case(&w.value))
                        .map(|c| c.ty)
                        .unwrap_or(ColumnType::Any),
                ),
                _ => {}
            }
        }
    }

    if !tokens.get(at).is_some_and(|t| is_keyword(t, Keyword::VALUES)) {
        return types;
    }

    let mut depth = 0usize;
    let mut column = 0usize;
    for index in at + 1..tokens.len() {
        match &tokens[index] {
            Token::LParen => {
                depth += 1;
                if depth == 1 {
                    column = 0;
                }
            }
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Comma if depth == 1 => column += 1,
            Token::Placeholder(_) if depth == 1 => {
                let whole_value = matches!(tokens[index - 1], Token::LParen | Token::Comma)
                    && matches!(tokens.get(index + 1), Some(Token::Comma | Token::RParen));
                if whole_value {
                    if let Some(ty) = targets.get(column) {
                        types.insert(index, *ty);
                    }
                }
            }
            // ON CONFLICT, RETURNING and friends end the value list
            token if depth == 0 && !matches!(token, Token::Comma) => break,
            _ => {}
        }
    }

    types
}
