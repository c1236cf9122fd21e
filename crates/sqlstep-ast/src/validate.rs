//! Pre-flight checks run before a statement reaches the engine
//!
//! These are cheap lexical checks for the mistakes learners make most often.
//! Anything subtler is left to the engine, whose error is translated later.

use serde::Serialize;
use thiserror::Error;

use crate::parser::parse;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Empty query")]
    Empty,

    #[error("SELECT statement is missing a FROM clause")]
    MissingFrom,

    #[error("FROM must be followed by a table name")]
    MissingTable,

    #[error("FROM is followed by {0} instead of a table name")]
    KeywordAfterFrom(String),

    #[error("Unbalanced parentheses: {open} opening, {close} closing")]
    UnbalancedParentheses { open: usize, close: usize },

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Unknown keyword '{found}'. Did you mean {expected}?")]
    Typo { found: String, expected: &'static str },

    #[error("{0} must be followed by BY")]
    MissingBy(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported statement '{0}'. Only SELECT, INSERT, UPDATE and DELETE are supported")]
pub struct UnsupportedStatement(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

const TYPOS: &[(&str, &str)] = &[
    ("SELCT", "SELECT"),
    ("SELET", "SELECT"),
    ("SLECT", "SELECT"),
    ("SELEC", "SELECT"),
    ("FORM", "FROM"),
    ("FRON", "FROM"),
    ("FRMO", "FROM"),
    ("WHER", "WHERE"),
    ("WERE", "WHERE"),
    ("WHRE", "WHERE"),
    ("GROPU", "GROUP BY"),
    ("ODER", "ORDER BY"),
    ("ORDR", "ORDER BY"),
    ("HAIVNG", "HAVING"),
    ("LIMT", "LIMIT"),
];

const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "JOIN", "INNER", "LEFT", "RIGHT",
    "FULL", "CROSS", "ON", "SELECT",
];

/// Clauses that can never open a FROM item. A derived table's inner SELECT is fine.
const NOT_A_TABLE: &[&str] = &["WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET"];

/// Words after which a typo-looking word is a table name or alias.
const NAMES_FOLLOW: &[&str] = &["FROM", "JOIN", "AS", "INTO", "UPDATE", "TABLE"];

/// Trim whitespace and any trailing semicolons.
pub fn normalize(sql: &str) -> String {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string()
}

/// Determine the statement kind from its leading keyword.
pub fn classify(sql: &str) -> Result<StatementKind, UnsupportedStatement> {
    let first = words(sql).into_iter().next().unwrap_or_default();
    match first.as_str() {
        "SELECT" => Ok(StatementKind::Select),
        "INSERT" => Ok(StatementKind::Insert),
        "UPDATE" => Ok(StatementKind::Update),
        "DELETE" => Ok(StatementKind::Delete),
        _ => Err(UnsupportedStatement(first)),
    }
}

/// Table a data-modifying statement writes to.
pub fn target_table(sql: &str, kind: StatementKind) -> Option<String> {
    let words = raw_words(sql);
    let keyword = match kind {
        StatementKind::Insert => "INTO",
        StatementKind::Update => "UPDATE",
        StatementKind::Delete => "FROM",
        StatementKind::Select => return None,
    };
    let idx = words.iter().position(|w| w.eq_ignore_ascii_case(keyword))?;
    words
        .get(idx + 1)
        .map(|w| w.trim_matches('"').to_string())
}

/// Base table named after the first FROM, if any.
pub fn first_from_table(sql: &str) -> Option<String> {
    let words = raw_words(sql);
    let idx = words.iter().position(|w| w.eq_ignore_ascii_case("FROM"))?;
    words
        .get(idx + 1)
        .filter(|w| !CLAUSE_KEYWORDS.contains(&w.to_ascii_uppercase().as_str()))
        .map(|w| w.trim_matches('"').to_string())
}

/// Run the pre-flight checks on a normalized statement.
pub fn validate(sql: &str) -> Result<(), ValidationError> {
    if sql.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    check_parentheses(sql)?;

    let words = words(sql);

    // `form` or `were` are fine identifiers; only hunt for typos when the grammar rejects the text.
    if parse(sql).is_err() {
        check_typos(&words)?;
    }

    for (idx, word) in words.iter().enumerate() {
        let next = words.get(idx + 1).map(String::as_str);
        match word.as_str() {
            "GROUP" if next != Some("BY") => return Err(ValidationError::MissingBy("GROUP")),
            "ORDER" if next != Some("BY") => return Err(ValidationError::MissingBy("ORDER")),
            _ => {}
        }
    }

    if words.first().map(String::as_str) == Some("SELECT") {
        let from = words
            .iter()
            .position(|w| w == "FROM")
            .ok_or(ValidationError::MissingFrom)?;
        match words.get(from + 1) {
            None => return Err(ValidationError::MissingTable),
            Some(next) if NOT_A_TABLE.contains(&next.as_str()) => {
                return Err(ValidationError::KeywordAfterFrom(next.clone()));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Reject a misspelled leading keyword, e.g. `SELCT`.
pub fn check_statement_keyword(sql: &str) -> Result<(), ValidationError> {
    match words(sql).first() {
        Some(first) => match TYPOS.iter().find(|(found, _)| first.as_str() == *found) {
            Some((found, expected)) => Err(ValidationError::Typo {
                found: found.to_string(),
                expected: *expected,
            }),
            None => Ok(()),
        },
        None => Ok(()),
    }
}

fn check_typos(words: &[String]) -> Result<(), ValidationError> {
    for (idx, word) in words.iter().enumerate() {
        let names_position = idx
            .checked_sub(1)
            .and_then(|prev| words.get(prev))
            .is_some_and(|prev| NAMES_FOLLOW.contains(&prev.as_str()));
        if names_position {
            continue;
        }
        if let Some((found, expected)) = TYPOS.iter().find(|(found, _)| word.as_str() == *found) {
            return Err(ValidationError::Typo {
                found: found.to_string(),
                expected: *expected,
            });
        }
    }
    Ok(())
}

fn check_parentheses(sql: &str) -> Result<(), ValidationError> {
    let mut open = 0usize;
    let mut close = 0usize;
    let mut depth = 0i64;
    let mut in_string = false;

    for c in sql.chars() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => {
                open += 1;
                depth += 1;
            }
            ')' if !in_string => {
                close += 1;
                depth -= 1;
                if depth < 0 {
                    return Err(ValidationError::UnbalancedParentheses { open, close });
                }
            }
            _ => {}
        }
    }

    if in_string {
        return Err(ValidationError::UnterminatedString);
    }
    if depth != 0 {
        return Err(ValidationError::UnbalancedParentheses { open, close });
    }
    Ok(())
}

/// Upper-cased bare words outside string literals and quoted identifiers.
fn words(sql: &str) -> Vec<String> {
    raw_words(sql)
        .into_iter()
        .filter(|w| !w.starts_with('"'))
        .map(|w| w.to_ascii_uppercase())
        .collect()
}

/// Words and quoted identifiers in source case; string literals and comments are skipped.
fn raw_words(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    let flush = |current: &mut String, out: &mut Vec<String>| {
        if !current.is_empty() {
            out.push(std::mem::take(current));
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                flush(&mut current, &mut out);
                for inner in chars.by_ref() {
                    if inner == '\'' {
                        break;
                    }
                }
            }
            '"' => {
                flush(&mut current, &mut out);
                let mut quoted = String::from('"');
                for inner in chars.by_ref() {
                    quoted.push(inner);
                    if inner == '"' {
                        break;
                    }
                }
                out.push(quoted);
            }
            '-' if chars.peek() == Some(&'-') => {
                flush(&mut current, &mut out);
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => current.push(c),
            _ => flush(&mut current, &mut out),
        }
    }
    flush(&mut current, &mut out);
    out
}
