//! Parameterized statements.
//!
//! Query text only ever contains `@name` placeholders. Values travel in a
//! separate name→value map and are bound by the driver.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take, take_till, take_till1},
    character::complete::char,
    combinator::{all_consuming, opt, recognize},
    sequence::{delimited, pair, preceded},
};
use serde::Serialize;

use crate::error::{LagError, LagResult, TemplateError};
use crate::template::identifier;

/// A validated placeholder name: `[A-Za-z_][A-Za-z0-9_]*`.
///
/// This is the only type a template accepts at render time, so nothing a
/// caller supplies can end up in query text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ParamName(String);

impl ParamName {
    pub fn new(name: impl Into<String>) -> LagResult<Self> {
        let name = name.into();
        if all_consuming(identifier)(name.as_str()).is_ok() {
            Ok(Self(name))
        } else {
            Err(LagError::invalid_argument(format!(
                "'{name}' is not a valid parameter name"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dynamic value type for statement bindings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "'{s}'"),
            ParamValue::Int(n) => write!(f, "{n}"),
            ParamValue::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(v: DateTime<Utc>) -> Self {
        ParamValue::Timestamp(v)
    }
}

/// Query text plus its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: BTreeMap<String, ParamValue>,
    positional_sql: String,
    positional_order: Vec<String>,
}

impl Statement {
    /// Build a statement, checking that every `@name` in `sql` is bound.
    ///
    /// Also derives the `$1..$n` form used by PostgreSQL-style drivers. A
    /// name used more than once keeps a single position.
    pub fn new(sql: String, params: BTreeMap<String, ParamValue>) -> LagResult<Self> {
        let mut positional_sql = String::with_capacity(sql.len());
        let mut positional_order: Vec<String> = Vec::new();

        for piece in scan_placeholders(&sql) {
            match piece {
                Piece::Text(text) => positional_sql.push_str(text),
                Piece::Placeholder { name, position } => {
                    if !params.contains_key(name) {
                        return Err(TemplateError::new(
                            position,
                            format!("placeholder @{name} has no bound parameter"),
                        )
                        .into());
                    }
                    let index = match positional_order.iter().position(|n| n == name) {
                        Some(i) => i,
                        None => {
                            positional_order.push(name.to_string());
                            positional_order.len() - 1
                        }
                    };
                    positional_sql.push_str(&format!("${}", index + 1));
                }
            }
        }

        Ok(Self {
            sql,
            params,
            positional_sql,
            positional_order,
        })
    }

    /// Query text with `@name` placeholders.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Query text with `$n` placeholders.
    pub fn positional_sql(&self) -> &str {
        &self.positional_sql
    }

    /// Values in `$1..$n` order.
    pub fn positional_params(&self) -> impl Iterator<Item = &ParamValue> {
        self.positional_order
            .iter()
            .filter_map(|name| self.params.get(name))
    }
}

enum Piece<'a> {
    Text(&'a str),
    Placeholder { name: &'a str, position: usize },
}

/// Split SQL into text and `@name` placeholders, skipping quoted literals,
/// quoted identifiers and `--` comments.
fn scan_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut rest = sql;

    while !rest.is_empty() {
        let position = sql.len() - rest.len();
        if let Ok((after, name)) = placeholder(rest) {
            pieces.push(Piece::Text(&sql[text_start..position]));
            pieces.push(Piece::Placeholder { name, position });
            text_start = sql.len() - after.len();
            rest = after;
            continue;
        }
        rest = match sql_text(rest) {
            Ok((after, _)) => after,
            Err(_) => break,
        };
    }

    if text_start < sql.len() {
        pieces.push(Piece::Text(&sql[text_start..]));
    }
    pieces
}

fn placeholder(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), identifier)(input)
}

/// One run of SQL that cannot contain a placeholder.
fn sql_text(input: &str) -> IResult<&str, &str> {
    alt((
        |i| quoted('\'', i),
        |i| quoted('"', i),
        recognize(pair(tag("--"), take_till(|c: char| c == '\n'))),
        take_till1(|c: char| matches!(c, '\'' | '"' | '-' | '@')),
        take(1usize),
    ))(input)
}

/// A quoted literal or identifier; an unterminated one runs to the end.
fn quoted(quote: char, input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char(quote),
        take_till(|c: char| c == quote),
        opt(char(quote)),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_param_name_validation() {
        assert!(ParamName::new("otherBrowser0").is_ok());
        assert!(ParamName::new("_x").is_ok());
        assert!(ParamName::new("").is_err());
        assert!(ParamName::new("0abc").is_err());
        assert!(ParamName::new("a b").is_err());
        assert!(ParamName::new("x'; DROP TABLE t; --").is_err());
    }

    #[test]
    fn test_positional_form() {
        let stmt = Statement::new(
            "SELECT * FROM t WHERE a = @a AND b < @b OR a = @a".to_string(),
            params(&[("a", "x".into()), ("b", 3i64.into())]),
        )
        .unwrap();
        assert_eq!(
            stmt.positional_sql(),
            "SELECT * FROM t WHERE a = $1 AND b < $2 OR a = $1"
        );
        let values: Vec<_> = stmt.positional_params().cloned().collect();
        assert_eq!(values, vec![ParamValue::from("x"), ParamValue::Int(3)]);
    }

    #[test]
    fn test_skips_literals_and_comments() {
        let stmt = Statement::new(
            "SELECT '@notparam' -- @comment\nFROM t WHERE x = @x".to_string(),
            params(&[("x", 1i64.into())]),
        )
        .unwrap();
        assert_eq!(
            stmt.positional_sql(),
            "SELECT '@notparam' -- @comment\nFROM t WHERE x = $1"
        );
    }

    #[test]
    fn test_placeholder_edges() {
        let stmt = Statement::new(
            "SELECT \"@col\", x@1, 'it''s @y', @_z-@w, 'open @q".to_string(),
            params(&[("_z", 1i64.into()), ("w", 2i64.into())]),
        )
        .unwrap();
        assert_eq!(
            stmt.positional_sql(),
            "SELECT \"@col\", x@1, 'it''s @y', $1-$2, 'open @q"
        );
    }

    #[test]
    fn test_unbound_placeholder() {
        let err = Statement::new("SELECT @missing".to_string(), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, LagError::Template(ref e) if e.position == 7));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(ParamValue::from("foo").to_string(), "'foo'");
        assert_eq!(ParamValue::from(7u32).to_string(), "7");
    }
}
