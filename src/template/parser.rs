//! Skeleton lexer and action parser using nom.
//!
//! A skeleton is literal SQL interleaved with `{{ ... }}` actions:
//!
//! ```text
//! WHERE x = @{{ .Target }} {{if .Cursor}}AND d < @{{ .Cursor }}{{end}}
//!             ─────┬─────  ──────┬─────                          ──┬──
//!                  │             │                                 │
//!                  │             └── Conditional fragment          └── Block end
//!                  └── Parameter-name substitution
//! ```

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, map, recognize, value},
    sequence::{delimited, pair, preceded},
};

use crate::error::TemplateError;

/// A single `{{ ... }}` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Field(String),
    Var(String),
    If(String),
    Range { var: String, list: String },
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    Text(&'a str),
    Action { action: Action, position: usize },
}

/// Split a skeleton into literal text and parsed actions.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token<'_>>, TemplateError> {
    let mut tokens = Vec::new();
    let mut offset = 0;
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        push_text(&mut tokens, &rest[..start], offset)?;
        let body_start = start + 2;
        let Some(len) = rest[body_start..].find("}}") else {
            return Err(TemplateError::new(
                offset + start,
                "unterminated action: missing '}}'",
            ));
        };
        let inner = &rest[body_start..body_start + len];
        let action = match all_consuming(parse_action)(inner) {
            Ok((_, action)) => action,
            Err(_) => {
                return Err(TemplateError::new(
                    offset + start,
                    format!("unrecognized action '{}'", inner.trim()),
                ));
            }
        };
        tokens.push(Token::Action {
            action,
            position: offset + start,
        });

        let consumed = body_start + len + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    push_text(&mut tokens, rest, offset)?;
    Ok(tokens)
}

fn push_text<'a>(
    tokens: &mut Vec<Token<'a>>,
    text: &'a str,
    offset: usize,
) -> Result<(), TemplateError> {
    if let Some(stray) = text.find("}}") {
        return Err(TemplateError::new(
            offset + stray,
            "stray '}}' outside an action",
        ));
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    Ok(())
}

fn parse_action(input: &str) -> IResult<&str, Action> {
    delimited(
        multispace0,
        alt((
            parse_if,
            parse_range,
            value(Action::End, tag("end")),
            map(field_ref, |f| Action::Field(f.to_string())),
            map(var_ref, |v| Action::Var(v.to_string())),
        )),
        multispace0,
    )(input)
}

/// Parse `if .Field`.
fn parse_if(input: &str) -> IResult<&str, Action> {
    map(preceded(pair(tag("if"), multispace1), field_ref), |f| {
        Action::If(f.to_string())
    })(input)
}

/// Parse `range $var := .List`.
fn parse_range(input: &str) -> IResult<&str, Action> {
    let (input, _) = tag("range")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, var) = var_ref(input)?;
    let (input, _) = delimited(multispace0, tag(":="), multispace0)(input)?;
    let (input, list) = field_ref(input)?;

    Ok((
        input,
        Action::Range {
            var: var.to_string(),
            list: list.to_string(),
        },
    ))
}

fn field_ref(input: &str) -> IResult<&str, &str> {
    preceded(char('.'), identifier)(input)
}

fn var_ref(input: &str) -> IResult<&str, &str> {
    preceded(char('$'), identifier)(input)
}

/// `[A-Za-z_][A-Za-z0-9_]*`, shared with statement placeholders.
pub(crate) fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}
