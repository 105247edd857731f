// Filter expression parser
// Format: <column> <op> <value>, e.g. `price > 8`, `"unit price" <= 2.5`, `region == 'North'`

use super::lexer::{identifier, number_literal, string_literal, ws};
use crate::data::Value;
use crate::spec::{Filter, FilterOp};
use anyhow::{anyhow, Result};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alphanumeric1, char},
    combinator::{eof, map, not, peek, rest, value, verify},
    sequence::terminated,
    IResult,
};

fn column_name(input: &str) -> IResult<&str, String> {
    alt((string_literal, identifier))(input)
}

fn operator(input: &str) -> IResult<&str, FilterOp> {
    alt((
        value(FilterOp::Ge, tag(">=")),
        value(FilterOp::Le, tag("<=")),
        value(FilterOp::Eq, tag("==")),
        value(FilterOp::Ne, tag("!=")),
        value(FilterOp::Ne, tag("<>")),
        value(FilterOp::Gt, char('>')),
        value(FilterOp::Lt, char('<')),
        value(FilterOp::Eq, char('=')),
    ))(input)
}

// A keyword or number must not run into further word characters
fn word_end(input: &str) -> IResult<&str, ()> {
    not(peek(alt((alphanumeric1, tag("_")))))(input)
}

fn keyword(input: &str) -> IResult<&str, Value> {
    terminated(
        alt((
            value(Value::Bool(true), tag("true")),
            value(Value::Bool(false), tag("false")),
            value(Value::Null, tag("null")),
        )),
        word_end,
    )(input)
}

fn number(input: &str) -> IResult<&str, Value> {
    map(terminated(number_literal, word_end), |n| {
        if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            Value::Int(n as i64)
        } else {
            Value::Float(n)
        }
    })(input)
}

// Anything left over is taken as unquoted text
fn bare_word(input: &str) -> IResult<&str, Value> {
    map(verify(rest, |s: &str| !s.trim().is_empty()), |s: &str| {
        Value::Str(s.trim().to_string())
    })(input)
}

fn literal(input: &str) -> IResult<&str, Value> {
    alt((map(string_literal, Value::Str), keyword, number, bare_word))(input)
}

/// nom parser for a complete filter expression
pub fn filter_expr(input: &str) -> IResult<&str, Filter> {
    let (input, column) = ws(column_name)(input)?;
    let (input, op) = ws(operator)(input)?;
    let (input, value) = ws(literal)(input)?;
    let (input, _) = eof(input)?;
    Ok((input, Filter { column, op, value }))
}

pub fn parse_filter_expr(input: &str) -> Result<Filter> {
    match filter_expr(input) {
        Ok((_, filter)) => Ok(filter),
        Err(e) => Err(anyhow!("Invalid filter expression '{}': {}", input, e)),
    }
}
