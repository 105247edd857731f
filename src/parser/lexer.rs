// Shared token parsers

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{map, recognize},
    multi::many0_count,
    number::complete::recognize_float,
    sequence::{delimited, pair},
    IResult,
};

/// Wrap a parser so it skips surrounding whitespace
pub fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// Column-style identifier: letter or underscore, then alphanumerics, `_` or `.`
pub fn identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_"), tag(".")))),
        )),
        |s: &str| s.to_string(),
    )(input)
}

/// Double- or single-quoted string without escapes
pub fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
            delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
        )),
        |s: &str| s.to_string(),
    )(input)
}

/// Plain decimal number (no `inf`/`nan` spellings)
pub fn number_literal(input: &str) -> IResult<&str, f64> {
    // recognize_float cuts on a dangling exponent ("1east"); let callers backtrack
    let (rest, text) = recognize_float::<_, nom::error::Error<&str>>(input).map_err(|e| match e {
        nom::Err::Failure(err) => nom::Err::Error(err),
        other => other,
    })?;
    match text.parse::<f64>() {
        Ok(v) => Ok((rest, v)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier() {
        assert_eq!(identifier("order_id > 3"), Ok((" > 3", "order_id".to_string())));
        assert!(identifier("3abc").is_err());
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(string_literal(r#""North East" rest"#), Ok((" rest", "North East".to_string())));
        assert_eq!(string_literal("'A'"), Ok(("", "A".to_string())));
        assert!(string_literal("\"unterminated").is_err());
    }

    #[test]
    fn test_number_literal() {
        assert_eq!(number_literal("-2.5e1"), Ok(("", -25.0)));
        assert!(number_literal("inf").is_err());
    }
}
