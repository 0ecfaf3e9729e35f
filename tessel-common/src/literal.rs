//! Literal arguments: `1, 'text', "text", true, null, [1, 2]`.
//!
//! The parsers are generic over the nom error type so that other grammars
//! (property paths, filter calls, directive lists) can embed them.
use crate::value::{Array, Value};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{anychar, char, digit0, digit1, multispace0, none_of, one_of},
    combinator::{all_consuming, cut, map, opt, recognize},
    error::{ErrorKind, ParseError},
    multi::{fold_many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish, IResult,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LiteralError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    #[error("invalid literal `{0}`")]
    Invalid(String),
}

fn is_word_char(c: char) -> bool {
    !(c.is_whitespace() || matches!(c, ',' | '[' | ']' | '\'' | '"'))
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        c => c,
    }
}

fn string_in<'a, E: ParseError<&'a str>>(quote: char) -> impl FnMut(&'a str) -> IResult<&'a str, String, E> {
    let stop = if quote == '\'' { "'\\" } else { "\"\\" };
    preceded(
        char(quote),
        cut(terminated(
            fold_many0(
                alt((preceded(char('\\'), map(anychar, unescape)), none_of(stop))),
                String::new,
                |mut s, c| {
                    s.push(c);
                    s
                },
            ),
            char(quote),
        )),
    )
}

/// A single- or double-quoted string, with `\n`, `\t`, `\r` and `\<char>` escapes.
pub fn quoted<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, String, E> {
    alt((string_in('\''), string_in('"')))(input)
}

/// `true`, `false`, `null`, `undefined` or a number.
fn word<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Value, E> {
    let (rest, w) = take_while1::<_, _, E>(is_word_char)(input)?;
    let value = match w {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        "undefined" => Value::Undefined,
        _ => match w.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => return Err(nom::Err::Failure(E::from_error_kind(input, ErrorKind::MapRes))),
        },
    };
    Ok((rest, value))
}

fn comma<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, char, E> {
    delimited(multispace0, char(','), multispace0)(input)
}

fn array<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Value, E> {
    map(
        preceded(
            char('['),
            cut(terminated(
                delimited(multispace0, separated_list0(comma, value), multispace0),
                char(']'),
            )),
        ),
        |items| Value::Array(Array::from_vec(items)),
    )(input)
}

/// One literal value.
pub fn value<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Value, E> {
    alt((map(quoted, Value::from), array, word))(input)
}

/// One or more comma-separated literal values.
pub fn value_list<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Vec<Value>, E> {
    separated_list1(comma, value)(input)
}

fn literal_error(e: nom::error::Error<&str>) -> LiteralError {
    match e.code {
        ErrorKind::MapRes => LiteralError::Invalid(e.input.chars().take_while(|&c| is_word_char(c)).collect()),
        _ => match e.input.chars().next() {
            Some(c) => LiteralError::UnexpectedChar(c),
            None => LiteralError::UnexpectedEnd,
        },
    }
}

fn parse_standalone<'a, T>(
    input: &'a str,
    parser: impl FnMut(&'a str) -> IResult<&'a str, T>,
) -> Result<T, LiteralError> {
    all_consuming(delimited(multispace0, parser, multispace0))(input)
        .finish()
        .map(|(_, value)| value)
        .map_err(literal_error)
}

/// Parses a single literal. Trailing input is an error.
pub fn parse_literal(text: &str) -> Result<Value, LiteralError> {
    parse_standalone(text, value)
}

/// Parses a comma-separated list of literals. An empty (or blank) input is an empty list.
pub fn parse_literal_list(text: &str) -> Result<Vec<Value>, LiteralError> {
    parse_standalone(text, separated_list0(comma, value))
}

/// Decimal number prefix: `-1`, `2.5`, `.5`, `1e3`. An incomplete exponent is left out.
fn decimal<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)
}

/// Reads the longest numeric prefix of `text`, after leading whitespace.
///
/// `"12px"` is 12, `"1e"` is 1; text with no numeric prefix is NaN.
pub fn parse_float(text: &str) -> f64 {
    let prefix: IResult<&str, &str> =
        alt((decimal, recognize(pair(opt(one_of("+-")), tag("Infinity")))))(text.trim_start());
    prefix
        .ok()
        .and_then(|(_, number)| number.parse().ok())
        .unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists() {
        let v = parse_literal_list(r#"1, 'a,b', "q\"", true, null, [2, 'x']"#).unwrap();
        assert_eq!(v.len(), 6);
        assert_eq!(v[0], Value::from(1));
        assert_eq!(v[1], Value::from("a,b"));
        assert_eq!(v[2], Value::from("q\""));
        assert_eq!(v[3], Value::Bool(true));
        assert_eq!(v[4], Value::Null);
        assert_eq!(v[5].as_array().unwrap().len(), 2);
        assert!(parse_literal_list("  ").unwrap().is_empty());
        assert!(parse_literal("[ ]").unwrap().as_array().unwrap().is_empty());
        assert_eq!(parse_literal(r"'a\nb'").unwrap(), Value::from("a\nb"));
    }

    #[test]
    fn errors() {
        assert_eq!(parse_literal("'abc"), Err(LiteralError::UnexpectedEnd));
        assert_eq!(parse_literal("foo"), Err(LiteralError::Invalid("foo".into())));
        assert_eq!(parse_literal("1 2"), Err(LiteralError::UnexpectedChar('2')));
        assert_eq!(parse_literal("[1 2]"), Err(LiteralError::UnexpectedChar('2')));
        assert_eq!(parse_literal(""), Err(LiteralError::UnexpectedEnd));
    }

    #[test]
    fn numeric_prefix() {
        assert_eq!(parse_float("12px"), 12.0);
        assert_eq!(parse_float("  -2.5e2x"), -250.0);
        assert_eq!(parse_float("1e"), 1.0);
        assert_eq!(parse_float(".5"), 0.5);
        assert_eq!(parse_float("3."), 3.0);
        assert_eq!(parse_float("Infinity and more"), f64::INFINITY);
        assert!(parse_float("px12").is_nan());
        assert!(parse_float("").is_nan());
        assert!(parse_float("-").is_nan());
    }
}
