//! Text templates with interpolation tokens: `Hello {[ user.name | uppercase ]}!`.
use crate::{
    error::{ParseError, RenderError},
    filter::{Filter, FilterRegistry},
    observe::Path,
};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while1},
    character::complete::{anychar, char, space0},
    combinator::{all_consuming, cut, map, not, opt, recognize, rest, verify},
    multi::{many0, many0_count, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
    Finish, IResult,
};
use std::fmt;
use tessel_common::{literal, parse_literal_list, Value};

const OPEN: &str = "{[";
const CLOSE: &str = "]}";

/// A filter invocation, resolved against the registry at parse time.
#[derive(Clone)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<Value>,
    filter: Filter,
}

impl fmt::Debug for FilterCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FilterCall")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// A path and the filters its value goes through.
#[derive(Clone, Debug)]
pub struct Token {
    pub path: Path,
    pub pipe: Vec<FilterCall>,
}

impl Token {
    /// Runs `value` (the value at `path`) through the filters.
    pub fn evaluate(&self, value: &Value) -> Result<Value, RenderError> {
        let mut v = value.clone();
        for call in &self.pipe {
            v = (call.filter)(&v, &call.args).map_err(|source| RenderError::Filter {
                name: call.name.clone(),
                source,
            })?;
        }
        Ok(v)
    }
}

#[derive(Clone, Debug)]
pub enum Part {
    Text(String),
    /// Index into the template's tokens.
    Token(usize),
}

/// Literal text interleaved with tokens.
#[derive(Clone, Debug, Default)]
pub struct Template {
    parts: Vec<Part>,
    tokens: Vec<Token>,
}

/// Returns whether `text` contains an interpolation token.
pub fn has_tokens(text: &str) -> bool {
    text.find(OPEN).map_or(false, |i| text[i..].contains(CLOSE))
}

enum Piece<'a> {
    Text(&'a str),
    Token(&'a str),
}

/// `{[ ... ]}`, returning the body. `]}` inside quotes does not close the token.
fn token_body(input: &str) -> IResult<&str, &str> {
    preceded(
        tag(OPEN),
        cut(terminated(
            recognize(many0_count(alt((
                recognize(literal::quoted),
                recognize(preceded(not(tag(CLOSE)), anychar)),
            )))),
            tag(CLOSE),
        )),
    )(input)
}

fn piece(input: &str) -> IResult<&str, Piece> {
    alt((
        map(token_body, Piece::Token),
        map(verify(alt((take_until(OPEN), rest)), |s: &str| !s.is_empty()), Piece::Text),
    ))(input)
}

/// One stage of a pipe: everything up to the next `|` outside quotes.
fn stage(input: &str) -> IResult<&str, &str> {
    recognize(many0_count(alt((recognize(literal::quoted), is_not("|'\"")))))(input)
}

/// `name` or `name: arg, ...`, returning the name and the argument text.
fn filter_call(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    delimited(
        space0,
        pair(
            take_while1(|c: char| !(c.is_whitespace() || c == ':')),
            opt(preceded(char(':'), rest)),
        ),
        space0,
    )(input)
}

fn parse_token(body: &str, filters: &FilterRegistry) -> Result<Token, ParseError> {
    let (_, stages) = all_consuming(separated_list1(char('|'), stage))(body)
        .finish()
        .map_err(|_: nom::error::Error<&str>| ParseError::Unterminated(body.to_string()))?;
    let (path, calls) = stages.split_first().ok_or_else(|| ParseError::Unterminated(body.to_string()))?;
    let path = Path::parse(path)?;
    let mut pipe = Vec::with_capacity(calls.len());
    for &call in calls {
        let (_, (name, args)) = all_consuming(filter_call)(call)
            .finish()
            .map_err(|_| ParseError::Filter(call.trim().to_string()))?;
        let args = match args {
            Some(args) => parse_literal_list(args)?,
            None => Vec::new(),
        };
        let filter = filters
            .resolve(name)
            .ok_or_else(|| ParseError::MissingFilter(name.to_string()))?;
        pipe.push(FilterCall {
            name: name.to_string(),
            args,
            filter,
        });
    }
    Ok(Token { path, pipe })
}

impl Template {
    /// Parses a template. Filters are looked up immediately.
    pub fn parse(text: &str, filters: &FilterRegistry) -> Result<Template, ParseError> {
        let (_, pieces) = all_consuming(many0(piece))(text)
            .finish()
            .map_err(|_| ParseError::Unterminated(text.to_string()))?;
        let mut t = Template::default();
        for piece in pieces {
            match piece {
                Piece::Text(s) => t.parts.push(Part::Text(s.to_string())),
                Piece::Token(body) => {
                    let token = parse_token(body, filters)?;
                    t.parts.push(Part::Token(t.tokens.len()));
                    t.tokens.push(token);
                }
            }
        }
        Ok(t)
    }

    /// A template made of a single token.
    pub fn from_token(token: Token) -> Template {
        Template {
            parts: vec![Part::Token(0)],
            tokens: vec![token],
        }
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Returns whether the template is exactly one token, without surrounding text.
    pub fn is_single_token(&self) -> bool {
        matches!(self.parts.as_slice(), [Part::Token(_)])
    }

    /// The literal parts, concatenated.
    pub fn static_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Token(_) => None,
            })
            .collect()
    }

    /// Joins literal text and the display strings of the evaluated token values.
    pub fn join(&self, values: &[Value]) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Token(i) => out.push_str(&values.get(*i).map(Value::to_display_string).unwrap_or_default()),
            }
        }
        out
    }
}
