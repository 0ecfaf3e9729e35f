//! Property paths: `a.b`, `a[0]`, `a['quoted key']`, `a[id=3]`.
use crate::error::PathError;
use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, digit1, space0},
    combinator::{all_consuming, cut, map, map_res, opt, verify},
    error::{context, VerboseError, VerboseErrorKind},
    multi::many0,
    sequence::{delimited, pair, preceded, separated_pair},
    Finish, IResult,
};
use std::{fmt, iter, rc::Rc};
use tessel_common::{literal, Data, Value};

/// One step of a path.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Named property (or array index given as a name).
    Key(String),
    /// Array index.
    Index(usize),
    /// First array element whose property `key` is the same as `value`.
    Find { key: String, value: Value },
}

impl Segment {
    /// Resolves this segment against `value`. Unresolvable segments yield `Undefined`.
    pub fn resolve(&self, value: &Value) -> Value {
        match (self, value) {
            (Segment::Key(k), Value::Object(o)) => o.get(k),
            (Segment::Key(k), Value::Array(a)) => match k.as_str() {
                "length" => Value::from(a.len()),
                k => k.parse::<usize>().map(|i| a.get(i)).unwrap_or_default(),
            },
            (Segment::Key(k), Value::String(s)) if k == "length" => Value::from(s.chars().count()),
            (Segment::Index(i), Value::Array(a)) => a.get(*i),
            (Segment::Index(i), Value::Object(o)) => o.get(&i.to_string()),
            (Segment::Find { key, value: expected }, Value::Array(a)) => a
                .to_vec()
                .into_iter()
                .find(|item| item.as_object().map_or(false, |o| o.get(key).same(expected)))
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }
}

/// A parsed property path. Cheap to clone.
#[derive(Clone, PartialEq)]
pub struct Path {
    text: Rc<str>,
    segments: Rc<[Segment]>,
}

impl Path {
    /// The empty path, designating the value itself.
    pub fn empty() -> Path {
        Path {
            text: Rc::from(""),
            segments: Rc::from(Vec::new()),
        }
    }

    pub fn parse(text: &str) -> Result<Path, PathError> {
        let trimmed = text.trim();
        let (_, segments) = all_consuming(segments)(trimmed)
            .finish()
            .map_err(|e| path_error(text, trimmed, e))?;
        Ok(Path {
            text: Rc::from(trimmed),
            segments: Rc::from(segments),
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Splits the path into its parent path and last segment.
    pub fn split_last(&self) -> Option<(&[Segment], &Segment)> {
        let (last, parent) = self.segments.split_last()?;
        Some((parent, last))
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Path({:?})", &*self.text)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn is_ident_char(c: char) -> bool {
    !(c.is_whitespace() || matches!(c, '.' | '[' | ']' | '\'' | '"' | '='))
}

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

fn name(input: &str) -> PResult<&str> {
    take_while1(is_ident_char)(input)
}

fn key(name: &str) -> Segment {
    Segment::Key(name.to_string())
}

fn index(input: &str) -> PResult<Segment> {
    map_res(digit1, |s: &str| s.parse::<usize>().map(Segment::Index))(input)
}

/// `key=value` inside brackets.
fn selector(input: &str) -> PResult<Segment> {
    map(
        separated_pair(
            name,
            delimited(space0, char('='), space0),
            cut(context(
                "selector value must be a string or number literal",
                verify(literal::value, |v: &Value| matches!(v, Value::String(_) | Value::Number(_))),
            )),
        ),
        |(key, value)| Segment::Find {
            key: key.to_string(),
            value,
        },
    )(input)
}

fn bracket(input: &str) -> PResult<Segment> {
    delimited(
        char('['),
        cut(delimited(
            space0,
            context(
                "expected an index, a quoted key or a selector",
                alt((map(literal::quoted, Segment::Key), selector, index)),
            ),
            space0,
        )),
        cut(context("expected `]`", char(']'))),
    )(input)
}

fn segments(input: &str) -> PResult<Vec<Segment>> {
    let step = alt((
        preceded(char('.'), cut(context("expected a property name after `.`", map(name, key)))),
        bracket,
    ));
    map(opt(pair(alt((map(name, key), bracket)), many0(step))), |segments| match segments {
        Some((first, rest)) => iter::once(first).chain(rest).collect(),
        None => Vec::new(),
    })(input)
}

fn path_error(text: &str, trimmed: &str, e: VerboseError<&str>) -> PathError {
    let position = e.errors.first().map_or(0, |(rest, _)| trimmed.len() - rest.len());
    let reason = e
        .errors
        .iter()
        .find_map(|(_, kind)| match kind {
            VerboseErrorKind::Context(reason) => Some(*reason),
            _ => None,
        })
        .unwrap_or("unexpected character");
    PathError {
        path: text.to_string(),
        position,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_common::{Array, Object};

    fn segs(p: &str) -> Vec<Segment> {
        Path::parse(p).unwrap().segments().to_vec()
    }

    #[test]
    fn syntax() {
        assert!(segs("").is_empty());
        assert_eq!(
            segs("a.b[2]"),
            vec![Segment::Key("a".into()), Segment::Key("b".into()), Segment::Index(2)]
        );
        assert_eq!(segs("a['x y']"), vec![Segment::Key("a".into()), Segment::Key("x y".into())]);
        assert_eq!(
            segs("items[id=3].name"),
            vec![
                Segment::Key("items".into()),
                Segment::Find {
                    key: "id".into(),
                    value: Value::from(3)
                },
                Segment::Key("name".into())
            ]
        );
        assert_eq!(
            segs("items[name='a]b']"),
            vec![
                Segment::Key("items".into()),
                Segment::Find {
                    key: "name".into(),
                    value: Value::from("a]b")
                }
            ]
        );
    }

    #[test]
    fn errors() {
        for bad in ["a..b", ".a", "a.", "a[", "a[]", "a[x=]", "a[x=y]", "a b", "a[1]b"] {
            assert!(Path::parse(bad).is_err(), "{bad} should not parse");
        }
        let err = Path::parse("a..b").unwrap_err();
        assert_eq!(err.position, 2);
    }

    #[test]
    fn error_reasons() {
        let reason = |p: &str| Path::parse(p).unwrap_err().reason;
        assert_eq!(reason("a."), "expected a property name after `.`");
        assert_eq!(reason("a[x=y]"), "selector value must be a string or number literal");
        assert_eq!(reason("a[x=true]"), "selector value must be a string or number literal");
        assert_eq!(reason("a[]"), "expected an index, a quoted key or a selector");
        assert_eq!(reason("a[1"), "expected `]`");
        assert_eq!(reason("a b"), "unexpected character");
        let err = Path::parse("  a[1").unwrap_err();
        assert_eq!((err.path.as_str(), err.position), ("  a[1", 3));
    }

    #[test]
    fn resolution() {
        let items = Array::from_vec(vec![
            Object::from_entries([("id", Value::from(1)), ("name", Value::from("one"))]).into(),
            Object::from_entries([("id", Value::from(2)), ("name", Value::from("two"))]).into(),
        ]);
        let root = Value::from(Object::from_entries([("items", Value::from(items))]));
        let get = |p: &str| {
            Path::parse(p)
                .unwrap()
                .segments()
                .iter()
                .fold(root.clone(), |v, s| s.resolve(&v))
        };
        assert_eq!(get("items[id=2].name"), Value::from("two"));
        assert_eq!(get("items[0].name"), Value::from("one"));
        assert_eq!(get("items.1.id"), Value::from(2));
        assert_eq!(get("items.length"), Value::from(2));
        assert!(get("items[id=3].name").is_undefined());
        assert!(get("nothing.here").is_undefined());
    }
}
