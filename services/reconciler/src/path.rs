//! Delta path mini-language
//!
//! Grammar:
//!
//! ```text
//! path  := head tail*
//! head  := field | index
//! tail  := '.' field | index
//! field := one or more chars other than '.', '[' and ']'
//! index := '[' digits ']'
//! ```
//!
//! `"bids"`, `"bids[0][1]"`, `"market.bid"` and `"trades[0].price"` are all
//! valid. Parsing is a small recursive-descent pass; resolution walks a
//! [`Value`] tree without any runtime reflection.

use std::fmt;
use std::str::FromStr;

use feed_types::errors::{ApplyError, PathError};

use crate::value::Value;

/// One step into a value tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) => write!(f, "{}", name),
            Segment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// A parsed path. The empty path addresses the root of the data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// The root path (only meaningful for whole-data replacement).
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.trim().is_empty() {
            return Err(PathError::Empty);
        }
        let mut parser = Parser {
            chars: raw.chars().collect(),
            pos: 0,
        };
        let mut segments = Vec::new();
        parser.parse_head(&mut segments)?;
        parser.parse_tail(&mut segments)?;
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parent segments and the final segment, or `None` for the root.
    pub fn split_last(&self) -> Option<(&[Segment], &Segment)> {
        self.segments
            .split_last()
            .map(|(last, parent)| (parent, last))
    }

    /// The field name when the path is a single top-level field.
    pub fn as_single_field(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [Segment::Field(name)] => Some(name),
            _ => None,
        }
    }

    fn prefix_string(segments: &[Segment]) -> String {
        let mut out = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 && matches!(segment, Segment::Field(_)) {
                out.push('.');
            }
            out.push_str(&segment.to_string());
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::prefix_string(&self.segments))
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn parse_head(&mut self, segments: &mut Vec<Segment>) -> Result<(), PathError> {
        match self.peek() {
            Some('[') => segments.push(self.parse_index()?),
            _ => segments.push(self.parse_field()?),
        }
        Ok(())
    }

    fn parse_tail(&mut self, segments: &mut Vec<Segment>) -> Result<(), PathError> {
        match self.peek() {
            None => Ok(()),
            Some('.') => {
                self.pos += 1;
                segments.push(self.parse_field()?);
                self.parse_tail(segments)
            }
            Some('[') => {
                segments.push(self.parse_index()?);
                self.parse_tail(segments)
            }
            Some(found) => Err(PathError::UnexpectedChar {
                position: self.pos,
                found,
            }),
        }
    }

    fn parse_field(&mut self) -> Result<Segment, PathError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '.' || c == '[' {
                break;
            }
            if c == ']' {
                return Err(PathError::UnexpectedChar {
                    position: self.pos,
                    found: c,
                });
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(PathError::EmptyField { position: start });
        }
        Ok(Segment::Field(self.chars[start..self.pos].iter().collect()))
    }

    fn parse_index(&mut self) -> Result<Segment, PathError> {
        let open = self.pos;
        self.pos += 1; // '['
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ']' {
                let text: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                return text
                    .parse::<usize>()
                    .map(Segment::Index)
                    .map_err(|_| PathError::InvalidIndex {
                        position: start,
                        text,
                    });
            }
            self.pos += 1;
        }
        Err(PathError::UnterminatedIndex { position: open })
    }
}

/// Walk `segments` from `root`, reporting failures against `path`.
pub fn resolve<'a>(
    root: &'a Value,
    segments: &[Segment],
    path: &Path,
) -> Result<&'a Value, ApplyError> {
    let mut current = root;
    for (depth, segment) in segments.iter().enumerate() {
        current = step(current, segment, &segments[..=depth], path)?;
    }
    Ok(current)
}

/// Mutable counterpart of [`resolve`].
pub fn resolve_mut<'a>(
    root: &'a mut Value,
    segments: &[Segment],
    path: &Path,
) -> Result<&'a mut Value, ApplyError> {
    let mut current = root;
    for (depth, segment) in segments.iter().enumerate() {
        let at = &segments[..=depth];
        current = match (current, segment) {
            (Value::Record(map), Segment::Field(name)) => map
                .get_mut(name)
                .ok_or_else(|| not_found(at))?,
            (Value::Sequence(items), Segment::Index(i)) => {
                items.get_mut(*i).ok_or_else(|| not_found(at))?
            }
            (other, segment) => return Err(mismatch(other, segment, path)),
        };
    }
    Ok(current)
}

fn step<'a>(
    current: &'a Value,
    segment: &Segment,
    at: &[Segment],
    path: &Path,
) -> Result<&'a Value, ApplyError> {
    match (current, segment) {
        (Value::Record(map), Segment::Field(name)) => {
            map.get(name).ok_or_else(|| not_found(at))
        }
        (Value::Sequence(items), Segment::Index(i)) => items.get(*i).ok_or_else(|| not_found(at)),
        (other, segment) => Err(mismatch(other, segment, path)),
    }
}

fn not_found(at: &[Segment]) -> ApplyError {
    ApplyError::PathNotFound {
        path: Path::prefix_string(at),
    }
}

/// Type mismatch for `segment` applied to a value of the wrong shape.
pub fn mismatch(found: &Value, segment: &Segment, path: &Path) -> ApplyError {
    let expected = match segment {
        Segment::Field(_) => "record",
        Segment::Index(_) => "sequence",
    };
    ApplyError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: found.kind_name().to_string(),
    }
}
