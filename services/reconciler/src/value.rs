//! Tagged value model for snapshot payloads
//!
//! Deltas address locations inside snapshot data through the path
//! mini-language; this is the structure those paths walk. Records use a
//! `BTreeMap` so iteration (and therefore checksums and serialized output)
//! is deterministic. Numbers are `Decimal` to keep price arithmetic exact.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A record / sequence / scalar tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(Decimal),
    Text(String),
    Sequence(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    /// Convert from a JSON document.
    pub fn from_json(json: serde_json::Value) -> Result<Self, String> {
        Self::try_from(json)
    }

    /// Convert into a JSON document.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.clone())
    }

    /// Variant name used in type-mismatch diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Sequence(_) => "sequence",
            Value::Record(_) => "record",
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Sequence(_) | Value::Record(_))
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Value::Record(_))
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Record(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Numeric view. Text holding a decimal literal counts as a number,
    /// since most venues quote prices as strings.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Number(d) => Some(*d),
            Value::Text(s) => parse_decimal(s),
            _ => None,
        }
    }

    /// Shallow merge: top-level keys of `other` overwrite keys of `self`.
    ///
    /// Returns false (and leaves `self` untouched) unless both are records.
    pub fn merge_top_level(&mut self, other: &Value) -> bool {
        match (self, other) {
            (Value::Record(target), Value::Record(source)) => {
                for (key, value) in source {
                    target.insert(key.clone(), value.clone());
                }
                true
            }
            _ => false,
        }
    }

    /// Recursive merge: nested records are merged key by key, anything else
    /// in `other` replaces what is in `self`.
    pub fn deep_merge(&mut self, other: &Value) {
        match (self, other) {
            (Value::Record(target), Value::Record(source)) => {
                for (key, value) in source {
                    match target.get_mut(key) {
                        Some(existing) if existing.is_record() && value.is_record() => {
                            existing.deep_merge(value);
                        }
                        _ => {
                            target.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            (target, source) => *target = source.clone(),
        }
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let trimmed = s.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = String;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                let decimal = if let Some(i) = n.as_i64() {
                    Decimal::from(i)
                } else if let Some(u) = n.as_u64() {
                    Decimal::from(u)
                } else {
                    parse_decimal(&n.to_string())
                        .ok_or_else(|| format!("number {} is out of decimal range", n))?
                };
                Value::Number(decimal)
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => Value::Sequence(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            serde_json::Value::Object(map) => {
                let mut record = BTreeMap::new();
                for (key, value) in map {
                    record.insert(key, Value::try_from(value)?);
                }
                Value::Record(record)
            }
        })
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(d) => decimal_to_json(d),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Sequence(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Record(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// JSON number when the float rendering reads back as the same decimal,
/// otherwise the exact decimal text.
fn decimal_to_json(d: Decimal) -> serde_json::Value {
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return serde_json::Value::from(i);
        }
    }
    let exact = d
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .filter(|n| parse_decimal(&n.to_string()) == Some(d));
    match exact {
        Some(n) => serde_json::Value::Number(n),
        None => serde_json::Value::String(d.normalize().to_string()),
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Number(d)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Number(Decimal::from(i))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::Number(Decimal::from(u))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Record(map)
    }
}
