//! Semantic values carried by cursors.
//!
//! Every successful parse attaches a [`Value`] to the resulting cursor:
//! primitives produce characters, `seq`-like combinators produce sequences,
//! `text` collapses a sequence into a string, and semantic actions may
//! rewrite the value into any other shape.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parse result value.
///
/// The engine itself only ever produces `Null`, `Char`, `Str` and `Seq`;
/// `Int` exists so semantic actions can fold text into numbers without
/// leaving the value domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Explicit "no value", e.g. a failed `optional`.
    Null,
    /// A single consumed element.
    Char(char),
    /// A number, produced by semantic actions.
    Int(i64),
    /// A string, e.g. a matched literal or collapsed `text` run.
    Str(String),
    /// An ordered sequence of sub-results, e.g. from `seq` or `repeat`.
    Seq(Vec<Value>),
}

impl Value {
    /// True iff this is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The elements of a `Seq`, or `None` for any other variant.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// The string slice of a `Str`, or `None` for any other variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Renders the value the way sequence concatenation sees it: `Null` is
/// empty, scalars render as their text, sequences concatenate their
/// elements with no separator.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Char(c) => write!(f, "{}", c),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => f.write_str(s),
            Value::Seq(items) => {
                for item in items {
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Seq(items)
    }
}
