//! # Input Streams
//!
//! Cursors are immutable position-plus-value views over a shared input
//! buffer. Deriving a successor ([`Cursor::tail`]) or re-valuing
//! ([`Cursor::with_value`]) always produces a new cursor; holders of the
//! old one never observe a change.
//!
//! Three flavors exist behind the one public type:
//!
//! - **Concrete** cursors drive a real parse. They sit on a chain of
//!   reference-counted position nodes, and each node memoizes its `tail`
//!   node so repeated advances from the same position share one
//!   allocation. Never speculative.
//! - **Speculative** cursors ([`Cursor::speculate`]) explore combinators
//!   for decision making, e.g. while alternation picks a winner. They
//!   never write into the concrete node chain.
//! - **Trial** cursors (via [`Trial`]) let the alternation resolver ask
//!   whether a parser can consume at least one element: the head is frozen
//!   at construction, and the first advance records a consumed flag and
//!   clamps the head to end-of-input so nothing further can be read.

use std::cell::{Cell, OnceCell};
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// Shared, immutable input. Positions are char offsets, not byte offsets.
struct Buffer {
    text: String,
    chars: Vec<char>,
}

impl Buffer {
    fn new(text: &str) -> Self {
        Buffer {
            text: text.to_string(),
            chars: text.chars().collect(),
        }
    }

    fn get(&self, pos: usize) -> Option<char> {
        self.chars.get(pos).copied()
    }

    fn len(&self) -> usize {
        self.chars.len()
    }

    /// Substring between two char offsets, clamped to the input.
    fn slice(&self, from: usize, to: usize) -> String {
        let from = from.min(self.chars.len());
        let to = to.min(self.chars.len()).max(from);
        self.chars[from..to].iter().collect()
    }
}

/// A position in the concrete cursor chain. `next` is filled in at most
/// once; later requests share the first result.
struct Node {
    pos: usize,
    next: OnceCell<Rc<Node>>,
}

impl Node {
    fn new(pos: usize) -> Rc<Self> {
        Rc::new(Node {
            pos,
            next: OnceCell::new(),
        })
    }

    fn tail(self: &Rc<Self>) -> Rc<Node> {
        self.next.get_or_init(|| Node::new(self.pos + 1)).clone()
    }
}

#[derive(Clone)]
enum Repr {
    Concrete { node: Rc<Node> },
    Speculative { pos: usize },
    Trial {
        pos: usize,
        head: Option<char>,
        consumed: Rc<Cell<bool>>,
    },
}

/// An immutable view over the input at one position, carrying the value
/// parsed so far. Cheap to clone.
#[derive(Clone)]
pub struct Cursor {
    buf: Rc<Buffer>,
    repr: Repr,
    value: Option<Value>,
}

impl Cursor {
    /// A concrete cursor at position 0 of `input`.
    pub fn for_input(input: &str) -> Self {
        Cursor {
            buf: Rc::new(Buffer::new(input)),
            repr: Repr::Concrete { node: Node::new(0) },
            value: None,
        }
    }

    /// Char offset into the input.
    pub fn pos(&self) -> usize {
        match &self.repr {
            Repr::Concrete { node } => node.pos,
            Repr::Speculative { pos } => *pos,
            Repr::Trial { pos, .. } => *pos,
        }
    }

    /// The element at `pos`, or `None` at end of input. Trial cursors
    /// report their frozen head instead.
    pub fn head(&self) -> Option<char> {
        match &self.repr {
            Repr::Trial { head, .. } => *head,
            _ => self.buf.get(self.pos()),
        }
    }

    /// The cursor one element further along. The receiver is unchanged;
    /// the successor has no explicit value, so its [`Cursor::value`]
    /// reports the element just consumed.
    pub fn tail(&self) -> Cursor {
        let repr = match &self.repr {
            Repr::Concrete { node } => Repr::Concrete { node: node.tail() },
            Repr::Speculative { pos } => Repr::Speculative { pos: pos + 1 },
            Repr::Trial { pos, consumed, .. } => {
                consumed.set(true);
                Repr::Trial {
                    pos: pos + 1,
                    head: None,
                    consumed: consumed.clone(),
                }
            }
        };
        Cursor {
            buf: self.buf.clone(),
            repr,
            value: None,
        }
    }

    /// A copy of this cursor carrying `value` as its parse result.
    pub fn with_value(&self, value: Value) -> Cursor {
        Cursor {
            buf: self.buf.clone(),
            repr: self.repr.clone(),
            value: Some(value),
        }
    }

    /// The semantic value at this cursor. Defaults to the most recently
    /// consumed element when never explicitly set (`Null` at position 0,
    /// and always `Null` for trial cursors).
    pub fn value(&self) -> Value {
        if let Some(v) = &self.value {
            return v.clone();
        }
        match &self.repr {
            Repr::Trial { .. } => Value::Null,
            _ => {
                let pos = self.pos();
                if pos == 0 {
                    Value::Null
                } else {
                    self.buf.get(pos - 1).map(Value::Char).unwrap_or(Value::Null)
                }
            }
        }
    }

    /// True iff this cursor may be explored without committing effects.
    pub fn is_speculative(&self) -> bool {
        !matches!(self.repr, Repr::Concrete { .. })
    }

    /// Wraps this cursor for speculative exploration. Idempotent: an
    /// already-speculative cursor comes back unchanged.
    pub fn speculate(&self) -> Cursor {
        if self.is_speculative() {
            return self.clone();
        }
        Cursor {
            buf: self.buf.clone(),
            repr: Repr::Speculative { pos: self.pos() },
            value: self.value.clone(),
        }
    }

    /// The input substring between two char offsets.
    pub fn slice(&self, from: usize, to: usize) -> String {
        self.buf.slice(from, to)
    }

    /// Total input length in chars.
    pub fn input_len(&self) -> usize {
        self.buf.len()
    }

    /// The full input text.
    pub fn input(&self) -> &str {
        &self.buf.text
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.repr {
            Repr::Concrete { .. } => "concrete",
            Repr::Speculative { .. } => "speculative",
            Repr::Trial { .. } => "trial",
        };
        f.debug_struct("Cursor")
            .field("kind", &kind)
            .field("pos", &self.pos())
            .field("head", &self.head())
            .field("value", &self.value())
            .finish()
    }
}

/// Single-character prober used by alternation liveness checks.
///
/// The probe cursor freezes the head seen at construction; once a parser
/// advances past it, [`Trial::consumed_input`] reports true and the head
/// clamps to end-of-input so the parser under test cannot read further.
pub struct Trial {
    cursor: Cursor,
    consumed: Rc<Cell<bool>>,
}

impl Trial {
    pub fn new(base: &Cursor) -> Self {
        let consumed = Rc::new(Cell::new(false));
        let cursor = Cursor {
            buf: base.buf.clone(),
            repr: Repr::Trial {
                pos: base.pos(),
                head: base.head(),
                consumed: consumed.clone(),
            },
            value: None,
        };
        Trial { cursor, consumed }
    }

    /// The cursor to hand to the parser under test.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// True once the probed parser has consumed the frozen head.
    pub fn consumed_input(&self) -> bool {
        self.consumed.get()
    }
}
