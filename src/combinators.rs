//! # Parser Combinators
//!
//! The combinator algebra of the engine. A [`Parser`] is a cheap handle to
//! an immutable node holding a diagnostic [`Label`] and a [`Kind`], the
//! tagged variant the execution interpreter dispatches on. Factories in
//! this module build nodes; [`Controller::run`] applies them.
//!
//! ## Design
//!
//! - Combinators never invoke each other directly. Every child
//!   application goes back through the controller so instrumentation,
//!   furthest-position tracking and separator skipping stay uniform.
//! - A parse failure is a value (`Ok(None)`), not an error. Only grammar
//!   mistakes (an unknown `sym`, a bad factory call) surface as `Err`.
//! - Alternation commits the longest viable alternative. `simple_alt`
//!   tries every alternative speculatively; `alt` first narrows the
//!   candidates per leading input character through a [`Trial`] probe and
//!   caches that subset against the controller's generation stamp.
//!
//! Bare strings and chars coerce to `literal` parsers via `Into<Parser>`,
//! and the `seq!`/`alt!`-style macros apply that coercion element-wise.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::debug;

use crate::core::{ActionFn, Controller, Generation, GrammarError, ParseResult};
use crate::stream::{Cursor, Trial};
use crate::value::Value;

/// Externally supplied combinator behavior, installed via [`custom`].
pub type CustomFn = Rc<dyn Fn(&dyn Controller, &Cursor) -> ParseResult>;

/// Diagnostic name of a combinator: the factory that built it plus a
/// shallow rendering of its arguments (child parsers appear by name).
#[derive(Clone, Debug, Serialize)]
pub struct Label {
    name: String,
    args: Vec<String>,
}

impl Label {
    pub(crate) fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Label {
            name: name.into(),
            args,
        }
    }

    pub(crate) fn plain(name: impl Into<String>) -> Self {
        Label::new(name, Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}({})", self.name, self.args.join(", "))
        }
    }
}

/// A parser combinator. Clones share the underlying node.
#[derive(Clone)]
pub struct Parser {
    node: Rc<ParserNode>,
}

struct ParserNode {
    label: Label,
    kind: Kind,
}

/// The tagged combinator variants the interpreter executes.
pub enum Kind {
    /// Never succeeds.
    Fail,
    /// Consumes exactly one element if one is present.
    AnyChar,
    /// One element in `lo..=hi`.
    Range { lo: char, hi: char },
    /// A fixed string of elements. `fold_case` stores `text` pre-folded
    /// and compares ASCII case-insensitively.
    Literal {
        text: String,
        value: Option<Value>,
        fold_case: bool,
    },
    /// One element differing from `forbidden`.
    NotChar { forbidden: char },
    /// One element absent from `forbidden`.
    NotChars { forbidden: String },
    /// Succeeds without consuming iff `inner` fails; `otherwise` (when
    /// given) runs in place of returning the cursor unchanged.
    Not {
        inner: Parser,
        otherwise: Option<Parser>,
    },
    /// `inner`'s result, or the original cursor re-valued to `Null`.
    Optional { inner: Parser },
    /// `inner`'s result re-valued to the consumed input substring.
    CopyInput { inner: Parser },
    /// Zero-width success iff `inner` succeeds.
    Lookahead { inner: Parser },
    /// Greedy repetition with optional delimiter and count bounds.
    Repeat {
        item: Parser,
        delimiter: Option<Parser>,
        min: usize,
        max: Option<usize>,
    },
    /// Repetition for skipping: discards values, reports `Str("")`.
    SkipMany { inner: Parser, at_least_one: bool },
    /// All parts in order; value is the sequence of part values.
    Seq { parts: Vec<Parser> },
    /// `inner`'s sequence value projected to a single element.
    Nth { index: usize, inner: Parser },
    /// `inner`'s sequence value projected to several elements.
    Pick { indices: Vec<usize>, inner: Parser },
    /// `inner`'s value collapsed into one string.
    Text { inner: Parser },
    /// Longest-match alternation, speculative over every alternative.
    SimpleAlt { alternatives: Vec<Parser> },
    /// Longest-match alternation with the leading-character dispatch
    /// cache.
    Alt(AltDispatch),
    /// Grammar-table reference, resolved at parse time.
    Sym { name: String },
    /// Disables separator skipping while `inner` runs.
    NoSkip { inner: Parser },
    /// Forces the controller trace toggle while `inner` runs.
    Traced { enabled: bool, inner: Parser },
    /// Emits a debug event with `inner`'s value on real matches.
    Logged { inner: Parser },
    /// A semantic action layered over a rule body.
    Action { inner: Parser, action: ActionFn },
    /// Externally registered behavior.
    Custom { exec: CustomFn },
}

/// State of an `alt` node: its alternatives plus the per-leading-character
/// viability cache.
pub struct AltDispatch {
    alternatives: Vec<Parser>,
    cache: RefCell<AltCache>,
}

#[derive(Default)]
struct AltCache {
    stamp: Option<Generation>,
    by_char: HashMap<char, Parser>,
}

impl AltDispatch {
    fn new(alternatives: Vec<Parser>) -> Self {
        AltDispatch {
            alternatives,
            cache: RefCell::new(AltCache::default()),
        }
    }

    pub fn alternatives(&self) -> &[Parser] {
        &self.alternatives
    }
}

impl Parser {
    pub(crate) fn new(label: Label, kind: Kind) -> Self {
        Parser {
            node: Rc::new(ParserNode { label, kind }),
        }
    }

    /// Factory name and rendered arguments.
    pub fn label(&self) -> &Label {
        &self.node.label
    }

    /// Factory name alone.
    pub fn name(&self) -> &str {
        self.node.label.name()
    }

    /// The combinator variant, exposed read-only so external tooling
    /// (serializers, grammar inspectors) can walk the structure.
    pub fn kind(&self) -> &Kind {
        &self.node.kind
    }

    /// Child parsers in argument order.
    pub fn children(&self) -> Vec<Parser> {
        match self.kind() {
            Kind::Not { inner, otherwise } => {
                let mut out = vec![inner.clone()];
                if let Some(p) = otherwise {
                    out.push(p.clone());
                }
                out
            }
            Kind::Optional { inner }
            | Kind::CopyInput { inner }
            | Kind::Lookahead { inner }
            | Kind::SkipMany { inner, .. }
            | Kind::Nth { inner, .. }
            | Kind::Pick { inner, .. }
            | Kind::Text { inner }
            | Kind::NoSkip { inner }
            | Kind::Traced { inner, .. }
            | Kind::Logged { inner }
            | Kind::Action { inner, .. } => vec![inner.clone()],
            Kind::Repeat {
                item, delimiter, ..
            } => {
                let mut out = vec![item.clone()];
                if let Some(d) = delimiter {
                    out.push(d.clone());
                }
                out
            }
            Kind::Seq { parts } => parts.clone(),
            Kind::SimpleAlt { alternatives } => alternatives.clone(),
            Kind::Alt(alt) => alt.alternatives.clone(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node.label)
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parser({})", self.node.label)
    }
}

impl From<&str> for Parser {
    fn from(text: &str) -> Self {
        literal(text)
    }
}

impl From<String> for Parser {
    fn from(text: String) -> Self {
        literal(&text)
    }
}

impl From<char> for Parser {
    fn from(c: char) -> Self {
        literal(&c.to_string())
    }
}

// Single-character literals repeat constantly inside grammars; share one
// node per distinct character. Parser nodes are single-threaded (`Rc`),
// hence a thread-local rather than a global.
thread_local! {
    static CHAR_LITERALS: RefCell<HashMap<char, Parser>> = RefCell::new(HashMap::new());
}

fn child_names(parsers: &[Parser]) -> Vec<String> {
    parsers.iter().map(|p| p.name().to_string()).collect()
}

fn make_literal(text: &str, value: Option<Value>, fold_case: bool) -> Parser {
    let stored = if fold_case {
        text.to_ascii_lowercase()
    } else {
        text.to_string()
    };
    let name = if fold_case { "literal_ic" } else { "literal" };
    let mut args = vec![format!("{:?}", stored)];
    if let Some(v) = &value {
        args.push(v.to_string());
    }
    Parser::new(
        Label::new(name, args),
        Kind::Literal {
            text: stored,
            value,
            fold_case,
        },
    )
}

/// The parser that never succeeds. Safe default rule body and result of a
/// degenerate alternation.
pub fn fail() -> Parser {
    Parser::new(Label::plain("fail"), Kind::Fail)
}

/// Consumes any single element.
pub fn any_char() -> Parser {
    Parser::new(Label::plain("any_char"), Kind::AnyChar)
}

/// One element in the inclusive range `lo..=hi`; value is that element.
pub fn range(lo: char, hi: char) -> Parser {
    Parser::new(
        Label::new("range", vec![format!("{:?}", lo), format!("{:?}", hi)]),
        Kind::Range { lo, hi },
    )
}

/// The exact string `text`; value defaults to the text itself.
/// Single-character literals are shared per distinct character.
pub fn literal(text: &str) -> Parser {
    let mut chars = text.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return CHAR_LITERALS.with(|cache| {
            cache
                .borrow_mut()
                .entry(c)
                .or_insert_with(|| make_literal(text, None, false))
                .clone()
        });
    }
    make_literal(text, None, false)
}

/// `literal` reporting a custom value instead of the matched text. Never
/// shared.
pub fn literal_with(text: &str, value: Value) -> Parser {
    make_literal(text, Some(value), false)
}

/// Case-insensitive `literal`; ASCII folding only. Value defaults to the
/// folded text.
pub fn literal_ic(text: &str) -> Parser {
    make_literal(text, None, true)
}

/// `literal_ic` with a custom value.
pub fn literal_ic_with(text: &str, value: Value) -> Parser {
    make_literal(text, Some(value), true)
}

/// One element differing from `forbidden`; value is the element.
pub fn not_char(forbidden: char) -> Parser {
    Parser::new(
        Label::new("not_char", vec![format!("{:?}", forbidden)]),
        Kind::NotChar { forbidden },
    )
}

/// One element absent from `forbidden`; value is the element.
pub fn not_chars(forbidden: &str) -> Parser {
    Parser::new(
        Label::new("not_chars", vec![format!("{:?}", forbidden)]),
        Kind::NotChars {
            forbidden: forbidden.to_string(),
        },
    )
}

/// Succeeds with no consumption iff `inner` fails at this position.
pub fn not(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("not", vec![inner.name().to_string()]),
        Kind::Not {
            inner,
            otherwise: None,
        },
    )
}

/// Like [`not`], but runs `otherwise` when the negation holds instead of
/// returning the cursor unchanged. Useful to force progress when a
/// negation repeats.
pub fn not_else(inner: impl Into<Parser>, otherwise: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    let otherwise = otherwise.into();
    Parser::new(
        Label::new(
            "not",
            vec![inner.name().to_string(), otherwise.name().to_string()],
        ),
        Kind::Not {
            inner,
            otherwise: Some(otherwise),
        },
    )
}

/// `inner`'s result, or the original cursor re-valued to `Null`. Never
/// fails.
pub fn optional(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("optional", vec![inner.name().to_string()]),
        Kind::Optional { inner },
    )
}

/// Runs `inner` and replaces its value with the literal substring of
/// input it consumed.
pub fn copy_input(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("copy_input", vec![inner.name().to_string()]),
        Kind::CopyInput { inner },
    )
}

/// Succeeds with zero consumption iff `inner` succeeds here.
pub fn lookahead(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("lookahead", vec![inner.name().to_string()]),
        Kind::Lookahead { inner },
    )
}

/// Greedily applies `item`, separated by `delimiter` when given, until an
/// application fails or `max` items were taken. Succeeds iff at least
/// `min` items matched; the value is the sequence of item values with
/// delimiter values discarded.
pub fn repeat(
    item: impl Into<Parser>,
    delimiter: Option<Parser>,
    min: usize,
    max: Option<usize>,
) -> Parser {
    let item = item.into();
    let args = vec![
        item.name().to_string(),
        delimiter
            .as_ref()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| "_".to_string()),
        min.to_string(),
        max.map(|m| m.to_string()).unwrap_or_else(|| "_".to_string()),
    ];
    Parser::new(
        Label::new("repeat", args),
        Kind::Repeat {
            item,
            delimiter,
            min,
            max,
        },
    )
}

/// One or more `item`s, optionally delimited.
pub fn plus(item: impl Into<Parser>, delimiter: Option<Parser>) -> Parser {
    let item = item.into();
    let mut args = vec![item.name().to_string()];
    if let Some(d) = &delimiter {
        args.push(d.name().to_string());
    }
    Parser::new(
        Label::new("plus", args),
        Kind::Repeat {
            item,
            delimiter,
            min: 1,
            max: None,
        },
    )
}

/// Zero or more `inner`s, discarding values; reports `Str("")`. Purely
/// for skipping.
pub fn repeat0(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("repeat0", vec![inner.name().to_string()]),
        Kind::SkipMany {
            inner,
            at_least_one: false,
        },
    )
}

/// One or more `inner`s, discarding values; reports `Str("")`.
pub fn plus0(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("plus0", vec![inner.name().to_string()]),
        Kind::SkipMany {
            inner,
            at_least_one: true,
        },
    )
}

/// Every part in order; fails outright when any part fails.
pub fn seq(parts: impl IntoIterator<Item = Parser>) -> Parser {
    let parts: Vec<Parser> = parts.into_iter().collect();
    Parser::new(
        Label::new("seq", child_names(&parts)),
        Kind::Seq { parts },
    )
}

/// Like [`seq`], but the value is just the `index`-th part's value.
pub fn seq1(index: usize, parts: impl IntoIterator<Item = Parser>) -> Parser {
    let parts: Vec<Parser> = parts.into_iter().collect();
    let mut args = vec![index.to_string()];
    args.extend(child_names(&parts));
    Parser::new(
        Label::new("seq1", args),
        Kind::Nth {
            index,
            inner: seq(parts),
        },
    )
}

/// Projects `indices` out of `inner`'s sequence value.
pub fn pick(indices: Vec<usize>, inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new(
            "pick",
            vec![format!("{:?}", indices), inner.name().to_string()],
        ),
        Kind::Pick { indices, inner },
    )
}

/// Like [`seq`], keeping only even-indexed values. Designed for
/// token/separator interleavings.
pub fn seq_even(parts: impl IntoIterator<Item = Parser>) -> Parser {
    let parts: Vec<Parser> = parts.into_iter().collect();
    let indices: Vec<usize> = (0..parts.len()).step_by(2).collect();
    Parser::new(
        Label::new("seq_even", child_names(&parts)),
        Kind::Pick {
            indices,
            inner: seq(parts),
        },
    )
}

/// Collapses `inner`'s value into a single string (sequences concatenate,
/// `Null` renders empty).
pub fn text(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("text", vec![inner.name().to_string()]),
        Kind::Text { inner },
    )
}

/// Longest-match alternation without the dispatch cache: every
/// alternative runs speculatively, the one reaching the greatest position
/// wins (first listed wins ties) and is re-run against the real cursor.
/// A single alternative is returned as-is.
pub fn simple_alt(alternatives: impl IntoIterator<Item = Parser>) -> Parser {
    let mut alternatives: Vec<Parser> = alternatives.into_iter().collect();
    if alternatives.len() == 1 {
        return alternatives.remove(0);
    }
    Parser::new(
        Label::new("simple_alt", child_names(&alternatives)),
        Kind::SimpleAlt { alternatives },
    )
}

/// Longest-match alternation with the leading-character dispatch cache:
/// per distinct input character the subset of viable alternatives is
/// probed once and cached until the grammar generation changes.
pub fn alt(alternatives: impl IntoIterator<Item = Parser>) -> Parser {
    let alternatives: Vec<Parser> = alternatives.into_iter().collect();
    Parser::new(
        Label::new("alt", child_names(&alternatives)),
        Kind::Alt(AltDispatch::new(alternatives)),
    )
}

/// References the named grammar rule, resolved at parse time. Referencing
/// an absent name is a fatal grammar error, not a parse failure.
pub fn sym(name: &str) -> Parser {
    Parser::new(
        Label::new("sym", vec![format!("{:?}", name)]),
        Kind::Sym {
            name: name.to_string(),
        },
    )
}

/// Disables separator skipping while `inner` runs, restoring the previous
/// setting afterwards. A no-op under controllers without skip machinery.
pub fn no_skip(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("no_skip", vec![inner.name().to_string()]),
        Kind::NoSkip { inner },
    )
}

/// Enables dispatch tracing while `inner` runs.
pub fn traced(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("traced", vec![inner.name().to_string()]),
        Kind::Traced {
            enabled: true,
            inner,
        },
    )
}

/// Silences dispatch tracing while `inner` runs.
pub fn quiet(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("quiet", vec![inner.name().to_string()]),
        Kind::Traced {
            enabled: false,
            inner,
        },
    )
}

/// Emits a `tracing` debug event with `inner`'s value whenever it matches
/// on a non-speculative cursor.
pub fn logged(inner: impl Into<Parser>) -> Parser {
    let inner = inner.into();
    Parser::new(
        Label::new("logged", vec![inner.name().to_string()]),
        Kind::Logged { inner },
    )
}

/// Wraps externally supplied behavior as a combinator.
pub fn custom(
    name: &str,
    exec: impl Fn(&dyn Controller, &Cursor) -> ParseResult + 'static,
) -> Parser {
    Parser::new(
        Label::plain(name),
        Kind::Custom {
            exec: Rc::new(exec),
        },
    )
}

/// [`seq`] with element-wise coercion: bare strings and chars become
/// literals.
#[macro_export]
macro_rules! seq {
    ($($part:expr),+ $(,)?) => {
        $crate::combinators::seq(vec![$($crate::combinators::Parser::from($part)),+])
    };
}

/// [`seq1`] with element-wise coercion: `seq1![index; parts...]`.
#[macro_export]
macro_rules! seq1 {
    ($index:expr; $($part:expr),+ $(,)?) => {
        $crate::combinators::seq1(
            $index,
            vec![$($crate::combinators::Parser::from($part)),+],
        )
    };
}

/// [`pick`] with coercion: `pick!([indices]; parser)`.
#[macro_export]
macro_rules! pick {
    ($indices:expr; $inner:expr) => {
        $crate::combinators::pick(
            ::std::vec::Vec::from($indices),
            $crate::combinators::Parser::from($inner),
        )
    };
}

/// [`seq_even`] with element-wise coercion.
#[macro_export]
macro_rules! seq_even {
    ($($part:expr),+ $(,)?) => {
        $crate::combinators::seq_even(vec![$($crate::combinators::Parser::from($part)),+])
    };
}

/// [`alt`] with element-wise coercion.
#[macro_export]
macro_rules! alt {
    ($($part:expr),+ $(,)?) => {
        $crate::combinators::alt(vec![$($crate::combinators::Parser::from($part)),+])
    };
}

/// [`simple_alt`] with element-wise coercion.
#[macro_export]
macro_rules! simple_alt {
    ($($part:expr),+ $(,)?) => {
        $crate::combinators::simple_alt(vec![$($crate::combinators::Parser::from($part)),+])
    };
}

impl Parser {
    /// Executes this combinator at `cur`. Only [`Controller::run`] calls
    /// this; child applications inside go back through `ctl`.
    pub(crate) fn apply(&self, ctl: &dyn Controller, cur: &Cursor) -> ParseResult {
        match self.kind() {
            Kind::Fail => Ok(None),

            Kind::AnyChar => match cur.head() {
                Some(_) => Ok(Some(cur.tail())),
                None => Ok(None),
            },

            Kind::Range { lo, hi } => match cur.head() {
                Some(h) if *lo <= h && h <= *hi => Ok(Some(cur.tail().with_value(Value::Char(h)))),
                _ => Ok(None),
            },

            Kind::Literal {
                text,
                value,
                fold_case,
            } => {
                let mut here = cur.clone();
                for expected in text.chars() {
                    let matched = match here.head() {
                        Some(h) if *fold_case => h.to_ascii_lowercase() == expected,
                        Some(h) => h == expected,
                        None => false,
                    };
                    if !matched {
                        return Ok(None);
                    }
                    here = here.tail();
                }
                let v = value
                    .clone()
                    .unwrap_or_else(|| Value::Str(text.clone()));
                Ok(Some(here.with_value(v)))
            }

            Kind::NotChar { forbidden } => match cur.head() {
                Some(h) if h != *forbidden => Ok(Some(cur.tail().with_value(Value::Char(h)))),
                _ => Ok(None),
            },

            Kind::NotChars { forbidden } => match cur.head() {
                Some(h) if !forbidden.contains(h) => {
                    Ok(Some(cur.tail().with_value(Value::Char(h))))
                }
                _ => Ok(None),
            },

            Kind::Not { inner, otherwise } => {
                if ctl.run(inner, cur)?.is_some() {
                    return Ok(None);
                }
                match otherwise {
                    Some(else_parser) => ctl.run(else_parser, cur),
                    None => Ok(Some(cur.clone())),
                }
            }

            Kind::Optional { inner } => Ok(Some(
                ctl.run(inner, cur)?
                    .unwrap_or_else(|| cur.with_value(Value::Null)),
            )),

            Kind::CopyInput { inner } => Ok(ctl.run(inner, cur)?.map(|out| {
                let consumed = cur.slice(cur.pos(), out.pos());
                out.with_value(Value::Str(consumed))
            })),

            Kind::Lookahead { inner } => Ok(ctl.run(inner, cur)?.map(|_| cur.clone())),

            Kind::Repeat {
                item,
                delimiter,
                min,
                max,
            } => {
                let mut items = Vec::new();
                let mut here = cur.clone();
                loop {
                    if let Some(m) = max {
                        if items.len() >= *m {
                            break;
                        }
                    }
                    if let Some(delim) = delimiter {
                        if !items.is_empty() {
                            match ctl.run(delim, &here)? {
                                Some(next) => here = next,
                                None => break,
                            }
                        }
                    }
                    match ctl.run(item, &here)? {
                        Some(next) => {
                            items.push(next.value());
                            here = next;
                        }
                        None => break,
                    }
                }
                if items.len() < *min {
                    return Ok(None);
                }
                Ok(Some(here.with_value(Value::Seq(items))))
            }

            Kind::SkipMany {
                inner,
                at_least_one,
            } => {
                let mut here = cur.clone();
                let mut any = false;
                while let Some(next) = ctl.run(inner, &here)? {
                    here = next;
                    any = true;
                }
                if *at_least_one && !any {
                    return Ok(None);
                }
                Ok(Some(here.with_value(Value::Str(String::new()))))
            }

            Kind::Seq { parts } => {
                let mut values = Vec::with_capacity(parts.len());
                let mut here = cur.clone();
                for part in parts {
                    match ctl.run(part, &here)? {
                        Some(next) => {
                            values.push(next.value());
                            here = next;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(here.with_value(Value::Seq(values))))
            }

            Kind::Nth { index, inner } => Ok(ctl.run(inner, cur)?.map(|out| {
                let picked = match out.value() {
                    Value::Seq(items) => items.get(*index).cloned().unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                out.with_value(picked)
            })),

            Kind::Pick { indices, inner } => Ok(ctl.run(inner, cur)?.map(|out| {
                let picked = match out.value() {
                    Value::Seq(items) => indices
                        .iter()
                        .map(|i| items.get(*i).cloned().unwrap_or(Value::Null))
                        .collect(),
                    _ => indices.iter().map(|_| Value::Null).collect(),
                };
                out.with_value(Value::Seq(picked))
            })),

            Kind::Text { inner } => Ok(ctl
                .run(inner, cur)?
                .map(|out| {
                    let collapsed = out.value().to_string();
                    out.with_value(Value::Str(collapsed))
                })),

            Kind::SimpleAlt { alternatives } => {
                let probe = cur.speculate();
                let mut winner: Option<(&Parser, usize)> = None;
                for candidate in alternatives {
                    if let Some(out) = ctl.run(candidate, &probe)? {
                        if winner.map_or(true, |(_, best)| best < out.pos()) {
                            winner = Some((candidate, out.pos()));
                        }
                    }
                }
                match winner {
                    Some((parser, _)) => ctl.run(parser, cur),
                    None => Ok(None),
                }
            }

            Kind::Alt(alt) => {
                let stamp = ctl.generation();
                {
                    let mut cache = alt.cache.borrow_mut();
                    if cache.stamp != Some(stamp) {
                        cache.by_char.clear();
                        cache.stamp = Some(stamp);
                    }
                }
                let Some(c) = cur.head() else {
                    return Ok(None);
                };
                let cached = alt.cache.borrow().by_char.get(&c).cloned();
                let chosen = match cached {
                    Some(parser) => parser,
                    None => {
                        let mut live = Vec::new();
                        for candidate in &alt.alternatives {
                            let probe = Trial::new(cur);
                            let succeeded = ctl.run(candidate, probe.cursor())?.is_some();
                            if succeeded || probe.consumed_input() {
                                live.push(candidate.clone());
                            }
                        }
                        let parser = if live.is_empty() {
                            fail()
                        } else if live.len() == 1 {
                            live.remove(0)
                        } else {
                            simple_alt(live)
                        };
                        alt.cache
                            .borrow_mut()
                            .by_char
                            .insert(c, parser.clone());
                        parser
                    }
                };
                ctl.run(&chosen, cur)
            }

            Kind::Sym { name } => match ctl.core().rule(name) {
                Some(target) => ctl.run(&target, cur),
                None => Err(GrammarError::UnknownSymbol { name: name.clone() }),
            },

            Kind::NoSkip { inner } => {
                let prev = ctl.set_skip(false);
                let ret = ctl.run(inner, cur);
                ctl.set_skip(prev);
                ret
            }

            Kind::Traced { enabled, inner } => {
                let prev = ctl.core().set_trace(*enabled);
                let ret = ctl.run(inner, cur);
                ctl.core().set_trace(prev);
                ret
            }

            Kind::Logged { inner } => {
                let ret = ctl.run(inner, cur)?;
                if let Some(out) = &ret {
                    if !cur.is_speculative() {
                        debug!(target: "parser::log", parser = %self, value = %out.value(), "matched");
                    }
                }
                Ok(ret)
            }

            Kind::Action { inner, action } => {
                let before = cur.value();
                Ok(ctl.run(inner, cur)?.map(|out| {
                    let rewritten = action(out.value(), before);
                    out.with_value(rewritten)
                }))
            }

            Kind::Custom { exec } => exec(ctl, cur),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Grammar, ParserController};
    use crate::core::Controller;
    use pretty_assertions::assert_eq;

    fn apply(parser: &Parser, input: &str) -> Option<(usize, Value)> {
        let ctl = ParserController::new(Grammar::new());
        let cur = Cursor::for_input(input);
        ctl.run(parser, &cur)
            .unwrap()
            .map(|out| (out.pos(), out.value()))
    }

    fn str_value(s: &str) -> Value {
        Value::Str(s.to_string())
    }

    #[test]
    fn test_range_matches_inclusive_bounds() {
        let digit = range('0', '9');
        assert_eq!(apply(&digit, "0"), Some((1, Value::Char('0'))));
        assert_eq!(apply(&digit, "9"), Some((1, Value::Char('9'))));
        assert_eq!(apply(&digit, "a"), None);
        assert_eq!(apply(&digit, ""), None);
    }

    #[test]
    fn test_literal_matches_exactly() {
        let p = literal("abc");
        assert_eq!(apply(&p, "abcd"), Some((3, str_value("abc"))));
        assert_eq!(apply(&p, "abx"), None);
        assert_eq!(apply(&p, "ab"), None);
    }

    #[test]
    fn test_literal_custom_value() {
        let p = literal_with("true", Value::Int(1));
        assert_eq!(apply(&p, "true"), Some((4, Value::Int(1))));
    }

    #[test]
    fn test_literal_empty_is_zero_width() {
        let p = literal("");
        assert_eq!(apply(&p, "x"), Some((0, str_value(""))));
    }

    #[test]
    fn test_single_char_literals_are_shared() {
        let a = literal("a");
        let b = literal("a");
        assert!(Rc::ptr_eq(&a.node, &b.node));
        // A custom value must not leak into the shared node.
        let custom = literal_with("a", Value::Int(0));
        assert!(!Rc::ptr_eq(&a.node, &custom.node));
        assert_eq!(apply(&a, "a"), Some((1, str_value("a"))));
    }

    #[test]
    fn test_literal_ic_folds_ascii() {
        let p = literal_ic("SELECT");
        assert_eq!(apply(&p, "select rest"), Some((6, str_value("select"))));
        assert_eq!(apply(&p, "SeLeCt"), Some((6, str_value("select"))));
        assert_eq!(apply(&p, "selec"), None);
    }

    #[test]
    fn test_not_char_and_not_chars() {
        assert_eq!(apply(&not_char('x'), "y"), Some((1, Value::Char('y'))));
        assert_eq!(apply(&not_char('x'), "x"), None);
        assert_eq!(apply(&not_char('x'), ""), None);
        assert_eq!(apply(&not_chars("\r\n"), "a"), Some((1, Value::Char('a'))));
        assert_eq!(apply(&not_chars("\r\n"), "\n"), None);
    }

    #[test]
    fn test_not_succeeds_without_consuming() {
        let p = not(literal("x"));
        assert_eq!(apply(&p, "y"), Some((0, Value::Null)));
        assert_eq!(apply(&p, "x"), None);
    }

    #[test]
    fn test_not_else_forces_progress() {
        let p = not_else(literal("x"), any_char());
        assert_eq!(apply(&p, "y"), Some((1, Value::Char('y'))));
        assert_eq!(apply(&p, "x"), None);
    }

    #[test]
    fn test_optional_never_fails() {
        let p = optional(literal("hi"));
        assert_eq!(apply(&p, "hi!"), Some((2, str_value("hi"))));
        assert_eq!(apply(&p, "no"), Some((0, Value::Null)));
    }

    #[test]
    fn test_copy_input_reports_consumed_text() {
        let p = copy_input(seq(vec![literal("a"), any_char(), literal("c")]));
        assert_eq!(apply(&p, "abc"), Some((3, str_value("abc"))));
    }

    #[test]
    fn test_lookahead_keeps_the_original_cursor() {
        let p = lookahead(literal("ab"));
        assert_eq!(apply(&p, "ab"), Some((0, Value::Null)));
        assert_eq!(apply(&p, "ax"), None);
    }

    #[test]
    fn test_repeat_collects_values() {
        let p = repeat(literal("ab"), None, 0, None);
        assert_eq!(
            apply(&p, "ababx"),
            Some((4, Value::Seq(vec![str_value("ab"), str_value("ab")])))
        );
        assert_eq!(apply(&p, "x"), Some((0, Value::Seq(vec![]))));
    }

    #[test]
    fn test_repeat_honors_min_and_max() {
        let two_plus = repeat(literal("a"), None, 2, None);
        assert_eq!(apply(&two_plus, "a"), None);
        assert_eq!(
            apply(&two_plus, "aa"),
            Some((2, Value::Seq(vec![str_value("a"), str_value("a")])))
        );

        let capped = repeat(literal("a"), None, 0, Some(2));
        assert_eq!(
            apply(&capped, "aaaa"),
            Some((2, Value::Seq(vec![str_value("a"), str_value("a")])))
        );
    }

    #[test]
    fn test_repeat_with_delimiter_discards_delimiters() {
        let p = repeat(range('0', '9'), Some(literal(",")), 0, None);
        assert_eq!(
            apply(&p, "1,2,3"),
            Some((
                5,
                Value::Seq(vec![
                    Value::Char('1'),
                    Value::Char('2'),
                    Value::Char('3')
                ])
            ))
        );
    }

    #[test]
    fn test_repeat_consumes_a_trailing_delimiter() {
        // The delimiter commits before the next item is attempted, so a
        // trailing delimiter is part of the match.
        let p = repeat(range('0', '9'), Some(literal(",")), 0, None);
        assert_eq!(
            apply(&p, "1,2,"),
            Some((4, Value::Seq(vec![Value::Char('1'), Value::Char('2')])))
        );
    }

    #[test]
    fn test_plus0_requires_one_match() {
        let p = plus0(literal("a"));
        assert_eq!(apply(&p, "aaa"), Some((3, str_value(""))));
        assert_eq!(apply(&p, "b"), None);
        let p0 = repeat0(literal("a"));
        assert_eq!(apply(&p0, "b"), Some((0, str_value(""))));
    }

    #[test]
    fn test_seq_is_all_or_nothing() {
        let p = seq(vec![literal("a"), literal("b")]);
        assert_eq!(
            apply(&p, "ab"),
            Some((2, Value::Seq(vec![str_value("a"), str_value("b")])))
        );
        assert_eq!(apply(&p, "ax"), None);
    }

    #[test]
    fn test_seq1_and_pick_project() {
        let p = seq1(1, vec![literal("("), range('a', 'z'), literal(")")]);
        assert_eq!(apply(&p, "(k)"), Some((3, Value::Char('k'))));

        let p = pick(
            vec![0, 2],
            seq(vec![literal("a"), literal("="), literal("b")]),
        );
        assert_eq!(
            apply(&p, "a=b"),
            Some((3, Value::Seq(vec![str_value("a"), str_value("b")])))
        );
    }

    #[test]
    fn test_projection_out_of_range_yields_null() {
        let p = seq1(5, vec![literal("a")]);
        assert_eq!(apply(&p, "a"), Some((1, Value::Null)));
    }

    #[test]
    fn test_seq_even_strips_odd_positions() {
        let p = seq_even(vec![literal("a"), literal(","), literal("b")]);
        assert_eq!(
            apply(&p, "a,b"),
            Some((3, Value::Seq(vec![str_value("a"), str_value("b")])))
        );
    }

    #[test]
    fn test_text_collapses_sequences() {
        let p = text(plus(range('0', '9'), None));
        assert_eq!(apply(&p, "482x"), Some((3, str_value("482"))));
    }

    #[test]
    fn test_simple_alt_takes_the_longest_match() {
        let p = simple_alt(vec![literal("a"), literal("ab")]);
        assert_eq!(apply(&p, "ab"), Some((2, str_value("ab"))));
        assert_eq!(apply(&p, "ax"), Some((1, str_value("a"))));
        assert_eq!(apply(&p, "x"), None);
    }

    #[test]
    fn test_simple_alt_breaks_ties_by_listing_order() {
        let first = literal_with("a", Value::Int(1));
        let second = literal_with("a", Value::Int(2));
        let p = simple_alt(vec![first, second]);
        assert_eq!(apply(&p, "a"), Some((1, Value::Int(1))));
    }

    #[test]
    fn test_simple_alt_single_argument_collapses() {
        let p = simple_alt(vec![literal("a")]);
        assert_eq!(p.name(), "literal");
    }

    #[test]
    fn test_alt_matches_like_simple_alt() {
        let p = alt(vec![literal("a"), literal("ab"), literal("b")]);
        assert_eq!(apply(&p, "ab"), Some((2, str_value("ab"))));
        assert_eq!(apply(&p, "b"), Some((1, str_value("b"))));
        assert_eq!(apply(&p, "x"), None);
        assert_eq!(apply(&p, ""), None);
    }

    #[test]
    fn test_alt_cache_survives_repeated_use() {
        let ctl = ParserController::new(Grammar::new());
        let p = alt(vec![literal("ab"), literal("cd")]);
        for input in ["ab", "cd", "ab", "xy"] {
            let cur = Cursor::for_input(input);
            let matched = ctl.run(&p, &cur).unwrap().is_some();
            assert_eq!(matched, input != "xy");
        }
    }

    #[test]
    fn test_alt_cache_is_discarded_when_the_grammar_changes() {
        let mut ctl = ParserController::new(Grammar::new());
        ctl.add_rule("x", literal("b"));
        let p = alt(vec![sym("x")]);

        // 'a' probes as dead for the current rule body and is cached so.
        assert!(ctl.run(&p, &Cursor::for_input("a")).unwrap().is_none());

        // Redefining the rule bumps the generation; the stale entry must
        // not shadow the new body.
        ctl.add_rule("x", literal("a"));
        assert!(ctl.run(&p, &Cursor::for_input("a")).unwrap().is_some());
    }

    #[test]
    fn test_sym_resolves_at_parse_time() {
        let mut ctl = ParserController::new(Grammar::new());
        ctl.add_rule("word", text(plus(range('a', 'z'), None)));
        let p = sym("word");
        let cur = Cursor::for_input("hello");
        let out = ctl.run(&p, &cur).unwrap().unwrap();
        assert_eq!(out.value(), str_value("hello"));
    }

    #[test]
    fn test_sym_unknown_is_a_fatal_error() {
        let ctl = ParserController::new(Grammar::new());
        let err = ctl
            .run(&sym("missing"), &Cursor::for_input("x"))
            .unwrap_err();
        assert_eq!(
            err,
            GrammarError::UnknownSymbol {
                name: "missing".into()
            }
        );
    }

    #[test]
    fn test_any_char_consumes_one_element() {
        assert_eq!(apply(&any_char(), "xy"), Some((1, Value::Char('x'))));
        assert_eq!(apply(&any_char(), ""), None);
    }

    #[test]
    fn test_custom_combinator_runs_its_closure() {
        let p = custom("upper", |_, cur| match cur.head() {
            Some(h) if h.is_ascii_uppercase() => Ok(Some(cur.tail())),
            _ => Ok(None),
        });
        assert_eq!(apply(&p, "Q"), Some((1, Value::Char('Q'))));
        assert_eq!(apply(&p, "q"), None);
    }

    #[test]
    fn test_labels_render_one_level_deep() {
        assert_eq!(literal("ab").to_string(), "literal(\"ab\")");
        assert_eq!(range('a', 'z').to_string(), "range('a', 'z')");
        assert_eq!(
            seq(vec![literal("a"), sym("x")]).to_string(),
            "seq(literal, sym)"
        );
        assert_eq!(fail().to_string(), "fail");
    }

    #[test]
    fn test_children_expose_structure() {
        let p = seq(vec![literal("a"), sym("x")]);
        let kids = p.children();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].name(), "literal");
        assert_eq!(kids[1].name(), "sym");
        assert!(matches!(kids[1].kind(), Kind::Sym { name } if name == "x"));
    }

    #[test]
    fn test_macros_coerce_bare_strings() {
        let p = crate::seq!["a", 'b', sym("x")];
        assert_eq!(p.children().len(), 3);
        assert_eq!(p.children()[0].name(), "literal");

        let mut ctl = ParserController::new(Grammar::new());
        ctl.add_rule("x", literal("c"));
        let cur = Cursor::for_input("abc");
        let out = ctl.run(&p, &cur).unwrap().unwrap();
        assert_eq!(out.pos(), 3);

        let q = crate::alt!["aa", "b"];
        assert_eq!(apply(&q, "aa"), Some((2, str_value("aa"))));

        let r = crate::seq1![1; "(", range('0', '9'), ")"];
        assert_eq!(apply(&r, "(7)"), Some((3, Value::Char('7'))));
    }
}
