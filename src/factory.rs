//! # Factory Table
//!
//! Name-keyed combinator construction. Grammars assembled from external
//! descriptions (or extended at runtime) instantiate combinators through
//! a [`FactoryTable`] instead of calling the typed factory functions,
//! passing loosely-typed [`FactoryArg`] lists. The table starts out
//! populated with every built-in combinator and accepts replacements and
//! additions under any name.
//!
//! Argument coercion follows the combinator API: a string or character
//! argument in a parser position becomes a `literal`.

use std::collections::HashMap;
use std::rc::Rc;

use crate::combinators::{self, Parser};
use crate::core::GrammarError;
use crate::value::Value;

/// Loosely-typed argument to a parser factory.
#[derive(Debug, Clone)]
pub enum FactoryArg {
    Parser(Parser),
    Str(String),
    Char(char),
    Int(i64),
    Ints(Vec<usize>),
    /// An optional argument passed explicitly as absent.
    None,
}

impl From<Parser> for FactoryArg {
    fn from(p: Parser) -> Self {
        FactoryArg::Parser(p)
    }
}

impl From<&str> for FactoryArg {
    fn from(s: &str) -> Self {
        FactoryArg::Str(s.to_string())
    }
}

impl From<String> for FactoryArg {
    fn from(s: String) -> Self {
        FactoryArg::Str(s)
    }
}

impl From<char> for FactoryArg {
    fn from(c: char) -> Self {
        FactoryArg::Char(c)
    }
}

impl From<i64> for FactoryArg {
    fn from(n: i64) -> Self {
        FactoryArg::Int(n)
    }
}

impl From<usize> for FactoryArg {
    fn from(n: usize) -> Self {
        FactoryArg::Int(n as i64)
    }
}

impl From<Vec<usize>> for FactoryArg {
    fn from(ns: Vec<usize>) -> Self {
        FactoryArg::Ints(ns)
    }
}

/// A registered factory.
pub type FactoryFn = Rc<dyn Fn(&[FactoryArg]) -> Result<Parser, GrammarError>>;

fn bad_args(name: &str, detail: impl Into<String>) -> GrammarError {
    GrammarError::BadFactoryArgs {
        name: name.to_string(),
        detail: detail.into(),
    }
}

pub(crate) fn parser_at(name: &str, args: &[FactoryArg], index: usize) -> Result<Parser, GrammarError> {
    match args.get(index) {
        Some(FactoryArg::Parser(p)) => Ok(p.clone()),
        Some(FactoryArg::Str(s)) => Ok(combinators::literal(s)),
        Some(FactoryArg::Char(c)) => Ok(Parser::from(*c)),
        _ => Err(bad_args(
            name,
            format!("argument {} must be a parser", index),
        )),
    }
}

pub(crate) fn opt_parser_at(
    name: &str,
    args: &[FactoryArg],
    index: usize,
) -> Result<Option<Parser>, GrammarError> {
    match args.get(index) {
        Option::None | Some(FactoryArg::None) => Ok(Option::None),
        _ => parser_at(name, args, index).map(Some),
    }
}

/// Every argument from `start` on, each coerced to a parser.
pub(crate) fn parsers_from(
    name: &str,
    args: &[FactoryArg],
    start: usize,
) -> Result<Vec<Parser>, GrammarError> {
    (start..args.len())
        .map(|i| parser_at(name, args, i))
        .collect()
}

pub(crate) fn str_at(name: &str, args: &[FactoryArg], index: usize) -> Result<String, GrammarError> {
    match args.get(index) {
        Some(FactoryArg::Str(s)) => Ok(s.clone()),
        Some(FactoryArg::Char(c)) => Ok(c.to_string()),
        _ => Err(bad_args(
            name,
            format!("argument {} must be a string", index),
        )),
    }
}

pub(crate) fn char_at(name: &str, args: &[FactoryArg], index: usize) -> Result<char, GrammarError> {
    match args.get(index) {
        Some(FactoryArg::Char(c)) => Ok(*c),
        Some(FactoryArg::Str(s)) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), Option::None) => Ok(c),
                _ => Err(bad_args(
                    name,
                    format!("argument {} must be a single character", index),
                )),
            }
        }
        _ => Err(bad_args(
            name,
            format!("argument {} must be a character", index),
        )),
    }
}

pub(crate) fn opt_count_at(
    name: &str,
    args: &[FactoryArg],
    index: usize,
) -> Result<Option<usize>, GrammarError> {
    match args.get(index) {
        Option::None | Some(FactoryArg::None) => Ok(Option::None),
        Some(FactoryArg::Int(n)) if *n >= 0 => Ok(Some(*n as usize)),
        _ => Err(bad_args(
            name,
            format!("argument {} must be a non-negative count", index),
        )),
    }
}

pub(crate) fn count_at(name: &str, args: &[FactoryArg], index: usize) -> Result<usize, GrammarError> {
    opt_count_at(name, args, index)?.ok_or_else(|| {
        bad_args(name, format!("argument {} must be a non-negative count", index))
    })
}

pub(crate) fn ints_at(name: &str, args: &[FactoryArg], index: usize) -> Result<Vec<usize>, GrammarError> {
    match args.get(index) {
        Some(FactoryArg::Ints(ns)) => Ok(ns.clone()),
        _ => Err(bad_args(
            name,
            format!("argument {} must be an index list", index),
        )),
    }
}

fn opt_value_at(args: &[FactoryArg], index: usize) -> Option<Value> {
    match args.get(index) {
        Some(FactoryArg::Str(s)) => Some(Value::Str(s.clone())),
        Some(FactoryArg::Char(c)) => Some(Value::Char(*c)),
        Some(FactoryArg::Int(n)) => Some(Value::Int(*n)),
        _ => Option::None,
    }
}

type BuiltinFn = fn(&[FactoryArg]) -> Result<Parser, GrammarError>;

fn build_fail(_args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::fail())
}

fn build_any_char(_args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::any_char())
}

fn build_range(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::range(
        char_at("range", args, 0)?,
        char_at("range", args, 1)?,
    ))
}

fn build_literal(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    let text = str_at("literal", args, 0)?;
    Ok(match opt_value_at(args, 1) {
        Some(v) => combinators::literal_with(&text, v),
        Option::None => combinators::literal(&text),
    })
}

fn build_literal_ic(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    let text = str_at("literal_ic", args, 0)?;
    Ok(match opt_value_at(args, 1) {
        Some(v) => combinators::literal_ic_with(&text, v),
        Option::None => combinators::literal_ic(&text),
    })
}

fn build_not_char(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::not_char(char_at("not_char", args, 0)?))
}

fn build_not_chars(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::not_chars(&str_at("not_chars", args, 0)?))
}

fn build_not(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    let inner = parser_at("not", args, 0)?;
    Ok(match opt_parser_at("not", args, 1)? {
        Some(otherwise) => combinators::not_else(inner, otherwise),
        Option::None => combinators::not(inner),
    })
}

fn build_optional(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::optional(parser_at("optional", args, 0)?))
}

fn build_copy_input(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::copy_input(parser_at("copy_input", args, 0)?))
}

fn build_lookahead(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::lookahead(parser_at("lookahead", args, 0)?))
}

fn build_repeat(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::repeat(
        parser_at("repeat", args, 0)?,
        opt_parser_at("repeat", args, 1)?,
        opt_count_at("repeat", args, 2)?.unwrap_or(0),
        opt_count_at("repeat", args, 3)?,
    ))
}

fn build_plus(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::plus(
        parser_at("plus", args, 0)?,
        opt_parser_at("plus", args, 1)?,
    ))
}

fn build_repeat0(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::repeat0(parser_at("repeat0", args, 0)?))
}

fn build_plus0(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::plus0(parser_at("plus0", args, 0)?))
}

fn build_seq(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::seq(parsers_from("seq", args, 0)?))
}

fn build_seq1(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::seq1(
        count_at("seq1", args, 0)?,
        parsers_from("seq1", args, 1)?,
    ))
}

fn build_pick(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::pick(
        ints_at("pick", args, 0)?,
        parser_at("pick", args, 1)?,
    ))
}

fn build_seq_even(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::seq_even(parsers_from("seq_even", args, 0)?))
}

fn build_text(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::text(parser_at("text", args, 0)?))
}

fn build_simple_alt(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::simple_alt(parsers_from("simple_alt", args, 0)?))
}

fn build_alt(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::alt(parsers_from("alt", args, 0)?))
}

fn build_sym(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::sym(&str_at("sym", args, 0)?))
}

fn build_no_skip(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::no_skip(parser_at("no_skip", args, 0)?))
}

fn build_traced(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::traced(parser_at("traced", args, 0)?))
}

fn build_quiet(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::quiet(parser_at("quiet", args, 0)?))
}

fn build_logged(args: &[FactoryArg]) -> Result<Parser, GrammarError> {
    Ok(combinators::logged(parser_at("logged", args, 0)?))
}

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("fail", build_fail),
    ("any_char", build_any_char),
    ("range", build_range),
    ("literal", build_literal),
    ("literal_ic", build_literal_ic),
    ("not_char", build_not_char),
    ("not_chars", build_not_chars),
    ("not", build_not),
    ("optional", build_optional),
    ("copy_input", build_copy_input),
    ("lookahead", build_lookahead),
    ("repeat", build_repeat),
    ("plus", build_plus),
    ("repeat0", build_repeat0),
    ("plus0", build_plus0),
    ("seq", build_seq),
    ("seq1", build_seq1),
    ("pick", build_pick),
    ("seq_even", build_seq_even),
    ("text", build_text),
    ("simple_alt", build_simple_alt),
    ("alt", build_alt),
    ("sym", build_sym),
    ("no_skip", build_no_skip),
    ("traced", build_traced),
    ("quiet", build_quiet),
    ("logged", build_logged),
];

/// The factory registry of one controller. Starts populated with every
/// built-in combinator; registrations replace silently, so controllers
/// and callers can specialize built-ins or add their own kinds (the
/// tokenizing controller registers its separator-aware combinators
/// here).
#[derive(Clone)]
pub struct FactoryTable {
    entries: HashMap<String, FactoryFn>,
}

impl FactoryTable {
    pub fn new() -> Self {
        let mut entries: HashMap<String, FactoryFn> = HashMap::new();
        for (name, builtin) in BUILTINS {
            entries.insert(name.to_string(), Rc::new(*builtin) as FactoryFn);
        }
        FactoryTable { entries }
    }

    pub fn register(&mut self, name: &str, factory: FactoryFn) {
        self.entries.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered factory names, sorted for stable display.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(&self, name: &str, args: &[FactoryArg]) -> Result<Parser, GrammarError> {
        let factory = self
            .entries
            .get(name)
            .ok_or_else(|| GrammarError::UnknownFactory {
                name: name.to_string(),
            })?;
        factory(args)
    }
}

impl Default for FactoryTable {
    fn default() -> Self {
        FactoryTable::new()
    }
}
