//! # Tokenizing
//!
//! [`TokenParserController`]: separators are part of the grammar's
//! structure instead of being skipped between invocations. The
//! token-aware combinators `tseq`, `tseq1`, `trepeat` and `tplus`
//! interleave the controller's separator parser after every element and
//! project the separator values back out, so rule results contain only
//! the tokens.
//!
//! At construction the grammar's start rule is rewritten: the original
//! body moves to a fresh name and `START` becomes "separator, then the
//! moved rule", projected to the moved rule's value. Leading separators
//! are consumed and the reported value is exactly the token structure.
//! [`Controller::add_rule`] on `START` is routed to the moved name so
//! the wrapper survives later rule changes.

use std::rc::Rc;

use crate::combinators::{alt, quiet, repeat0, seq, seq1, sym, Kind, Label, Parser};
use crate::controller::{dispatch, ControllerCore, Grammar};
use crate::core::{Controller, GrammarError, ParseResult, START_RULE};
use crate::factory::{self, FactoryArg};
use crate::lexical::{c_style_comment, whitespace};
use crate::stream::Cursor;

/// Separator used when none is supplied: runs of whitespace or C-style
/// comments, zero-width allowed, with tracing silenced while it matches.
pub fn default_separator() -> Parser {
    quiet(repeat0(alt(vec![whitespace(), c_style_comment()])))
}

fn interleave(separator: &Parser, parts: Vec<Parser>) -> Vec<Parser> {
    let mut out = Vec::with_capacity(parts.len() * 2);
    for part in parts {
        out.push(part);
        out.push(separator.clone());
    }
    out
}

/// `tseq(p1...pn)`: each part followed by a separator run; the value is the
/// sequence of part values only.
fn token_seq(separator: &Parser, parts: Vec<Parser>) -> Parser {
    let args: Vec<String> = parts.iter().map(|p| p.name().to_string()).collect();
    let interleaved = interleave(separator, parts);
    let indices: Vec<usize> = (0..interleaved.len()).step_by(2).collect();
    Parser::new(
        Label::new("tseq", args),
        Kind::Pick {
            indices,
            inner: seq(interleaved),
        },
    )
}

/// `tseq1(k, p1...pn)`: like `tseq`, valued as the `k`-th part alone.
fn token_seq1(separator: &Parser, index: usize, parts: Vec<Parser>) -> Parser {
    let mut args = vec![index.to_string()];
    args.extend(parts.iter().map(|p| p.name().to_string()));
    let interleaved = interleave(separator, parts);
    Parser::new(
        Label::new("tseq1", args),
        Kind::Nth {
            index: index * 2,
            inner: seq(interleaved),
        },
    )
}

fn token_repeat_named(
    name: &str,
    separator: &Parser,
    item: Parser,
    delimiter: Option<Parser>,
    min: usize,
    max: Option<usize>,
) -> Parser {
    let mut args = vec![item.name().to_string()];
    if let Some(d) = &delimiter {
        args.push(d.name().to_string());
    }
    // The item swallows a following separator run; a caller delimiter
    // does the same so `1 , 2` and `1,2` read alike.
    let unit = seq1(0, vec![item, separator.clone()]);
    let delimiter = delimiter.map(|d| seq(vec![d, separator.clone()]));
    Parser::new(
        Label::new(name, args),
        Kind::Repeat {
            item: unit,
            delimiter,
            min,
            max,
        },
    )
}

/// A controller whose combinators carry the separator structurally.
pub struct TokenParserController {
    core: ControllerCore,
    separator: Parser,
    moved_start: String,
}

impl TokenParserController {
    /// Uses [`default_separator`].
    pub fn new(grammar: Grammar) -> Self {
        TokenParserController::with_separator(grammar, default_separator())
    }

    pub fn with_separator(grammar: Grammar, separator: impl Into<Parser>) -> Self {
        let separator = separator.into();
        let mut core = ControllerCore::new(grammar);
        let moved_start = rewrite_start(&mut core, &separator);
        register_token_factories(&mut core, &separator);
        TokenParserController {
            core,
            separator,
            moved_start,
        }
    }

    pub fn separator(&self) -> &Parser {
        &self.separator
    }

    /// The name the original start-rule body was moved to.
    pub fn moved_start(&self) -> &str {
        &self.moved_start
    }

    pub fn tseq(&self, parts: impl IntoIterator<Item = Parser>) -> Parser {
        token_seq(&self.separator, parts.into_iter().collect())
    }

    pub fn tseq1(&self, index: usize, parts: impl IntoIterator<Item = Parser>) -> Parser {
        token_seq1(&self.separator, index, parts.into_iter().collect())
    }

    pub fn trepeat(
        &self,
        item: impl Into<Parser>,
        delimiter: Option<Parser>,
        min: usize,
        max: Option<usize>,
    ) -> Parser {
        token_repeat_named("trepeat", &self.separator, item.into(), delimiter, min, max)
    }

    pub fn tplus(&self, item: impl Into<Parser>, delimiter: Option<Parser>) -> Parser {
        token_repeat_named("tplus", &self.separator, item.into(), delimiter, 1, None)
    }
}

/// Moves the start-rule body to a fresh name (underscores appended until
/// free) and replaces `START` with "separator, then the moved rule",
/// valued as the moved rule alone.
fn rewrite_start(core: &mut ControllerCore, separator: &Parser) -> String {
    let body = core.rule(START_RULE).unwrap_or_else(crate::combinators::fail);
    let mut moved = format!("{START_RULE}_");
    while core.grammar().contains(&moved) {
        moved.push('_');
    }
    core.add_rule(&moved, body);
    core.add_rule(
        START_RULE,
        seq1(1, vec![separator.clone(), sym(&moved)]),
    );
    moved
}

fn register_token_factories(core: &mut ControllerCore, separator: &Parser) {
    let sep = separator.clone();
    core.register_factory(
        "tseq",
        Rc::new(move |args: &[FactoryArg]| -> Result<Parser, GrammarError> {
            Ok(token_seq(&sep, factory::parsers_from("tseq", args, 0)?))
        }),
    );

    let sep = separator.clone();
    core.register_factory(
        "tseq1",
        Rc::new(move |args: &[FactoryArg]| -> Result<Parser, GrammarError> {
            Ok(token_seq1(
                &sep,
                factory::count_at("tseq1", args, 0)?,
                factory::parsers_from("tseq1", args, 1)?,
            ))
        }),
    );

    let sep = separator.clone();
    core.register_factory(
        "trepeat",
        Rc::new(move |args: &[FactoryArg]| -> Result<Parser, GrammarError> {
            Ok(token_repeat_named(
                "trepeat",
                &sep,
                factory::parser_at("trepeat", args, 0)?,
                factory::opt_parser_at("trepeat", args, 1)?,
                factory::opt_count_at("trepeat", args, 2)?.unwrap_or(0),
                factory::opt_count_at("trepeat", args, 3)?,
            ))
        }),
    );

    let sep = separator.clone();
    core.register_factory(
        "tplus",
        Rc::new(move |args: &[FactoryArg]| -> Result<Parser, GrammarError> {
            Ok(token_repeat_named(
                "tplus",
                &sep,
                factory::parser_at("tplus", args, 0)?,
                factory::opt_parser_at("tplus", args, 1)?,
                1,
                None,
            ))
        }),
    );
}

impl Controller for TokenParserController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ControllerCore {
        &mut self.core
    }

    fn run(&self, parser: &Parser, input: &Cursor) -> ParseResult {
        dispatch(self, parser, input)
    }

    /// `START` is routed to the moved body so the separator wrapper
    /// installed at construction stays in place.
    fn add_rule(&mut self, name: &str, parser: Parser) {
        let name = if name == START_RULE {
            self.moved_start.clone()
        } else {
            name.to_string()
        };
        self.core.add_rule(&name, parser);
    }
}

/// `tseq` against a controller with element-wise coercion:
/// `tseq![tc; "foo", "bar"]`.
#[macro_export]
macro_rules! tseq {
    ($tc:expr; $($part:expr),+ $(,)?) => {
        $tc.tseq(vec![$($crate::combinators::Parser::from($part)),+])
    };
}

/// `tseq1` against a controller: `tseq1![tc; 1; "(", inner, ")"]`.
#[macro_export]
macro_rules! tseq1 {
    ($tc:expr; $index:expr; $($part:expr),+ $(,)?) => {
        $tc.tseq1($index, vec![$($crate::combinators::Parser::from($part)),+])
    };
}
