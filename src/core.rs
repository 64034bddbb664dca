//! # Engine Contract
//!
//! The foundational types every other module builds on: the parse result
//! alias, the grammar-definition error enum, cache generation stamps, and
//! the [`Controller`] trait through which all combinator invocation flows.
//!
//! Two failure classes are kept strictly apart:
//!
//! - A *parse failure* is the expected outcome of a combinator not
//!   matching. It is a value (`Ok(None)`), never an error, and every
//!   combinator propagates it without raising.
//! - A *grammar-definition error* ([`GrammarError`]) is a programmer
//!   mistake, e.g. referencing an undefined rule. It is fatal and
//!   surfaces immediately through `Err`.

use std::rc::Rc;

use thiserror::Error;
use tracing::debug_span;

use crate::combinators::Parser;
use crate::controller::ControllerCore;
use crate::factory::FactoryArg;
use crate::stream::Cursor;
use crate::value::Value;

/// Name of the default start rule.
pub const START_RULE: &str = "START";

/// Name of the always-failing rule every grammar carries.
pub const FAIL_RULE: &str = "fail";

/// Result of applying one combinator: `Ok(Some(cursor))` on a match,
/// `Ok(None)` on a parse failure, `Err` on a malformed grammar.
pub type ParseResult = Result<Option<Cursor>, GrammarError>;

/// Fatal grammar-definition errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    /// `sym` referenced a rule name absent from the grammar table.
    #[error("unknown symbol <{name}> referenced during parse")]
    UnknownSymbol { name: String },

    /// `parse_string` was asked to start at a rule that does not exist.
    #[error("unknown start rule <{name}>")]
    UnknownStartRule { name: String },

    /// An action was attached to a rule that does not exist.
    #[error("cannot attach action to unknown rule <{name}>")]
    UnknownRule { name: String },

    /// `build` was asked for a factory that was never registered.
    #[error("unknown parser factory <{name}>")]
    UnknownFactory { name: String },

    /// A factory was invoked with an argument list it cannot interpret.
    #[error("factory <{name}> called with bad arguments: {detail}")]
    BadFactoryArgs { name: String, detail: String },
}

/// Stamp identifying the grammar snapshot a dispatch cache was built
/// against. The controller id keeps two controllers that happen to share
/// a parser node from trusting each other's cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    pub(crate) controller: u64,
    pub(crate) version: u64,
}

/// Outcome of a top-level parse.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// True iff the parse succeeded and consumed the entire input.
    pub complete: bool,
    /// The final semantic value, when the start rule matched at all.
    pub value: Option<Value>,
    /// The cursor the start rule stopped at, when it matched. Useful for
    /// inspecting partial matches when `complete` is false.
    pub cursor: Option<Cursor>,
}

/// Semantic action: `(parsed_value, value_before_the_rule) -> new_value`.
pub type ActionFn = Rc<dyn Fn(Value, Value) -> Value>;

/// The dispatch seam of the engine.
///
/// Combinators never invoke each other directly; every application goes
/// through [`Controller::run`] so furthest-position tracking and trace
/// instrumentation stay uniform, and so controller specializations can
/// interpose (the separator-skipping controller advances past skippable
/// input before each real invocation).
pub trait Controller {
    /// Shared controller state: grammar, factories, actions, counters.
    fn core(&self) -> &ControllerCore;

    fn core_mut(&mut self) -> &mut ControllerCore;

    /// Applies `parser` at `input`. This is the only way combinators are
    /// ever invoked.
    fn run(&self, parser: &Parser, input: &Cursor) -> ParseResult;

    /// Toggles separator skipping, returning the previous setting. The
    /// default controller has no skip machinery, so this is a no-op
    /// reporting `false`.
    fn set_skip(&self, _enabled: bool) -> bool {
        false
    }

    /// Parses `input` from the named start rule (default `"START"`),
    /// resetting the furthest-position counter first. The outcome is
    /// complete only when the whole input was consumed; a rule that
    /// matched a strict prefix still reports its value and cursor.
    fn parse_string(&self, input: &str, start: Option<&str>) -> Result<ParseOutcome, GrammarError> {
        let name = start.unwrap_or(START_RULE);
        let parser = self
            .core()
            .rule(name)
            .ok_or_else(|| GrammarError::UnknownStartRule {
                name: name.to_string(),
            })?;
        self.core().reset_furthest();

        let cursor = Cursor::for_input(input);
        let len = cursor.input_len();
        let span = debug_span!(target: "parser::dispatch", "parse_string", rule = name);
        let _guard = span.enter();

        let result = self.run(&parser, &cursor)?;
        Ok(match result {
            Some(end) => ParseOutcome {
                complete: end.pos() == len,
                value: Some(end.value()),
                cursor: Some(end),
            },
            None => ParseOutcome {
                complete: false,
                value: None,
                cursor: None,
            },
        })
    }

    /// Furthest position any non-speculative application reached during
    /// the last `parse_string`, for "failed near position N" diagnostics.
    fn furthest_pos(&self) -> Option<usize> {
        self.core().furthest_pos()
    }

    /// The current cache generation stamp.
    fn generation(&self) -> Generation {
        self.core().generation()
    }

    /// Forces alternation dispatch caches built against this controller
    /// to be discarded on next use.
    fn invalidate(&self) {
        self.core().invalidate();
    }

    /// Adds or replaces a grammar rule.
    fn add_rule(&mut self, name: &str, parser: Parser) {
        self.core_mut().add_rule(name, parser);
    }

    /// Attaches a semantic action to a named rule. Actions layer: each
    /// wraps the rule as it stands, previous actions included.
    fn add_action<F>(&mut self, rule: &str, action: F) -> Result<(), GrammarError>
    where
        F: Fn(Value, Value) -> Value + 'static,
        Self: Sized,
    {
        self.core_mut().add_action(rule, Rc::new(action))
    }

    /// Attaches several actions at once.
    fn add_actions<I>(&mut self, actions: I) -> Result<(), GrammarError>
    where
        I: IntoIterator<Item = (String, ActionFn)>,
        Self: Sized,
    {
        for (rule, action) in actions {
            self.core_mut().add_action(&rule, action)?;
        }
        Ok(())
    }

    /// Registers a combinator factory under `name`, replacing any
    /// previous registration.
    fn register_factory<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&[FactoryArg]) -> Result<Parser, GrammarError> + 'static,
        Self: Sized,
    {
        self.core_mut().register_factory(name, Rc::new(factory));
    }

    /// Instantiates a combinator through the factory table.
    fn build(&self, name: &str, args: &[FactoryArg]) -> Result<Parser, GrammarError> {
        self.core().build(name, args)
    }
}
