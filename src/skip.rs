//! # Separator Skipping
//!
//! [`SkipParserController`]: before each real combinator invocation the
//! cursor is advanced past a designated skip parser (whitespace,
//! comments), repeatedly, until it stops consuming. Speculative cursors
//! are never advanced, so alternation probes see the raw input. A
//! re-entrancy flag keeps the skip parser's own invocations from
//! triggering further skipping.
//!
//! Skipping happens between combinator invocations, not at token
//! boundaries. A rule that reads characters one at a time will therefore
//! skip *inside* what its author thinks of as one token; see
//! `test_skipping_glues_across_an_embedded_comment` for the reproducible
//! case. The tokenizing controller exists for grammars that need real
//! token boundaries.

use std::cell::Cell;

use tracing::warn;

use crate::combinators::{plus0, Parser};
use crate::controller::{dispatch, ControllerCore, Grammar};
use crate::core::{Controller, GrammarError, ParseResult};
use crate::lexical::whitespace;
use crate::stream::Cursor;

/// A controller that skips separator runs before every real combinator
/// invocation.
pub struct SkipParserController {
    core: ControllerCore,
    skip: Parser,
    enabled: Cell<bool>,
    skipping: Cell<bool>,
}

impl SkipParserController {
    pub fn new(grammar: Grammar, skip: impl Into<Parser>) -> Self {
        SkipParserController {
            core: ControllerCore::new(grammar),
            skip: skip.into(),
            enabled: Cell::new(true),
            skipping: Cell::new(false),
        }
    }

    /// Skips runs of plain whitespace.
    pub fn with_whitespace(grammar: Grammar) -> Self {
        SkipParserController::new(grammar, plus0(whitespace()))
    }

    pub fn skip_parser(&self) -> &Parser {
        &self.skip
    }

    /// Advances past separator runs until the skip parser fails. A
    /// zero-width match stops the loop, otherwise a skip parser built
    /// from `repeat0` would spin forever.
    fn skip_ahead(&self, input: &Cursor) -> Result<Cursor, GrammarError> {
        let mut here = input.clone();
        while let Some(next) = self.run(&self.skip, &here)? {
            if next.pos() == here.pos() {
                warn!(
                    target: "parser::skip",
                    pos = here.pos(),
                    parser = %self.skip,
                    "skip parser matched without consuming, stopping"
                );
                break;
            }
            here = next;
        }
        Ok(here)
    }
}

impl Controller for SkipParserController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ControllerCore {
        &mut self.core
    }

    fn set_skip(&self, enabled: bool) -> bool {
        self.enabled.replace(enabled)
    }

    fn run(&self, parser: &Parser, input: &Cursor) -> ParseResult {
        let mut here = input.clone();
        if self.enabled.get() && !self.skipping.get() && !here.is_speculative() {
            self.skipping.set(true);
            let advanced = self.skip_ahead(&here);
            self.skipping.set(false);
            here = advanced?;
        }
        dispatch(self, parser, &here)
    }
}
