//! # Parse Controllers
//!
//! The stateful side of the engine: the [`Grammar`] rule table, the
//! [`ControllerCore`] shared by every controller flavor, and the plain
//! [`ParserController`].
//!
//! All combinator invocation funnels through [`Controller::run`], which
//! for the plain controller is exactly [`dispatch`]: optional trace
//! output, the combinator application itself, then furthest-position
//! bookkeeping. Specialized controllers (separator skipping,
//! tokenizing) reuse `dispatch` and layer their behavior around it.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::combinators::{fail, Kind, Label, Parser};
use crate::core::{
    ActionFn, Controller, FAIL_RULE, Generation, GrammarError, ParseResult, START_RULE,
};
use crate::factory::{FactoryArg, FactoryFn, FactoryTable};
use crate::stream::Cursor;

/// A named-rule table. Always contains a start rule; until a real one is
/// installed it is the failing parser, so an empty grammar parses
/// nothing rather than erroring.
#[derive(Clone)]
pub struct Grammar {
    rules: HashMap<String, Parser>,
}

impl Grammar {
    pub fn new() -> Self {
        let mut rules = HashMap::new();
        rules.insert(START_RULE.to_string(), fail());
        rules.insert(FAIL_RULE.to_string(), fail());
        Grammar { rules }
    }

    /// Builder-style rule installation.
    pub fn rule(mut self, name: &str, parser: impl Into<Parser>) -> Self {
        self.insert(name, parser.into());
        self
    }

    pub fn insert(&mut self, name: &str, parser: Parser) {
        self.rules.insert(name.to_string(), parser);
    }

    pub fn get(&self, name: &str) -> Option<&Parser> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Rule names, sorted for stable display.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Grammar::new()
    }
}

// Controller identities feed the generation stamps of alternation
// caches; they only need to be distinct, hence a process-wide counter.
static CONTROLLER_IDS: AtomicU64 = AtomicU64::new(0);

/// State shared by every controller flavor: the grammar, the factory
/// table, and the per-parse counters.
pub struct ControllerCore {
    grammar: Grammar,
    factories: FactoryTable,
    actions: HashMap<String, Vec<ActionFn>>,
    id: u64,
    version: Cell<u64>,
    furthest: Cell<Option<usize>>,
    trace: Cell<bool>,
}

impl ControllerCore {
    pub fn new(grammar: Grammar) -> Self {
        ControllerCore {
            grammar,
            factories: FactoryTable::new(),
            actions: HashMap::new(),
            id: CONTROLLER_IDS.fetch_add(1, Ordering::Relaxed),
            version: Cell::new(0),
            furthest: Cell::new(None),
            trace: Cell::new(false),
        }
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn factories(&self) -> &FactoryTable {
        &self.factories
    }

    /// Looks up a rule body. Cloning the handle is cheap.
    pub fn rule(&self, name: &str) -> Option<Parser> {
        self.grammar.get(name).cloned()
    }

    /// Adds or replaces a rule. Any dispatch cache built against the old
    /// grammar is invalidated.
    pub fn add_rule(&mut self, name: &str, parser: Parser) {
        self.grammar.insert(name, parser);
        self.invalidate();
    }

    /// Wraps the named rule with a semantic action. Actions layer: the
    /// newest wraps the rule as it stands, previous actions included.
    pub fn add_action(&mut self, rule: &str, action: ActionFn) -> Result<(), GrammarError> {
        let inner = self
            .rule(rule)
            .ok_or_else(|| GrammarError::UnknownRule {
                name: rule.to_string(),
            })?;
        let wrapped = Parser::new(
            Label::new("action", vec![inner.name().to_string()]),
            Kind::Action {
                inner,
                action: action.clone(),
            },
        );
        self.grammar.insert(rule, wrapped);
        self.actions.entry(rule.to_string()).or_default().push(action);
        self.invalidate();
        Ok(())
    }

    /// Actions attached to `rule`, in registration order.
    pub fn rule_actions(&self, rule: &str) -> &[ActionFn] {
        self.actions.get(rule).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn register_factory(&mut self, name: &str, factory: FactoryFn) {
        self.factories.register(name, factory);
    }

    pub fn build(&self, name: &str, args: &[FactoryArg]) -> Result<Parser, GrammarError> {
        self.factories.build(name, args)
    }

    pub fn generation(&self) -> Generation {
        Generation {
            controller: self.id,
            version: self.version.get(),
        }
    }

    /// Bumps the generation so stale dispatch caches are discarded on
    /// next use.
    pub fn invalidate(&self) {
        self.version.set(self.version.get() + 1);
    }

    pub fn furthest_pos(&self) -> Option<usize> {
        self.furthest.get()
    }

    pub fn reset_furthest(&self) {
        self.furthest.set(None);
    }

    /// Records a position reached by a non-speculative match.
    pub fn note_pos(&self, pos: usize) {
        match self.furthest.get() {
            Some(best) if best >= pos => {}
            _ => self.furthest.set(Some(pos)),
        }
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace.get()
    }

    /// Toggles dispatch tracing, returning the previous setting.
    pub fn set_trace(&self, enabled: bool) -> bool {
        self.trace.replace(enabled)
    }
}

/// One combinator application: trace, apply, record progress. Every
/// controller's `run` goes through here so instrumentation stays uniform
/// no matter which flavor is driving. Speculative cursors never reach
/// the trace output or the furthest-position counter.
pub(crate) fn dispatch(ctl: &dyn Controller, parser: &Parser, input: &Cursor) -> ParseResult {
    let traced = ctl.core().trace_enabled() && !input.is_speculative();
    if traced {
        trace!(target: "parser::dispatch", pos = input.pos(), parser = %parser, "enter");
    }
    let ret = parser.apply(ctl, input)?;
    match &ret {
        Some(out) => {
            if !out.is_speculative() {
                ctl.core().note_pos(out.pos());
            }
            if traced {
                trace!(target: "parser::dispatch", pos = out.pos(), parser = %parser, matched = true, "exit");
            }
        }
        None => {
            if traced {
                trace!(target: "parser::dispatch", pos = input.pos(), parser = %parser, matched = false, "exit");
            }
        }
    }
    Ok(ret)
}

/// The plain controller: no separator handling, combinators see the raw
/// input.
pub struct ParserController {
    core: ControllerCore,
}

impl ParserController {
    pub fn new(grammar: Grammar) -> Self {
        ParserController {
            core: ControllerCore::new(grammar),
        }
    }
}

impl Controller for ParserController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ControllerCore {
        &mut self.core
    }

    fn run(&self, parser: &Parser, input: &Cursor) -> ParseResult {
        dispatch(self, parser, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::{literal, plus, range, sym, text};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn digits() -> Parser {
        text(plus(range('0', '9'), None))
    }

    #[test]
    fn test_empty_grammar_fails_instead_of_erroring() {
        let ctl = ParserController::new(Grammar::new());
        let outcome = ctl.parse_string("anything", None).unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.value, None);
    }

    #[test]
    fn test_every_grammar_carries_a_failing_rule() {
        assert!(Grammar::new().contains(FAIL_RULE));
        let ctl = ParserController::new(Grammar::new().rule(START_RULE, sym(FAIL_RULE)));
        let outcome = ctl.parse_string("anything", None).unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.value, None);
    }

    #[test]
    fn test_parse_string_reports_a_complete_match() {
        let ctl = ParserController::new(Grammar::new().rule(START_RULE, digits()));
        let outcome = ctl.parse_string("482", None).unwrap();
        assert!(outcome.complete);
        assert_eq!(outcome.value, Some(Value::Str("482".into())));
    }

    #[test]
    fn test_parse_string_reports_a_partial_match() {
        let ctl = ParserController::new(Grammar::new().rule("number", digits()));
        let outcome = ctl.parse_string("48a", Some("number")).unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.value, Some(Value::Str("48".into())));
        assert_eq!(outcome.cursor.map(|c| c.pos()), Some(2));
        assert_eq!(ctl.furthest_pos(), Some(2));
    }

    #[test]
    fn test_parse_string_rejects_an_unknown_start_rule() {
        let ctl = ParserController::new(Grammar::new());
        let err = ctl.parse_string("x", Some("missing")).unwrap_err();
        assert_eq!(
            err,
            GrammarError::UnknownStartRule {
                name: "missing".into()
            }
        );
    }

    #[test]
    fn test_speculative_runs_leave_no_trace() {
        let ctl = ParserController::new(Grammar::new());
        ctl.core().reset_furthest();
        let cur = Cursor::for_input("123").speculate();
        let out = ctl.run(&digits(), &cur).unwrap();
        assert_eq!(out.map(|c| c.pos()), Some(3));
        assert_eq!(ctl.furthest_pos(), None);
    }

    #[test]
    fn test_furthest_position_resets_per_parse() {
        let ctl = ParserController::new(Grammar::new().rule(START_RULE, digits()));
        ctl.parse_string("4821", None).unwrap();
        assert_eq!(ctl.furthest_pos(), Some(4));
        ctl.parse_string("x", None).unwrap();
        assert_eq!(ctl.furthest_pos(), None);
    }

    #[test]
    fn test_actions_layer_in_registration_order() {
        let mut ctl = ParserController::new(Grammar::new().rule(START_RULE, digits()));
        ctl.add_action(START_RULE, |v, _old| {
            Value::Str(format!("[{v}]"))
        })
        .unwrap();
        ctl.add_action(START_RULE, |v, _old| {
            Value::Str(format!("<{v}>"))
        })
        .unwrap();
        let outcome = ctl.parse_string("7", None).unwrap();
        assert_eq!(outcome.value, Some(Value::Str("<[7]>".into())));
    }

    #[test]
    fn test_action_on_a_missing_rule_is_rejected() {
        let mut ctl = ParserController::new(Grammar::new());
        let err = ctl
            .add_action("nope", |v, _| v)
            .unwrap_err();
        assert_eq!(
            err,
            GrammarError::UnknownRule {
                name: "nope".into()
            }
        );
    }

    #[test]
    fn test_actions_are_recorded_per_rule() {
        let mut ctl = ParserController::new(Grammar::new().rule(START_RULE, digits()));
        assert!(ctl.core().rule_actions(START_RULE).is_empty());
        ctl.add_action(START_RULE, |v, _| v).unwrap();
        ctl.add_action(START_RULE, |v, _| v).unwrap();
        assert_eq!(ctl.core().rule_actions(START_RULE).len(), 2);
    }

    #[test]
    fn test_rule_changes_and_invalidation_bump_the_generation() {
        let mut ctl = ParserController::new(Grammar::new());
        let before = ctl.generation();
        ctl.add_rule("x", literal("a"));
        let after_rule = ctl.generation();
        assert_ne!(before, after_rule);
        ctl.invalidate();
        assert_ne!(after_rule, ctl.generation());
    }

    #[test]
    fn test_generations_never_collide_across_controllers() {
        let a = ParserController::new(Grammar::new());
        let b = ParserController::new(Grammar::new());
        assert_ne!(a.generation(), b.generation());
    }

    #[test]
    fn test_factories_build_through_the_controller() {
        let mut ctl = ParserController::new(Grammar::new());
        let p = ctl.build("text", &[ctl.build("plus", &[
            ctl.build("range", &['0'.into(), '9'.into()]).unwrap().into(),
        ]).unwrap().into()]).unwrap();
        ctl.add_rule(START_RULE, p);
        let outcome = ctl.parse_string("19", None).unwrap();
        assert!(outcome.complete);
        assert_eq!(outcome.value, Some(Value::Str("19".into())));
    }
}
