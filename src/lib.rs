//! # Kumiki: Parser Combinator Engine
//!
//! Kumiki builds recursive-descent parsers from small combinators, with
//! longest-match alternation, grammar tables supporting forward
//! references, and controllers that make separator handling a property
//! of the parse rather than of every rule.
//!
//! ## Architecture
//!
//! ### 1. Streams
//! Immutable cursors over char-indexed input ([`stream`]): concrete
//! cursors memoize their successor so equal positions share one chain,
//! speculative copies explore without committing, and trial cursors
//! answer single-element "does it consume?" probes.
//!
//! ### 2. Combinators
//! The parsing algebra ([`combinators`]): literals, ranges, sequencing
//! and projection, repetition, negation, lookahead, and two alternation
//! strategies ([`combinators::simple_alt`], [`combinators::alt`]) that
//! must agree on results, the latter amortizing alternative selection
//! through a per-leading-character cache.
//!
//! ### 3. Controllers
//! Dispatch and state ([`core`], [`controller`]): every combinator
//! invocation flows through [`Controller::run`], which keeps
//! furthest-position diagnostics and tracing uniform. Two
//! specializations handle separators: [`skip`] advances past them
//! between invocations, [`token`] weaves them into rule structure.
//!
//! ### 4. Grammar layers
//! Lexical primitives ([`lexical`]), loosely-typed combinator
//! construction through the factory table ([`factory`]), and semantic
//! values ([`value`]).
//!
//! ## Example
//!
//! ```
//! use kumiki::prelude::*;
//!
//! let number = text(plus(digit_char(), None));
//! let ctl = ParserController::new(Grammar::new().rule(START_RULE, number));
//!
//! let outcome = ctl.parse_string("482", None)?;
//! assert!(outcome.complete);
//! assert_eq!(outcome.value, Some(Value::Str("482".into())));
//! # Ok::<(), kumiki::GrammarError>(())
//! ```

pub mod combinators;
pub mod controller;
pub mod core;
pub mod factory;
pub mod lexical;
pub mod prelude;
pub mod skip;
pub mod stream;
pub mod token;
pub mod value;

// Re-exports
pub use crate::combinators::{Kind, Label, Parser};
pub use crate::controller::{Grammar, ParserController};
pub use crate::core::*;
pub use crate::skip::SkipParserController;
pub use crate::token::TokenParserController;
pub use crate::value::Value;
