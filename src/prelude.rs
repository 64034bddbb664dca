//! Everything grammar authoring needs in one import:
//! `use kumiki::prelude::*;`

pub use crate::combinators::{
    alt, any_char, copy_input, custom, fail, literal, literal_ic, literal_ic_with, literal_with,
    logged, lookahead, no_skip, not, not_char, not_chars, not_else, optional, pick, plus, plus0,
    quiet, range, repeat, repeat0, seq, seq1, seq_even, simple_alt, sym, text, traced, Kind, Label,
    Parser,
};
pub use crate::controller::{ControllerCore, Grammar, ParserController};
pub use crate::core::{
    ActionFn, Controller, FAIL_RULE, GrammarError, ParseOutcome, ParseResult, START_RULE,
};
pub use crate::factory::{FactoryArg, FactoryFn, FactoryTable};
pub use crate::lexical::{
    alpha_char, alpha_num_char, c_style_comment, digit_char, multiline_comment,
    single_line_comment, whitespace, word_char,
};
pub use crate::skip::SkipParserController;
pub use crate::stream::{Cursor, Trial};
pub use crate::token::{default_separator, TokenParserController};
pub use crate::value::Value;

// The authoring macros, so `seq!["a", sym("x")]` works off the prelude.
pub use crate::{alt, pick, seq, seq1, seq_even, simple_alt, tseq, tseq1};
