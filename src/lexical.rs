//! Lexical building blocks: character classes, whitespace and comment
//! parsers, all plain combinators. Grammars use them directly; the
//! tokenizing controller's default separator is built from
//! [`whitespace`] and [`c_style_comment`].

use crate::combinators::{
    alt, any_char, copy_input, literal, not_chars, not_else, range, repeat0, seq, simple_alt,
    Parser,
};

/// An ASCII letter.
pub fn alpha_char() -> Parser {
    alt(vec![range('a', 'z'), range('A', 'Z')])
}

/// An ASCII digit.
pub fn digit_char() -> Parser {
    range('0', '9')
}

/// An ASCII letter or digit.
pub fn alpha_num_char() -> Parser {
    alt(vec![alpha_char(), digit_char()])
}

/// An ASCII letter, digit or underscore.
pub fn word_char() -> Parser {
    alt(vec![alpha_num_char(), literal("_")])
}

/// One space, tab, newline, carriage return or form feed.
pub fn whitespace() -> Parser {
    alt(vec![
        literal(" "),
        literal("\t"),
        literal("\n"),
        literal("\r"),
        literal("\x0C"),
    ])
}

/// `// ...` up to (not including) the end of the line.
pub fn single_line_comment() -> Parser {
    copy_input(seq(vec![literal("//"), repeat0(not_chars("\r\n"))]))
}

/// `/* ... */`, non-nesting; the first `*/` terminates.
pub fn multiline_comment() -> Parser {
    copy_input(seq(vec![
        literal("/*"),
        repeat0(not_else(literal("*/"), any_char())),
        literal("*/"),
    ]))
}

/// Either comment style.
pub fn c_style_comment() -> Parser {
    simple_alt(vec![single_line_comment(), multiline_comment()])
}
