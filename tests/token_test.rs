use kumiki::prelude::*;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn number() -> Parser {
    text(plus(digit_char(), None))
}

fn str_value(s: &str) -> Value {
    Value::Str(s.to_string())
}

#[test]
fn it_tokenizes_with_interleaved_separators() {
    let mut tc = TokenParserController::new(Grammar::new());
    let rule = tc.tseq(vec![literal("foo"), literal("bar")]);
    tc.add_rule(START_RULE, rule);

    let outcome = tc.parse_string("  foo   bar", None).unwrap();
    debug!("{:?}", outcome);
    assert!(outcome.complete);
    assert_eq!(
        outcome.value,
        Some(Value::Seq(vec![str_value("foo"), str_value("bar")]))
    );
}

#[test]
fn it_parses_nested_token_lists() {
    let mut tc = TokenParserController::new(Grammar::new());
    let items = tc.trepeat(sym("item"), None, 0, None);
    let list = tc.tseq1(1, vec![literal("("), items, literal(")")]);
    tc.add_rule("item", alt(vec![sym("number"), sym("list")]));
    tc.add_rule("number", number());
    tc.add_rule("list", list);
    tc.add_rule(START_RULE, sym("list"));

    let outcome = tc.parse_string("( 1 ( 2 3 ) 47 )", None).unwrap();
    assert!(outcome.complete);
    assert_eq!(
        outcome.value,
        Some(Value::Seq(vec![
            str_value("1"),
            Value::Seq(vec![str_value("2"), str_value("3")]),
            str_value("47"),
        ]))
    );
}

#[test]
fn it_accepts_comments_anywhere_a_separator_fits() {
    let mut tc = TokenParserController::new(Grammar::new());
    let rule = tc.trepeat(number(), Some(literal(",")), 1, None);
    tc.add_rule(START_RULE, rule);

    let outcome = tc
        .parse_string("/* head */ 1, /* two */ 2, 3 // tail", None)
        .unwrap();
    assert!(outcome.complete);
    assert_eq!(
        outcome.value,
        Some(Value::Seq(vec![
            str_value("1"),
            str_value("2"),
            str_value("3")
        ]))
    );
}

#[test]
fn it_projects_a_single_token_out_of_a_sequence() {
    let mut tc = TokenParserController::new(Grammar::new());
    let rule = tc.tseq1(1, vec![literal("["), number(), literal("]")]);
    tc.add_rule(START_RULE, rule);

    let outcome = tc.parse_string(" [ 7 ] ", None).unwrap();
    assert!(outcome.complete);
    assert_eq!(outcome.value, Some(str_value("7")));
}

#[test]
fn it_parses_spaced_arithmetic_under_the_skip_controller() {
    let grammar = Grammar::new()
        .rule("number", number())
        .rule(
            "primary",
            alt(vec![
                sym("number"),
                seq1(1, vec![literal("("), sym("expr"), literal(")")]),
            ]),
        )
        .rule(
            "expr",
            seq(vec![
                sym("primary"),
                repeat(seq1(1, vec![literal("+"), sym("primary")]), None, 0, None),
            ]),
        )
        .rule(START_RULE, sym("expr"));
    let ctl = SkipParserController::with_whitespace(grammar);

    assert!(ctl.parse_string("1 + ( 2 + 30 ) + 4", None).unwrap().complete);
    assert!(ctl.parse_string("1+(2+30)+4", None).unwrap().complete);
    assert!(!ctl.parse_string("1 + ( 2 + ", None).unwrap().complete);
}

#[test]
fn it_reports_how_far_a_failing_parse_got() {
    let mut tc = TokenParserController::new(Grammar::new());
    let rule = tc.tseq(vec![literal("let"), sym("name"), literal("=")]);
    tc.add_rule("name", text(plus(alpha_char(), None)));
    tc.add_rule(START_RULE, rule);

    let outcome = tc.parse_string("let answer :", None).unwrap();
    assert!(!outcome.complete);
    // "let answer " parsed before "=" was expected.
    assert_eq!(tc.furthest_pos(), Some(11));
}
