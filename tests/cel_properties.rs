//! Property-based tests for the CEL parser (§8 "Testable Properties":
//! "Parser round-trip: parse(pretty_print(parse(s))) = parse(s)
//! structurally"). Generates small well-formed CEL predicates and checks
//! the round-trip invariant holds for all of them, rather than only the
//! handful of fixed examples in `src/cel/parser.rs`'s unit tests.

use proptest::prelude::*;

use siem_rules_engine::cel::parse;

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,6}".prop_map(|s| s.to_string())
}

fn property_path() -> impl Strategy<Value = String> {
    prop::collection::vec(ident(), 1..4).prop_map(|segs| segs.join("."))
}

fn string_literal() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _-]{0,10}".prop_map(|s| format!("\"{s}\""))
}

fn comparison_op() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("=="),
        Just("!="),
        Just("<"),
        Just("<="),
        Just(">"),
        Just(">="),
    ]
}

/// A single leaf predicate: `path <op> "literal"`.
fn leaf() -> impl Strategy<Value = String> {
    (property_path(), comparison_op(), string_literal())
        .prop_map(|(path, op, lit)| format!("{path} {op} {lit}"))
}

/// A small tree of leaves combined with `&&`/`||`, optionally negated
/// and parenthesized, matching the grammar in §4.1.
fn predicate() -> impl Strategy<Value = String> {
    let leaf_strategy = leaf();
    leaf_strategy.prop_recursive(3, 8, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|p| format!("!({p})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) && ({b})")),
            (inner.clone(), inner).prop_map(|(a, b)| format!("({a}) || ({b})")),
        ]
    })
}

proptest! {
    /// §8: `parse(pretty_print(parse(s))) = parse(s)` structurally, for
    /// any syntactically valid predicate the grammar accepts.
    #[test]
    fn parser_round_trips_structurally(src in predicate()) {
        let first = parse(&src).expect("generated predicate must parse");
        let printed = first.pretty_print();
        let second = parse(&printed).unwrap_or_else(|e| {
            panic!("pretty-printed output failed to re-parse: {printed:?}: {e}")
        });
        prop_assert_eq!(first, second);
    }

    /// Pretty-printing is itself idempotent on an already-printed AST:
    /// printing twice yields the same text.
    #[test]
    fn pretty_print_is_stable_under_reparsing(src in predicate()) {
        let ast = parse(&src).unwrap();
        let once = ast.pretty_print();
        let twice = parse(&once).unwrap().pretty_print();
        prop_assert_eq!(once, twice);
    }
}
