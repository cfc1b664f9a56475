//! End-to-end queries through the public engine API.

use plswipl_engine::{Engine, EngineConfig, EngineError, TermRef, TextMode};
use pretty_assertions::assert_eq;
use test_case::test_case;

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).unwrap()
}

/// Run `goal`, which mentions `X`, and collect every binding of `X` in
/// write form.
fn solutions(engine: &Engine, program: &str, goal: &str) -> Vec<String> {
    engine.consult(program).unwrap();
    engine.consult(&format!("answer(X) :- {goal}.")).unwrap();

    let frame = engine.open_frame();
    let args = engine.new_term_refs(1);
    let query = engine.open_query(&engine.predicate("answer", 1), args).unwrap();
    let mut found = Vec::new();
    while engine.next_solution(query).unwrap() {
        found.push(engine.get_text(args, TextMode::Write).unwrap().unwrap());
    }
    assert!(engine.exception(query).unwrap().is_none());
    engine.discard_frame(frame).unwrap();
    found
}

fn call1(engine: &Engine, name: &str) -> (bool, Option<String>, TermRef) {
    let args = engine.new_term_refs(1);
    let query = engine.open_query(&engine.predicate(name, 1), args).unwrap();
    let found = engine.next_solution(query).unwrap();
    let exception = engine
        .exception(query)
        .unwrap()
        .and_then(|e| e.describe());
    (found, exception, args)
}

#[test]
fn test_family_backtracking() {
    let engine = engine();
    let program = "\
parent(tom, bob).
parent(tom, liz).
parent(bob, ann).
grandparent(G, C) :- parent(G, P), parent(P, C).
";
    assert_eq!(
        solutions(&engine, program, "parent(tom, X)"),
        vec!["bob", "liz"]
    );
    assert_eq!(
        solutions(&engine, "", "grandparent(X, ann)"),
        vec!["tom"]
    );
}

#[test_case("findall(Y, member(Y, [c,a,b]), L), msort(L, X)", &["[a,b,c]"] ; "findall and msort")]
#[test_case("between(1, 3, X)", &["1", "2", "3"] ; "between enumerates")]
#[test_case("atom_codes(X, [0'h, 0'i])", &["hi"] ; "codes to atom")]
#[test_case("append(X, [c], [a,b,c])", &["[a,b]"] ; "append backwards")]
#[test_case("catch(throw(oops), E, X = caught(E))", &["caught(oops)"] ; "catch binds ball")]
#[test_case("( member(X, [1,2,3]), X > 1 -> true ; X = none )", &["2"] ; "if then else commits")]
#[test_case("atomic_list_concat([a,b,c], '-', X)", &["'a-b-c'"] ; "atomic list concat")]
#[test_case("X is 7 // 2 + 2 ** 3", &["11"] ; "mixed arithmetic")]
fn test_goal_solutions(goal: &str, expected: &[&str]) {
    let engine = engine();
    assert_eq!(solutions(&engine, "", goal), expected);
}

#[test]
fn test_uncaught_exception_is_reported() {
    let engine = engine();
    engine
        .consult("boom(X) :- X is foo + 1.")
        .unwrap();
    let (found, exception, _) = call1(&engine, "boom");
    assert!(!found);
    insta::assert_snapshot!(
        exception.unwrap(),
        @"error(type_error(evaluable,foo/0),_G0)"
    );
}

#[test]
fn test_runaway_recursion_hits_inference_limit() {
    let engine = Engine::new(EngineConfig {
        max_inferences: 50_000,
        ..EngineConfig::default()
    })
    .unwrap();
    engine
        .consult("spin(X) :- catch(loop, _, true), X = escaped.\nloop :- loop.")
        .unwrap();
    let (found, exception, _) = call1(&engine, "spin");
    assert!(!found);
    assert_eq!(
        exception.as_deref(),
        Some("error(resource_error(inferences),_G0)")
    );
}

#[test]
fn test_deterministic_recursion_runs_deep() {
    let engine = engine();
    engine
        .consult("count(0, done) :- !.\ncount(N, R) :- N1 is N - 1, count(N1, R).")
        .unwrap();
    let args = engine.new_term_refs(2);
    engine.put_integer(args, 200_000).unwrap();
    let query = engine.open_query(&engine.predicate("count", 2), args).unwrap();
    assert!(engine.next_solution(query).unwrap());
    assert_eq!(
        engine.get_text(args.offset(1), TextMode::Atomic).unwrap().as_deref(),
        Some("done")
    );
    engine.close_query(query).unwrap();
}

#[test]
fn test_compare_long_lists() {
    let engine = engine();
    let equal = solutions(
        &engine,
        "",
        "findall(I, between(1, 200000, I), L), findall(I, between(1, 200000, I), M), compare(X, L, M)",
    );
    assert_eq!(equal, vec!["="]);

    let longer = solutions(
        &engine,
        "",
        "findall(I, between(1, 200001, I), L), findall(I, between(1, 200000, I), M), compare(X, L, M)",
    );
    assert_eq!(longer, vec![">"]);
}

#[test]
fn test_long_addition_chain_evaluates() {
    let engine = engine();
    let found = solutions(
        &engine,
        "mk(0, 0) :- !.\nmk(N, E + 1) :- N1 is N - 1, mk(N1, E).",
        "mk(200000, E), X is E",
    );
    assert_eq!(found, vec!["200000"]);
}

#[test]
fn test_dynamic_database_survives_queries() {
    let engine = engine();
    engine
        .consult(":- dynamic seen/1.\nremember(X) :- assertz(seen(X)).")
        .unwrap();
    for word in ["a", "b"] {
        let args = engine.new_term_refs(1);
        engine.put_atom(args, word).unwrap();
        let query = engine
            .open_query(&engine.predicate("remember", 1), args)
            .unwrap();
        assert!(engine.next_solution(query).unwrap());
        engine.close_query(query).unwrap();
    }
    assert_eq!(
        solutions(&engine, "", "findall(S, seen(S), X)"),
        vec!["[a,b]"]
    );
}

#[test]
fn test_syntax_error_position() {
    let engine = engine();
    let err = engine.consult("ok(1).\n\nbroken(:- .").unwrap_err();
    assert!(matches!(err, EngineError::Syntax { line: 3, .. }));
}

proptest::proptest! {
    #[test]
    fn prop_integer_addition_is_checked(a in (i64::MIN + 1)..=i64::MAX, b in (i64::MIN + 1)..=i64::MAX) {
        let engine = engine();
        let found = solutions(
            &engine,
            "",
            &format!("catch(X is ({a}) + ({b}), error(E, _), X = E)"),
        );
        let expected = match a.checked_add(b) {
            Some(sum) => sum.to_string(),
            None => "evaluation_error(int_overflow)".to_string(),
        };
        proptest::prop_assert_eq!(found, vec![expected]);
    }
}
