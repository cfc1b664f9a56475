//! Host calls through the bridge, end to end.

use std::io::Write;

use plswipl::{
    Bridge, BridgeConfig, BridgeError, CallContext, CallResult, Datum, EngineSettings,
    FunctionCallInfo, FunctionRecord, InMemoryCatalog, MultiCallContext, Oid, Row,
};
use test_case::test_case;

const ADD: Oid = Oid(100);
const ADD_WIDE: Oid = Oid(101);
const COUNT_TO: Oid = Oid(102);
const BROKEN: Oid = Oid(103);
const NEVER: Oid = Oid(104);
const DIVMOD: Oid = Oid(105);
const GREET: Oid = Oid(106);
const FAILS_LATE: Oid = Oid(107);
const LETTERS: Oid = Oid(108);

fn record(oid: Oid, name: &str, args: &[&str], ret: &str, source: &str) -> FunctionRecord {
    FunctionRecord {
        oid,
        name: name.to_string(),
        arg_types: args.iter().map(|a| a.to_string()).collect(),
        all_arg_types: None,
        arg_modes: None,
        return_type: ret.to_string(),
        returns_set: false,
        source: Some(source.to_string()),
    }
}

fn catalog() -> InMemoryCatalog {
    let add_source = "add(A, B, C) :- C is A + B.";
    let mut catalog = InMemoryCatalog::new();
    catalog.insert(record(ADD, "add", &["int4", "int4"], "int4", add_source));
    catalog.insert(record(ADD_WIDE, "add", &["int4", "int4"], "int8", add_source));
    catalog.insert(FunctionRecord {
        returns_set: true,
        ..record(
            COUNT_TO,
            "count_to",
            &["int4"],
            "int4",
            "count_to(N, X) :- between(1, N, X).",
        )
    });
    catalog.insert(record(
        BROKEN,
        "broken",
        &[],
        "int4",
        "broken(X) :- missing(X).",
    ));
    catalog.insert(record(NEVER, "never", &[], "int4", "never(_) :- fail."));
    catalog.insert(FunctionRecord {
        all_arg_types: Some(vec!["int4".into(), "int4".into(), "int4".into(), "int4".into()]),
        arg_modes: Some(vec!['i', 'i', 'o', 'o']),
        ..record(
            DIVMOD,
            "divmod",
            &["int4", "int4"],
            "void",
            "divmod(A, B, Q, R) :- Q is A // B, R is A mod B.",
        )
    });
    catalog.insert(record(
        GREET,
        "greet",
        &["text"],
        "text",
        "greet(Name, G) :- string_concat(\"hello, \", Name, G).",
    ));
    catalog.insert(FunctionRecord {
        returns_set: true,
        ..record(
            FAILS_LATE,
            "fails_late",
            &[],
            "int4",
            "fails_late(X) :- member(X, [1, 2]).\nfails_late(_) :- throw(late).",
        )
    });
    catalog.insert(FunctionRecord {
        returns_set: true,
        ..record(
            LETTERS,
            "letters",
            &[],
            "text",
            "letters(X) :- member(X, [\"a\", \"b\", \"c\"]).",
        )
    });
    catalog
}

fn bridge() -> Bridge {
    Bridge::new(&BridgeConfig::default(), catalog()).unwrap()
}

fn scalar(bridge: &Bridge, oid: Oid, args: Vec<Option<Datum>>) -> Result<Datum, BridgeError> {
    match bridge.handler(&FunctionCallInfo::new(oid, args), None)? {
        CallResult::Value(row) => Ok(row.value),
        other => panic!("expected a value, got {other:?}"),
    }
}

#[test_case(ADD, 2, 3 => Datum::Int4(5) ; "small sum")]
#[test_case(ADD_WIDE, 2147483647, 1 => Datum::Int8(2147483648) ; "wide return")]
#[test_case(ADD, -7, 7 => Datum::Int4(0) ; "negative")]
fn test_add(oid: Oid, a: i32, b: i32) -> Datum {
    let bridge = bridge();
    scalar(&bridge, oid, vec![Some(Datum::Int4(a)), Some(Datum::Int4(b))]).unwrap()
}

#[test]
fn test_add_overflow() {
    let bridge = bridge();
    let err = scalar(
        &bridge,
        ADD,
        vec![Some(Datum::Int4(i32::MAX)), Some(Datum::Int4(1))],
    )
    .unwrap_err();
    assert!(matches!(err, BridgeError::Overflow { value: 2147483648, .. }));
    assert_eq!(err.sqlstate(), "22003");
    assert_eq!(bridge.stats().open_frames, 0);
}

#[test]
fn test_scalar_call_leaves_nothing_open() {
    let bridge = bridge();
    scalar(&bridge, ADD, vec![Some(Datum::Int4(1)), Some(Datum::Int4(1))]).unwrap();
    let stats = bridge.stats();
    assert_eq!((stats.open_frames, stats.open_queries), (0, 0));
    assert_eq!(stats.frames_opened, stats.frames_discarded);
}

#[test]
fn test_null_argument_is_nil() {
    let bridge = bridge();
    let err = scalar(&bridge, ADD, vec![None, Some(Datum::Int4(1))]).unwrap_err();
    // [] + 1 is a type error inside the engine
    assert!(matches!(err, BridgeError::ForeignException { .. }));
}

#[test]
fn test_set_returning_rows_then_done() {
    let bridge = bridge();
    let fcinfo = FunctionCallInfo::new(COUNT_TO, vec![Some(Datum::Int4(3))]);
    let mut multi = MultiCallContext::new();

    let mut rows = Vec::new();
    loop {
        match bridge.handler(&fcinfo, Some(&mut multi)).unwrap() {
            CallResult::Next(row) => {
                // still open between rows
                assert_eq!(bridge.stats().open_queries, 1);
                rows.push(row.value);
            }
            CallResult::Done => break,
            CallResult::Value(_) => panic!("set-returning call produced a scalar"),
        }
    }

    assert_eq!(rows, vec![Datum::Int4(1), Datum::Int4(2), Datum::Int4(3)]);
    assert_eq!(multi.calls(), 4);
    let stats = bridge.stats();
    assert_eq!(stats.frames_discarded, 1);
    assert_eq!((stats.open_frames, stats.open_queries), (0, 0));
}

#[test]
fn test_abort_after_some_rows_releases_once() {
    let bridge = bridge();
    let fcinfo = FunctionCallInfo::new(COUNT_TO, vec![Some(Datum::Int4(10))]);
    let mut multi = MultiCallContext::new();
    for _ in 0..3 {
        assert!(matches!(
            bridge.handler(&fcinfo, Some(&mut multi)).unwrap(),
            CallResult::Next(_)
        ));
    }

    multi.reset();
    multi.reset();
    drop(multi);

    let stats = bridge.stats();
    assert_eq!(stats.frames_discarded, 1);
    assert_eq!(stats.queries_closed, 1);
    assert_eq!((stats.open_frames, stats.open_queries), (0, 0));
}

#[test]
fn test_error_mid_stream_keeps_delivered_rows() {
    let bridge = bridge();
    let fcinfo = FunctionCallInfo::new(FAILS_LATE, vec![]);
    let mut multi = MultiCallContext::new();

    let first = bridge.handler(&fcinfo, Some(&mut multi)).unwrap();
    let second = bridge.handler(&fcinfo, Some(&mut multi)).unwrap();
    let third = bridge.handler(&fcinfo, Some(&mut multi)).unwrap_err();

    pretty_assertions::assert_eq!(
        (first, second),
        (
            CallResult::Next(Row { value: Datum::Int4(1), outputs: vec![] }),
            CallResult::Next(Row { value: Datum::Int4(2), outputs: vec![] }),
        )
    );
    assert!(matches!(
        third,
        BridgeError::ForeignException { ref description, .. } if description == "late"
    ));
    assert_eq!(multi.state(), None);
    assert_eq!(bridge.stats().open_frames, 0);
}

fn next_value(bridge: &Bridge, fcinfo: &FunctionCallInfo, multi: &mut MultiCallContext) -> Option<Datum> {
    match bridge.handler(fcinfo, Some(multi)).unwrap() {
        CallResult::Next(row) => Some(row.value),
        CallResult::Done => None,
        CallResult::Value(_) => panic!("set-returning call produced a scalar"),
    }
}

fn text(s: &str) -> Option<Datum> {
    Some(Datum::Text(s.as_bytes().to_vec()))
}

#[test]
fn test_interleaved_set_returning_calls() {
    let bridge = bridge();
    let numbers = FunctionCallInfo::new(COUNT_TO, vec![Some(Datum::Int4(3))]);
    let letters = FunctionCallInfo::new(LETTERS, vec![]);
    let mut m1 = MultiCallContext::new();
    let mut m2 = MultiCallContext::new();

    assert_eq!(next_value(&bridge, &numbers, &mut m1), Some(Datum::Int4(1)));
    assert_eq!(next_value(&bridge, &letters, &mut m2), text("a"));

    // the outer invocation cannot step past the inner one and ends
    let err = bridge.handler(&numbers, Some(&mut m1)).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Engine(plswipl_engine::EngineError::QueryNotInnermost(_))
    ));
    assert_eq!(m1.state(), None);

    // its teardown leaves the inner invocation intact
    assert_eq!(next_value(&bridge, &letters, &mut m2), text("b"));
    assert_eq!(next_value(&bridge, &letters, &mut m2), text("c"));
    assert_eq!(next_value(&bridge, &letters, &mut m2), None);

    let stats = bridge.stats();
    assert_eq!((stats.open_frames, stats.open_queries), (0, 0));
    assert_eq!((stats.frames_opened, stats.frames_discarded), (2, 2));
}

#[test]
fn test_out_of_order_abort_keeps_other_invocation() {
    let bridge = bridge();
    let numbers = FunctionCallInfo::new(COUNT_TO, vec![Some(Datum::Int4(2))]);
    let letters = FunctionCallInfo::new(LETTERS, vec![]);
    let mut m1 = MultiCallContext::new();
    let mut m2 = MultiCallContext::new();

    assert_eq!(next_value(&bridge, &numbers, &mut m1), Some(Datum::Int4(1)));
    assert_eq!(next_value(&bridge, &letters, &mut m2), text("a"));

    m1.reset();
    assert_eq!(bridge.stats().open_frames, 1);

    let mut rest = Vec::new();
    while let Some(value) = next_value(&bridge, &letters, &mut m2) {
        rest.push(value);
    }
    assert_eq!(rest, vec![text("b").unwrap(), text("c").unwrap()]);

    // a fresh invocation of the aborted function starts from scratch
    let mut again = MultiCallContext::new();
    let mut rows = Vec::new();
    while let Some(value) = next_value(&bridge, &numbers, &mut again) {
        rows.push(value);
    }
    assert_eq!(rows, vec![Datum::Int4(1), Datum::Int4(2)]);

    let stats = bridge.stats();
    assert_eq!((stats.open_frames, stats.open_queries), (0, 0));
    assert_eq!(stats.frames_opened, stats.frames_discarded);
    assert_eq!(stats.queries_opened, stats.queries_closed);
}

#[test]
fn test_foreign_exception_on_first_step() {
    let bridge = bridge();
    let err = scalar(&bridge, BROKEN, vec![]).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"exception error(existence_error(procedure,missing/1),_G0)");
    assert_eq!(err.context(), Some("while calling PLSWIPL function broken"));
    assert_eq!(err.sqlstate(), "38000");

    let stats = bridge.stats();
    assert_eq!(stats.frames_discarded, 1);
    assert_eq!(stats.open_frames, 0);
}

#[test]
fn test_no_solution() {
    let bridge = bridge();
    let err = scalar(&bridge, NEVER, vec![]).unwrap_err();
    assert!(matches!(err, BridgeError::NoSolution(ref name) if name == "never"));
    assert_eq!(err.sqlstate(), "0A000");
}

#[test]
fn test_output_arguments() {
    let bridge = bridge();
    let result = bridge
        .handler(
            &FunctionCallInfo::new(DIVMOD, vec![Some(Datum::Int4(17)), Some(Datum::Int4(5))]),
            None,
        )
        .unwrap();
    pretty_assertions::assert_eq!(
        result,
        CallResult::Value(Row {
            value: Datum::Void,
            outputs: vec![(2, Datum::Int4(3)), (3, Datum::Int4(2))],
        })
    );
}

#[test]
fn test_text_in_server_encoding() {
    let config = BridgeConfig {
        server_encoding: "LATIN1".to_string(),
        ..BridgeConfig::default()
    };
    let bridge = Bridge::new(&config, catalog()).unwrap();
    let value = scalar(&bridge, GREET, vec![Some(Datum::Text(b"Ren\xe9".to_vec()))]).unwrap();
    assert_eq!(value, Datum::Text(b"hello, Ren\xe9".to_vec()));
}

#[test]
fn test_trigger_and_set_contexts() {
    let bridge = bridge();
    let mut trigger = FunctionCallInfo::new(ADD, vec![]);
    trigger.context = CallContext::Trigger;
    assert!(matches!(
        bridge.handler(&trigger, None),
        Err(BridgeError::TriggerNotSupported)
    ));

    let set = FunctionCallInfo::new(COUNT_TO, vec![Some(Datum::Int4(1))]);
    assert!(matches!(
        bridge.handler(&set, None),
        Err(BridgeError::SetNotAllowed)
    ));
}

#[test]
fn test_unknown_function() {
    let bridge = bridge();
    let err = scalar(&bridge, Oid(9999), vec![]).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"catalog lookup failed: cache lookup failed for function 9999");
}

#[test]
fn test_inline_blocks() {
    let bridge = bridge();
    bridge.execute_inline("X is 1 + 1, X == 2").unwrap();
    // plain failure is only a warning
    bridge.execute_inline("1 == 2").unwrap();

    let err = bridge.execute_inline("throw(oops)").unwrap_err();
    assert_eq!(err.context(), Some("while executing DO with PLSWIPL"));
    assert_eq!(bridge.stats().open_frames, 0);
}

#[test]
fn test_inline_block_can_define_facts() {
    let bridge = bridge();
    bridge
        .execute_inline("assertz(stored(42))")
        .unwrap();
    bridge
        .execute_inline("stored(X), X =:= 42")
        .unwrap();
}

#[test]
fn test_validate() {
    let mut catalog = catalog();
    catalog.insert(record(Oid(500), "bad", &[], "int4", "bad(X :- ."));
    let bridge = Bridge::new(&BridgeConfig::default(), catalog).unwrap();

    bridge.validate(ADD).unwrap();
    assert!(matches!(
        bridge.validate(Oid(500)),
        Err(BridgeError::Engine(_))
    ));
}

#[test]
fn test_library_files_are_loaded() {
    let mut library = tempfile::NamedTempFile::new().unwrap();
    writeln!(library, "double(X, Y) :- Y is X * 2.").unwrap();

    let config = BridgeConfig {
        engine: EngineSettings {
            library: vec![library.path().to_path_buf()],
            ..EngineSettings::default()
        },
        ..BridgeConfig::default()
    };
    let mut catalog = catalog();
    catalog.insert(record(
        Oid(600),
        "twice",
        &["int8"],
        "int8",
        "twice(X, Y) :- double(X, Y).",
    ));
    let bridge = Bridge::new(&config, catalog).unwrap();
    assert_eq!(
        scalar(&bridge, Oid(600), vec![Some(Datum::Int8(21))]).unwrap(),
        Datum::Int8(42)
    );
}
