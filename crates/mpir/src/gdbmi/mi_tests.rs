// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parser tests over canned gdb/MI output.

use yare::parameterized;

use super::*;

#[test]
fn done_with_value_parses() {
    let record = parse_record(r#"^done,value="4""#).unwrap();
    let MiRecord::Result { class, fields } = record else {
        panic!("expected result record");
    };
    assert_eq!(class, "done");
    assert_eq!(field(&fields, "value").unwrap().as_const(), Some("4"));
}

#[test]
fn pointer_value_with_embedded_string_parses() {
    let record = parse_record(r#"^done,value="0x601050 \"nid00001\"""#).unwrap();
    let MiRecord::Result { fields, .. } = record else {
        panic!("expected result record");
    };
    let value = field(&fields, "value").unwrap().as_const().unwrap();
    assert_eq!(value, r#"0x601050 "nid00001""#);
    assert_eq!(cstring_from_value(value).unwrap(), "nid00001");
}

#[test]
fn error_record_carries_message() {
    let record = parse_record(r#"^error,msg="No symbol \"MPIR_foo\" in current context.""#).unwrap();
    let MiRecord::Result { class, fields } = record else {
        panic!("expected result record");
    };
    assert_eq!(class, "error");
    assert_eq!(
        field(&fields, "msg").unwrap().as_const(),
        Some(r#"No symbol "MPIR_foo" in current context."#)
    );
}

#[test]
fn stopped_async_record_parses_nested_frame() {
    let line = r#"*stopped,reason="breakpoint-hit",disp="keep",bkptno="1",frame={addr="0x00000000004007f2",func="MPIR_Breakpoint",args=[],file="srun.c",line="112"},thread-id="1",stopped-threads="all""#;
    let record = parse_record(line).unwrap();
    let MiRecord::Async { class, fields } = record else {
        panic!("expected async record");
    };
    assert_eq!(class, "stopped");
    assert_eq!(field(&fields, "reason").unwrap().as_const(), Some("breakpoint-hit"));

    let frame = field(&fields, "frame").unwrap().as_tuple().unwrap();
    assert_eq!(field(frame, "func").unwrap().as_const(), Some("MPIR_Breakpoint"));
    assert_eq!(field(frame, "args").unwrap().as_list(), Some(&[][..]));
}

#[test]
fn thread_group_list_parses_pid() {
    let line = r#"^done,groups=[{id="i1",type="process",pid="9182",executable="/usr/bin/srun"}]"#;
    let MiRecord::Result { fields, .. } = parse_record(line).unwrap() else {
        panic!("expected result record");
    };
    let groups = field(&fields, "groups").unwrap().as_list().unwrap();
    let group = groups[0].as_tuple().unwrap();
    assert_eq!(field(group, "pid").unwrap().as_const(), Some("9182"));
}

#[test]
fn list_of_results_is_tolerated() {
    let line = r#"^done,bkpts=[bkpt={number="1"},bkpt={number="2"}]"#;
    let MiRecord::Result { fields, .. } = parse_record(line).unwrap() else {
        panic!("expected result record");
    };
    let items = field(&fields, "bkpts").unwrap().as_list().unwrap();
    assert_eq!(items.len(), 2);
}

#[parameterized(
    prompt = { "(gdb)" },
    prompt_trailing_space = { "(gdb) " },
)]
fn prompt_is_recognized(line: &str) {
    assert_eq!(parse_record(line).unwrap(), MiRecord::Prompt);
}

#[test]
fn stream_output_is_unescaped() {
    let record = parse_record(r#"~"Reading symbols from /usr/bin/srun...\n""#).unwrap();
    assert_eq!(record, MiRecord::Stream("Reading symbols from /usr/bin/srun...\n".to_string()));
}

#[test]
fn running_without_fields_parses() {
    let record = parse_record("^running").unwrap();
    assert_eq!(record, MiRecord::Result { class: "running".into(), fields: vec![] });
}

#[test]
fn token_prefix_is_skipped() {
    let record = parse_record("42^done").unwrap();
    assert_eq!(record, MiRecord::Result { class: "done".into(), fields: vec![] });
}

#[parameterized(
    plain = { "4", 4 },
    hex = { "0x1f", 31 },
    padded = { " 12 ", 12 },
)]
fn integers_parse(input: &str, expected: i64) {
    assert_eq!(int_from_value(input).unwrap(), expected);
}

#[test]
fn null_pointer_has_no_string() {
    assert!(cstring_from_value("0x0").is_err());
    assert!(int_from_value("nid00001").is_err());
}
