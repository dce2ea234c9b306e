// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn round_trip(resp: Response) -> Response {
    let mut buf = Vec::new();
    write_response(&mut buf, &resp).unwrap();
    read_response(&mut buf.as_slice()).unwrap()
}

#[test]
fn ok_and_id_responses_round_trip() {
    assert_eq!(round_trip(Response::Ok { success: true }), Response::Ok { success: true });
    assert_eq!(round_trip(Response::Ok { success: false }), Response::Ok { success: false });
    assert_eq!(round_trip(Response::Id { id: 0 }), Response::Id { id: 0 });
    assert_eq!(round_trip(Response::Id { id: 42 }), Response::Id { id: 42 });
}

#[test]
fn string_response_round_trips() {
    let resp = Response::String { success: true, data: "36939.0".to_string() };
    assert_eq!(round_trip(resp.clone()), resp);

    let failed = Response::String { success: false, data: String::new() };
    assert_eq!(round_trip(failed.clone()), failed);
}

#[test]
fn mpir_success_round_trips_with_proctable() {
    let data = MpirData {
        id: 3,
        launcher_pid: 9182,
        job_id: 36939,
        step_id: 0,
        proctable: vec![
            ProcEntry { pid: 100, hostname: "nid00001".into(), executable: "/apps/a".into() },
            ProcEntry { pid: 101, hostname: "nid00001".into(), executable: "/apps/a".into() },
            ProcEntry { pid: 200, hostname: "nid00002".into(), executable: "/apps/b".into() },
        ],
    };
    assert_eq!(round_trip(Response::Mpir(Ok(data.clone()))), Response::Mpir(Ok(data)));
}

#[test]
fn mpir_failure_always_carries_a_diagnostic() {
    let resp = Response::Mpir(Err("Failed to start launcher with the provided arguments".into()));
    assert_eq!(round_trip(resp.clone()), resp);
}

#[test]
fn garbage_tag_is_rejected() {
    let buf = [0xffu8, 0, 0, 0];
    assert!(matches!(
        read_response(&mut buf.as_slice()),
        Err(ProtocolError::BadTag(0xff))
    ));
}
