// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Layout/pid file codec tests, including the round-trip property.

use proptest::prelude::*;

use super::*;

fn node(host: &str, pes: i32, first: i32) -> NodeLayout {
    NodeLayout { hostname: host.to_string(), pes_here: pes, first_pe: first }
}

#[test]
fn layout_round_trip_preserves_every_field() {
    let nodes = vec![node("nid00001", 4, 0), node("nid00002", 2, 4), node("nid00003", 1, 6)];
    let mut buf = Vec::new();
    write_layout(&mut buf, &nodes).unwrap();

    let read = read_layout(&mut buf.as_slice()).unwrap();
    assert_eq!(read, nodes);
}

#[test]
fn layout_wire_size_is_fixed_per_record() {
    let nodes = vec![node("n1", 1, 0), node("n2", 1, 1)];
    let mut buf = Vec::new();
    write_layout(&mut buf, &nodes).unwrap();
    // 4-byte header + 2 × (9 + 4 + 4)
    assert_eq!(buf.len(), 4 + 2 * (LAYOUT_HOST_LEN + 8));
}

#[test]
fn hostname_at_buffer_limit_is_rejected() {
    // 8 bytes + NUL fits; 9 bytes does not.
    let ok = node("12345678", 1, 0);
    let mut buf = Vec::new();
    write_layout(&mut buf, std::slice::from_ref(&ok)).unwrap();

    let too_long = node("123456789", 1, 0);
    let err = write_layout(&mut Vec::new(), std::slice::from_ref(&too_long)).unwrap_err();
    assert!(matches!(err, LayoutError::HostnameTooLong(_)));
}

#[test]
fn truncated_layout_is_detected() {
    let nodes = vec![node("nid00001", 4, 0)];
    let mut buf = Vec::new();
    write_layout(&mut buf, &nodes).unwrap();
    buf.truncate(buf.len() - 3);
    assert!(matches!(read_layout(&mut buf.as_slice()), Err(LayoutError::Truncated)));
}

#[test]
fn pid_file_round_trips_in_rank_order() {
    let pids = vec![100, 101, 300, 301];
    let mut buf = Vec::new();
    write_pids(&mut buf, &pids).unwrap();
    assert_eq!(read_pids(&mut buf.as_slice()).unwrap(), pids);
}

#[test]
fn empty_files_round_trip() {
    let mut buf = Vec::new();
    write_layout(&mut buf, &[]).unwrap();
    assert!(read_layout(&mut buf.as_slice()).unwrap().is_empty());

    let mut buf = Vec::new();
    write_pids(&mut buf, &[]).unwrap();
    assert!(read_pids(&mut buf.as_slice()).unwrap().is_empty());
}

proptest! {
    #[test]
    fn layout_round_trip_holds_for_arbitrary_tables(
        hosts in proptest::collection::vec("[a-z][a-z0-9]{0,7}", 0..32),
    ) {
        let nodes: Vec<NodeLayout> = hosts
            .iter()
            .enumerate()
            .map(|(i, h)| node(h, (i % 8) as i32, (i * 4) as i32))
            .collect();
        let mut buf = Vec::new();
        write_layout(&mut buf, &nodes).unwrap();
        prop_assert_eq!(read_layout(&mut buf.as_slice()).unwrap(), nodes);
    }

    #[test]
    fn pid_round_trip_holds_for_arbitrary_pids(pids in proptest::collection::vec(1i32..1_000_000, 0..256)) {
        let mut buf = Vec::new();
        write_pids(&mut buf, &pids).unwrap();
        prop_assert_eq!(read_pids(&mut buf.as_slice()).unwrap(), pids);
    }
}
