// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Layout-blob fallback: write with the frontend codec, read back here.

use cti_core::layout::{self, NodeLayout};

use super::*;

fn stage_layout(dir: &Path) {
    let nodes = vec![
        NodeLayout { hostname: "nid00001".into(), pes_here: 2, first_pe: 0 },
        NodeLayout { hostname: "nid00002".into(), pes_here: 2, first_pe: 2 },
    ];
    let mut layout_file =
        std::fs::File::create(dir.join(layout::LAYOUT_FILE_NAME)).unwrap();
    layout::write_layout(&mut layout_file, &nodes).unwrap();

    let mut pid_file = std::fs::File::create(dir.join(layout::PID_FILE_NAME)).unwrap();
    layout::write_pids(&mut pid_file, &[2001, 2002, 3001, 3002]).unwrap();
}

#[test]
fn second_node_gets_its_slice_of_the_pe_space() {
    let dir = tempfile::tempdir().unwrap();
    stage_layout(dir.path());

    let slice = node_slice_from_layout(dir.path(), "nid00002").unwrap();
    assert_eq!(slice.first_pe, 2);
    assert_eq!(slice.num_pes(), 2);
    assert_eq!(slice.rank_pids, vec![(2, 3001), (3, 3002)]);
}

#[test]
fn first_node_starts_at_pe_zero() {
    let dir = tempfile::tempdir().unwrap();
    stage_layout(dir.path());

    let slice = node_slice_from_layout(dir.path(), "nid00001").unwrap();
    assert_eq!(slice.first_pe, 0);
    assert_eq!(slice.rank_pids, vec![(0, 2001), (1, 2002)]);
}

#[test]
fn unknown_hostname_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    stage_layout(dir.path());

    let err = node_slice_from_layout(dir.path(), "nid09999").unwrap_err();
    assert!(matches!(err, BeError::NodeNotInJob { .. }));
}

#[test]
fn missing_blobs_surface_as_io_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        node_slice_from_layout(dir.path(), "nid00001"),
        Err(BeError::Io(_))
    ));
}
