// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use similar_asserts::assert_eq;

use super::*;

const TWO_NODE: &str = "\
Job step layout:
  4 tasks, 2 nodes (nid0000[1-2])

  Node 0 (nid00001), 2 task(s): 0 1
  Node 1 (nid00002), 2 task(s): 2 3
";

#[test]
fn two_node_layout_parses() {
    let layout = parse_step_layout(TWO_NODE, 0).unwrap();
    assert_eq!(layout.num_pes, 4);
    assert_eq!(layout.num_nodes(), 2);
    assert_eq!(
        layout.nodes,
        vec![
            NodeLayout { hostname: "nid00001".into(), pes_here: 2, first_pe: 0 },
            NodeLayout { hostname: "nid00002".into(), pes_here: 2, first_pe: 2 },
        ]
    );
}

#[test]
fn pe_offset_shifts_hetjob_components() {
    let layout = parse_step_layout(TWO_NODE, 16).unwrap();
    assert_eq!(layout.nodes[0].first_pe, 16);
    assert_eq!(layout.nodes[1].first_pe, 18);
}

#[test]
fn unexpected_banner_is_reported() {
    let err = parse_step_layout("sattach: error: Job step not found\n", 0).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("Unexpected layout output"), "got {text}");
}

#[test]
fn scattered_rank_lists_take_the_minimum_as_first_pe() {
    let cyclic = "\
Job step layout:
  4 tasks, 2 nodes (nid0000[1-2])

  Node 0 (nid00001), 2 task(s): 0 2
  Node 1 (nid00002), 2 task(s): 1 3
";
    let layout = parse_step_layout(cyclic, 0).unwrap();
    assert_eq!(layout.nodes[0].first_pe, 0);
    assert_eq!(layout.nodes[1].first_pe, 1);
}

#[test]
fn task_count_mismatch_is_detected() {
    let broken = "\
Job step layout:
  5 tasks, 2 nodes (nid0000[1-2])

  Node 0 (nid00001), 2 task(s): 0 1
  Node 1 (nid00002), 2 task(s): 2 3
";
    assert!(parse_step_layout(broken, 0).is_err());
}

#[test]
fn single_node_single_task_parses() {
    let single = "\
Job step layout:
  1 tasks, 1 nodes (login01)

  Node 0 (login01), 1 task(s): 0
";
    let layout = parse_step_layout(single, 0).unwrap();
    assert_eq!(layout.num_pes, 1);
    assert_eq!(layout.nodes[0].hostname, "login01");
}
