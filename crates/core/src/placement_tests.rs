// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn entry(rank: usize, host: &str, pid: i32, exe: &str) -> ProctableEntry {
    ProctableEntry {
        rank,
        hostname: host.to_string(),
        pid,
        executable: exe.to_string(),
    }
}

fn two_node_table() -> Proctable {
    Proctable::new(vec![
        entry(2, "nid00002", 300, "/apps/hello"),
        entry(0, "nid00001", 100, "/apps/hello"),
        entry(1, "nid00001", 101, "/apps/hello"),
        entry(3, "nid00002", 301, "/apps/world"),
    ])
    .unwrap()
}

#[test]
fn entries_are_sorted_by_rank() {
    let table = two_node_table();
    let ranks: Vec<usize> = table.entries().iter().map(|e| e.rank).collect();
    assert_eq!(ranks, vec![0, 1, 2, 3]);
    assert_eq!(table.num_pes(), 4);
}

#[test]
fn empty_proctable_is_rejected() {
    assert!(matches!(Proctable::new(vec![]), Err(PlacementError::Empty)));
}

#[test]
fn duplicate_rank_is_rejected() {
    let err = Proctable::new(vec![
        entry(0, "a", 1, "x"),
        entry(0, "b", 2, "x"),
    ])
    .unwrap_err();
    assert!(matches!(err, PlacementError::DuplicateRank(0)));
}

#[test]
fn gap_in_ranks_is_rejected() {
    let err = Proctable::new(vec![
        entry(0, "a", 1, "x"),
        entry(2, "b", 2, "x"),
    ])
    .unwrap_err();
    assert!(matches!(err, PlacementError::MissingRank(1)));
}

#[test]
fn placements_partition_every_rank_exactly_once() {
    let table = two_node_table();
    let placements = table.placements();
    assert_eq!(placements.len(), 2);

    let total: usize = placements.iter().map(|p| p.num_pes).sum();
    assert_eq!(total, table.num_pes());

    let mut all_ranks: Vec<usize> =
        placements.iter().flat_map(|p| p.pids.iter().map(|(r, _)| *r)).collect();
    all_ranks.sort_unstable();
    assert_eq!(all_ranks, vec![0, 1, 2, 3]);
}

#[test]
fn hosts_come_out_in_first_rank_order() {
    let table = two_node_table();
    assert_eq!(table.hostnames(), vec!["nid00001".to_string(), "nid00002".to_string()]);
    assert_eq!(table.num_hosts(), 2);
    assert_eq!(table.first_pe_on("nid00002"), Some(2));
    assert_eq!(table.first_pe_on("nid00009"), None);
}

#[test]
fn binary_rank_map_splits_mpmd_binaries() {
    let table = two_node_table();
    let map = table.binary_rank_map();
    assert_eq!(map.get("/apps/hello"), Some(&vec![0, 1, 2]));
    assert_eq!(map.get("/apps/world"), Some(&vec![3]));
}
