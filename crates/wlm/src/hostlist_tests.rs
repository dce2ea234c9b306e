// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::*;

#[test]
fn plain_names_pass_through() {
    assert_eq!(
        expand_hostlist("alpha,beta").unwrap(),
        vec!["alpha".to_string(), "beta".to_string()]
    );
}

#[test]
fn padded_ranges_expand_with_width() {
    assert_eq!(
        expand_hostlist("nid[00001-00003]").unwrap(),
        vec!["nid00001".to_string(), "nid00002".to_string(), "nid00003".to_string()]
    );
}

#[test]
fn mixed_ranges_and_singles_expand() {
    assert_eq!(
        expand_hostlist("nid[00001-00002,00007]").unwrap(),
        vec!["nid00001".to_string(), "nid00002".to_string(), "nid00007".to_string()]
    );
}

#[test]
fn multiple_bracketed_groups_expand() {
    assert_eq!(
        expand_hostlist("a[1-2],login,b[03-04]x").unwrap(),
        vec![
            "a1".to_string(),
            "a2".to_string(),
            "login".to_string(),
            "b03x".to_string(),
            "b04x".to_string(),
        ]
    );
}

#[parameterized(
    unterminated = { "nid[001" },
    reversed = { "nid[005-001]" },
    alpha_range = { "nid[aa-bb]" },
)]
fn malformed_lists_are_rejected(list: &str) {
    assert!(expand_hostlist(list).is_err(), "{list:?} should fail");
}

#[test]
fn empty_list_expands_to_nothing() {
    assert!(expand_hostlist("").unwrap().is_empty());
}
