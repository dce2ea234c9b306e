// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Id allocation and handle validity tests.

use super::*;

#[test]
fn idgen_starts_at_one_and_is_monotonic() {
    let gen = IdGen::new();
    let first = gen.next();
    assert_eq!(first, 1);

    let mut prev = first;
    for _ in 0..100 {
        let next = gen.next();
        assert!(next > prev, "ids must be strictly increasing");
        prev = next;
    }
}

#[test]
fn idgen_is_monotonic_across_threads() {
    use std::sync::Arc;

    let gen = Arc::new(IdGen::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let gen = Arc::clone(&gen);
        handles.push(std::thread::spawn(move || {
            (0..1000).map(|_| gen.next()).collect::<Vec<_>>()
        }));
    }

    let mut all: Vec<u64> = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }
    let count = all.len();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), count, "no id may be handed out twice");
}

#[test]
fn zero_is_the_invalid_handle() {
    assert!(!AppId::INVALID.is_valid_handle());
    assert!(!SessionId::new(0).is_valid_handle());
    assert!(ManifestId::new(1).is_valid_handle());
}

#[test]
fn ids_round_trip_through_raw() {
    let id = AppId::new(42);
    assert_eq!(AppId::from(id.raw()), id);
    assert_eq!(u64::from(id), 42);
    assert_eq!(id.to_string(), "42");
}
