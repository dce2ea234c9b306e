// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use super::*;

#[test]
fn shim_dir_lands_after_the_script_directory() {
    let spliced = splice_path(
        "/usr/local/bin:/opt/wrapper/bin:/usr/bin",
        Path::new("/opt/wrapper/bin"),
        Path::new("/tmp/shim.abc"),
    );
    assert_eq!(spliced, "/usr/local/bin:/opt/wrapper/bin:/tmp/shim.abc:/usr/bin");
}

#[test]
fn only_the_first_occurrence_is_spliced() {
    let spliced = splice_path(
        "/a:/a:/b",
        Path::new("/a"),
        Path::new("/shim"),
    );
    assert_eq!(spliced, "/a:/shim:/a:/b");
}

#[test]
fn missing_script_dir_falls_back_to_prepending() {
    let spliced = splice_path(
        "/usr/local/bin:/usr/bin",
        Path::new("/opt/elsewhere"),
        Path::new("/tmp/shim.abc"),
    );
    assert_eq!(spliced, "/tmp/shim.abc:/usr/local/bin:/usr/bin");
}

#[test]
fn empty_path_becomes_just_the_shim_dir() {
    let spliced = splice_path("", Path::new("/opt/x"), Path::new("/shim"));
    assert_eq!(spliced, "/shim");
}

#[test]
fn tokens_are_unique_and_argv_safe() {
    let a = new_token();
    let b = new_token();
    assert_ne!(a, b);
    assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn shim_bin_dir_creates_symlink_and_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let shim_binary = scratch.path().join("ctishim");
    std::fs::write(&shim_binary, b"#!/bin/sh\n").unwrap();

    let base = format!("{}/shim.", scratch.path().display());
    let dir_path = {
        let dir = ShimBinDir::create(&base, "tok123", &shim_binary, "srun").unwrap();
        let link = dir.path().join("srun");
        assert_eq!(std::fs::read_link(&link).unwrap(), shim_binary);
        dir.path().to_path_buf()
    };
    assert!(!dir_path.exists(), "shim dir must be removed on drop");
}
