// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::unix::fs::PermissionsExt;

use serial_test::serial;

use super::*;

#[test]
#[serial]
fn bare_names_walk_path_in_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    for dir in [&first, &second] {
        let bin = dir.path().join("mytool");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let saved = std::env::var_os("PATH");
    std::env::set_var(
        "PATH",
        format!("{}:{}", first.path().display(), second.path().display()),
    );
    let found = find_executable("mytool");
    if let Some(saved) = saved {
        std::env::set_var("PATH", saved);
    }
    assert_eq!(found, Some(first.path().join("mytool")));
}

#[test]
#[serial]
fn non_executable_candidates_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("data");
    std::fs::write(&plain, b"not a program").unwrap();

    let saved = std::env::var_os("PATH");
    std::env::set_var("PATH", dir.path());
    let found = find_executable("data");
    if let Some(saved) = saved {
        std::env::set_var("PATH", saved);
    }
    assert_eq!(found, None);
}

#[test]
fn paths_with_separators_bypass_search() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("tool");
    std::fs::write(&bin, b"x").unwrap();

    assert_eq!(
        find_executable(&bin.to_string_lossy()),
        Some(bin.clone()),
        "absolute path should resolve without PATH"
    );
    assert_eq!(find_executable("/does/not/exist"), None);
}

#[test]
#[serial]
fn libraries_resolve_through_ld_library_path() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("libmessage.so");
    std::fs::write(&lib, b"\x7fELF").unwrap();

    let saved = std::env::var_os("LD_LIBRARY_PATH");
    std::env::set_var("LD_LIBRARY_PATH", dir.path());
    let found = find_library("libmessage.so");
    match saved {
        Some(saved) => std::env::set_var("LD_LIBRARY_PATH", saved),
        None => std::env::remove_var("LD_LIBRARY_PATH"),
    }
    assert_eq!(found, Some(lib));
}

#[test]
fn base_name_strips_directories() {
    assert_eq!(base_name(Path::new("/a/b/foo.so")), Some("foo.so".to_string()));
    assert_eq!(base_name(Path::new("foo")), Some("foo".to_string()));
    assert_eq!(base_name(Path::new("/")), None);
}
