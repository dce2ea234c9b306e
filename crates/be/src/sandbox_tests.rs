// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use super::*;

/// Build a small archive the way the frontend does.
fn make_archive(dir: &Path) -> std::path::PathBuf {
    let payload = dir.join("payload");
    std::fs::create_dir_all(&payload).unwrap();
    let tool = payload.join("tool");
    std::fs::write(&tool, b"#!/bin/sh\nexit 0\n").unwrap();
    let mut perms = std::fs::metadata(&tool).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&tool, perms).unwrap();
    std::fs::write(payload.join("tool.cfg"), b"x=1\n").unwrap();

    let archive_path = dir.join("pkg.tar");
    let file = std::fs::File::create(&archive_path).unwrap();
    let mut builder = tar::Builder::new(file);
    builder.append_path_with_name(&tool, "bin/tool").unwrap();
    builder.append_path_with_name(payload.join("tool.cfg"), "tool.cfg").unwrap();
    builder.finish().unwrap();
    archive_path
}

#[test]
fn unpack_creates_layout_and_arrival_marker() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = make_archive(scratch.path());
    let root = scratch.path().join("sandbox");

    unpack(&root, &archive, 4).unwrap();

    assert!(root.join("bin/tool").is_file());
    assert!(root.join("tool.cfg").is_file());
    assert!(root.join("tmp").is_dir());
    assert!(manifest_arrived(&root, 4));
    assert!(!manifest_arrived(&root, 5));

    let mode = std::fs::metadata(root.join("bin/tool")).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0o111, "executable bit must survive");
}

#[test]
fn unpack_tolerates_reships() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = make_archive(scratch.path());
    let root = scratch.path().join("sandbox");

    unpack(&root, &archive, 1).unwrap();
    unpack(&root, &archive, 2).unwrap();
    assert!(manifest_arrived(&root, 1));
    assert!(manifest_arrived(&root, 2));
}

#[test]
fn wait_for_manifest_observes_late_arrival() {
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("sandbox");
    std::fs::create_dir_all(&root).unwrap();

    let waiter = {
        let root = root.clone();
        std::thread::spawn(move || wait_for_manifest(&root, 9, Duration::from_secs(5)))
    };
    std::thread::sleep(Duration::from_millis(300));
    std::fs::write(lock_file_path(&root, 9), b"").unwrap();
    waiter.join().unwrap().unwrap();
}

#[test]
fn wait_for_manifest_times_out() {
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("sandbox");
    std::fs::create_dir_all(&root).unwrap();
    assert!(wait_for_manifest(&root, 1, Duration::from_millis(300)).is_err());
}

#[test]
fn cleanup_terminates_recorded_daemons_and_removes_root() {
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("sandbox");
    std::fs::create_dir_all(&root).unwrap();

    let child = std::process::Command::new("sleep")
        .arg("300")
        .spawn()
        .unwrap();
    let pid = child.id() as i32;
    record_daemon_pid(&root, pid).unwrap();
    assert_eq!(recorded_daemon_pids(&root), vec![pid]);

    cleanup(&root, Duration::from_secs(2)).unwrap();
    assert!(!root.exists());

    // sleep dies on SIGTERM; reap and confirm.
    let status = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(pid), None).unwrap();
    assert!(matches!(status, nix::sys::wait::WaitStatus::Signaled(_, Signal::SIGTERM, _)));
}

#[test]
fn cleanup_of_an_empty_sandbox_just_removes_it() {
    let scratch = tempfile::tempdir().unwrap();
    let root = scratch.path().join("sandbox");
    std::fs::create_dir_all(&root).unwrap();
    cleanup(&root, Duration::from_millis(100)).unwrap();
    assert!(!root.exists());
}
