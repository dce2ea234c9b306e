// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-set teardown tests against real children.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::*;

fn spawn_sleeper() -> i32 {
    let child = Command::new("sleep")
        .arg("300")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    child.id() as i32
}

fn is_alive(pid: i32) -> bool {
    // After our own waitpid reaped it, kill() reports ESRCH.
    kill(Pid::from_raw(pid), None).is_ok()
}

#[test]
fn clear_terminates_members_in_parallel() {
    let mut set = ProcSet::new();
    let pids: Vec<i32> = (0..3).map(|_| spawn_sleeper()).collect();
    for pid in &pids {
        set.insert(*pid);
    }
    assert_eq!(set.len(), 3);

    let start = Instant::now();
    set.clear();
    // Each member costs one grace period; three must not serialize into
    // three.
    assert!(start.elapsed() < TERM_GRACE * 2, "teardown took {:?}", start.elapsed());

    assert!(set.is_empty());
    for pid in pids {
        assert!(!is_alive(pid), "pid {pid} survived clear()");
    }
}

#[test]
fn release_leaves_the_process_running() {
    let mut set = ProcSet::new();
    let pid = spawn_sleeper();
    set.insert(pid);
    set.release(pid);
    set.clear();

    assert!(is_alive(pid), "released pid must not be signalled");
    // Clean up the orphan.
    try_term_fast(pid);
}

#[test]
fn dropping_a_nonempty_set_tears_down() {
    let pid = spawn_sleeper();
    {
        let mut set = ProcSet::new();
        set.insert(pid);
    }
    assert!(!is_alive(pid), "drop must terminate members");
}

#[test]
fn try_term_on_a_dead_pid_is_quiet() {
    let pid = spawn_sleeper();
    try_term_fast(pid);
    // Second call sees ESRCH and returns immediately.
    let start = Instant::now();
    try_term(pid);
    assert!(start.elapsed() < Duration::from_millis(500));
}

fn try_term_fast(pid: i32) {
    let target = Pid::from_raw(pid);
    let _ = kill(target, Signal::SIGKILL);
    let _ = nix::sys::wait::waitpid(target, None);
}
