// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::process::{Command, Stdio};

use nix::sys::signal::kill;
use nix::unistd::Pid;

use super::*;

fn spawn_sleeper() -> i32 {
    Command::new("sleep")
        .arg("300")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
        .id() as i32
}

fn reap(pid: i32) {
    let target = Pid::from_raw(pid);
    let _ = kill(target, nix::sys::signal::Signal::SIGKILL);
    let _ = nix::sys::wait::waitpid(target, None);
}

fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

#[test]
fn ids_are_monotonic_and_pid_zero_registers() {
    let mut state = HelperState::new();
    let a = state.register_app(0).unwrap();
    let b = state.register_app(0).unwrap();
    assert!(b > a);
    assert!(state.check_app(a).unwrap(), "remote-only app is presumed alive");
}

#[test]
fn duplicate_app_pid_is_rejected() {
    let mut state = HelperState::new();
    let pid = spawn_sleeper();
    state.register_app(pid).unwrap();
    assert!(matches!(state.register_app(pid), Err(HelperError::DuplicatePid(_))));
    reap(pid);
}

#[test]
fn util_registration_requires_a_known_app() {
    let mut state = HelperState::new();
    assert!(matches!(state.register_util(99, 123), Err(HelperError::InvalidId(99))));

    let id = state.register_app(0).unwrap();
    assert!(matches!(state.register_util(id, 0), Err(HelperError::InvalidUtilPid(0))));
}

#[test]
fn deregister_terminates_app_and_utils() {
    let mut state = HelperState::new();
    let app_pid = spawn_sleeper();
    let util_pid = spawn_sleeper();

    let id = state.register_launched_app(app_pid).unwrap();
    state.register_util(id, util_pid).unwrap();
    assert_eq!(state.cleanup_count(), 1);

    state.deregister_app(id).unwrap();
    assert!(!is_alive(app_pid), "app must be terminated");
    assert!(!is_alive(util_pid), "utils must be terminated");
    assert_eq!(state.cleanup_count(), 0);
    assert!(matches!(state.check_app(id), Err(HelperError::InvalidId(_))));
}

#[test]
fn release_spares_the_app_but_not_utils() {
    let mut state = HelperState::new();
    let app_pid = spawn_sleeper();
    let util_pid = spawn_sleeper();

    let id = state.register_launched_app(app_pid).unwrap();
    state.register_util(id, util_pid).unwrap();
    state.release_app(id).unwrap();

    assert!(is_alive(app_pid), "released app must keep running");
    assert!(!is_alive(util_pid), "utils die on release");
    reap(app_pid);
}

#[test]
fn child_exit_clears_cleanup_and_returns_utils() {
    let mut state = HelperState::new();
    let app_pid = spawn_sleeper();
    let util_pid = spawn_sleeper();

    let id = state.register_launched_app(app_pid).unwrap();
    state.register_util(id, util_pid).unwrap();

    let mut utils = state.on_child_exit(app_pid).unwrap();
    assert_eq!(state.cleanup_count(), 0);
    utils.clear();
    assert!(!is_alive(util_pid));
    reap(app_pid);
}

#[test]
fn check_app_sees_dead_processes() {
    let mut state = HelperState::new();
    let pid = spawn_sleeper();
    let id = state.register_app(pid).unwrap();
    assert!(state.check_app(id).unwrap());

    reap(pid);
    assert!(!state.check_app(id).unwrap());
}

#[test]
fn clear_all_empties_every_set() {
    let mut state = HelperState::new();
    let a = spawn_sleeper();
    let b = spawn_sleeper();
    let id = state.register_launched_app(a).unwrap();
    state.register_util(id, b).unwrap();

    state.clear_all();
    assert!(!is_alive(a));
    assert!(!is_alive(b));
    assert_eq!(state.cleanup_count(), 0);
}
