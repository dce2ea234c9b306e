// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use super::*;
use crate::control::StdioSpec;
use crate::mock::{Script, ScriptedControl};

fn spec() -> LaunchSpec {
    LaunchSpec {
        path: PathBuf::from("/usr/bin/srun"),
        argv: vec!["srun".into(), "-n4".into(), "./a.out".into()],
        env: vec![],
        stdio: StdioSpec::Inherit,
    }
}

fn supervisor() -> MpirSupervisor<ScriptedControl> {
    MpirSupervisor::new(ScriptedControl::new(Script::single_node("nid00001", 4)))
}

#[test]
fn launch_extracts_pid_job_ids_and_proctable() {
    let supervisor = supervisor();
    let result = supervisor.launch(7, spec()).unwrap();

    assert_eq!(result.id, 7);
    assert_eq!(result.launcher_pid, 4242);
    assert_eq!(result.job_id, 36939);
    assert_eq!(result.step_id, 0);
    assert_eq!(result.proctable.num_pes(), 4);
    assert!(supervisor.contains(7));
}

#[test]
fn reads_are_only_legal_while_stopped() {
    let supervisor = supervisor();
    supervisor.launch(1, spec()).unwrap();

    assert_eq!(supervisor.read_string(1, "totalview_jobid").unwrap(), "36939");

    supervisor.release(1).unwrap();
    assert!(matches!(
        supervisor.read_string(1, "totalview_jobid"),
        Err(MpirError::UnknownId(1))
    ));
}

#[test]
fn terminal_transitions_are_one_shot() {
    let supervisor = supervisor();
    supervisor.launch(1, spec()).unwrap();
    supervisor.release(1).unwrap();
    assert!(matches!(supervisor.release(1), Err(MpirError::UnknownId(1))));
    assert!(matches!(supervisor.terminate(1), Err(MpirError::UnknownId(1))));
}

#[test]
fn wait_reports_exit_success() {
    let supervisor = supervisor();
    supervisor.launch(1, spec()).unwrap();
    assert!(supervisor.wait(1).unwrap());
    assert!(!supervisor.contains(1));
}

#[test]
fn attach_uses_the_given_pid() {
    let supervisor = supervisor();
    let result = supervisor.attach(9, std::path::Path::new("/usr/bin/srun"), 555).unwrap();
    assert_eq!(result.launcher_pid, 555);
}

#[test]
fn launch_failure_registers_nothing() {
    let control = ScriptedControl::new(Script::single_node("nid00001", 2));
    control.fail_next_launches(1);
    let supervisor = MpirSupervisor::new(control);

    assert!(matches!(supervisor.launch(3, spec()), Err(MpirError::Launch(_))));
    assert!(!supervisor.contains(3));
}

#[test]
fn terminate_all_drains_every_inferior() {
    let supervisor = supervisor();
    supervisor.launch(1, spec()).unwrap();
    supervisor.launch(2, spec()).unwrap();
    supervisor.terminate_all();
    assert!(!supervisor.contains(1));
    assert!(!supervisor.contains(2));
}

#[test]
fn missing_totalview_vars_default_to_zero() {
    let mut script = Script::single_node("nid00001", 1);
    script.strings.clear();
    let supervisor = MpirSupervisor::new(ScriptedControl::new(script));
    let result = supervisor.launch(1, spec()).unwrap();
    assert_eq!(result.job_id, 0);
    assert_eq!(result.step_id, 0);
}
