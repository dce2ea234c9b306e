// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request-loop tests with a scripted inferior control: the MPIR protocol
//! paths without a debugger on the box.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use cti_helper::{HelperClient, Server};
use cti_mpir::mock::{Script, ScriptedControl};
use cti_wire::LaunchData;

/// Scripted job whose "launcher pid" is above the kernel's PID_MAX_LIMIT,
/// so cleanup signals can never reach a real process.
fn scripted(hostname: &str, num_pes: usize) -> Script {
    let mut script = Script::single_node(hostname, num_pes);
    script.launcher_pid = i32::MAX - 7;
    script
}

fn start(script: Script) -> (HelperClient, std::thread::JoinHandle<()>) {
    let (req_client, req_server) = UnixStream::pair().unwrap();
    let (resp_client, resp_server) = UnixStream::pair().unwrap();

    let handle = std::thread::spawn(move || {
        let server = Server::new(req_server, resp_server, ScriptedControl::new(script));
        server.run().expect("server loop");
    });

    let client = HelperClient::connect(req_client, resp_client).unwrap();
    (client, handle)
}

fn null_stdio() -> (std::fs::File, std::fs::File, std::fs::File) {
    (
        std::fs::File::open("/dev/null").unwrap(),
        std::fs::OpenOptions::new().write(true).open("/dev/null").unwrap(),
        std::fs::OpenOptions::new().write(true).open("/dev/null").unwrap(),
    )
}

fn sleep_launch() -> LaunchData {
    LaunchData {
        file: "sleep".to_string(),
        argv: vec!["sleep".into(), "30".into()],
        env: vec![],
        env_blacklist: vec![],
    }
}

#[test]
fn launch_mpir_returns_the_proctable() {
    let (client, handle) = start(scripted("nid00001", 4));

    let (i, o, e) = null_stdio();
    let mpir = client
        .launch_mpir(&sleep_launch(), [i.as_raw_fd(), o.as_raw_fd(), e.as_raw_fd()])
        .unwrap();

    assert_eq!(mpir.job_id, 36939);
    assert_eq!(mpir.step_id, 0);
    assert_eq!(mpir.proctable.len(), 4);
    assert!(mpir.proctable.iter().all(|entry| entry.hostname == "nid00001"));

    client.read_string_mpir(cti_core::DaemonId::new(mpir.id), "totalview_jobid").unwrap();
    client.release_mpir(cti_core::DaemonId::new(mpir.id)).unwrap();

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn read_after_release_is_a_clean_failure() {
    let (client, handle) = start(scripted("nid00001", 1));

    let (i, o, e) = null_stdio();
    let mpir = client
        .launch_mpir(&sleep_launch(), [i.as_raw_fd(), o.as_raw_fd(), e.as_raw_fd()])
        .unwrap();
    let id = cti_core::DaemonId::new(mpir.id);

    client.release_mpir(id).unwrap();
    assert!(client.read_string_mpir(id, "totalview_jobid").is_err());
    assert!(client.release_mpir(id).is_err(), "double release is rejected");

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn failed_mpir_launch_carries_a_diagnostic() {
    let script = scripted("nid00001", 1);
    let (req_client, req_server) = UnixStream::pair().unwrap();
    let (resp_client, resp_server) = UnixStream::pair().unwrap();

    let handle = std::thread::spawn(move || {
        let control = ScriptedControl::new(script);
        control.fail_next_launches(1);
        Server::new(req_server, resp_server, control).run().expect("server loop");
    });
    let client = HelperClient::connect(req_client, resp_client).unwrap();

    let (i, o, e) = null_stdio();
    let err = client
        .launch_mpir(&sleep_launch(), [i.as_raw_fd(), o.as_raw_fd(), e.as_raw_fd()])
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Failed to start launcher"), "diagnostic was: {message}");

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn unknown_launcher_binary_fails_cleanly() {
    let (client, handle) = start(scripted("nid00001", 1));

    let (i, o, e) = null_stdio();
    let launch = LaunchData {
        file: "no-such-launcher-zzz".to_string(),
        argv: vec!["no-such-launcher-zzz".into()],
        env: vec![],
        env_blacklist: vec![],
    };
    assert!(client
        .launch_mpir(&launch, [i.as_raw_fd(), o.as_raw_fd(), e.as_raw_fd()])
        .is_err());

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn wait_mpir_reports_clean_exit() {
    let (client, handle) = start(scripted("nid00001", 2));

    let (i, o, e) = null_stdio();
    let mpir = client
        .launch_mpir(&sleep_launch(), [i.as_raw_fd(), o.as_raw_fd(), e.as_raw_fd()])
        .unwrap();
    assert!(client.wait_mpir(cti_core::DaemonId::new(mpir.id)).unwrap());

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn disconnect_ends_the_loop() {
    let (client, handle) = start(scripted("nid00001", 1));
    client.suppress();
    drop(client);
    handle.join().unwrap();
}
