// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level scenario tests: the staging contract exercised across
//! frontend, archive, and backend crates together.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use cti_fe::{Frontend, StdioFds};
use cti_wlm::mock::MockDriver;

struct Cluster {
    frontend: Frontend,
    driver: Arc<MockDriver>,
    src: tempfile::TempDir,
    _cfg: tempfile::TempDir,
    _install: tempfile::TempDir,
    _toolpath: tempfile::TempDir,
}

fn cluster() -> Cluster {
    let cfg = tempfile::tempdir().unwrap();
    let toolpath = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();

    let install = tempfile::tempdir().unwrap();
    let libexec = install.path().join("libexec");
    std::fs::create_dir(&libexec).unwrap();
    std::fs::write(libexec.join("ctidl"), b"#!/bin/sh\nexit 0\n").unwrap();

    let config = cti_core::Config {
        install_dir: Some(install.path().to_path_buf()),
        cfg_dir: cfg.path().to_path_buf(),
        log_dir: None,
        debug: false,
        launcher_name: None,
        wlm_override: None,
        launcher_script: false,
        launcher_wrapper: None,
        backend_wrapper: None,
        backend_tmpdir: None,
        container_instance: None,
    };

    let driver = Arc::new(MockDriver::new(&["nid00001", "nid00002"], 2, toolpath.path()));
    let frontend = Frontend::with_driver(config, Box::new(Arc::clone(&driver)));
    Cluster { frontend, driver, src, _cfg: cfg, _install: install, _toolpath: toolpath }
}

fn write_src(cluster: &Cluster, name: &str, contents: &[u8]) -> String {
    let path = cluster.src.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

fn write_daemon(cluster: &Cluster, name: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = cluster.src.path().join(name);
    std::fs::write(&path, b"#!/bin/sh\nexit 0\n").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

fn launch(cluster: &Cluster) -> cti_core::AppId {
    cluster
        .frontend
        .launch(&["./hello_mpi".to_string()], &[], StdioFds::default())
        .unwrap()
}

#[test]
fn ids_are_monotonic_across_every_registry() {
    let cluster = cluster();
    let app_a = launch(&cluster);
    let app_b = launch(&cluster);
    assert!(app_b.raw() > app_a.raw());

    let s1 = cluster.frontend.create_session(app_a).unwrap();
    let s2 = cluster.frontend.create_session(app_b).unwrap();
    assert!(s2.raw() > s1.raw());

    let m1 = cluster.frontend.create_manifest(s1).unwrap();
    let m2 = cluster.frontend.create_manifest(s2).unwrap();
    assert!(m2.raw() > m1.raw());
}

#[test]
fn deregistration_cascades_app_session_manifest() {
    let cluster = cluster();
    let app = launch(&cluster);
    let session = cluster.frontend.create_session(app).unwrap();
    let manifest = cluster.frontend.create_manifest(session).unwrap();

    cluster.frontend.deregister_app(app).unwrap();

    assert!(!cluster.frontend.app_is_valid(app));
    assert!(!cluster.frontend.session_is_valid(session));
    assert!(!cluster.frontend.manifest_is_valid(manifest));
}

#[test]
fn two_daemons_share_one_sandbox_without_reshipping() {
    let cluster = cluster();
    let app = launch(&cluster);
    let session_id = cluster.frontend.create_session(app).unwrap();
    let session = cluster.frontend.session(session_id).unwrap();

    let lib = write_src(&cluster, "libmessage.so", b"shared object payload");
    let one = write_daemon(&cluster, "one_socket");
    let two = write_daemon(&cluster, "two_socket");

    // First daemon brings the shared library along.
    let m1 = cluster.frontend.create_manifest(session_id).unwrap();
    cluster.frontend.add_manifest_library(m1, &lib).unwrap();
    cluster
        .frontend
        .exec_tool_daemon(m1, &one, &["addr".into(), "4433".into()], &[])
        .unwrap();

    // Second daemon in the same session: the library must not ship again.
    let m2 = cluster.frontend.create_manifest(session_id).unwrap();
    cluster.frontend.add_manifest_library(m2, &lib).unwrap();
    cluster
        .frontend
        .exec_tool_daemon(m2, &two, &["addr".into(), "4434".into()], &[])
        .unwrap();

    let events = cluster.driver.events.lock();
    let lib_ships = events
        .all_shipped_entries()
        .iter()
        .filter(|entry| entry.as_str() == "lib/libmessage.so")
        .count();
    assert_eq!(lib_ships, 1, "shared library shipped twice: {events:?}");

    let daemons: Vec<&str> =
        events.daemons.iter().map(|d| d.args[0].as_str()).collect();
    assert_eq!(daemons.len(), 2, "one launcher run per daemon");

    // Both manifests left arrival markers in the same sandbox.
    let locks = session.lock_files();
    assert_eq!(locks.len(), 2);
    assert!(locks.iter().all(|lock| lock.starts_with(session.root_dir())));
}

#[test]
fn collision_rejection_leaves_the_dedup_map_unchanged() {
    let cluster = cluster();
    let app = launch(&cluster);
    let session = cluster.frontend.create_session(app).unwrap();

    let a = cluster.src.path().join("a");
    let b = cluster.src.path().join("b");
    std::fs::create_dir_all(&a).unwrap();
    std::fs::create_dir_all(&b).unwrap();
    std::fs::write(a.join("foo"), b"from a").unwrap();
    std::fs::write(b.join("foo"), b"from b").unwrap();

    let m1 = cluster.frontend.create_manifest(session).unwrap();
    cluster
        .frontend
        .add_manifest_file(m1, &a.join("foo").to_string_lossy())
        .unwrap();
    cluster.frontend.send_manifest(m1).unwrap();

    // Same staged name, different canonical source: rejected.
    let m2 = cluster.frontend.create_manifest(session).unwrap();
    let err = cluster
        .frontend
        .add_manifest_file(m2, &b.join("foo").to_string_lossy())
        .unwrap_err();
    assert_eq!(err.kind(), cti_core::ErrorKind::Staging);

    // The original binding still resolves: re-adding the first source is
    // a no-op, so nothing new ships.
    cluster
        .frontend
        .add_manifest_file(m2, &a.join("foo").to_string_lossy())
        .unwrap();
    cluster.frontend.send_manifest(m2).unwrap();

    let events = cluster.driver.events.lock();
    let count = events
        .all_shipped_entries()
        .iter()
        .filter(|entry| entry.as_str() == "foo")
        .count();
    assert_eq!(count, 1);
}

#[test]
fn send_twice_fails_with_usage_error_and_kills_nothing() {
    let cluster = cluster();
    let app = launch(&cluster);
    let session = cluster.frontend.create_session(app).unwrap();
    let manifest = cluster.frontend.create_manifest(session).unwrap();
    let file = write_src(&cluster, "payload.cfg", b"x");
    cluster.frontend.add_manifest_file(manifest, &file).unwrap();

    cluster.frontend.send_manifest(manifest).unwrap();
    let err = cluster.frontend.send_manifest(manifest).unwrap_err();
    assert_eq!(err.kind(), cti_core::ErrorKind::Usage);
    assert!(cluster.driver.events.lock().signals.is_empty());
}

/// Staged control files survive the full trip: frontend writes them,
/// the archive carries them, the backend reads its node slice back.
#[test]
fn staged_layout_round_trips_through_the_sandbox() {
    let cluster = cluster();
    let app_id = launch(&cluster);
    let app = cluster.frontend.app(app_id).unwrap();
    let session_id = cluster.frontend.create_session(app_id).unwrap();
    let manifest = cluster.frontend.create_manifest(session_id).unwrap();

    // Capture the archive before the temp file disappears: stage it like
    // a compute node would.
    let sandbox = tempfile::tempdir().unwrap();
    let file = write_src(&cluster, "marker.cfg", b"1");
    cluster.frontend.add_manifest_file(manifest, &file).unwrap();

    // Rebuild the archive path from the app's control files directly.
    let control = app.job().placement();
    cluster.frontend.send_manifest(manifest).unwrap();

    // The frontend staged layout blobs locally; feed them to the backend
    // reader as ctidl's unpack would.
    let staged_dir = sandbox.path();
    for (name, local) in app.control_files() {
        std::fs::copy(local, staged_dir.join(name)).unwrap();
    }

    let slice = cti_be::pids::node_slice_from_layout(staged_dir, "nid00002").unwrap();
    assert_eq!(slice.first_pe, 2);
    assert_eq!(slice.num_pes(), 2);
    assert_eq!(
        slice.rank_pids,
        vec![(2, 1002), (3, 1003)],
        "backend view must match the frontend placement {control:?}"
    );
}
