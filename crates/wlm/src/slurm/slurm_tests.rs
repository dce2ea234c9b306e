// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::*;

#[parameterized(
    signal_form = { "scancel: Signal 15 to step 36939.0\n", true },
    terminating_form = { "scancel: Terminating step 36939.0\n", true },
    error_form = { "scancel: error: No job found\n", false },
    empty = { "", false },
)]
fn scancel_delivery_detection(output: &str, delivered: bool) {
    assert_eq!(scancel_output_reports_delivery(output), delivered);
}

#[test]
fn scancel_detection_accepts_both_forms_in_one_stream() {
    let mixed = "scancel: error: something odd\nscancel: Signal 9 to step 1.0\n";
    assert!(scancel_output_reports_delivery(mixed));
}

#[parameterized(
    inline = { &["-n4".to_string(), "--gres=gpu:2".to_string()], Some("gpu:2") },
    separate = { &["--gres".to_string(), "craynetwork:0".to_string()], Some("craynetwork:0") },
    absent = { &["-n4".to_string(), "./a.out".to_string()], None },
)]
fn gres_propagation(args: &[String], expected: Option<&str>) {
    assert_eq!(find_gres_setting(args).as_deref(), expected);
}

#[test]
fn daemon_argv_covers_every_het_component() {
    let job = test_job(vec![
        (
            "36939.0".to_string(),
            StepLayout {
                num_pes: 2,
                nodes: vec![
                    cti_core::NodeLayout { hostname: "nid00001".into(), pes_here: 1, first_pe: 0 },
                    cti_core::NodeLayout { hostname: "nid00002".into(), pes_here: 1, first_pe: 1 },
                ],
            },
        ),
        (
            "36939+1.0".to_string(),
            StepLayout {
                num_pes: 1,
                nodes: vec![cti_core::NodeLayout {
                    hostname: "nid00003".into(),
                    pes_here: 1,
                    first_pe: 2,
                }],
            },
        ),
    ]);

    let argv = job.daemon_launcher_argv(&["/tmp/ctidl".to_string(), "--root".to_string()]);
    let joined = argv.join(" ");

    assert!(joined.starts_with("srun --output=none"));
    assert!(joined.contains("--jobid=36939 "), "{joined}");
    assert!(joined.contains("--jobid=36939+1"), "{joined}");
    assert!(joined.contains("--nodelist=nid00001,nid00002"), "{joined}");
    assert!(joined.contains("--nodelist=nid00003"), "{joined}");
    assert!(joined.contains(" : "), "hetjob components separated: {joined}");
    assert!(joined.contains("--ntasks-per-node=1"));
    assert!(joined.contains("--gres=none"));
    assert_eq!(joined.matches("/tmp/ctidl --root").count(), 2);
}

#[test]
fn daemon_argv_wraps_in_container_when_configured() {
    let mut job = test_job(vec![(
        "1.0".to_string(),
        StepLayout {
            num_pes: 1,
            nodes: vec![cti_core::NodeLayout {
                hostname: "nid00001".into(),
                pes_here: 1,
                first_pe: 0,
            }],
        },
    )]);
    job.container_instance = Some("/images/tool.sif".to_string());

    let argv = job.daemon_launcher_argv(&["/tmp/ctidl".to_string()]);
    let joined = argv.join(" ");
    assert!(joined.contains("singularity exec /images/tool.sif /tmp/ctidl"), "{joined}");
}

fn test_job(layouts: Vec<(String, StepLayout)>) -> SlurmJob {
    let entries = vec![cti_core::ProctableEntry {
        rank: 0,
        hostname: "nid00001".into(),
        pid: 100,
        executable: "/apps/a.out".into(),
    }];
    SlurmJob {
        helper: test_helper(),
        launcher: "srun".to_string(),
        container_instance: None,
        never_parse_scancel: false,
        job_id: 36939,
        step_id: 0,
        daemon_app_id: cti_core::DaemonId::new(1),
        mpir_id: Mutex::new(None),
        proctable: Proctable::new(entries).unwrap(),
        layouts,
        gres: None,
        toolpath: PathBuf::from("/tmp"),
        blacklist: vec![],
    }
}

/// A helper client over dead sockets; fine for tests that never touch it.
fn test_helper() -> Arc<HelperClient> {
    use std::os::unix::net::UnixStream;
    let (req, _req_peer) = UnixStream::pair().unwrap();
    let (resp, resp_peer) = UnixStream::pair().unwrap();
    // Satisfy the handshake by writing a pid announcement ourselves.
    {
        let mut writer = &resp_peer;
        cti_wire::write_response(&mut writer, &cti_wire::Response::Id { id: 1 }).unwrap();
    }
    let client = HelperClient::connect(req, resp).unwrap();
    client.suppress();
    Arc::new(client)
}
