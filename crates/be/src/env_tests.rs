// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend environment tests; env mutation is serialized.

use cti_core::env as cti_env;
use serial_test::serial;

use super::*;

fn set_minimal_env(root: &std::path::Path) {
    std::env::set_var(cti_env::BE_APID_ENV, "36939.0");
    std::env::set_var(cti_env::BE_WLM_ENV, "slurm");
    std::env::set_var(cti_env::BE_ROOT_DIR_ENV, root);
    std::env::remove_var(cti_env::BE_PMI_ATTRIBS_DIR_ENV);
    std::env::remove_var(cti_env::PMI_FOPEN_TIMEOUT_ENV);
    std::env::remove_var(cti_env::EXTRA_SLEEP_ENV);
}

#[test]
#[serial]
fn env_contract_resolves_sandbox_layout() {
    let root = tempfile::tempdir().unwrap();
    set_minimal_env(root.path());

    let be = BackendEnv::from_env().unwrap();
    assert_eq!(be.app_id(), "36939.0");
    assert_eq!(be.current_wlm(), cti_core::WlmType::Slurm);
    assert_eq!(be.bin_dir(), root.path().join("bin"));
    assert_eq!(be.lib_dir(), root.path().join("lib"));
    assert_eq!(be.tmp_dir(), root.path().join("tmp"));
    assert_eq!(be.file_dir(), root.path().to_path_buf());
}

#[test]
#[serial]
fn missing_apid_is_reported_by_name() {
    let root = tempfile::tempdir().unwrap();
    set_minimal_env(root.path());
    std::env::remove_var(cti_env::BE_APID_ENV);

    let err = BackendEnv::from_env().unwrap_err();
    assert!(err.to_string().contains("CTI_APID"), "got {err}");
}

#[test]
#[serial]
fn pmi_timeouts_come_from_the_environment() {
    let root = tempfile::tempdir().unwrap();
    set_minimal_env(root.path());
    std::env::set_var(cti_env::PMI_FOPEN_TIMEOUT_ENV, "5");
    std::env::set_var(cti_env::EXTRA_SLEEP_ENV, "2");

    let be = BackendEnv::from_env().unwrap();
    assert_eq!(be.pmi_fopen_timeout(), std::time::Duration::from_secs(5));
    assert_eq!(be.pmi_extra_sleep(), std::time::Duration::from_secs(2));

    std::env::remove_var(cti_env::PMI_FOPEN_TIMEOUT_ENV);
    std::env::remove_var(cti_env::EXTRA_SLEEP_ENV);
}

#[test]
#[serial]
fn unknown_wlm_string_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    set_minimal_env(root.path());
    std::env::set_var(cti_env::BE_WLM_ENV, "pbs");
    assert!(matches!(BackendEnv::from_env(), Err(BeError::BadWlm(_))));
    std::env::set_var(cti_env::BE_WLM_ENV, "slurm");
}
