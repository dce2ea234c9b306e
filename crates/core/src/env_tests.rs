// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Config resolution tests. These mutate the process environment and so run
//! serialized.

use std::os::unix::fs::PermissionsExt;

use serial_test::serial;

use super::*;

fn clear_cti_env() {
    for var in [
        INSTALL_DIR_ENV,
        LOG_DIR_ENV,
        DEBUG_ENV,
        CFG_DIR_ENV,
        LAUNCHER_NAME_ENV,
        WLM_IMPL_ENV,
        LAUNCHER_SCRIPT_ENV,
        LAUNCHER_WRAPPER_ENV,
        BACKEND_WRAPPER_ENV,
        BACKEND_TMPDIR_ENV,
        CONTAINER_INSTANCE_ENV,
        HELPER_PATH_ENV,
    ] {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn cfg_dir_is_created_under_cti_cfg_dir_with_0700() {
    clear_cti_env();
    let base = tempfile::tempdir().unwrap();
    std::env::set_var(CFG_DIR_ENV, base.path());

    let config = Config::from_env().unwrap();
    assert!(config.cfg_dir.starts_with(base.path()));
    assert!(config.cfg_dir.is_dir());

    let mode = std::fs::metadata(&config.cfg_dir).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o700);
}

#[test]
#[serial]
fn cfg_dir_with_loose_permissions_is_rejected() {
    clear_cti_env();
    let base = tempfile::tempdir().unwrap();
    std::env::set_var(CFG_DIR_ENV, base.path());

    // Pre-create the per-user dir with group access.
    let uid_dir = {
        let config = Config::from_env().unwrap();
        config.cfg_dir
    };
    std::fs::set_permissions(&uid_dir, std::fs::Permissions::from_mode(0o770)).unwrap();

    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, EnvError::CfgDirBadPerms { .. }), "got {err:?}");
}

#[test]
#[serial]
fn wlm_override_is_parsed_and_validated() {
    clear_cti_env();
    let base = tempfile::tempdir().unwrap();
    std::env::set_var(CFG_DIR_ENV, base.path());

    std::env::set_var(WLM_IMPL_ENV, "pals");
    assert_eq!(Config::from_env().unwrap().wlm_override, Some(WlmType::Pals));

    std::env::set_var(WLM_IMPL_ENV, "torque");
    assert!(matches!(Config::from_env().unwrap_err(), EnvError::BadWlmImpl(_)));
    std::env::remove_var(WLM_IMPL_ENV);
}

#[test]
#[serial]
fn helper_path_env_overrides_install_dir() {
    clear_cti_env();
    let base = tempfile::tempdir().unwrap();
    std::env::set_var(CFG_DIR_ENV, base.path());
    std::env::set_var(HELPER_PATH_ENV, "/opt/dev/ctifed");

    let config = Config::from_env().unwrap();
    assert_eq!(config.helper_path().unwrap(), PathBuf::from("/opt/dev/ctifed"));
    std::env::remove_var(HELPER_PATH_ENV);
}

#[test]
#[serial]
fn libexec_binaries_resolve_under_install_dir() {
    clear_cti_env();
    let base = tempfile::tempdir().unwrap();
    std::env::set_var(CFG_DIR_ENV, base.path());

    let install = tempfile::tempdir().unwrap();
    let libexec = install.path().join("libexec");
    std::fs::create_dir(&libexec).unwrap();
    std::fs::write(libexec.join(DLAUNCH_BINARY), b"#!/bin/sh\n").unwrap();
    std::env::set_var(INSTALL_DIR_ENV, install.path());

    let config = Config::from_env().unwrap();
    assert_eq!(config.dlaunch_path().unwrap(), libexec.join(DLAUNCH_BINARY));
    // Missing binary is an error, not a silent fallback.
    assert!(matches!(config.shim_path().unwrap_err(), EnvError::HelperMissing(_)));
    std::env::remove_var(INSTALL_DIR_ENV);
}

#[test]
#[serial]
fn install_dir_unset_is_reported() {
    clear_cti_env();
    let base = tempfile::tempdir().unwrap();
    std::env::set_var(CFG_DIR_ENV, base.path());

    let config = Config::from_env().unwrap();
    assert!(matches!(config.dlaunch_path().unwrap_err(), EnvError::InstallDirUnset));
}
