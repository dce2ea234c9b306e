// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use assert_cmd::Command;

#[test]
fn version_prints_the_crate_version() {
    let mut cmd = Command::cargo_bin("cti").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicates_version());
}

fn predicates_version() -> String {
    format!("{}\n", env!("CARGO_PKG_VERSION"))
}

#[test]
fn env_check_flags_a_missing_install_dir() {
    let cfg = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("cti").unwrap();
    cmd.env_remove("CTI_INSTALL_DIR")
        .env("CTI_CFG_DIR", cfg.path())
        .arg("env-check")
        .assert()
        .failure();
}

#[test]
fn unknown_subcommand_is_an_error() {
    let mut cmd = Command::cargo_bin("cti").unwrap();
    cmd.arg("frobnicate").assert().failure();
}
