// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use cti_core::WlmType;
use yare::parameterized;

use super::*;

#[parameterized(
    job_and_step = { "36939.4", 36939, 4 },
    bare_job = { "36939", 36939, 0 },
)]
fn slurm_refs_parse(input: &str, job: u32, step: u32) {
    assert_eq!(
        JobRef::parse(WlmType::Slurm, input).unwrap(),
        JobRef::SlurmStep { job_id: job, step_id: step }
    );
}

#[test]
fn slurm_garbage_ref_is_rejected() {
    assert!(JobRef::parse(WlmType::Slurm, "abc.def").is_err());
    assert!(JobRef::parse(WlmType::Slurm, "").is_err());
}

#[test]
fn pals_and_flux_refs_are_opaque_strings() {
    assert_eq!(
        JobRef::parse(WlmType::Pals, "5e7a54cd-0ac5-4c1a-94e5-8e549d2f2a6c").unwrap(),
        JobRef::PalsApid("5e7a54cd-0ac5-4c1a-94e5-8e549d2f2a6c".to_string())
    );
    assert_eq!(
        JobRef::parse(WlmType::Flux, "f2A7dbqVd").unwrap(),
        JobRef::FluxJob("f2A7dbqVd".to_string())
    );
}

#[test]
fn generic_refs_are_launcher_pids() {
    assert_eq!(
        JobRef::parse(WlmType::Ssh, "9182").unwrap(),
        JobRef::LauncherPid(9182)
    );
    assert!(JobRef::parse(WlmType::Ssh, "not-a-pid").is_err());
}
