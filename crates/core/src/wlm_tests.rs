// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::*;

#[parameterized(
    slurm = { "slurm", WlmType::Slurm },
    alps = { "alps", WlmType::Alps },
    generic = { "generic", WlmType::Ssh },
    pals = { "pals", WlmType::Pals },
    flux = { "flux", WlmType::Flux },
    localhost = { "localhost", WlmType::Localhost },
)]
fn impl_strings_round_trip(s: &str, wlm: WlmType) {
    assert_eq!(WlmType::from_impl_str(s), Some(wlm));
    assert_eq!(wlm.as_str(), s);
    assert_eq!(wlm.to_string(), s);
}

#[test]
fn unknown_impl_string_is_rejected() {
    assert_eq!(WlmType::from_impl_str("pbs"), None);
    assert_eq!(WlmType::from_impl_str(""), None);
    assert_eq!(WlmType::from_impl_str("SLURM"), None);
}
