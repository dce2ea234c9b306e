// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WLM detection and driver construction. Happens exactly once, at
//! frontend init.

use std::sync::Arc;

use cti_core::paths::find_executable;
use cti_core::{Config, WlmType};
use cti_helper::HelperClient;
use tracing::info;

use crate::alps::AlpsDriver;
use crate::driver::WlmDriver;
use crate::error::WlmError;
use crate::flux::FluxDriver;
use crate::localhost::LocalhostDriver;
use crate::pals::PalsDriver;
use crate::slurm::SlurmDriver;
use crate::ssh::SshDriver;

/// `CTI_WLM_IMPL` override first, then runtime probes.
pub fn detect_wlm(config: &Config) -> WlmType {
    if let Some(wlm) = config.wlm_override {
        info!(wlm = %wlm, "WLM forced by environment");
        return wlm;
    }

    let detected = if find_executable("palstat").is_some() {
        WlmType::Pals
    } else if find_executable("srun").is_some() {
        WlmType::Slurm
    } else if std::env::var_os("FLUX_URI").is_some() && find_executable("flux").is_some() {
        WlmType::Flux
    } else if find_executable("aprun").is_some() {
        WlmType::Alps
    } else if find_executable("mpiexec").is_some() || find_executable("mpirun").is_some() {
        WlmType::Ssh
    } else {
        WlmType::Localhost
    };
    info!(wlm = %detected, "detected WLM");
    detected
}

/// Instantiate the driver for `wlm`.
pub fn new_driver(
    wlm: WlmType,
    helper: Arc<HelperClient>,
    config: Config,
) -> Result<Box<dyn WlmDriver>, WlmError> {
    Ok(match wlm {
        WlmType::Slurm => Box::new(SlurmDriver::new(helper, config)),
        WlmType::Pals => Box::new(PalsDriver::new(helper, config)),
        WlmType::Flux => Box::new(FluxDriver::new(helper, config)?),
        WlmType::Alps => Box::new(AlpsDriver::new(helper, config)),
        WlmType::Ssh => Box::new(SshDriver::new(helper, config)),
        WlmType::Localhost => Box::new(LocalhostDriver::new(helper, config)),
    })
}
