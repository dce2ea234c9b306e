// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The environment contract between `ctidl` and tool daemons.

use std::path::PathBuf;
use std::time::Duration;

use cti_core::env as cti_env;
use cti_core::WlmType;

use crate::error::BeError;

/// Default bound on waiting for the WLM's PMI attributes file.
pub const PMI_FOPEN_DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved backend environment, read once by a daemon at startup.
#[derive(Debug, Clone)]
pub struct BackendEnv {
    pub apid: String,
    pub wlm: WlmType,
    pub root_dir: PathBuf,
    pub attribs_dir: Option<PathBuf>,
}

impl BackendEnv {
    pub fn from_env() -> Result<Self, BeError> {
        let apid = std::env::var(cti_env::BE_APID_ENV)
            .map_err(|_| BeError::MissingEnv(cti_env::BE_APID_ENV))?;
        let wlm_str = std::env::var(cti_env::BE_WLM_ENV)
            .map_err(|_| BeError::MissingEnv(cti_env::BE_WLM_ENV))?;
        let wlm = WlmType::from_impl_str(&wlm_str).ok_or(BeError::BadWlm(wlm_str))?;
        let root_dir = std::env::var_os(cti_env::BE_ROOT_DIR_ENV)
            .map(PathBuf::from)
            .ok_or(BeError::MissingEnv(cti_env::BE_ROOT_DIR_ENV))?;
        let attribs_dir = std::env::var_os(cti_env::BE_PMI_ATTRIBS_DIR_ENV).map(PathBuf::from);
        Ok(Self { apid, wlm, root_dir, attribs_dir })
    }

    pub fn app_id(&self) -> &str {
        &self.apid
    }

    pub fn current_wlm(&self) -> WlmType {
        self.wlm
    }

    // Sandbox layout accessors; identical shape to the frontend session.

    pub fn root_dir(&self) -> PathBuf {
        self.root_dir.clone()
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root_dir.join("bin")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root_dir.join("lib")
    }

    pub fn file_dir(&self) -> PathBuf {
        self.root_dir.clone()
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root_dir.join("tmp")
    }

    /// This compute node's hostname, ALPS nid notation included.
    pub fn node_hostname(&self) -> Result<String, BeError> {
        // Cray XT/XE nodes carry their identity in the nid file.
        if let Ok(nid) = std::fs::read_to_string("/proc/cray_xt/nid") {
            if let Ok(nid) = nid.trim().parse::<u32>() {
                return Ok(format!("nid{nid:05}"));
            }
        }
        Ok(std::fs::read_to_string("/proc/sys/kernel/hostname")?.trim().to_string())
    }

    /// How long to wait for the PMI attributes file.
    pub fn pmi_fopen_timeout(&self) -> Duration {
        std::env::var(cti_env::PMI_FOPEN_TIMEOUT_ENV)
            .ok()
            .and_then(|timeout| timeout.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(PMI_FOPEN_DEFAULT_TIMEOUT)
    }

    /// Fixed settle delay after the attributes file opens.
    pub fn pmi_extra_sleep(&self) -> Duration {
        std::env::var(cti_env::EXTRA_SLEEP_ENV)
            .ok()
            .and_then(|sleep| sleep.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
