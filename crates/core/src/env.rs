// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-variable surface and frontend configuration resolution.
//!
//! Configuration is environment-only. `Config::from_env` is called once at
//! frontend init; everything downstream receives the resolved value.

use std::fs;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::wlm::WlmType;

// Read by the frontend.
pub const INSTALL_DIR_ENV: &str = "CTI_INSTALL_DIR";
pub const LOG_DIR_ENV: &str = "CTI_LOG_DIR";
pub const DEBUG_ENV: &str = "CTI_DEBUG";
pub const CFG_DIR_ENV: &str = "CTI_CFG_DIR";
pub const LAUNCHER_NAME_ENV: &str = "CTI_LAUNCHER_NAME";
pub const WLM_IMPL_ENV: &str = "CTI_WLM_IMPL";
pub const LAUNCHER_SCRIPT_ENV: &str = "CTI_LAUNCHER_SCRIPT";
pub const LAUNCHER_WRAPPER_ENV: &str = "CTI_LAUNCHER_WRAPPER";
pub const BACKEND_WRAPPER_ENV: &str = "CTI_BACKEND_WRAPPER";
pub const BACKEND_TMPDIR_ENV: &str = "CTI_BACKEND_TMPDIR";
pub const CONTAINER_INSTANCE_ENV: &str = "CTI_CONTAINER_INSTANCE";
pub const GDB_PATH_ENV: &str = "CTI_GDB_PATH";
/// Development/test override for the supervisor helper binary location.
pub const HELPER_PATH_ENV: &str = "CTI_HELPER_PATH";

// WLM-specific tuning knobs.
pub const SLURM_NEVER_PARSE_SCANCEL_ENV: &str = "CTI_SLURM_NEVER_PARSE_SCANCEL";
pub const PALS_BARRIER_RELEASE_DELAY_ENV: &str = "CTI_PALS_BARRIER_RELEASE_DELAY";
pub const PALS_NO_POLL_ENV: &str = "CTI_PALS_NO_POLL";
pub const FLUX_BYPASS_VERSION_CHECK_ENV: &str = "CTI_FLUX_BYPASS_VERSION_CHECK";
pub const SSH_OPTS_ENV: &str = "CTI_SSH_OPTS";

// Read by backend daemons / the tool-daemon launcher.
pub const BE_APID_ENV: &str = "CTI_APID";
pub const BE_WLM_ENV: &str = "CTI_WLM";
pub const BE_ROOT_DIR_ENV: &str = "CTI_ROOT_DIR";
pub const BE_BIN_DIR_ENV: &str = "CTI_BIN_DIR";
pub const BE_LIB_DIR_ENV: &str = "CTI_LIB_DIR";
pub const BE_FILE_DIR_ENV: &str = "CTI_FILE_DIR";
pub const BE_PMI_ATTRIBS_DIR_ENV: &str = "CTI_PMI_ATTRIBS_DIR";
pub const BE_OLD_TMPDIR_ENV: &str = "CTI_OLD_TMPDIR";
pub const PMI_FOPEN_TIMEOUT_ENV: &str = "CTI_PMI_FOPEN_TIMEOUT";
pub const EXTRA_SLEEP_ENV: &str = "CTI_EXTRA_SLEEP";

/// Binary names installed under `libexec/`.
pub const HELPER_BINARY: &str = "ctifed";
pub const SHIM_BINARY: &str = "ctishim";
pub const DLAUNCH_BINARY: &str = "ctidl";

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{INSTALL_DIR_ENV} is not set and no compiled-in default exists")]
    InstallDirUnset,
    #[error("install dir {0:?} has no libexec/ directory")]
    InstallDirInvalid(PathBuf),
    #[error("helper binary not found at {0:?}")]
    HelperMissing(PathBuf),
    #[error("no writable config directory candidate ({CFG_DIR_ENV}, $TMPDIR, /tmp, $HOME)")]
    NoCfgDir,
    #[error("config directory {path:?} must be mode 0700, found {mode:o}")]
    CfgDirBadPerms { path: PathBuf, mode: u32 },
    #[error("config directory {0:?} is not owned by the current user")]
    CfgDirBadOwner(PathBuf),
    #[error("{WLM_IMPL_ENV} value {0:?} is not a recognized WLM")]
    BadWlmImpl(String),
    #[error("failed to prepare config directory {path:?}: {source}")]
    CfgDirIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolved frontend configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub install_dir: Option<PathBuf>,
    pub cfg_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub debug: bool,
    pub launcher_name: Option<String>,
    pub wlm_override: Option<WlmType>,
    pub launcher_script: bool,
    pub launcher_wrapper: Option<String>,
    pub backend_wrapper: Option<String>,
    pub backend_tmpdir: Option<PathBuf>,
    pub container_instance: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, EnvError> {
        let wlm_override = match std::env::var(WLM_IMPL_ENV) {
            Ok(value) => {
                Some(WlmType::from_impl_str(&value).ok_or(EnvError::BadWlmImpl(value))?)
            }
            Err(_) => None,
        };

        Ok(Self {
            install_dir: std::env::var_os(INSTALL_DIR_ENV).map(PathBuf::from),
            cfg_dir: resolve_cfg_dir()?,
            log_dir: std::env::var_os(LOG_DIR_ENV).map(PathBuf::from),
            debug: std::env::var_os(DEBUG_ENV).is_some(),
            launcher_name: std::env::var(LAUNCHER_NAME_ENV).ok(),
            wlm_override,
            launcher_script: std::env::var_os(LAUNCHER_SCRIPT_ENV).is_some(),
            launcher_wrapper: std::env::var(LAUNCHER_WRAPPER_ENV).ok(),
            backend_wrapper: std::env::var(BACKEND_WRAPPER_ENV).ok(),
            backend_tmpdir: std::env::var_os(BACKEND_TMPDIR_ENV).map(PathBuf::from),
            container_instance: std::env::var(CONTAINER_INSTANCE_ENV).ok(),
        })
    }

    /// Path of an installed libexec binary, honoring the per-binary env
    /// override used in development and tests.
    pub fn libexec_binary(&self, name: &str) -> Result<PathBuf, EnvError> {
        if name == HELPER_BINARY {
            if let Some(path) = std::env::var_os(HELPER_PATH_ENV) {
                return Ok(PathBuf::from(path));
            }
        }
        let install = self.install_dir.as_ref().ok_or(EnvError::InstallDirUnset)?;
        let libexec = install.join("libexec");
        if !libexec.is_dir() {
            return Err(EnvError::InstallDirInvalid(install.clone()));
        }
        let path = libexec.join(name);
        if !path.is_file() {
            return Err(EnvError::HelperMissing(path));
        }
        Ok(path)
    }

    pub fn helper_path(&self) -> Result<PathBuf, EnvError> {
        self.libexec_binary(HELPER_BINARY)
    }

    pub fn shim_path(&self) -> Result<PathBuf, EnvError> {
        self.libexec_binary(SHIM_BINARY)
    }

    pub fn dlaunch_path(&self) -> Result<PathBuf, EnvError> {
        self.libexec_binary(DLAUNCH_BINARY)
    }
}

/// Candidate order: `CTI_CFG_DIR`, `$TMPDIR`, `/tmp`, `$HOME`. A per-user
/// subdirectory is created (0700) and ownership/permissions verified.
fn resolve_cfg_dir() -> Result<PathBuf, EnvError> {
    let candidates: Vec<PathBuf> = [
        std::env::var_os(CFG_DIR_ENV).map(PathBuf::from),
        std::env::var_os("TMPDIR").map(PathBuf::from),
        Some(PathBuf::from("/tmp")),
        std::env::var_os("HOME").map(PathBuf::from),
    ]
    .into_iter()
    .flatten()
    .collect();

    let uid = current_uid();
    for base in candidates {
        if !base.is_dir() {
            continue;
        }
        let dir = base.join(format!("cti-{uid}"));
        match prepare_cfg_dir(&dir, uid) {
            Ok(()) => return Ok(dir),
            Err(err @ (EnvError::CfgDirBadPerms { .. } | EnvError::CfgDirBadOwner(_))) => {
                // An unusable existing dir is an error, not a fallthrough:
                // silently picking another base would hide a spoofed dir.
                return Err(err);
            }
            Err(_) => continue,
        }
    }
    Err(EnvError::NoCfgDir)
}

fn prepare_cfg_dir(dir: &Path, uid: u32) -> Result<(), EnvError> {
    if !dir.exists() {
        fs::DirBuilder::new()
            .mode(0o700)
            .create(dir)
            .map_err(|source| EnvError::CfgDirIo { path: dir.to_path_buf(), source })?;
    }
    let meta = fs::metadata(dir)
        .map_err(|source| EnvError::CfgDirIo { path: dir.to_path_buf(), source })?;
    if meta.uid() != uid {
        return Err(EnvError::CfgDirBadOwner(dir.to_path_buf()));
    }
    let mode = meta.permissions().mode() & 0o777;
    if mode != 0o700 {
        return Err(EnvError::CfgDirBadPerms { path: dir.to_path_buf(), mode });
    }
    Ok(())
}

fn current_uid() -> u32 {
    // Effective uid; matches what filesystem operations will act as.
    fs::metadata("/proc/self").map(|m| m.uid()).unwrap_or(0)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
