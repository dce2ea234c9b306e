// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MPIR shim coordination for wrapped launchers.
//!
//! Some launcher "binaries" are scripts that eventually exec the real
//! launcher. The supervisor plants a sentinel token and a shim binary on
//! `PATH` so that the wrapped launcher invocation resolves to the shim; the
//! shim reports its pid over a pipe, stops itself, and execs the real
//! launcher once the supervisor has attached.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Environment contract between supervisor and shim binary.
pub const SHIM_OUTPUT_FD_ENV: &str = "CTI_MPIR_SHIM_OUTPUT_FD";
pub const SHIM_LAUNCHER_PATH_ENV: &str = "CTI_MPIR_LAUNCHER_PATH";
pub const SHIM_ORIGINAL_PATH_ENV: &str = "CTI_MPIR_ORIGINAL_PATH";
pub const SHIM_STDIN_FD_ENV: &str = "CTI_MPIR_STDIN_FD";
pub const SHIM_STDOUT_FD_ENV: &str = "CTI_MPIR_STDOUT_FD";
pub const SHIM_STDERR_FD_ENV: &str = "CTI_MPIR_STDERR_FD";
pub const SHIM_TOKEN_ENV: &str = "CTI_MPIR_SHIM_TOKEN";

/// Per-launch sentinel appended to the wrapper's argv. Unique so that
/// nested launcher invocations made by the wrapper itself pass through.
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Splice `shim_dir` into `original_path` directly after the directory
/// containing the launcher script.
///
/// Wrappers commonly re-resolve the launcher in the part of `PATH` after
/// their own location, ignoring earlier entries; putting the shim first
/// would be skipped. Falls back to prepending when the script's directory
/// is not on `PATH` at all.
pub fn splice_path(original_path: &str, launcher_script_dir: &Path, shim_dir: &Path) -> String {
    let script_dir = launcher_script_dir.to_string_lossy();
    let shim = shim_dir.to_string_lossy();

    let mut out = Vec::new();
    let mut spliced = false;
    for dir in original_path.split(':') {
        out.push(dir.to_string());
        if !spliced && dir == script_dir {
            out.push(shim.to_string());
            spliced = true;
        }
    }

    if !spliced {
        debug!(script_dir = %script_dir, "launcher dir not on PATH, prepending shim dir");
        let mut prepended = vec![shim.to_string()];
        prepended.extend(original_path.split(':').map(str::to_string).filter(|d| !d.is_empty()));
        return prepended.join(":");
    }
    out.join(":")
}

/// Temporary directory holding a launcher-named symlink to the shim
/// binary. Removed on drop.
#[derive(Debug)]
pub struct ShimBinDir {
    path: PathBuf,
}

impl ShimBinDir {
    /// Creates `<base><token>/<launcher_name>` → `shim_binary`.
    pub fn create(
        base: &str,
        token: &str,
        shim_binary: &Path,
        launcher_name: &str,
    ) -> std::io::Result<Self> {
        let path = PathBuf::from(format!("{base}{token}"));
        std::fs::create_dir_all(&path)?;
        std::os::unix::fs::symlink(shim_binary, path.join(launcher_name))?;
        debug!(dir = %path.display(), launcher = launcher_name, "shim bin dir ready");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ShimBinDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
#[path = "shim_tests.rs"]
mod tests;
