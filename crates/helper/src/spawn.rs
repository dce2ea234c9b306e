// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process launch on behalf of the frontend.

use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use cti_core::paths::find_executable;
use cti_wire::LaunchData;
use tracing::debug;

use crate::error::HelperError;

/// Spawn the requested child with remapped stdio in its own process group.
/// Returns the pid; reaping is the signal thread's job.
pub fn fork_exec(launch: &LaunchData, stdio: [OwnedFd; 3]) -> Result<i32, HelperError> {
    let binary = find_executable(&launch.file)
        .ok_or_else(|| HelperError::BinaryNotFound(launch.file.clone()))?;

    let mut cmd = Command::new(&binary);
    if let Some(argv0) = launch.argv.first() {
        cmd.arg0(argv0);
    }
    if launch.argv.len() > 1 {
        cmd.args(&launch.argv[1..]);
    }

    for entry in &launch.env {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| HelperError::BadEnvEntry(entry.clone()))?;
        if value.is_empty() {
            cmd.env_remove(name);
        } else {
            cmd.env(name, value);
        }
    }
    for name in &launch.env_blacklist {
        cmd.env_remove(name);
    }

    let [stdin, stdout, stderr] = stdio;
    cmd.stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    // Own process group so group signals from the WLM or shell never take
    // the helper down with the child.
    cmd.process_group(0);

    let child = cmd
        .spawn()
        .map_err(|source| HelperError::Spawn { path: binary.clone(), source })?;
    let pid = child.id() as i32;
    debug!(pid, binary = %binary.display(), "spawned child");
    Ok(pid)
}

/// Open `/dev/null` read-only (stdin) or write-only (stdout/stderr).
pub fn dev_null(read: bool) -> Result<OwnedFd, HelperError> {
    let file = if read {
        std::fs::File::open("/dev/null")?
    } else {
        std::fs::OpenOptions::new().write(true).open("/dev/null")?
    };
    Ok(file.into())
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
