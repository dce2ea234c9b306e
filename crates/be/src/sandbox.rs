// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox maintenance on the compute node: archive extraction, arrival
//! markers, daemon pid records, and teardown.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::BeError;

/// Grace between SIGTERM and SIGKILL when a session is destroyed.
pub const DAEMON_TERM_GRACE: Duration = Duration::from_secs(10);

/// Directory under the sandbox root recording daemon pids.
const PIDS_DIR: &str = ".pids";

/// Unpack a shipped archive into the sandbox root and mark arrival.
pub fn unpack(root: &Path, archive: &Path, manifest_id: u64) -> Result<(), BeError> {
    std::fs::create_dir_all(root)?;
    std::fs::create_dir_all(root.join("tmp"))?;

    let file = std::fs::File::open(archive)?;
    let mut tar = tar::Archive::new(file);
    // Re-ships overwrite; a later manifest may legitimately replace a
    // control file.
    tar.set_overwrite(true);
    tar.set_preserve_permissions(true);
    tar.unpack(root)
        .map_err(|err| BeError::Extract(format!("{}: {err}", archive.display())))?;

    // The marker is the last thing written: its presence means every
    // entry is in place.
    std::fs::write(lock_file_path(root, manifest_id), b"")?;
    info!(root = %root.display(), manifest = manifest_id, "manifest unpacked");
    Ok(())
}

pub fn lock_file_path(root: &Path, manifest_id: u64) -> PathBuf {
    root.join(format!(".{manifest_id}.lock"))
}

/// True iff the given manifest has fully arrived in this sandbox.
pub fn manifest_arrived(root: &Path, manifest_id: u64) -> bool {
    lock_file_path(root, manifest_id).exists()
}

/// Block until a manifest arrives.
pub fn wait_for_manifest(
    root: &Path,
    manifest_id: u64,
    timeout: Duration,
) -> Result<(), BeError> {
    let deadline = Instant::now() + timeout;
    while !manifest_arrived(root, manifest_id) {
        if Instant::now() >= deadline {
            return Err(BeError::Extract(format!(
                "manifest {manifest_id} never arrived in {}",
                root.display()
            )));
        }
        std::thread::sleep(Duration::from_millis(250));
    }
    Ok(())
}

/// Record a started daemon so teardown can find it.
pub fn record_daemon_pid(root: &Path, pid: i32) -> Result<(), BeError> {
    let dir = root.join(PIDS_DIR);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(pid.to_string()), b"")?;
    Ok(())
}

pub fn recorded_daemon_pids(root: &Path) -> Vec<i32> {
    let Ok(entries) = std::fs::read_dir(root.join(PIDS_DIR)) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_string_lossy().parse().ok())
        .collect()
}

/// Session teardown: SIGTERM every recorded daemon, give them the grace
/// window, SIGKILL the rest, then unlink the sandbox.
pub fn cleanup(root: &Path, grace: Duration) -> Result<(), BeError> {
    let pids = recorded_daemon_pids(root);
    debug!(root = %root.display(), daemons = pids.len(), "session cleanup");

    let mut live: Vec<Pid> = Vec::new();
    for pid in &pids {
        let target = Pid::from_raw(*pid);
        if kill(target, Signal::SIGTERM).is_ok() {
            live.push(target);
        }
    }

    if !live.is_empty() {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            live.retain(|pid| kill(*pid, None).is_ok());
            if live.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(250));
        }
        for pid in &live {
            warn!(pid = pid.as_raw(), "daemon survived SIGTERM grace, killing");
            let _ = kill(*pid, Signal::SIGKILL);
        }
    }

    std::fs::remove_dir_all(root)?;
    info!(root = %root.display(), "sandbox removed");
    Ok(())
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
