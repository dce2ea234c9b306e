// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owns stopped inferiors and exposes them by id.

use std::collections::HashMap;
use std::path::Path;

use cti_core::Proctable;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::control::{Inferior, InferiorControl, LaunchSpec};
use crate::error::MpirError;

/// Everything extracted at the startup barrier.
#[derive(Debug, Clone)]
pub struct MpirResult {
    pub id: u64,
    pub launcher_pid: i32,
    pub job_id: u32,
    pub step_id: u32,
    pub proctable: Proctable,
}

/// Map of stopped inferiors, keyed by caller-assigned ids.
///
/// Presence in the map is the `Stopped` state; every terminal operation
/// removes the entry.
pub struct MpirSupervisor<C> {
    control: C,
    stopped: Mutex<HashMap<u64, Box<dyn Inferior>>>,
}

impl<C: InferiorControl> MpirSupervisor<C> {
    pub fn new(control: C) -> Self {
        Self { control, stopped: Mutex::new(HashMap::new()) }
    }

    /// Launch and run to the startup barrier, registering the stopped
    /// inferior under `id`.
    pub fn launch(&self, id: u64, spec: LaunchSpec) -> Result<MpirResult, MpirError> {
        let inferior = self.control.launch_stopped(spec)?;
        self.admit(id, inferior)
    }

    /// Attach to an already-running launcher and drive it to the barrier.
    pub fn attach(&self, id: u64, launcher: &Path, pid: i32) -> Result<MpirResult, MpirError> {
        let inferior = self.control.attach_stopped(launcher, pid)?;
        self.admit(id, inferior)
    }

    pub fn read_string(&self, id: u64, symbol: &str) -> Result<String, MpirError> {
        let mut stopped = self.stopped.lock();
        let inferior = stopped.get_mut(&id).ok_or(MpirError::UnknownId(id))?;
        inferior.read_string(symbol)
    }

    pub fn release(&self, id: u64) -> Result<(), MpirError> {
        let inferior = self.take(id)?;
        inferior.release()?;
        debug!(mpir_id = id, "released inferior");
        Ok(())
    }

    /// Release and wait for exit. Returns true iff the launcher exited 0.
    pub fn wait(&self, id: u64) -> Result<bool, MpirError> {
        let inferior = self.take(id)?;
        let code = inferior.wait()?;
        if code != 0 {
            debug!(mpir_id = id, code, "launcher exited nonzero");
        }
        Ok(code == 0)
    }

    pub fn terminate(&self, id: u64) -> Result<(), MpirError> {
        let inferior = self.take(id)?;
        inferior.terminate()?;
        debug!(mpir_id = id, "terminated inferior");
        Ok(())
    }

    /// Terminate every stopped inferior. Used on parent disconnect.
    pub fn terminate_all(&self) {
        let stopped: Vec<(u64, Box<dyn Inferior>)> = self.stopped.lock().drain().collect();
        for (id, inferior) in stopped {
            if let Err(err) = inferior.terminate() {
                warn!(mpir_id = id, error = %err, "failed to terminate inferior");
            }
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.stopped.lock().contains_key(&id)
    }

    fn admit(&self, id: u64, mut inferior: Box<dyn Inferior>) -> Result<MpirResult, MpirError> {
        let launcher_pid = inferior.pid();

        // The totalview job/step variables are optional; launchers without
        // them report 0.0.
        let job_id = read_u32_var(inferior.as_mut(), "totalview_jobid");
        let step_id = read_u32_var(inferior.as_mut(), "totalview_stepid");

        let proctable = inferior.read_proctable()?;
        debug!(
            mpir_id = id,
            launcher_pid,
            job_id,
            step_id,
            num_pes = proctable.num_pes(),
            "inferior stopped at startup barrier"
        );

        self.stopped.lock().insert(id, inferior);
        Ok(MpirResult { id, launcher_pid, job_id, step_id, proctable })
    }

    fn take(&self, id: u64) -> Result<Box<dyn Inferior>, MpirError> {
        self.stopped.lock().remove(&id).ok_or(MpirError::UnknownId(id))
    }
}

fn read_u32_var(inferior: &mut dyn Inferior, symbol: &str) -> u32 {
    inferior
        .read_string(symbol)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
