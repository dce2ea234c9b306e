// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Helper-side bookkeeping: app/utility ownership and liveness.
//!
//! Every pid ever reported to the parent is in exactly one of
//! {cleanup-on-exit, released, exited}; the transitions here keep that
//! invariant.

use std::collections::HashMap;

use cti_core::IdGen;
use tracing::debug;

use crate::error::HelperError;
use crate::procset::{try_term, ProcSet};

#[derive(Default)]
pub struct HelperState {
    ids: IdGen,
    pid_to_id: HashMap<i32, u64>,
    id_to_pid: HashMap<u64, i32>,
    /// Apps terminated when the helper exits.
    app_cleanup: ProcSet,
    /// Utilities owned by each app id.
    utils: HashMap<u64, ProcSet>,
}

impl HelperState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id before the process behind it exists (MPIR launches
    /// learn their launcher pid late). Bind it with [`bind_pid`] or
    /// [`bind_launched_pid`].
    ///
    /// [`bind_pid`]: HelperState::bind_pid
    /// [`bind_launched_pid`]: HelperState::bind_launched_pid
    pub fn allocate_id(&mut self) -> u64 {
        self.ids.next()
    }

    /// Attach a pid to a pre-allocated id.
    pub fn bind_pid(&mut self, id: u64, pid: i32) -> Result<(), HelperError> {
        if pid > 0 && self.pid_to_id.contains_key(&pid) {
            return Err(HelperError::DuplicatePid(pid));
        }
        if pid > 0 {
            self.pid_to_id.insert(pid, id);
        }
        self.id_to_pid.insert(id, pid);
        Ok(())
    }

    /// [`bind_pid`], plus cleanup-on-exit for the pid.
    ///
    /// [`bind_pid`]: HelperState::bind_pid
    pub fn bind_launched_pid(&mut self, id: u64, pid: i32) -> Result<(), HelperError> {
        self.bind_pid(id, pid)?;
        self.app_cleanup.insert(pid);
        Ok(())
    }

    /// Register an app pid and hand out its id. Pid 0 registers a
    /// placeholder for jobs with no local launcher process (pure attach).
    pub fn register_app(&mut self, pid: i32) -> Result<u64, HelperError> {
        if pid == 0 {
            let id = self.ids.next();
            self.id_to_pid.insert(id, 0);
            return Ok(id);
        }
        if self.pid_to_id.contains_key(&pid) {
            return Err(HelperError::DuplicatePid(pid));
        }
        let id = self.ids.next();
        self.pid_to_id.insert(pid, id);
        self.id_to_pid.insert(id, pid);
        debug!(app_id = id, pid, "registered app");
        Ok(id)
    }

    /// Same as [`register_app`], and also arm cleanup-on-exit for the pid.
    ///
    /// [`register_app`]: HelperState::register_app
    pub fn register_launched_app(&mut self, pid: i32) -> Result<u64, HelperError> {
        let id = self.register_app(pid)?;
        self.app_cleanup.insert(pid);
        Ok(id)
    }

    pub fn register_util(&mut self, app_id: u64, pid: i32) -> Result<(), HelperError> {
        if !self.id_to_pid.contains_key(&app_id) {
            return Err(HelperError::InvalidId(app_id));
        }
        if pid <= 0 {
            return Err(HelperError::InvalidUtilPid(pid));
        }
        self.utils.entry(app_id).or_default().insert(pid);
        Ok(())
    }

    /// Terminate the app (if still owned) and all of its utilities.
    pub fn deregister_app(&mut self, app_id: u64) -> Result<(), HelperError> {
        let pid = self.id_to_pid.remove(&app_id).ok_or(HelperError::InvalidId(app_id))?;
        if pid > 0 {
            self.pid_to_id.remove(&pid);
        }

        let utils = self.utils.remove(&app_id);
        let app_owned = self.app_cleanup.contains(pid);
        if app_owned {
            self.app_cleanup.release(pid);
        }

        // App and utility teardown proceed together.
        let app_thread = app_owned.then(|| std::thread::spawn(move || try_term(pid)));
        if let Some(mut utils) = utils {
            utils.clear();
        }
        if let Some(handle) = app_thread {
            let _ = handle.join();
        }
        debug!(app_id, pid, "deregistered app");
        Ok(())
    }

    /// The job outlives the tool; its utilities do not.
    pub fn release_app(&mut self, app_id: u64) -> Result<(), HelperError> {
        let pid = self.id_to_pid.remove(&app_id).ok_or(HelperError::InvalidId(app_id))?;
        if pid > 0 {
            self.pid_to_id.remove(&pid);
        }
        self.app_cleanup.release(pid);
        if let Some(mut utils) = self.utils.remove(&app_id) {
            utils.clear();
        }
        debug!(app_id, pid, "released app");
        Ok(())
    }

    /// True iff the app's pid still denotes a live (non-zombie) process.
    pub fn check_app(&self, app_id: u64) -> Result<bool, HelperError> {
        let pid = *self.id_to_pid.get(&app_id).ok_or(HelperError::InvalidId(app_id))?;
        if pid == 0 {
            // No local process to probe; assume the remote job is alive.
            return Ok(true);
        }
        if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err() {
            return Ok(false);
        }
        Ok(!is_zombie(pid))
    }

    /// A child exited: drop it from cleanup and schedule utility teardown.
    /// Returns the app id whose utilities must be cleared, if any.
    pub fn on_child_exit(&mut self, pid: i32) -> Option<ProcSet> {
        self.app_cleanup.release(pid);
        let id = self.pid_to_id.get(&pid).copied()?;
        self.utils.remove(&id)
    }

    /// Tear down everything. Called on parent disconnect and shutdown.
    pub fn clear_all(&mut self) {
        let mut utils: Vec<ProcSet> = self.utils.drain().map(|(_, set)| set).collect();
        let handles: Vec<_> = utils
            .iter_mut()
            .map(|set| {
                let mut set = std::mem::take(set);
                std::thread::spawn(move || set.clear())
            })
            .collect();
        self.app_cleanup.clear();
        for handle in handles {
            let _ = handle.join();
        }
        self.pid_to_id.clear();
        self.id_to_pid.clear();
    }

    pub fn cleanup_count(&self) -> usize {
        self.app_cleanup.len()
    }
}

fn is_zombie(pid: i32) -> bool {
    let status = match std::fs::read_to_string(format!("/proc/{pid}/status")) {
        Ok(contents) => contents,
        Err(_) => return false,
    };
    status
        .lines()
        .find(|line| line.starts_with("State:"))
        .map(|line| line.contains("Z (zombie)"))
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
