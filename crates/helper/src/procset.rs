// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sets of owned pids with escalating teardown.

use std::collections::HashSet;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use tracing::debug;

/// Grace between SIGTERM and SIGKILL during teardown.
pub const TERM_GRACE: Duration = Duration::from_secs(3);

/// SIGTERM, wait [`TERM_GRACE`], SIGKILL, reap.
pub fn try_term(pid: i32) {
    let target = Pid::from_raw(pid);
    if kill(target, Signal::SIGTERM).is_err() {
        // Already gone.
        return;
    }
    std::thread::sleep(TERM_GRACE);
    let _ = kill(target, Signal::SIGKILL);
    let _ = waitpid(target, Some(WaitPidFlag::WNOHANG));
}

/// Pids owned by the helper. Clearing the set terminates every member in
/// parallel; dropping a non-empty set does the same.
#[derive(Debug, Default)]
pub struct ProcSet {
    pids: HashSet<i32>,
}

impl ProcSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pid: i32) {
        self.pids.insert(pid);
    }

    /// Forget the pid without touching the process.
    pub fn release(&mut self, pid: i32) {
        self.pids.remove(&pid);
    }

    pub fn contains(&self, pid: i32) -> bool {
        self.pids.contains(&pid)
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    /// Terminate every member, one thread per pid, and wait for all.
    pub fn clear(&mut self) {
        let pids: Vec<i32> = self.pids.drain().collect();
        if pids.is_empty() {
            return;
        }
        debug!(count = pids.len(), "terminating process set");
        let handles: Vec<_> = pids
            .into_iter()
            .map(|pid| std::thread::spawn(move || try_term(pid)))
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for ProcSet {
    fn drop(&mut self) {
        if !self.pids.is_empty() {
            self.clear();
        }
    }
}

#[cfg(test)]
#[path = "procset_tests.rs"]
mod tests;
