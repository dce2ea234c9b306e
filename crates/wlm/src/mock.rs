// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory mock driver for staging and frontend tests: records every
//! capability call, inspects shipped archives, and never touches a real
//! WLM or the helper.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use cti_core::{DaemonId, Proctable, ProctableEntry, WlmType};
use parking_lot::Mutex;

use crate::driver::{BarrierMode, JobLaunchSpec, JobRef, Synchrony, WlmDriver, WlmJob};
use crate::error::WlmError;

#[derive(Debug, Clone)]
pub struct ShippedPackage {
    pub dest_name: String,
    /// Tar entry paths, in archive order.
    pub entries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DaemonStart {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub synchronous: bool,
}

#[derive(Debug, Default)]
pub struct MockEvents {
    pub launches: Vec<Vec<String>>,
    pub shipped: Vec<ShippedPackage>,
    pub daemons: Vec<DaemonStart>,
    pub signals: Vec<i32>,
    pub barrier_releases: usize,
    pub deregistered: usize,
}

impl MockEvents {
    /// All entry names ever shipped, across packages.
    pub fn all_shipped_entries(&self) -> Vec<String> {
        self.shipped.iter().flat_map(|pkg| pkg.entries.iter().cloned()).collect()
    }
}

/// Scripted single-cluster driver.
pub struct MockDriver {
    hosts: Vec<String>,
    pes_per_host: usize,
    toolpath: PathBuf,
    /// Paths reported present on every node (system libraries).
    pub preinstalled: Mutex<BTreeSet<PathBuf>>,
    pub events: Arc<Mutex<MockEvents>>,
    fail_ships: AtomicU32,
}

impl MockDriver {
    pub fn new(hosts: &[&str], pes_per_host: usize, toolpath: &Path) -> Self {
        Self {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            pes_per_host,
            toolpath: toolpath.to_path_buf(),
            preinstalled: Mutex::new(BTreeSet::new()),
            events: Arc::new(Mutex::new(MockEvents::default())),
            fail_ships: AtomicU32::new(0),
        }
    }

    /// Make the next `count` ship_package calls fail.
    pub fn fail_next_ships(&self, count: u32) {
        self.fail_ships.store(count, Ordering::SeqCst);
    }

    fn proctable(&self) -> Result<Proctable, WlmError> {
        let mut entries = Vec::new();
        let mut rank = 0usize;
        for host in &self.hosts {
            for _ in 0..self.pes_per_host {
                entries.push(ProctableEntry {
                    rank,
                    hostname: host.clone(),
                    pid: 1000 + rank as i32,
                    executable: "/apps/a.out".to_string(),
                });
                rank += 1;
            }
        }
        Ok(Proctable::new(entries)?)
    }
}

impl WlmDriver for Arc<MockDriver> {
    fn wlm_type(&self) -> WlmType {
        WlmType::Localhost
    }

    fn launcher_name(&self) -> String {
        "mock".to_string()
    }

    fn launch(
        &self,
        spec: &JobLaunchSpec,
        barrier: BarrierMode,
    ) -> Result<Box<dyn WlmJob>, WlmError> {
        self.events.lock().launches.push(spec.launcher_args.clone());
        Ok(Box::new(MockJob {
            driver: Arc::clone(self),
            proctable: self.proctable()?,
            held: Mutex::new(barrier == BarrierMode::Hold),
            alive: AtomicBool::new(true),
        }))
    }

    fn attach(&self, _job: &JobRef) -> Result<Box<dyn WlmJob>, WlmError> {
        Ok(Box::new(MockJob {
            driver: Arc::clone(self),
            proctable: self.proctable()?,
            held: Mutex::new(false),
            alive: AtomicBool::new(true),
        }))
    }
}

pub struct MockJob {
    driver: Arc<MockDriver>,
    proctable: Proctable,
    held: Mutex<bool>,
    alive: AtomicBool,
}

impl WlmJob for MockJob {
    fn wlm_type(&self) -> WlmType {
        WlmType::Localhost
    }

    fn job_id(&self) -> String {
        "mock-1".to_string()
    }

    fn daemon_app_id(&self) -> DaemonId {
        DaemonId::new(1)
    }

    fn proctable(&self) -> &Proctable {
        &self.proctable
    }

    fn toolpath(&self) -> PathBuf {
        self.driver.toolpath.clone()
    }

    fn launcher_hostname(&self) -> Result<String, WlmError> {
        Ok("login01".to_string())
    }

    fn release_barrier(&self) -> Result<(), WlmError> {
        let mut held = self.held.lock();
        if !*held {
            return Err(WlmError::BarrierReleased);
        }
        *held = false;
        self.driver.events.lock().barrier_releases += 1;
        Ok(())
    }

    fn kill(&self, signo: i32) -> Result<(), WlmError> {
        self.driver.events.lock().signals.push(signo);
        if signo == 9 {
            self.alive.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn ship_package(&self, package: &Path, dest_name: &str) -> Result<(), WlmError> {
        if self.driver.fail_ships.load(Ordering::SeqCst) > 0 {
            self.driver.fail_ships.fetch_sub(1, Ordering::SeqCst);
            return Err(WlmError::CommandFailed {
                command: "mock ship".to_string(),
                status: 1,
                stderr: "scripted broadcast failure".to_string(),
            });
        }

        // Tar payloads get their entry list recorded; raw files (the
        // backend launcher binary) record as entry-less ships.
        let entries = (|| -> std::io::Result<Vec<String>> {
            let file = std::fs::File::open(package)?;
            let mut archive = tar::Archive::new(file);
            archive
                .entries()?
                .map(|entry| {
                    entry.and_then(|e| e.path().map(|path| path.to_string_lossy().into_owned()))
                })
                .collect()
        })()
        .unwrap_or_default();

        self.driver
            .events
            .lock()
            .shipped
            .push(ShippedPackage { dest_name: dest_name.to_string(), entries });
        Ok(())
    }

    fn start_daemon(
        &self,
        args: &[String],
        env: &[String],
        synchrony: Synchrony,
    ) -> Result<(), WlmError> {
        self.driver.events.lock().daemons.push(DaemonStart {
            args: args.to_vec(),
            env: env.to_vec(),
            synchronous: synchrony == Synchrony::Sync,
        });
        Ok(())
    }

    fn check_files(&self, paths: &BTreeSet<PathBuf>) -> Result<BTreeSet<PathBuf>, WlmError> {
        let preinstalled = self.driver.preinstalled.lock();
        Ok(paths.intersection(&preinstalled).cloned().collect())
    }

    fn is_running(&self) -> Result<bool, WlmError> {
        Ok(self.alive.load(Ordering::SeqCst))
    }

    fn deregister(&self) -> Result<(), WlmError> {
        self.driver.events.lock().deregistered += 1;
        Ok(())
    }
}
